/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Traits for pluggable ledger persistence.

use std::fmt::{self, Display, Formatter};

use borsh::BorshDeserialize;

use super::keys;

pub trait KVStore: KVGet + Clone + Send + 'static {
    type WriteBatch: WriteBatch;
    type Snapshot<'a>: 'a + KVGet;

    /// Apply every write in `wb` atomically.
    fn write(&mut self, wb: Self::WriteBatch);
    fn clear(&mut self);
    fn snapshot<'b>(&'b self) -> Self::Snapshot<'_>;
}

pub trait KVGet {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;

    /* ↓↓↓ Persisted version ↓↓↓ */

    fn persisted_version(&self, label: &str) -> Result<Option<u64>, KVGetError> {
        self.get_value(&keys::version(label), || Key::Version {
            label: label.to_string(),
        })
    }

    /* ↓↓↓ Persisted keys ↓↓↓ */

    fn persisted_keys(&self, label: &str) -> Result<Vec<String>, KVGetError> {
        Ok(self
            .get_value(&keys::key_list(label), || Key::KeyList {
                label: label.to_string(),
            })?
            .unwrap_or_default())
    }

    /* ↓↓↓ Persisted history of one key ↓↓↓ */

    fn persisted_history(&self, label: &str, key: &str) -> Result<Vec<(u64, Vec<u8>)>, KVGetError> {
        self.get_value(&keys::history(label, key), || Key::History {
            label: label.to_string(),
            key: key.to_string(),
        })?
        .ok_or(KVGetError::ValueExpectedButNotFound {
            key: Key::History {
                label: label.to_string(),
                key: key.to_string(),
            },
        })
    }

    fn get_value<T: BorshDeserialize>(
        &self,
        key: &[u8],
        describe: impl FnOnce() -> Key,
    ) -> Result<Option<T>, KVGetError> {
        match self.get(key) {
            Some(bytes) => T::deserialize(&mut bytes.as_slice())
                .map(Some)
                .map_err(|source| KVGetError::DeserializeValueError {
                    key: describe(),
                    source,
                }),
            None => Ok(None),
        }
    }
}

pub trait WriteBatch {
    fn new() -> Self;
    fn set(&mut self, key: &[u8], value: &[u8]);
    fn delete(&mut self, key: &[u8]);
}

/// Error when trying to read a value corresponding to a given key from the [key value store][KVStore].
/// The error may arise in the following circumstances:
/// 1. The value corresponding to a given key cannot be deserialized into its expected type,
/// 2. The value corresponding to a given key cannot be found.
#[derive(Debug)]
pub enum KVGetError {
    DeserializeValueError { key: Key, source: std::io::Error },
    ValueExpectedButNotFound { key: Key },
}

impl Display for KVGetError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            KVGetError::DeserializeValueError { key, source } => {
                write!(f, "failed to deserialize {}: {}", key, source)
            }
            KVGetError::ValueExpectedButNotFound { key } => write!(f, "{} expected but not found", key),
        }
    }
}

impl std::error::Error for KVGetError {}

#[derive(Debug)]
pub enum Key {
    Version { label: String },
    KeyList { label: String },
    History { label: String, key: String },
}

impl Display for Key {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Key::Version { label } => write!(f, "Version of snapshot {}", label),
            Key::KeyList { label } => write!(f, "Key list of snapshot {}", label),
            Key::History { label, key } => write!(f, "History of {} in snapshot {}", key, label),
        }
    }
}
