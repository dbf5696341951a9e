/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Durable snapshots of the ledger.
//!
//! # Pluggable persistence
//!
//! - The miner keeps its working ledger in memory, and can snapshot it to persistent storage under a
//!   label (`"master"`) so that it survives a restart.
//! - Library users get to choose how exactly this is done, through the [`PersistenceProvider`] trait.
//! - [`KVPersistenceProvider`] implements it on top of any key-value store with atomic, batched writes.
//!   That abstract functionality is made concrete by the traits defined in the [`pluggables`] module.
//!
//! # Layout
//!
//! A snapshot labelled `label` is stored under the following keys:
//!
//! |Key|Value|
//! |---|---|
//! |`<label>/version`|Version of the ledger when it was persisted.|
//! |`<label>/keys`|Every ledger key with a value in the snapshot.|
//! |`<label>/history/<key>`|The `(version, value)` entries of `key` visible at the persisted version.|
//!
//! A snapshot is written in a single write batch, so a crash leaves either the previous snapshot or the
//! new one, never a mix.

pub mod pluggables;

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::{self, Display, Formatter},
};

use borsh::BorshSerialize;

use crate::versioned_store::VersionedStore;

use pluggables::{KVGet, KVGetError, KVStore, WriteBatch};

/// Persists and restores [`VersionedStore`] snapshots.
pub trait PersistenceProvider: Send {
    /// Durably replace the snapshot labelled `label` with the current state of `store`.
    fn persist(&mut self, store: &VersionedStore, label: &str) -> Result<(), PersistenceError>;

    /// Restore the snapshot labelled `label`, if there is one.
    fn restore(&self, label: &str) -> Result<Option<VersionedStore>, PersistenceError>;

    /// Read the latest value of `key` in the snapshot labelled `label`.
    fn read(&self, label: &str, key: &str) -> Result<Option<Vec<u8>>, PersistenceError>;
}

/// A [`PersistenceProvider`] storing snapshots in a [`KVStore`].
#[derive(Clone)]
pub struct KVPersistenceProvider<K: KVStore> {
    kv_store: K,
}

impl<K: KVStore> KVPersistenceProvider<K> {
    pub fn new(kv_store: K) -> KVPersistenceProvider<K> {
        KVPersistenceProvider { kv_store }
    }

    pub fn kv_store(&self) -> &K {
        &self.kv_store
    }
}

impl<K: KVStore> PersistenceProvider for KVPersistenceProvider<K> {
    fn persist(&mut self, store: &VersionedStore, label: &str) -> Result<(), PersistenceError> {
        let history = store.history();
        let previous_keys = self.kv_store.persisted_keys(label)?;

        let mut wb = K::WriteBatch::new();
        for key in previous_keys.iter().filter(|key| !history.contains_key(*key)) {
            wb.delete(&keys::history(label, key));
        }

        let key_list: Vec<String> = history.keys().cloned().collect();
        wb.set(&keys::key_list(label), &serialize(&keys::key_list(label), &key_list)?);
        for (key, entries) in &history {
            let storage_key = keys::history(label, key);
            wb.set(&storage_key, &serialize(&storage_key, entries)?);
        }
        wb.set(&keys::version(label), &serialize(&keys::version(label), &store.version())?);

        self.kv_store.write(wb);
        log::debug!(
            "persisted snapshot {} at version {} ({} keys)",
            label,
            store.version(),
            history.len()
        );
        Ok(())
    }

    fn restore(&self, label: &str) -> Result<Option<VersionedStore>, PersistenceError> {
        let snapshot = self.kv_store.snapshot();
        let Some(version) = snapshot.persisted_version(label)? else {
            return Ok(None);
        };

        let mut history = BTreeMap::new();
        let key_list: BTreeSet<String> = snapshot.persisted_keys(label)?.into_iter().collect();
        for key in key_list {
            let entries = snapshot.persisted_history(label, &key)?;
            history.insert(key, entries);
        }
        log::info!("restored snapshot {} at version {}", label, version);
        Ok(Some(VersionedStore::from_history(version, history)))
    }

    fn read(&self, label: &str, key: &str) -> Result<Option<Vec<u8>>, PersistenceError> {
        let snapshot = self.kv_store.snapshot();
        let Some(version) = snapshot.persisted_version(label)? else {
            return Ok(None);
        };
        if snapshot.get(&keys::history(label, key)).is_none() {
            return Ok(None);
        }
        let entries = snapshot.persisted_history(label, key)?;
        Ok(entries
            .into_iter()
            .rev()
            .find(|(entry_version, _)| *entry_version <= version)
            .map(|(_, value)| value))
    }
}

fn serialize<T: BorshSerialize>(key: &[u8], value: &T) -> Result<Vec<u8>, PersistenceError> {
    value
        .try_to_vec()
        .map_err(|source| PersistenceError::SerializeValueError {
            key: String::from_utf8_lossy(key).into_owned(),
            source,
        })
}

/// Keys of the snapshot layout.
pub(crate) mod keys {
    pub(crate) fn version(label: &str) -> Vec<u8> {
        format!("{}/version", label).into_bytes()
    }

    pub(crate) fn key_list(label: &str) -> Vec<u8> {
        format!("{}/keys", label).into_bytes()
    }

    pub(crate) fn history(label: &str, key: &str) -> Vec<u8> {
        format!("{}/history/{}", label, key).into_bytes()
    }
}

#[derive(Debug)]
pub enum PersistenceError {
    KVGetError(KVGetError),
    SerializeValueError { key: String, source: std::io::Error },
}

impl Display for PersistenceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            PersistenceError::KVGetError(err) => write!(f, "failed to read snapshot: {}", err),
            PersistenceError::SerializeValueError { key, source } => {
                write!(f, "failed to serialize {}: {}", key, source)
            }
        }
    }
}

impl std::error::Error for PersistenceError {}

impl From<KVGetError> for PersistenceError {
    fn from(value: KVGetError) -> Self {
        PersistenceError::KVGetError(value)
    }
}
