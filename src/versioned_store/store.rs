/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

use std::{
    collections::BTreeMap,
    sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use borsh::{BorshDeserialize, BorshSerialize};

use super::epoch::{ClientId, EpochPool};

/// A handle onto a versioned key-value store.
///
/// Every handle reads and writes at its own version. Cloning a handle is cheap: the clone shares all
/// of the history of the handle it was cloned from, and only branches into its own epoch once one of
/// the two writes at a version the other can see.
pub struct VersionedStore {
    pool: Arc<RwLock<EpochPool>>,
    client: ClientId,
}

impl VersionedStore {
    /// Create an empty store at version 0.
    pub fn new() -> VersionedStore {
        let mut pool = EpochPool::new();
        let client = pool.register_client(pool.root(), 0);
        VersionedStore {
            pool: Arc::new(RwLock::new(pool)),
            client,
        }
    }

    /// Create a store at `version` holding `history`, a list of `(version, value)` entries per key.
    pub fn from_history(version: u64, history: BTreeMap<String, Vec<(u64, Vec<u8>)>>) -> VersionedStore {
        let mut pool = EpochPool::from_history(history);
        let client = pool.register_client(pool.root(), version);
        VersionedStore {
            pool: Arc::new(RwLock::new(pool)),
            client,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, EpochPool> {
        // A poisoned lock means a writer panicked on a structural fault; there is nothing to recover.
        self.pool
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, EpochPool> {
        self.pool
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The version this handle reads at and writes to.
    pub fn version(&self) -> u64 {
        self.read().cursor(self.client).version
    }

    /// Get the raw value of `key` as of the current version.
    pub fn get_raw(&self, key: &str) -> Option<Vec<u8>> {
        let pool = self.read();
        let version = pool.cursor(self.client).version;
        pool.get(self.client, version, key)
    }

    /// Get the raw value of `key` as of `version`, which must not exceed the current version.
    pub fn get_raw_at(&self, version: u64, key: &str) -> Option<Vec<u8>> {
        self.read().get(self.client, version, key)
    }

    pub fn has_key(&self, key: &str) -> bool {
        self.get_raw(key).is_some()
    }

    /// Get the value of `key` as of the current version, deserialized as `T`.
    pub fn get<T: BorshDeserialize>(&self, key: &str) -> Result<Option<T>, std::io::Error> {
        match self.get_raw(key) {
            Some(bytes) => T::deserialize(&mut bytes.as_slice()).map(Some),
            None => Ok(None),
        }
    }

    /// Write `value` at the current version.
    pub fn set_raw(&mut self, key: &str, value: Vec<u8>) {
        self.write().set(self.client, key, value)
    }

    /// Serialize `value` and write it at the current version.
    pub fn set<T: BorshSerialize>(&mut self, key: &str, value: &T) -> Result<(), std::io::Error> {
        let bytes = value.try_to_vec()?;
        self.set_raw(key, bytes);
        Ok(())
    }

    /// Move to the next, initially empty, version.
    pub fn push_version(&mut self) {
        self.write().push_version(self.client)
    }

    /// Move into a private epoch branched at the current version. The writes already made at the
    /// current version stay visible.
    pub fn push_epoch(&mut self) {
        self.write().push_epoch(self.client)
    }

    /// Discard every write at or above `version`, and move to `version`.
    ///
    /// # Panics
    ///
    /// Panics if `version` is above the current version.
    pub fn revert(&mut self, version: u64) {
        self.write().revert(self.client, version)
    }

    /// Garbage-collect layers and epochs no handle depends on any more.
    pub fn optimize(&self) {
        self.write().optimize()
    }

    /// Every `(version, value)` entry visible at the current version, per key.
    pub fn history(&self) -> BTreeMap<String, Vec<(u64, Vec<u8>)>> {
        self.read().history(self.client)
    }

    /// Number of live epochs shared by this handle and its clones.
    pub fn count_epochs(&self) -> usize {
        self.read().count_epochs()
    }

    /// Number of epochs this handle's reads may walk through.
    pub fn chain_depth(&self) -> usize {
        self.read().chain_depth(self.client)
    }
}

impl Default for VersionedStore {
    fn default() -> Self {
        VersionedStore::new()
    }
}

impl Clone for VersionedStore {
    fn clone(&self) -> Self {
        let client = self.write().clone_client(self.client);
        VersionedStore {
            pool: self.pool.clone(),
            client,
        }
    }
}

impl Drop for VersionedStore {
    fn drop(&mut self) {
        self.write().drop_client(self.client)
    }
}
