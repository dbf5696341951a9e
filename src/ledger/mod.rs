/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The ledger: a typed façade over a [`VersionedStore`].
//!
//! The version of the ledger is the number of blocks applied to it. [`Ledger::push_block`] applies
//! exactly one block (the one whose height equals the current version) and advances the version;
//! [`Ledger::revert_and_clear`] moves back to an earlier version, discarding every block at or above it.
//!
//! Where each variable lives is documented in [`keys`]. The rules for applying a block are in
//! [`Block::apply`](crate::types::block::Block::apply), and those for applying a single transaction
//! are in [`Transaction::apply`](crate::types::transaction::Transaction::apply).
//!
//! Cloning a ledger is cheap, and the clone is independent: writes to either are invisible to the other.

pub mod keys;

pub mod errors;
pub use errors::{BlockVerifyError, LedgerError, StorageError, TransactionError};

mod accounts;
pub use accounts::MASTER_KEY_NAME;

mod block_application;
pub use block_application::{AppliedTransactions, PendingTransaction, TransactionFees};

mod monetary;

mod transaction_application;

use std::sync::Arc;

use borsh::{BorshDeserialize, BorshSerialize};

use crate::{
    types::{
        block::{Block, BlockHeader, VerificationPolicy},
        crypto_primitives::hash_parts,
        data_types::{BlockHeight, CryptoHash, SignatureBytes},
        records::{Schema, UnfinishedBlockList},
        transaction::Transaction,
    },
    versioned_store::VersionedStore,
};

/// The part of a block stored apart from its header.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct BlockBody {
    pub reward: u64,
    pub transactions: Vec<Transaction>,
}

#[derive(Clone)]
pub struct Ledger {
    store: VersionedStore,
    schema_cache: Option<Arc<Schema>>,
}

impl Ledger {
    /// Create an empty ledger. The first block pushed must be a genesis block.
    pub fn new() -> Ledger {
        Ledger::from_store(VersionedStore::new())
    }

    /// Wrap a store, e.g. one restored from persistence.
    pub fn from_store(store: VersionedStore) -> Ledger {
        Ledger {
            store,
            schema_cache: None,
        }
    }

    pub fn store(&self) -> &VersionedStore {
        &self.store
    }

    /// The version of the ledger, which is also the height of the next block to be pushed.
    pub fn version(&self) -> u64 {
        self.store.version()
    }

    /// Number of blocks applied to the ledger, including the genesis block.
    pub fn count_blocks(&self) -> u64 {
        self.store.version()
    }

    /* ↓↓↓ Typed access ↓↓↓ */

    pub(crate) fn get_value<T: BorshDeserialize>(&self, key: &str) -> Result<Option<T>, StorageError> {
        self.store
            .get(key)
            .map_err(|source| StorageError::DeserializeValueError {
                key: key.to_string(),
                source,
            })
    }

    pub(crate) fn get_expected<T: BorshDeserialize>(&self, key: &str) -> Result<T, StorageError> {
        self.get_value(key)?
            .ok_or_else(|| StorageError::ValueExpectedButNotFound {
                key: key.to_string(),
            })
    }

    pub(crate) fn get_or_default<T: BorshDeserialize + Default>(&self, key: &str) -> Result<T, StorageError> {
        Ok(self.get_value(key)?.unwrap_or_default())
    }

    pub(crate) fn set_value<T: BorshSerialize>(&mut self, key: &str, value: &T) -> Result<(), StorageError> {
        self.store
            .set(key, value)
            .map_err(|source| StorageError::SerializeValueError {
                key: key.to_string(),
                source,
            })
    }

    /* ↓↓↓ Chain ↓↓↓ */

    pub fn identity(&self) -> Result<Option<String>, StorageError> {
        self.get_value(keys::IDENTITY)
    }

    pub fn genesis_hash(&self) -> Result<Option<CryptoHash>, StorageError> {
        self.get_value(keys::GENESIS_HASH)
    }

    pub fn block_delay(&self) -> Result<u64, StorageError> {
        self.get_or_default(keys::BLOCK_DELAY)
    }

    pub fn rewrite_window(&self) -> Result<u64, StorageError> {
        self.get_or_default(keys::REWRITE_WINDOW)
    }

    pub fn max_block_weight(&self) -> Result<u64, StorageError> {
        self.get_or_default(keys::MAX_BLOCK_WEIGHT)
    }

    pub fn entropy(&self) -> Result<CryptoHash, StorageError> {
        self.get_or_default(keys::ENTROPY)
    }

    /// Extend the entropy chain with the pose of `header`.
    pub(crate) fn apply_entropy(&mut self, header: &BlockHeader) -> Result<(), StorageError> {
        let entropy = self.entropy()?;
        let next = hash_parts(&[&entropy.bytes(), &header.pose.bytes()]);
        self.set_value(keys::ENTROPY, &next)
    }

    /* ↓↓↓ Blocks ↓↓↓ */

    pub fn block_hash(&self, height: BlockHeight) -> Result<Option<CryptoHash>, StorageError> {
        self.get_value(&keys::block_hash(height))
    }

    pub fn header(&self, height: BlockHeight) -> Result<Option<BlockHeader>, StorageError> {
        self.get_value(&keys::block_header(height))
    }

    pub fn pose(&self, height: BlockHeight) -> Result<Option<SignatureBytes>, StorageError> {
        self.get_value(&keys::block_pose(height))
    }

    pub fn block(&self, height: BlockHeight) -> Result<Option<Block>, StorageError> {
        let Some(header) = self.header(height)? else {
            return Ok(None);
        };
        let body: BlockBody = self.get_expected(&keys::block_body(height))?;
        Ok(Some(Block {
            header,
            reward: body.reward,
            transactions: body.transactions,
        }))
    }

    /// Height of the block with `digest`, if it is on this ledger's chain.
    pub fn height_for_digest(&self, digest: &CryptoHash) -> Result<Option<BlockHeight>, StorageError> {
        self.get_value(&keys::block_height_for_digest(digest))
    }

    pub fn block_for_digest(&self, digest: &CryptoHash) -> Result<Option<Block>, StorageError> {
        match self.height_for_digest(digest)? {
            Some(height) => self.block(height),
            None => Ok(None),
        }
    }

    /// Header of the most recently applied block.
    pub fn head_header(&self) -> Result<Option<BlockHeader>, StorageError> {
        match BlockHeight::new(self.version()).parent() {
            Some(height) => self.header(height),
            None => Ok(None),
        }
    }

    pub fn head_block(&self) -> Result<Option<Block>, StorageError> {
        match BlockHeight::new(self.version()).parent() {
            Some(height) => self.block(height),
            None => Ok(None),
        }
    }

    /// Protocol release of the most recently applied block.
    pub fn release(&self) -> Result<u64, StorageError> {
        Ok(self.head_header()?.map_or(0, |header| header.release))
    }

    /// Record `block` under its height.
    pub(crate) fn set_block(&mut self, block: &Block) -> Result<(), StorageError> {
        let height = block.height();
        let digest = block.digest();
        self.set_value(&keys::block_hash(height), &digest)?;
        self.set_value(&keys::block_header(height), &block.header)?;
        self.set_value(
            &keys::block_body(height),
            &BlockBody {
                reward: block.reward,
                transactions: block.transactions.clone(),
            },
        )?;
        self.set_value(&keys::block_pose(height), &block.header.pose)?;
        self.set_value(&keys::block_height_for_digest(&digest), &height)
    }

    /// Record the genesis hash if the ledger has none yet.
    pub(crate) fn init_genesis_hash(&mut self, digest: &CryptoHash) -> Result<(), StorageError> {
        if self.genesis_hash()?.is_none() {
            self.set_value(keys::GENESIS_HASH, digest)?;
        }
        Ok(())
    }

    /* ↓↓↓ Versions ↓↓↓ */

    /// Apply `block` and advance the ledger by one version.
    ///
    /// On failure the ledger is left exactly as it was before the call.
    pub fn push_block(&mut self, block: &Block, policy: VerificationPolicy) -> Result<(), LedgerError> {
        let version = self.version();
        match block.apply(self, policy) {
            Ok(()) => {
                self.store.push_version();
                Ok(())
            }
            Err(err) => {
                self.revert_and_clear(version);
                Err(err)
            }
        }
    }

    /// Rewind to `version`, discarding every block at or above it.
    ///
    /// # Panics
    ///
    /// Panics if `version` is above the current version.
    pub fn revert(&mut self, version: u64) {
        self.store.revert(version);
    }

    /// Rewind to `version`, discarding every block at or above it, and drop cached derived state.
    pub fn revert_and_clear(&mut self, version: u64) {
        self.store.revert(version);
        self.schema_cache = None;
    }

    /// Garbage-collect history no ledger handle depends on any more.
    pub fn optimize(&self) {
        self.store.optimize();
    }

    /* ↓↓↓ Unfinished blocks ↓↓↓ */

    pub fn unfinished(&self) -> Result<UnfinishedBlockList, StorageError> {
        self.get_or_default(keys::UNFINISHED)
    }

    pub(crate) fn set_unfinished(&mut self, unfinished: &UnfinishedBlockList) -> Result<(), StorageError> {
        self.set_value(keys::UNFINISHED, unfinished)
    }

    /* ↓↓↓ Schema ↓↓↓ */

    /// The published schema, cached until the next [`revert_and_clear`](Self::revert_and_clear) or
    /// publication.
    pub fn schema(&mut self) -> Result<Arc<Schema>, StorageError> {
        if let Some(schema) = &self.schema_cache {
            return Ok(schema.clone());
        }
        let schema = Arc::new(self.read_schema()?);
        self.schema_cache = Some(schema.clone());
        Ok(schema)
    }

    /// The published schema, read without touching the cache.
    pub fn read_schema(&self) -> Result<Schema, StorageError> {
        self.get_or_default(keys::SCHEMA)
    }

    /// Digest of the published schema.
    pub fn schema_hash(&self) -> Result<CryptoHash, StorageError> {
        let schema = self.read_schema()?;
        let bytes = schema.try_to_vec().map_err(|source| StorageError::SerializeValueError {
            key: keys::SCHEMA.to_string(),
            source,
        })?;
        Ok(hash_parts(&[&bytes]))
    }

    pub(crate) fn publish_schema(&mut self, update: &Schema) -> Result<(), StorageError> {
        let mut schema = self.read_schema()?;
        schema.compose(update);
        self.set_value(keys::SCHEMA, &schema)?;
        self.schema_cache = None;
        Ok(())
    }
}

impl Default for Ledger {
    fn default() -> Self {
        Ledger::new()
    }
}
