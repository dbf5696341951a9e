/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Read-only views of a running miner.
//!
//! At the end of every tick the miner publishes a [`MinerSnapshot`]: a summary of its status and a
//! clone of its ledger pinned to the version it reached. The snapshot is swapped in whole under a
//! lock, so readers on other threads never see half of one tick and half of the next. A
//! [`MinerCamera`] is a cloneable handle onto the latest snapshot.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::ledger::{Ledger, StorageError};
use crate::messenger::{MessengerRequest, MessengerResponse, RequestKind};
use crate::types::{
    block::{Block, BlockHeader},
    data_types::{AccountIndex, BlockHeight, CryptoHash},
    records::{Account, Schema},
};

/// Summary of a miner's state at the end of a tick.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MinerStatus {
    pub miner_id: String,
    pub url: String,
    pub identity: String,
    pub genesis_hash: CryptoHash,
    pub total_blocks: u64,
    pub best_digest: CryptoHash,
    pub best_height: BlockHeight,
    pub consensus_height: BlockHeight,
    pub reward_pool: u64,
    pub payout_pool: u64,
    pub minimum_gratuity: u64,
    pub reward: u64,
    pub accepted_release: u64,
    pub produced_release: u64,
    pub next_release: u64,
    pub is_miner: bool,
    pub miner_block_count: u64,
}

#[derive(Clone, Default)]
pub struct MinerSnapshot {
    pub status: MinerStatus,
    /// The working ledger, pinned to the version it had when the snapshot was taken.
    pub ledger: Ledger,
    /// URLs of the remote miners that answered their last request.
    pub online_urls: Vec<String>,
    /// URLs of every remote miner known.
    pub remote_urls: Vec<String>,
    pub transaction_errors: HashMap<String, String>,
    pub queued_transactions: usize,
}

/// A cloneable, thread-safe handle onto the latest [`MinerSnapshot`] of a miner.
#[derive(Clone, Default)]
pub struct MinerCamera(Arc<RwLock<MinerSnapshot>>);

impl MinerCamera {
    pub fn new() -> MinerCamera {
        MinerCamera::default()
    }

    /// A copy of the latest snapshot. Its ledger stays at its version however the miner moves on.
    pub fn snapshot(&self) -> MinerSnapshot {
        self.0
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn status(&self) -> MinerStatus {
        self.0
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .status
            .clone()
    }

    pub fn ledger(&self) -> Ledger {
        self.0
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .ledger
            .clone()
    }

    pub(crate) fn publish(&self, snapshot: MinerSnapshot) {
        *self.0.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = snapshot;
    }

    /* ↓↓↓ Queries ↓↓↓ */

    pub fn account(&self, name: &str) -> Result<Option<(AccountIndex, Account)>, StorageError> {
        self.ledger().account_by_name(name)
    }

    pub fn block(&self, height: BlockHeight) -> Result<Option<Block>, StorageError> {
        self.ledger().block(height)
    }

    pub fn block_for_digest(&self, digest: &CryptoHash) -> Result<Option<Block>, StorageError> {
        self.ledger().block_for_digest(digest)
    }

    pub fn header(&self, height: BlockHeight) -> Result<Option<BlockHeader>, StorageError> {
        self.ledger().header(height)
    }

    pub fn schema(&self) -> Result<Schema, StorageError> {
        self.ledger().read_schema()
    }

    /// Error recorded for a rejected transaction, if any.
    pub fn transaction_error(&self, uuid: &str) -> Option<String> {
        self.0
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .transaction_errors
            .get(uuid)
            .cloned()
    }

    /// Answer a request from another miner out of the latest snapshot.
    ///
    /// A snapshot that cannot be read yields an answer with no block or header, which the asking
    /// miner treats like a remote that does not have them.
    pub fn answer(&self, request: &MessengerRequest) -> MessengerResponse {
        let snapshot = self.snapshot();
        let mut response = MessengerResponse::unreachable(request.clone());
        response.miner_id = Some(snapshot.status.miner_id.clone());
        response.accepted_release = snapshot.status.accepted_release;
        response.next_release = snapshot.status.next_release;

        match &request.kind {
            RequestKind::Block(digest) => {
                response.block = snapshot.ledger.block_for_digest(digest).unwrap_or_else(|err| {
                    log::warn!("failed to read block {} from the snapshot: {}", digest, err);
                    None
                });
            }
            RequestKind::Header(height) => {
                response.header = snapshot.ledger.header(*height).unwrap_or_else(|err| {
                    log::warn!("failed to read header {} from the snapshot: {}", height, err);
                    None
                });
            }
            RequestKind::ExtendNetwork => {
                response.peer_urls = snapshot.remote_urls.clone();
                response.peer_urls.push(snapshot.status.url.clone());
            }
        }
        response
    }
}
