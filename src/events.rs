/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions of the events emitted by the miner, for event handling and logging.
//!
//! An event for a given action indicates that the action has been completed.

use std::sync::mpsc::Sender;
use std::time::SystemTime;

use crate::block_tree::NodeStatus;
use crate::messenger::RequestKind;
use crate::types::data_types::{BlockHeight, CryptoHash};

pub enum Event {
    // Events that change the block tree.
    InsertHeader(InsertHeaderEvent),
    CompleteBlock(CompleteBlockEvent),
    MarkNode(MarkNodeEvent),
    SelectBranch(SelectBranchEvent),
    // Events that change the ledger.
    PushBlock(PushBlockEvent),
    RevertLedger(RevertLedgerEvent),
    MineBlock(MineBlockEvent),
    PersistLedger(PersistLedgerEvent),
    // Events that involve remote miners.
    ReceiveResponse(ReceiveResponseEvent),
    AffirmRemoteMiner(AffirmRemoteMinerEvent),
}

impl Event {
    pub(crate) fn publish(event_publisher: &Option<Sender<Event>>, event: Event) {
        if let Some(event_publisher) = event_publisher {
            // Sending only fails after the event bus has shut down.
            let _ = event_publisher.send(event);
        }
    }
}

/// A header was inserted into the block tree.
pub struct InsertHeaderEvent {
    pub timestamp: SystemTime,
    pub digest: CryptoHash,
    pub height: BlockHeight,
    pub miner_id: String,
    pub is_provisional: bool,
}

/// The body of a block in the block tree was received and attached to its header.
pub struct CompleteBlockEvent {
    pub timestamp: SystemTime,
    pub digest: CryptoHash,
    pub height: BlockHeight,
}

/// A node of the block tree was marked missing or invalid.
pub struct MarkNodeEvent {
    pub timestamp: SystemTime,
    pub digest: CryptoHash,
    pub height: BlockHeight,
    pub status: NodeStatus,
}

/// The miner selected a new best branch.
pub struct SelectBranchEvent {
    pub timestamp: SystemTime,
    pub digest: CryptoHash,
    pub height: BlockHeight,
    pub consensus_height: BlockHeight,
}

pub struct PushBlockEvent {
    pub timestamp: SystemTime,
    pub digest: CryptoHash,
    pub height: BlockHeight,
    pub miner_id: String,
}

/// The working ledger was rewound to `version`.
pub struct RevertLedgerEvent {
    pub timestamp: SystemTime,
    pub version: u64,
}

/// The local miner produced and pushed a block.
pub struct MineBlockEvent {
    pub timestamp: SystemTime,
    pub digest: CryptoHash,
    pub height: BlockHeight,
    pub transactions: usize,
    pub reward: u64,
}

pub struct PersistLedgerEvent {
    pub timestamp: SystemTime,
    pub label: String,
    pub version: u64,
}

pub struct ReceiveResponseEvent {
    pub timestamp: SystemTime,
    pub url: String,
    pub kind: RequestKind,
    /// Id reported by the remote miner; `None` if it could not be reached.
    pub miner_id: Option<String>,
}

/// A remote miner was discovered, or its id became known.
pub struct AffirmRemoteMinerEvent {
    pub timestamp: SystemTime,
    pub url: String,
    pub miner_id: String,
}
