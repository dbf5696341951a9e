/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that log out events.
//!
//! The logs defined in this module are printed if the user enabled them via the node's
//! [configuration](crate::config::Configuration).
//!
//! The miner logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
//! printed onto a terminal or to a file, set up a
//! [logging implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
//!
//! ## Log message format
//!
//! Log messages are CSVs (Comma Separated Values) with at least two values. The first two values are
//! always:
//! 1. The name of the [event](crate::events) in PascalCase (defined in this module as constants).
//! 2. The time the event was emitted (as number of seconds since the Unix Epoch).
//!
//! The rest of the values differ depending on the kind of event. For example, the following snippet
//! is how a [PushBlock](crate::events::PushBlockEvent) is printed:
//!
//! ```text
//! PushBlock, 1701329264, fNGCJyk, 12, alice
//! ```
//!
//! In the snippet:
//! - The third value is the first seven characters of the Base64 encoding of the digest of the block.
//! - The fourth value is the height of the block.
//! - The fifth value is the id of the miner that produced the block.

use std::time::SystemTime;

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};

use crate::events::*;
use crate::messenger::RequestKind;

// Names of each event in PascalCase for printing:
pub const INSERT_HEADER: &str = "InsertHeader";
pub const COMPLETE_BLOCK: &str = "CompleteBlock";
pub const MARK_NODE: &str = "MarkNode";
pub const SELECT_BRANCH: &str = "SelectBranch";

pub const PUSH_BLOCK: &str = "PushBlock";
pub const REVERT_LEDGER: &str = "RevertLedger";
pub const MINE_BLOCK: &str = "MineBlock";
pub const PERSIST_LEDGER: &str = "PersistLedger";

pub const RECEIVE_RESPONSE: &str = "ReceiveResponse";
pub const AFFIRM_REMOTE_MINER: &str = "AffirmRemoteMiner";

/// Implemented by event types. Used to get a closure that logs the event.
pub(crate) trait Logger {
    /// Returns a pointer to the default logging handler for a given event type.
    fn get_logger() -> Box<dyn Fn(&Self) + Send>;
}

impl Logger for InsertHeaderEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |insert_header_event: &InsertHeaderEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                INSERT_HEADER,
                secs_since_unix_epoch(insert_header_event.timestamp),
                first_seven_base64_chars(&insert_header_event.digest.bytes()),
                insert_header_event.height,
                insert_header_event.miner_id,
                insert_header_event.is_provisional
            )
        };
        Box::new(logger)
    }
}

impl Logger for CompleteBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |complete_block_event: &CompleteBlockEvent| {
            log::info!(
                "{}, {}, {}, {}",
                COMPLETE_BLOCK,
                secs_since_unix_epoch(complete_block_event.timestamp),
                first_seven_base64_chars(&complete_block_event.digest.bytes()),
                complete_block_event.height
            )
        };
        Box::new(logger)
    }
}

impl Logger for MarkNodeEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |mark_node_event: &MarkNodeEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                MARK_NODE,
                secs_since_unix_epoch(mark_node_event.timestamp),
                first_seven_base64_chars(&mark_node_event.digest.bytes()),
                mark_node_event.height,
                mark_node_event.status
            )
        };
        Box::new(logger)
    }
}

impl Logger for SelectBranchEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |select_branch_event: &SelectBranchEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                SELECT_BRANCH,
                secs_since_unix_epoch(select_branch_event.timestamp),
                first_seven_base64_chars(&select_branch_event.digest.bytes()),
                select_branch_event.height,
                select_branch_event.consensus_height
            )
        };
        Box::new(logger)
    }
}

impl Logger for PushBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |push_block_event: &PushBlockEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                PUSH_BLOCK,
                secs_since_unix_epoch(push_block_event.timestamp),
                first_seven_base64_chars(&push_block_event.digest.bytes()),
                push_block_event.height,
                push_block_event.miner_id
            )
        };
        Box::new(logger)
    }
}

impl Logger for RevertLedgerEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |revert_ledger_event: &RevertLedgerEvent| {
            log::info!(
                "{}, {}, {}",
                REVERT_LEDGER,
                secs_since_unix_epoch(revert_ledger_event.timestamp),
                revert_ledger_event.version
            )
        };
        Box::new(logger)
    }
}

impl Logger for MineBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |mine_block_event: &MineBlockEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                MINE_BLOCK,
                secs_since_unix_epoch(mine_block_event.timestamp),
                first_seven_base64_chars(&mine_block_event.digest.bytes()),
                mine_block_event.height,
                mine_block_event.transactions,
                mine_block_event.reward
            )
        };
        Box::new(logger)
    }
}

impl Logger for PersistLedgerEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |persist_ledger_event: &PersistLedgerEvent| {
            log::info!(
                "{}, {}, {}, {}",
                PERSIST_LEDGER,
                secs_since_unix_epoch(persist_ledger_event.timestamp),
                persist_ledger_event.label,
                persist_ledger_event.version
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceiveResponseEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |receive_response_event: &ReceiveResponseEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                RECEIVE_RESPONSE,
                secs_since_unix_epoch(receive_response_event.timestamp),
                receive_response_event.url,
                request_kind_info(&receive_response_event.kind),
                receive_response_event
                    .miner_id
                    .as_deref()
                    .unwrap_or("unreachable")
            )
        };
        Box::new(logger)
    }
}

impl Logger for AffirmRemoteMinerEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |affirm_remote_miner_event: &AffirmRemoteMinerEvent| {
            log::info!(
                "{}, {}, {}, {}",
                AFFIRM_REMOTE_MINER,
                secs_since_unix_epoch(affirm_remote_miner_event.timestamp),
                affirm_remote_miner_event.url,
                affirm_remote_miner_event.miner_id
            )
        };
        Box::new(logger)
    }
}

fn first_seven_base64_chars(bytes: &[u8]) -> String {
    let encoded = STANDARD_NO_PAD.encode(bytes);
    if encoded.len() > 7 {
        encoded[0..7].to_string()
    } else {
        encoded
    }
}

fn secs_since_unix_epoch(timestamp: SystemTime) -> u64 {
    timestamp
        .duration_since(SystemTime::UNIX_EPOCH)
        .expect("Event occured before the Unix Epoch.")
        .as_secs()
}

fn request_kind_info(kind: &RequestKind) -> String {
    match kind {
        RequestKind::Block(digest) => format!("Block {}", first_seven_base64_chars(&digest.bytes())),
        RequestKind::Header(height) => format!("Header {}", height),
        RequestKind::ExtendNetwork => String::from("ExtendNetwork"),
    }
}
