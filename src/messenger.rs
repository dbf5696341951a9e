/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The pluggable messaging layer between the local miner and remote miners.
//!
//! The miner never blocks on the network. During a tick it enqueues requests through a [`Messenger`],
//! flushes them with [`send_requests`](Messenger::send_requests) at the end of the tick, and drains
//! whatever responses have arrived with [`recv`](Messenger::recv) at the start of the next one.
//!
//! A messenger may drop a request silently (for example on a timeout): the miner retries unanswered
//! requests on later ticks. It must however answer requests to the same URL in the order they were
//! made.

use crate::types::{
    block::{Block, BlockHeader},
    data_types::{BlockHeight, CryptoHash},
};

pub trait Messenger: Send {
    /// Ask the miner at `url` for the block with `digest`.
    fn request_block(&mut self, miner_id: &str, url: &str, digest: CryptoHash);

    /// Ask the miner at `url` for the header of the block at `height` on its current branch.
    fn request_header(&mut self, miner_id: &str, url: &str, height: BlockHeight);

    /// Ask the miner at `url` for the URLs of the miners it knows.
    fn request_peers(&mut self, url: &str);

    /// Send every request enqueued since the last call, without blocking.
    fn send_requests(&mut self);

    /// Receive a response. Returns immediately with `None` if no response is available now.
    fn recv(&mut self) -> Option<MessengerResponse>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RequestKind {
    Block(CryptoHash),
    Header(BlockHeight),
    ExtendNetwork,
}

/// A request as it was made, echoed back in its response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessengerRequest {
    pub kind: RequestKind,
    /// Id of the remote miner, if known when the request was made.
    pub miner_id: String,
    pub url: String,
}

impl MessengerRequest {
    pub fn block(miner_id: &str, url: &str, digest: CryptoHash) -> MessengerRequest {
        MessengerRequest {
            kind: RequestKind::Block(digest),
            miner_id: miner_id.to_string(),
            url: url.to_string(),
        }
    }

    pub fn header(miner_id: &str, url: &str, height: BlockHeight) -> MessengerRequest {
        MessengerRequest {
            kind: RequestKind::Header(height),
            miner_id: miner_id.to_string(),
            url: url.to_string(),
        }
    }

    pub fn extend_network(url: &str) -> MessengerRequest {
        MessengerRequest {
            kind: RequestKind::ExtendNetwork,
            miner_id: String::new(),
            url: url.to_string(),
        }
    }
}

/// What a remote miner answered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessengerResponse {
    pub request: MessengerRequest,
    /// Id the remote miner reports for itself. `None` if the remote could not be reached.
    pub miner_id: Option<String>,
    pub block: Option<Block>,
    pub header: Option<BlockHeader>,
    pub peer_urls: Vec<String>,
    /// Newest release the remote miner accepts in blocks.
    pub accepted_release: u64,
    /// Release the remote miner is running.
    pub next_release: u64,
}

impl MessengerResponse {
    /// A response reporting that the remote miner could not be reached.
    pub fn unreachable(request: MessengerRequest) -> MessengerResponse {
        MessengerResponse {
            request,
            miner_id: None,
            block: None,
            header: None,
            peer_urls: Vec::new(),
            accepted_release: 0,
            next_release: 0,
        }
    }
}
