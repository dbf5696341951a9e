/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Following the branch of one remote miner.
//!
//! A remote miner's branch is tracked by a block tree tag, `remote.<url>`. Headers are requested one
//! height at a time, moving forward from the tagged node while the remote has headers to give, and
//! backward while the received headers do not connect to the tree. Headers received while walking
//! backward are held as *dangling* until one of them connects, at which point the whole run is
//! inserted.

use crate::block_tree::{AppendCheck, BlockTree, NodeId};
use crate::messenger::{Messenger, MessengerResponse, RequestKind};
use crate::types::{block::BlockHeader, data_types::BlockHeight};

/// Prefix of the block tree tags of remote miners.
pub const REMOTE_TAG_PREFIX: &str = "remote.";

#[derive(Clone, Debug)]
pub struct RemoteMiner {
    url: String,
    miner_id: Option<String>,
    tag: String,
    next_height: BlockHeight,
    /// When the outstanding header request was sent, if there is one.
    pending: Option<u64>,
    wait_until: u64,
    is_online: bool,
    dangling: Vec<BlockHeader>,
    pub(crate) accepted_release: u64,
    pub(crate) next_release: u64,
}

impl RemoteMiner {
    pub fn new(url: &str, start_height: BlockHeight) -> RemoteMiner {
        RemoteMiner {
            url: url.to_string(),
            miner_id: None,
            tag: format!("{}{}", REMOTE_TAG_PREFIX, url),
            next_height: start_height,
            pending: None,
            wait_until: 0,
            is_online: false,
            dangling: Vec::new(),
            accepted_release: 0,
            next_release: 0,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn miner_id(&self) -> Option<&str> {
        self.miner_id.as_deref()
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn is_online(&self) -> bool {
        self.is_online
    }

    /// Whether the remote miner is online and its branch reaches within `lookahead` blocks of
    /// `ledger_height`.
    pub fn is_contributor(&self, tree: &BlockTree, ledger_height: u64, lookahead: u64) -> bool {
        if !self.is_online {
            return false;
        }
        match tree.tagged(&self.tag) {
            Some(id) => tree.node(id).height().int().saturating_add(lookahead) >= ledger_height,
            None => false,
        }
    }

    /// Request the next header, unless a request is outstanding, the remote miner is being waited out,
    /// or its branch is already `lookahead` blocks past the ledger.
    pub fn update<M: Messenger>(&mut self, messenger: &mut M, ledger_height: u64, lookahead: u64, now: u64, retry_interval: u64) {
        if let Some(sent_at) = self.pending {
            if now < sent_at.saturating_add(retry_interval) {
                return;
            }
            self.pending = None;
        }
        if now < self.wait_until {
            return;
        }
        if self.dangling.is_empty() && self.next_height.int() > ledger_height.saturating_add(lookahead) {
            return;
        }

        messenger.request_header(self.miner_id.as_deref().unwrap_or(""), &self.url, self.next_height);
        self.pending = Some(now);
    }

    /// Take in a response from this remote miner. Header responses are applied to `tree`.
    ///
    /// Returns the nodes inserted into the tree.
    pub fn receive_response(
        &mut self,
        response: &MessengerResponse,
        tree: &mut BlockTree,
        now: u64,
        retry_interval: u64,
    ) -> Vec<NodeId> {
        let Some(miner_id) = &response.miner_id else {
            self.is_online = false;
            self.pending = None;
            self.wait_until = now.saturating_add(retry_interval);
            return Vec::new();
        };

        self.is_online = true;
        self.miner_id = Some(miner_id.clone());
        self.accepted_release = response.accepted_release;
        self.next_release = response.next_release;

        match response.request.kind {
            RequestKind::Header(height) => {
                self.pending = None;
                self.receive_header(height, response.header.as_ref(), tree, now, retry_interval)
            }
            _ => Vec::new(),
        }
    }

    fn receive_header(
        &mut self,
        height: BlockHeight,
        header: Option<&BlockHeader>,
        tree: &mut BlockTree,
        now: u64,
        retry_interval: u64,
    ) -> Vec<NodeId> {
        let Some(header) = header.filter(|header| header.height == height) else {
            // The remote's branch is shorter than asked: walk back to find where it now ends.
            self.dangling.clear();
            let floor = self.floor(tree);
            self.next_height = match height.parent() {
                Some(parent) if parent >= floor => parent,
                _ => floor,
            };
            return Vec::new();
        };

        match tree.check_append(header) {
            AppendCheck::Ok | AppendCheck::AlreadyExists => {
                let mut inserted = Vec::new();
                let is_new = tree.find(&header.digest()).is_none();
                let Some(mut cursor) = tree.affirm(&self.tag, header.clone(), None, false) else {
                    return inserted;
                };
                if is_new {
                    inserted.push(cursor);
                }

                while let Some(dangling) = self.dangling.pop() {
                    if !tree.node(cursor).header().is_parent_of(&dangling) {
                        break;
                    }
                    match tree.check_append(&dangling) {
                        AppendCheck::Ok => match tree.affirm(&self.tag, dangling, None, false) {
                            Some(id) => {
                                inserted.push(id);
                                cursor = id;
                            }
                            None => break,
                        },
                        AppendCheck::AlreadyExists => match tree.find(&dangling.digest()) {
                            Some(id) => {
                                tree.tag(&self.tag, id);
                                cursor = id;
                            }
                            None => break,
                        },
                        _ => break,
                    }
                }
                self.dangling.clear();
                self.next_height = tree.node(cursor).height() + 1;
                inserted
            }
            AppendCheck::MissingParent => {
                let connects = self
                    .dangling
                    .last()
                    .map_or(false, |lowest| header.is_parent_of(lowest));
                if !connects {
                    self.dangling.clear();
                }
                self.dangling.push(header.clone());
                self.next_height = match height.parent() {
                    Some(parent) => parent,
                    None => height,
                };
                Vec::new()
            }
            AppendCheck::Refused | AppendCheck::TooSoon => {
                log::warn!(
                    "remote miner {} sent an unacceptable header at height {}",
                    self.url,
                    header.height
                );
                self.dangling.clear();
                self.next_height = self.floor(tree);
                self.wait_until = now.saturating_add(retry_interval);
                Vec::new()
            }
        }
    }

    /// Height to resume following the remote's branch from: just past its tag, or the tree's root.
    fn floor(&self, tree: &BlockTree) -> BlockHeight {
        match (tree.tagged(&self.tag), tree.root()) {
            (Some(tag), _) => tree.node(tag).height() + 1,
            (None, Some(root)) => tree.node(root).height(),
            (None, None) => BlockHeight::new(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messenger::MessengerRequest;
    use crate::types::{
        block::Block,
        crypto_primitives::{make_visage, Keypair, SigningKey},
    };

    fn chain(length: u64) -> Vec<Block> {
        let keypair = Keypair::new(SigningKey::from_bytes(&[3; 32]));
        let visage = make_visage(&keypair, "bob");
        let mut blocks = vec![Block::genesis(BlockHeader::genesis(0, 10, 600), Vec::new())];
        for i in 1..=length {
            let parent = &blocks[blocks.len() - 1].header;
            let block = Block::new(parent.next("bob", &keypair, visage, i * 10, 0), 0, Vec::new()).sign(&keypair);
            blocks.push(block);
        }
        blocks
    }

    fn header_response(url: &str, height: u64, header: Option<BlockHeader>) -> MessengerResponse {
        let mut response = MessengerResponse::unreachable(MessengerRequest::header("bob", url, BlockHeight::new(height)));
        response.miner_id = Some(String::from("bob"));
        response.header = header;
        response
    }

    #[test]
    fn dangling_headers_connect_once_a_parent_is_found() {
        let blocks = chain(3);
        let mut tree = BlockTree::new();
        tree.affirm("working", blocks[0].header.clone(), Some(blocks[0].clone()), false)
            .unwrap();
        let mut remote = RemoteMiner::new("bob.test", BlockHeight::new(3));

        let inserted = remote.receive_response(&header_response("bob.test", 3, Some(blocks[3].header.clone())), &mut tree, 0, 5);
        assert!(inserted.is_empty());
        assert_eq!(remote.next_height, BlockHeight::new(2));

        remote.receive_response(&header_response("bob.test", 2, Some(blocks[2].header.clone())), &mut tree, 0, 5);
        assert_eq!(remote.next_height, BlockHeight::new(1));

        let inserted = remote.receive_response(&header_response("bob.test", 1, Some(blocks[1].header.clone())), &mut tree, 0, 5);
        assert_eq!(inserted.len(), 3);
        assert_eq!(tree.node(tree.tagged(remote.tag()).unwrap()).digest(), blocks[3].digest());
        assert_eq!(remote.next_height, BlockHeight::new(4));
        assert!(remote.is_online());
        assert!(remote.is_contributor(&tree, 1, 10));
    }

    #[test]
    fn unreachable_remotes_go_offline() {
        let mut tree = BlockTree::new();
        let genesis = Block::genesis(BlockHeader::genesis(0, 10, 600), Vec::new());
        tree.affirm("working", genesis.header.clone(), Some(genesis), false).unwrap();
        let mut remote = RemoteMiner::new("bob.test", BlockHeight::new(0));

        let response = MessengerResponse::unreachable(MessengerRequest::header("", "bob.test", BlockHeight::new(0)));
        remote.receive_response(&response, &mut tree, 100, 5);
        assert!(!remote.is_online());
        assert_eq!(remote.wait_until, 105);
        assert!(!remote.is_contributor(&tree, 0, 10));
    }
}
