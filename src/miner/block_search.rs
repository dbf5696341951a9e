/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Fetching the bodies of blocks whose headers are already in the block tree.
//!
//! Each searched block is asked for from one online remote miner at a time, picked at random among
//! those not asked yet. Once every online remote has failed to provide it, the block's node is marked
//! `Missing` and the search starts over.

use std::collections::{BTreeMap, BTreeSet};

use rand::seq::SliceRandom;

use crate::block_tree::{BlockTree, NodeId, NodeStatus};
use crate::messenger::Messenger;
use crate::types::data_types::{BlockHeight, CryptoHash};

#[derive(Clone, Debug)]
pub struct BlockSearch {
    pub digest: CryptoHash,
    pub height: BlockHeight,
    asked: BTreeSet<String>,
    /// URL of the remote miner asked last, and when.
    pending: Option<(String, u64)>,
}

impl BlockSearch {
    fn new(digest: CryptoHash, height: BlockHeight) -> BlockSearch {
        BlockSearch {
            digest,
            height,
            asked: BTreeSet::new(),
            pending: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}

#[derive(Clone, Debug)]
pub struct BlockSearchPool {
    searches: BTreeMap<CryptoHash, BlockSearch>,
    max_searches: usize,
}

impl BlockSearchPool {
    pub fn new(max_searches: usize) -> BlockSearchPool {
        BlockSearchPool {
            searches: BTreeMap::new(),
            max_searches,
        }
    }

    /// Start a search for every block on the branch ending at `tip`, above `floor`, whose body is not
    /// known. Provisional nodes are skipped. New searches are not started once the pool is full.
    pub fn affirm_branch_search(&mut self, tree: &BlockTree, tip: NodeId, floor: BlockHeight) {
        for id in tree.ancestors(tip) {
            let node = tree.node(id);
            if node.height() <= floor {
                break;
            }
            if node.is_provisional() || node.is_refused() {
                continue;
            }
            if !matches!(node.status(), NodeStatus::New | NodeStatus::Missing) {
                continue;
            }
            if self.searches.contains_key(&node.digest()) {
                continue;
            }
            if self.searches.len() >= self.max_searches {
                break;
            }
            self.searches
                .insert(node.digest(), BlockSearch::new(node.digest(), node.height()));
        }
    }

    /// Advance every search: drop those that are resolved, ask a remote miner for the others, and
    /// restart those that every online remote miner failed.
    ///
    /// `online` lists the `(url, miner_id)` of the online remote miners. A request unanswered for
    /// `retry_interval` seconds counts as a failure.
    ///
    /// Returns the nodes to mark `Missing`.
    pub fn update<M: Messenger>(
        &mut self,
        tree: &BlockTree,
        online: &[(String, String)],
        messenger: &mut M,
        now: u64,
        retry_interval: u64,
    ) -> Vec<NodeId> {
        self.searches.retain(|digest, _| match tree.find(digest) {
            Some(id) => {
                let node = tree.node(id);
                !node.is_refused() && matches!(node.status(), NodeStatus::New | NodeStatus::Missing)
            }
            None => false,
        });

        let mut missing = Vec::new();
        let mut rng = rand::thread_rng();
        for search in self.searches.values_mut() {
            if let Some((_, sent_at)) = &search.pending {
                if now < sent_at.saturating_add(retry_interval) {
                    continue;
                }
                search.pending = None;
            }

            let candidates: Vec<&(String, String)> = online
                .iter()
                .filter(|(url, _)| !search.asked.contains(url))
                .collect();

            match candidates.choose(&mut rng) {
                Some((url, miner_id)) => {
                    messenger.request_block(miner_id, url, search.digest);
                    search.asked.insert(url.clone());
                    search.pending = Some((url.clone(), now));
                }
                None if !search.asked.is_empty() => {
                    search.asked.clear();
                    if let Some(id) = tree.find(&search.digest) {
                        missing.push(id);
                    }
                }
                None => (),
            }
        }
        missing
    }

    /// Record the answer of the remote miner at `url` to a request for the block with `digest`.
    pub fn update_block_search(&mut self, url: &str, digest: &CryptoHash, found: bool) {
        if found {
            self.searches.remove(digest);
            return;
        }
        if let Some(search) = self.searches.get_mut(digest) {
            if matches!(&search.pending, Some((pending_url, _)) if pending_url == url) {
                search.pending = None;
            }
        }
    }

    pub fn count_searches(&self) -> usize {
        self.searches.len()
    }

    pub fn count_active_searches(&self) -> usize {
        self.searches.values().filter(|search| search.is_pending()).count()
    }
}
