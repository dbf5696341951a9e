/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The miner: follows remote miners, chooses the best branch, composes the ledger, and mines.
//!
//! A [`Miner`] owns a working [`Ledger`] and a [`BlockTree`] of every branch it knows of. It is driven
//! by calls to [`step`](Miner::step), one per tick, each of which:
//! 1. Takes in the responses that arrived since the last tick: headers extend remote miners' branches,
//!    block bodies complete nodes, and peer lists add remote miners.
//! 2. Requests the next header of every remote miner it follows, and occasionally asks one of them for
//!    the miners it knows.
//! 3. Requests the bodies of the blocks on the branches it might compose.
//! 4. Selects the best branch among its own and the remote miners', extending each with a provisional
//!    block of its own where that would improve it.
//! 5. Composes the working ledger along the best branch, as far as block bodies are available, and
//!    mines a block if the best branch ends with its own provisional block.
//! 6. Persists the ledger if its head changed, and publishes a [snapshot](MinerSnapshot).
//! 7. Sends the requests enqueued during the tick.
//!
//! # Tags
//!
//! Branches are tracked by block tree tags: [`LEDGER_TAG`] points at the head of the working ledger,
//! [`BEST_TAG`] at the tip of the selected branch, and `remote.<url>` at the tip of each remote miner's
//! branch as far as it was followed.

pub mod block_search;

pub mod remote_miner;

pub mod snapshot;

pub mod transaction_queue;

pub use snapshot::{MinerCamera, MinerSnapshot, MinerStatus};
pub use transaction_queue::TransactionQueue;

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Display, Formatter};
use std::sync::mpsc::Sender;
use std::thread;
use std::time::SystemTime;

use borsh::BorshDeserialize;
use rand::seq::SliceRandom;

use crate::block_tree::{AppendCheck, BlockTree, BlockTreeSampler, NodeId, NodeStatus};
use crate::config::Configuration;
use crate::events::*;
use crate::ledger::{keys, Ledger, LedgerError, StorageError, TransactionError};
use crate::messenger::{Messenger, MessengerResponse, RequestKind};
use crate::persistence::{PersistenceError, PersistenceProvider};
use crate::types::{
    block::{Block, BlockHeader},
    crypto_primitives::{make_visage, Keypair},
    data_types::{BlockHeight, CryptoHash, SignatureBytes},
    transaction::Transaction,
};

use block_search::BlockSearchPool;
use remote_miner::RemoteMiner;

/// Tag of the head of the working ledger.
pub const LEDGER_TAG: &str = "working";

/// Tag of the tip of the best branch.
pub const BEST_TAG: &str = "best";

/// Label the working ledger is persisted under.
pub const MASTER_LABEL: &str = "master";

/// Protocol release implemented by this miner.
pub const NODE_RELEASE: u64 = 1;

/// Share of the online miners, this one included, that must be ready for a release before it is used.
const RELEASE_QUORUM: f64 = 0.72;

/// Fewest online miners, this one included, for which a release upgrade is considered.
const RELEASE_MIN_MINERS: usize = 4;

pub struct Miner<M: Messenger> {
    config: Configuration,
    keypair: Keypair,
    visage: SignatureBytes,
    is_miner: bool,
    miner_height: BlockHeight,
    ledger: Ledger,
    block_tree: BlockTree,
    consensus_height: BlockHeight,
    remote_miners: BTreeMap<String, RemoteMiner>,
    known_urls: BTreeSet<String>,
    new_urls: BTreeSet<String>,
    /// When the outstanding peer list request was sent, if there is one.
    network_search: Option<u64>,
    block_searches: BlockSearchPool,
    transaction_queue: TransactionQueue,
    messenger: M,
    persistence: Option<Box<dyn PersistenceProvider>>,
    last_persisted: Option<CryptoHash>,
    camera: MinerCamera,
    event_publisher: Option<Sender<Event>>,
    accepted_release: u64,
    produced_release: u64,
}

impl<M: Messenger> Miner<M> {
    /// Create a miner for the chain starting with `genesis`.
    ///
    /// If `persistence` holds a ledger persisted by an earlier run, the miner resumes from it, provided
    /// it belongs to the same chain. Otherwise the miner starts from a ledger holding just `genesis`.
    pub fn new(
        config: Configuration,
        genesis: Block,
        messenger: M,
        persistence: Option<Box<dyn PersistenceProvider>>,
        event_publisher: Option<Sender<Event>>,
    ) -> Result<Miner<M>, MinerError> {
        let restored = match &persistence {
            Some(persistence) => persistence.restore(MASTER_LABEL)?,
            None => None,
        };

        let keypair = Keypair::new(config.keypair.clone());
        let visage = make_visage(&keypair, &config.motto);
        let mut miner = Miner {
            keypair,
            visage,
            is_miner: false,
            miner_height: BlockHeight::new(0),
            ledger: Ledger::new(),
            block_tree: BlockTree::new(),
            consensus_height: BlockHeight::new(0),
            remote_miners: BTreeMap::new(),
            known_urls: BTreeSet::new(),
            new_urls: BTreeSet::new(),
            network_search: None,
            block_searches: BlockSearchPool::new(config.max_block_searches),
            transaction_queue: TransactionQueue::new(),
            messenger,
            persistence,
            last_persisted: None,
            camera: MinerCamera::new(),
            event_publisher,
            accepted_release: config.accepted_release,
            produced_release: config.produced_release,
            config,
        };

        let restored_head = match restored {
            Some(store) => {
                let ledger = Ledger::from_store(store);
                match ledger.head_block()? {
                    Some(head) => {
                        if ledger.genesis_hash()? != Some(genesis.digest()) {
                            return Err(MinerError::GenesisMismatch);
                        }
                        miner.ledger = ledger;
                        Some(head)
                    }
                    None => None,
                }
            }
            None => None,
        };

        match restored_head {
            Some(head) => {
                log::info!(
                    "{} resumed from a persisted ledger at height {}",
                    miner.config.miner_id,
                    head.height()
                );
                miner.last_persisted = Some(head.digest());
                miner
                    .block_tree
                    .affirm(LEDGER_TAG, head.header.clone(), Some(head), false);
            }
            None => {
                miner.push_block(genesis)?;
            }
        }
        miner.block_tree.retag(BEST_TAG, LEDGER_TAG);

        for url in miner.config.peer_urls.clone() {
            miner.affirm_remote_miner(&url);
        }
        miner.update_miner_info()?;
        miner.update_release()?;
        miner.save_chain_if_changed()?;
        miner.publish_snapshot()?;
        Ok(miner)
    }

    /// Run one tick of the miner at `now`, in seconds since the Unix epoch.
    pub fn step(&mut self, now: u64) -> Result<(), MinerError> {
        while let Some(response) = self.messenger.recv() {
            self.receive_response(response, now);
        }
        self.update_remote_miners(now)?;
        self.update_network_search(now);
        self.update_block_searches(now);
        self.update_best_branch(now)?;
        self.save_chain_if_changed()?;
        self.update_release()?;
        self.publish_snapshot()?;
        self.messenger.send_requests();
        Ok(())
    }

    /* ↓↓↓ Accessors ↓↓↓ */

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn block_tree(&self) -> &BlockTree {
        &self.block_tree
    }

    pub fn camera(&self) -> MinerCamera {
        self.camera.clone()
    }

    pub fn transaction_queue(&self) -> &TransactionQueue {
        &self.transaction_queue
    }

    pub fn remote_miners(&self) -> impl Iterator<Item = &RemoteMiner> {
        self.remote_miners.values()
    }

    pub fn consensus_height(&self) -> BlockHeight {
        self.consensus_height
    }

    /// Whether the local miner is registered in the working ledger.
    pub fn is_miner(&self) -> bool {
        self.is_miner
    }

    /// Height at which the local miner was registered, meaningful only if [`is_miner`](Self::is_miner).
    pub fn miner_height(&self) -> BlockHeight {
        self.miner_height
    }

    /// Validate `transaction` against the working ledger and queue it for mining.
    pub fn submit_transaction(&mut self, transaction: Transaction) -> Result<(), TransactionError> {
        self.transaction_queue
            .push_transaction(transaction, &self.ledger, self.config.verification_policy)
    }

    /* ↓↓↓ Block tree ↓↓↓ */

    /// Insert a complete block obtained out of band into the block tree under `tag`.
    ///
    /// Returns `None` if the block cannot be appended to the tree.
    pub fn affirm_block(&mut self, tag: &str, block: Block) -> Option<NodeId> {
        if self.block_tree.find(&block.digest()).is_none() {
            if self.block_tree.check_append(&block.header) != AppendCheck::Ok {
                return None;
            }
        }
        let is_new = self.block_tree.find(&block.digest()).is_none();
        let id = self
            .block_tree
            .affirm(tag, block.header.clone(), Some(block), false)?;
        if is_new {
            self.publish_insert_header(id);
        }
        Some(id)
    }

    /// Extend the branch ending at `tail` with a provisional block of the local miner, at the point
    /// where doing so most improves it.
    ///
    /// Walking down from `tail`, every block that is past its parent's delay is a candidate parent if
    /// the charm of a block mined on it would beat the charm of the child it has on the branch. The walk
    /// stops at the local miner's own blocks, at `consensus_height`, at the first block outside its
    /// rewrite window, and at the height the local miner was registered. The lowest candidate wins.
    ///
    /// Returns the provisional node, or `tail` if the branch cannot be improved.
    pub fn improve_branch(&mut self, tail: NodeId, consensus_height: BlockHeight, now: u64) -> NodeId {
        if self.config.muted || !self.is_miner {
            return tail;
        }
        let ledger_node = self.ledger_node();
        let root = self.block_tree.find_root(ledger_node, tail);
        if self.block_tree.node(root).height() < self.miner_height {
            return tail;
        }

        let mut parent = Some(tail);
        let mut child: Option<NodeId> = None;
        let mut extend_from = None;
        while let Some(id) = parent {
            let node = self.block_tree.node(id);
            let header = node.header();
            let is_ours = header.miner_id == self.config.miner_id;
            if is_ours && !node.is_complete() {
                break;
            }
            if header.next_time() <= now {
                let improves = match child {
                    None => true,
                    Some(child) => {
                        BlockHeader::compare_charm(
                            &header.next_charm(&self.visage),
                            &self.block_tree.node(child).header().charm,
                        ) == Ordering::Less
                    }
                };
                if improves {
                    extend_from = Some(id);
                }
            }
            if node.height() < consensus_height
                || !header.is_in_rewrite_window(now)
                || is_ours
                || node.height() <= self.miner_height
            {
                break;
            }
            child = Some(id);
            parent = node.parent();
        }

        let Some(extend_from) = extend_from else {
            return tail;
        };
        let header = self.block_tree.node(extend_from).header().next(
            &self.config.miner_id,
            &self.keypair,
            self.visage,
            now,
            self.produced_release,
        );
        let count_nodes = self.block_tree.count_nodes();
        match self.block_tree.affirm_provisional(header) {
            Some(id) => {
                if self.block_tree.count_nodes() > count_nodes {
                    self.publish_insert_header(id);
                }
                id
            }
            None => tail,
        }
    }

    /// Select the best branch, compose the ledger along it, and mine if it ends with a provisional block
    /// of the local miner right on top of the ledger.
    fn update_best_branch(&mut self, now: u64) -> Result<(), MinerError> {
        let previous_best = self.block_tree.tagged(BEST_TAG);

        let mut sampler = BlockTreeSampler::new();
        match previous_best {
            Some(best) => sampler.add_leaf(self.block_tree.trim_missing_or_invalid(best)),
            None => sampler.add_leaf(self.ledger_node()),
        }
        for remote in self.remote_miners.values().filter(|remote| remote.is_online()) {
            if let Some(tip) = self.block_tree.tagged(remote.tag()) {
                sampler.add_leaf(self.block_tree.trim_missing_or_invalid(tip));
            }
        }
        let root = sampler
            .sample(&self.block_tree)
            .expect("Programming error: the sampler has at least one leaf.");
        let consensus_height = self.block_tree.node(root).height();
        self.consensus_height = consensus_height;

        let mut best: Option<NodeId> = None;
        for leaf in sampler.leaves().to_vec() {
            if self.block_tree.node(leaf).height() < consensus_height {
                continue;
            }
            let challenger = self.improve_branch(leaf, consensus_height, now);
            best = match best {
                Some(incumbent)
                    if self
                        .block_tree
                        .compare(challenger, incumbent, self.config.rewrite_mode)
                        != Ordering::Less =>
                {
                    Some(incumbent)
                }
                _ => Some(challenger),
            };
        }
        let best = best.unwrap_or(root);

        self.block_tree.tag(BEST_TAG, best);
        if previous_best != Some(best) {
            let node = self.block_tree.node(best);
            Event::publish(
                &self.event_publisher,
                Event::SelectBranch(SelectBranchEvent {
                    timestamp: SystemTime::now(),
                    digest: node.digest(),
                    height: node.height(),
                    consensus_height,
                }),
            );
            if let Some(previous) = previous_best.and_then(|id| self.block_tree.get(id)) {
                if previous.is_provisional() {
                    if let Some(parent) = previous.parent() {
                        self.block_tree.remove_provisional(parent);
                    }
                }
            }
        }

        self.compose_chain(best)?;

        let ledger_node = self.ledger_node();
        let best_node = self.block_tree.node(best);
        let is_mineable = best_node.is_provisional()
            && best_node.height().int() == self.ledger.count_blocks()
            && (self.block_tree.node(root).is_provisional() || root == ledger_node);
        if is_mineable {
            self.mine(now)?;
        }
        Ok(())
    }

    /// Bring the working ledger to `cursor`, or as close to it as block bodies allow.
    ///
    /// The ledger is first reverted to where the branch ending at `cursor` leaves it, then the complete
    /// blocks of the branch are pushed in order. A block that fails to apply is refused, and composition
    /// stops there.
    pub fn compose_chain(&mut self, cursor: NodeId) -> Result<(), MinerError> {
        let ledger_node = self.ledger_node();
        if ledger_node == cursor {
            return Ok(());
        }

        if self.block_tree.is_ancestor_of(cursor, ledger_node) {
            let version = self.block_tree.node(cursor).height().int() + 1;
            self.revert_ledger(version);
            self.block_tree.tag(LEDGER_TAG, cursor);
            self.update_miner_info()?;
            return Ok(());
        }

        if !self.block_tree.is_ancestor_of(ledger_node, cursor) {
            let root = self.block_tree.find_root(ledger_node, cursor);
            let version = self.block_tree.node(root).height().int() + 1;
            self.revert_ledger(version);
            self.block_tree.tag(LEDGER_TAG, root);
        }

        let ledger_node = self.ledger_node();
        let mut stack = Vec::new();
        let mut id = cursor;
        while id != ledger_node {
            let node = self.block_tree.node(id);
            if node.is_complete() && !node.is_refused() {
                stack.push(id);
            } else {
                stack.clear();
            }
            id = node
                .parent()
                .expect("Programming error: the ledger's head is an ancestor of the composed branch.");
        }

        let mut pushed = 0;
        for id in stack.into_iter().rev() {
            let node = self.block_tree.node(id);
            let block = node
                .block()
                .cloned()
                .expect("Programming error: complete nodes hold their block.");
            if block.header.release > NODE_RELEASE {
                log::warn!(
                    "refused block {} at height {}: release {} is newer than {}",
                    block.digest(),
                    block.height(),
                    block.header.release,
                    NODE_RELEASE
                );
                self.block_tree.refuse(id);
                break;
            }

            match self.push_block(block) {
                Ok(_) => {
                    pushed += 1;
                    if self.config.persist_frequency > 0 && pushed % self.config.persist_frequency == 0 {
                        self.save_chain()?;
                    }
                }
                Err(LedgerError::Storage(err)) => return Err(MinerError::Storage(err)),
                Err(err) => {
                    log::warn!(
                        "refused block {} at height {}: {}",
                        self.block_tree.node(id).digest(),
                        self.block_tree.node(id).height(),
                        err
                    );
                    self.block_tree.refuse(id);
                    break;
                }
            }
        }

        self.update_miner_info()?;
        Ok(())
    }

    /// Apply `block` to the working ledger and record it in the block tree as the ledger's head.
    fn push_block(&mut self, block: Block) -> Result<NodeId, LedgerError> {
        let height = block.height();
        assert_eq!(
            self.ledger.count_blocks(),
            height.int(),
            "Programming error: blocks are pushed right on top of the ledger's head."
        );
        self.ledger.revert_and_clear(height.int());
        self.ledger
            .push_block(&block, self.config.verification_policy)?;

        let digest = block.digest();
        let miner_id = block.header.miner_id.clone();
        let is_new = self.block_tree.find(&digest).is_none();
        let id = self
            .block_tree
            .affirm(LEDGER_TAG, block.header.clone(), Some(block), false)
            .expect("Programming error: a block accepted by the ledger connects to the block tree.");
        if is_new {
            self.publish_insert_header(id);
        }

        Event::publish(
            &self.event_publisher,
            Event::PushBlock(PushBlockEvent {
                timestamp: SystemTime::now(),
                digest,
                height,
                miner_id,
            }),
        );
        Ok(id)
    }

    fn revert_ledger(&mut self, version: u64) {
        if version >= self.ledger.count_blocks() {
            return;
        }
        self.ledger.revert_and_clear(version);
        Event::publish(
            &self.event_publisher,
            Event::RevertLedger(RevertLedgerEvent {
                timestamp: SystemTime::now(),
                version,
            }),
        );
    }

    /* ↓↓↓ Mining ↓↓↓ */

    fn mine(&mut self, now: u64) -> Result<(), MinerError> {
        self.transaction_queue.prune(&self.ledger);
        let Some(block) = self.prepare_block(now)? else {
            return Ok(());
        };

        let parent = self.ledger_node();
        let transactions = block.transactions.len();
        let reward = block.reward;
        let id = self.push_block(block)?;
        self.block_tree.retag(BEST_TAG, LEDGER_TAG);
        self.block_tree.remove_provisional(parent);

        let node = self.block_tree.node(id);
        log::info!(
            "{} mined block {} at height {} with {} transactions",
            self.config.miner_id,
            node.digest(),
            node.height(),
            transactions
        );
        Event::publish(
            &self.event_publisher,
            Event::MineBlock(MineBlockEvent {
                timestamp: SystemTime::now(),
                digest: node.digest(),
                height: node.height(),
                transactions,
                reward,
            }),
        );

        self.save_chain()
    }

    /// Build and sign a block on top of the working ledger.
    ///
    /// Returns `None` when the block would carry no transactions and no remote miner contributes to
    /// the chain.
    fn prepare_block(&mut self, now: u64) -> Result<Option<Block>, MinerError> {
        let Some(parent) = self.ledger.head_header()? else {
            return Ok(None);
        };
        let height = parent.height + 1;
        let max_weight = self.ledger.max_block_weight()?;
        let transactions = self.transaction_queue.fill_block(
            &self.ledger,
            height,
            now,
            self.config.verification_policy,
            self.config.minimum_gratuity,
            max_weight,
        );
        if transactions.is_empty() && self.is_lazy() {
            return Ok(None);
        }

        let reward = self.ledger.choose_reward(self.config.reward)?;
        let header = parent.next(
            &self.config.miner_id,
            &self.keypair,
            self.visage,
            now,
            self.produced_release,
        );
        Ok(Some(Block::new(header, reward, transactions).sign(&self.keypair)))
    }

    /// Whether no remote miner is contributing to the chain.
    fn is_lazy(&self) -> bool {
        let ledger_height = self.ledger.count_blocks();
        !self.remote_miners.values().any(|remote| {
            remote.is_contributor(&self.block_tree, ledger_height, self.config.consensus_lookahead)
        })
    }

    fn update_miner_info(&mut self) -> Result<(), StorageError> {
        match self.ledger.miner_info_by_name(&self.config.miner_id)? {
            Some(info) => {
                if !self.is_miner {
                    log::info!("{} is a registered miner", self.config.miner_id);
                }
                self.is_miner = true;
                self.visage = info.visage;
                self.miner_height = self
                    .ledger
                    .miner_height(&self.config.miner_id)?
                    .unwrap_or_default();
            }
            None => {
                self.is_miner = false;
                self.visage = make_visage(&self.keypair, &self.config.motto);
            }
        }
        Ok(())
    }

    /// Move the accepted and produced releases up to [`NODE_RELEASE`] once enough online miners are
    /// ready for it.
    fn update_release(&mut self) -> Result<(), StorageError> {
        let ledger_release = self.ledger.release()?;
        if self.accepted_release < ledger_release {
            self.accepted_release = ledger_release;
        }
        if self.produced_release < ledger_release {
            self.produced_release = ledger_release;
        }
        if self.accepted_release >= NODE_RELEASE && self.produced_release >= NODE_RELEASE {
            return Ok(());
        }

        let online: Vec<&RemoteMiner> = self
            .remote_miners
            .values()
            .filter(|remote| remote.is_online())
            .collect();
        let total = online.len() + 1;
        if total < RELEASE_MIN_MINERS {
            return Ok(());
        }

        let running = 1 + online
            .iter()
            .filter(|remote| remote.next_release >= NODE_RELEASE)
            .count();
        if running as f64 / total as f64 >= RELEASE_QUORUM && self.accepted_release < NODE_RELEASE {
            log::info!("{} accepts release {}", self.config.miner_id, NODE_RELEASE);
            self.accepted_release = NODE_RELEASE;
        }

        let accepting = 1 + online
            .iter()
            .filter(|remote| remote.accepted_release >= NODE_RELEASE)
            .count();
        if accepting as f64 / total as f64 >= RELEASE_QUORUM && self.produced_release < NODE_RELEASE {
            log::info!("{} produces release {}", self.config.miner_id, NODE_RELEASE);
            self.produced_release = NODE_RELEASE;
        }
        Ok(())
    }

    /* ↓↓↓ Remote miners ↓↓↓ */

    /// Start following the miner at `url`, unless it is already followed or is the local miner.
    fn affirm_remote_miner(&mut self, url: &str) {
        let url = url.trim_end_matches('/');
        if url.is_empty() || url == self.config.url.trim_end_matches('/') || self.known_urls.contains(url) {
            return;
        }
        self.new_urls.insert(url.to_string());
    }

    fn update_remote_miners(&mut self, now: u64) -> Result<(), MinerError> {
        for (name, url) in self.ledger.miner_urls()? {
            if name != self.config.miner_id {
                self.affirm_remote_miner(&url);
            }
        }

        let start_height = self.block_tree.node(self.ledger_node()).height();
        for url in std::mem::take(&mut self.new_urls) {
            if self.known_urls.insert(url.clone()) {
                log::debug!("{} follows remote miner {}", self.config.miner_id, url);
                self.remote_miners
                    .insert(url.clone(), RemoteMiner::new(&url, start_height));
            }
        }

        let ledger_height = self.ledger.count_blocks();
        for remote in self.remote_miners.values_mut() {
            remote.update(
                &mut self.messenger,
                ledger_height,
                self.config.consensus_lookahead,
                now,
                self.config.request_retry_interval,
            );
        }
        Ok(())
    }

    /// Ask a random online remote miner for the miners it knows, unless such a request is outstanding.
    fn update_network_search(&mut self, now: u64) {
        if let Some(sent_at) = self.network_search {
            if now < sent_at.saturating_add(self.config.request_retry_interval) {
                return;
            }
            self.network_search = None;
        }

        let online: Vec<&str> = self
            .remote_miners
            .values()
            .filter(|remote| remote.is_online())
            .map(|remote| remote.url())
            .collect();
        if let Some(url) = online.choose(&mut rand::thread_rng()) {
            self.messenger.request_peers(url);
            self.network_search = Some(now);
        }
    }

    /// Search the bodies of the blocks on the best branch, and on the branches of remote miners whose
    /// tips turned out missing or invalid.
    fn update_block_searches(&mut self, now: u64) {
        let ledger_node = self.ledger_node();
        let mut tips = Vec::new();
        for remote in self.remote_miners.values().filter(|remote| remote.is_online()) {
            if let Some(tip) = self.block_tree.tagged(remote.tag()) {
                if self.block_tree.trim_missing_or_invalid(tip) != tip {
                    tips.push(tip);
                }
            }
        }
        if let Some(best) = self.block_tree.tagged(BEST_TAG) {
            tips.push(best);
        }
        for tip in tips {
            let root = self.block_tree.find_root(ledger_node, tip);
            let floor = self.block_tree.node(root).height();
            self.block_searches
                .affirm_branch_search(&self.block_tree, tip, floor);
        }

        let online: Vec<(String, String)> = self
            .remote_miners
            .values()
            .filter(|remote| remote.is_online())
            .map(|remote| {
                (
                    remote.url().to_string(),
                    remote.miner_id().unwrap_or("").to_string(),
                )
            })
            .collect();
        let missing = self.block_searches.update(
            &self.block_tree,
            &online,
            &mut self.messenger,
            now,
            self.config.request_retry_interval,
        );
        for id in missing {
            if self.block_tree.mark(id, NodeStatus::Missing) {
                let node = self.block_tree.node(id);
                Event::publish(
                    &self.event_publisher,
                    Event::MarkNode(MarkNodeEvent {
                        timestamp: SystemTime::now(),
                        digest: node.digest(),
                        height: node.height(),
                        status: NodeStatus::Missing,
                    }),
                );
            }
        }
    }

    fn receive_response(&mut self, response: MessengerResponse, now: u64) {
        let url = response.request.url.clone();
        Event::publish(
            &self.event_publisher,
            Event::ReceiveResponse(ReceiveResponseEvent {
                timestamp: SystemTime::now(),
                url: url.clone(),
                kind: response.request.kind.clone(),
                miner_id: response.miner_id.clone(),
            }),
        );
        if !self.remote_miners.contains_key(&url) {
            return;
        }

        if response.miner_id.as_deref() == Some(self.config.miner_id.as_str()) {
            // The URL leads back to the local miner.
            if let Some(remote) = self.remote_miners.remove(&url) {
                self.block_tree.untag(remote.tag());
            }
            return;
        }

        match &response.request.kind {
            RequestKind::Block(digest) => {
                let found = match &response.block {
                    Some(block) if block.digest() == *digest => self.complete_block(block.clone()),
                    _ => false,
                };
                self.block_searches
                    .update_block_search(&url, digest, found);
            }
            RequestKind::ExtendNetwork => {
                for peer_url in &response.peer_urls {
                    self.affirm_remote_miner(peer_url);
                }
                self.network_search = None;
            }
            RequestKind::Header(_) => (),
        }

        let Some(remote) = self.remote_miners.get_mut(&url) else {
            return;
        };
        let knew_id = remote.miner_id().is_some();
        let inserted = remote.receive_response(
            &response,
            &mut self.block_tree,
            now,
            self.config.request_retry_interval,
        );
        if !knew_id {
            if let Some(miner_id) = remote.miner_id() {
                Event::publish(
                    &self.event_publisher,
                    Event::AffirmRemoteMiner(AffirmRemoteMinerEvent {
                        timestamp: SystemTime::now(),
                        url: url.clone(),
                        miner_id: miner_id.to_string(),
                    }),
                );
            }
        }
        for id in inserted {
            self.publish_insert_header(id);
        }
    }

    /// Attach a received block to its header in the tree. Returns whether the tree now has its body.
    fn complete_block(&mut self, block: Block) -> bool {
        let digest = block.digest();
        match self.block_tree.update(block) {
            Some(id) => {
                let node = self.block_tree.node(id);
                Event::publish(
                    &self.event_publisher,
                    Event::CompleteBlock(CompleteBlockEvent {
                        timestamp: SystemTime::now(),
                        digest: node.digest(),
                        height: node.height(),
                    }),
                );
                true
            }
            None => self
                .block_tree
                .find(&digest)
                .map_or(false, |id| self.block_tree.node(id).is_complete()),
        }
    }

    /* ↓↓↓ Persistence ↓↓↓ */

    fn save_chain_if_changed(&mut self) -> Result<(), MinerError> {
        if self.persistence.is_none() {
            return Ok(());
        }
        let head = self.block_tree.node(self.ledger_node()).digest();
        if self.last_persisted == Some(head) {
            return Ok(());
        }
        self.save_chain()
    }

    /// Persist the working ledger, then check that the persisted ledger ends with the same block. On a
    /// mismatch the ledger is persisted and checked again.
    ///
    /// # Panics
    ///
    /// If the persisted ledger still disagrees with the working ledger after
    /// `persistence_retry_limit` retries.
    fn save_chain(&mut self) -> Result<(), MinerError> {
        let head = self
            .block_tree
            .tagged(LEDGER_TAG)
            .map(|id| self.block_tree.node(id))
            .expect("Programming error: the ledger's head is always tagged.");
        let (height, digest) = (head.height(), head.digest());
        let Some(persistence) = self.persistence.as_mut() else {
            return Ok(());
        };
        let key = keys::block_hash(height);
        for attempt in 0..=self.config.persistence_retry_limit {
            if attempt > 0 {
                log::error!(
                    "persisted ledger disagrees with the working ledger at height {}, retrying",
                    height
                );
                thread::sleep(self.config.persistence_retry_sleep);
            }
            persistence.persist(self.ledger.store(), MASTER_LABEL)?;
            Event::publish(
                &self.event_publisher,
                Event::PersistLedger(PersistLedgerEvent {
                    timestamp: SystemTime::now(),
                    label: MASTER_LABEL.to_string(),
                    version: self.ledger.version(),
                }),
            );

            let persisted = persistence
                .read(MASTER_LABEL, &key)?
                .and_then(|bytes| CryptoHash::try_from_slice(&bytes).ok());
            if persisted == Some(digest) {
                self.last_persisted = Some(digest);
                return Ok(());
            }
        }
        panic!(
            "Persisted ledger disagrees with the working ledger at height {} after {} retries.",
            height, self.config.persistence_retry_limit
        )
    }

    /* ↓↓↓ Snapshots ↓↓↓ */

    fn publish_snapshot(&mut self) -> Result<(), StorageError> {
        let best = self
            .block_tree
            .tagged(BEST_TAG)
            .unwrap_or_else(|| self.ledger_node());
        let best = self.block_tree.node(best);
        let previous_version = self.camera.status().total_blocks;

        let status = MinerStatus {
            miner_id: self.config.miner_id.clone(),
            url: self.config.url.clone(),
            identity: self.ledger.identity()?.unwrap_or_default(),
            genesis_hash: self.ledger.genesis_hash()?.unwrap_or_default(),
            total_blocks: self.ledger.count_blocks(),
            best_digest: best.digest(),
            best_height: best.height(),
            consensus_height: self.consensus_height,
            reward_pool: self.ledger.reward_pool()?,
            payout_pool: self.ledger.payout_pool()?,
            minimum_gratuity: self.config.minimum_gratuity,
            reward: self.config.reward,
            accepted_release: self.accepted_release,
            produced_release: self.produced_release,
            next_release: NODE_RELEASE,
            is_miner: self.is_miner,
            miner_block_count: self.ledger.miner_block_count(&self.config.miner_id)?,
        };
        let snapshot = MinerSnapshot {
            status,
            ledger: self.ledger.clone(),
            online_urls: self
                .remote_miners
                .values()
                .filter(|remote| remote.is_online())
                .map(|remote| remote.url().to_string())
                .collect(),
            remote_urls: self.remote_miners.keys().cloned().collect(),
            transaction_errors: self.transaction_queue.errors().clone(),
            queued_transactions: self.transaction_queue.len(),
        };
        self.camera.publish(snapshot);

        if previous_version != self.ledger.count_blocks() {
            self.ledger.optimize();
        }
        Ok(())
    }

    /* ↓↓↓ Helpers ↓↓↓ */

    fn ledger_node(&self) -> NodeId {
        self.block_tree
            .tagged(LEDGER_TAG)
            .expect("Programming error: the ledger's head is always tagged.")
    }

    fn publish_insert_header(&self, id: NodeId) {
        let node = self.block_tree.node(id);
        Event::publish(
            &self.event_publisher,
            Event::InsertHeader(InsertHeaderEvent {
                timestamp: SystemTime::now(),
                digest: node.digest(),
                height: node.height(),
                miner_id: node.header().miner_id.clone(),
                is_provisional: node.is_provisional(),
            }),
        );
    }
}

#[derive(Debug)]
pub enum MinerError {
    /// The persisted ledger belongs to a chain with a different genesis block.
    GenesisMismatch,
    Ledger(LedgerError),
    Storage(StorageError),
    Persistence(PersistenceError),
}

impl Display for MinerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            MinerError::GenesisMismatch => {
                write!(f, "The persisted ledger belongs to another chain")
            }
            MinerError::Ledger(err) => Display::fmt(err, f),
            MinerError::Storage(err) => Display::fmt(err, f),
            MinerError::Persistence(err) => Display::fmt(err, f),
        }
    }
}

impl std::error::Error for MinerError {}

impl From<LedgerError> for MinerError {
    fn from(value: LedgerError) -> Self {
        MinerError::Ledger(value)
    }
}

impl From<StorageError> for MinerError {
    fn from(value: StorageError) -> Self {
        MinerError::Storage(value)
    }
}

impl From<PersistenceError> for MinerError {
    fn from(value: PersistenceError) -> Self {
        MinerError::Persistence(value)
    }
}
