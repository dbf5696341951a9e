/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Methods to build and run a node: a [`Miner`] driven by a background thread.
//!
//! The key components of this module are:
//! - The builder-pattern interface to construct a [specification of the node](NodeSpec) with:
//!   1. `NodeSpec::builder` to construct a `NodeSpecBuilder`,
//!   2. The setters of the `NodeSpecBuilder`, and
//!   3. The `NodeSpecBuilder::build` method to construct a [NodeSpec],
//! - The function to [start](NodeSpec::start) a [Node] given its specification,
//! - [The type](Node) which keeps the node alive.
//!
//! ## Starting a node
//!
//! ```ignore
//! let node =
//!     NodeSpec::builder()
//!     .configuration(configuration)
//!     .genesis(genesis_block)
//!     .messenger(messenger)
//!     .persistence(Box::new(KVPersistenceProvider::new(kv_store)))
//!     .on_mine_block(mine_block_handler)
//!     .build()
//!     .start()?;
//! ```
//!
//! Every [tick interval](crate::config::Configuration::tick_interval) the miner thread takes in the
//! transactions submitted through the node, then runs one [step](Miner::step) of the miner with the
//! current time. What the miner has done is observable through the node's [camera](Node::camera) and
//! through the event handlers registered on the [`NodeSpec`].

use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::{SystemTime, UNIX_EPOCH};

use typed_builder::TypedBuilder;

use crate::config::Configuration;
use crate::event_bus::*;
use crate::events::*;
use crate::messenger::Messenger;
use crate::miner::{Miner, MinerCamera, MinerError};
use crate::persistence::PersistenceProvider;
use crate::types::{block::Block, transaction::Transaction};

/// Stores all parameters and trait implementations required to run a [Node].
#[derive(TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [NodeSpec]. On the builder call the following methods to construct a valid [NodeSpec].

    Required:
    - `.configuration(...)`
    - `.genesis(...)`
    - `.messenger(...)`

    Optional:
    - `.persistence(...)`
    - `.on_insert_header(...)`
    - `.on_complete_block(...)`
    - `.on_mark_node(...)`
    - `.on_select_branch(...)`
    - `.on_push_block(...)`
    - `.on_revert_ledger(...)`
    - `.on_mine_block(...)`
    - `.on_persist_ledger(...)`
    - `.on_receive_response(...)`
    - `.on_affirm_remote_miner(...)`
"))]
pub struct NodeSpec<M: Messenger + 'static> {
    // Required parameters
    #[builder(setter(doc = "Set the [configuration](Configuration) of the miner. Required."))]
    configuration: Configuration,
    #[builder(setter(doc = "Set the genesis block of the chain. Required."))]
    genesis: Block,
    #[builder(setter(doc = "Set the implementation of messaging with remote miners. The argument must implement the [Messenger](crate::messenger::Messenger) trait. Required."))]
    messenger: M,
    // Optional parameters
    #[builder(default, setter(strip_option, doc = "Set where the ledger is persisted and restored from. Optional, the ledger lives in memory only if unset."))]
    persistence: Option<Box<dyn PersistenceProvider>>,
    #[builder(default, setter(transform = |handler: impl Fn(&InsertHeaderEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<InsertHeaderEvent>),
    doc = "Register a handler closure to be invoked after a header is inserted into the miner's block tree. Optional."))]
    on_insert_header: Option<HandlerPtr<InsertHeaderEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&CompleteBlockEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<CompleteBlockEvent>),
    doc = "Register a handler closure to be invoked after the body of a block is received. Optional."))]
    on_complete_block: Option<HandlerPtr<CompleteBlockEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&MarkNodeEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<MarkNodeEvent>),
    doc = "Register a handler closure to be invoked after a block is marked missing or invalid. Optional."))]
    on_mark_node: Option<HandlerPtr<MarkNodeEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&SelectBranchEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<SelectBranchEvent>),
    doc = "Register a handler closure to be invoked after the miner selects a new best branch. Optional."))]
    on_select_branch: Option<HandlerPtr<SelectBranchEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&PushBlockEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<PushBlockEvent>),
    doc = "Register a handler closure to be invoked after a block is applied to the working ledger. Optional."))]
    on_push_block: Option<HandlerPtr<PushBlockEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&RevertLedgerEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<RevertLedgerEvent>),
    doc = "Register a handler closure to be invoked after the working ledger is reverted. Optional."))]
    on_revert_ledger: Option<HandlerPtr<RevertLedgerEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&MineBlockEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<MineBlockEvent>),
    doc = "Register a handler closure to be invoked after the miner mines a block. Optional."))]
    on_mine_block: Option<HandlerPtr<MineBlockEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&PersistLedgerEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<PersistLedgerEvent>),
    doc = "Register a handler closure to be invoked after the working ledger is persisted. Optional."))]
    on_persist_ledger: Option<HandlerPtr<PersistLedgerEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReceiveResponseEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReceiveResponseEvent>),
    doc = "Register a handler closure to be invoked after a response from a remote miner is received. Optional."))]
    on_receive_response: Option<HandlerPtr<ReceiveResponseEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&AffirmRemoteMinerEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<AffirmRemoteMinerEvent>),
    doc = "Register a handler closure to be invoked after the id of a remote miner becomes known. Optional."))]
    on_affirm_remote_miner: Option<HandlerPtr<AffirmRemoteMinerEvent>>,
}

impl<M: Messenger + 'static> NodeSpec<M> {
    /// Create the miner, then start the threads that drive it, and return the handles to them in a
    /// [Node] struct.
    ///
    /// Fails if the miner cannot be created, for example because the persisted ledger belongs to
    /// another chain.
    pub fn start(self) -> Result<Node, MinerError> {
        let tick_interval = self.configuration.tick_interval;
        let event_handlers = EventHandlers::new(
            self.configuration.log_events,
            UserHandlers {
                on_insert_header: self.on_insert_header,
                on_complete_block: self.on_complete_block,
                on_mark_node: self.on_mark_node,
                on_select_branch: self.on_select_branch,
                on_push_block: self.on_push_block,
                on_revert_ledger: self.on_revert_ledger,
                on_mine_block: self.on_mine_block,
                on_persist_ledger: self.on_persist_ledger,
                on_receive_response: self.on_receive_response,
                on_affirm_remote_miner: self.on_affirm_remote_miner,
            },
        );

        let (event_publisher, event_subscriber) = if !event_handlers.is_empty() {
            Some(mpsc::channel()).unzip()
        } else {
            (None, None)
        };

        let mut miner = Miner::new(
            self.configuration,
            self.genesis,
            self.messenger,
            self.persistence,
            event_publisher,
        )?;
        let camera = miner.camera();

        let (transactions, transaction_receiver) = mpsc::channel();
        let (miner_shutdown, miner_shutdown_receiver) = mpsc::channel();
        let miner_thread = thread::spawn(move || {
            run_miner(&mut miner, transaction_receiver, miner_shutdown_receiver, tick_interval)
        });

        let (event_bus, event_bus_shutdown) = match event_subscriber {
            Some(event_subscriber) => {
                let (shutdown, shutdown_receiver) = mpsc::channel();
                (
                    Some(start_event_bus(event_handlers, event_subscriber, shutdown_receiver)),
                    Some(shutdown),
                )
            }
            None => (None, None),
        };

        Ok(Node {
            camera,
            transactions,
            miner: Some(miner_thread),
            miner_shutdown,
            event_bus,
            event_bus_shutdown,
        })
    }
}

fn run_miner<M: Messenger>(
    miner: &mut Miner<M>,
    transactions: Receiver<Transaction>,
    shutdown_signal: Receiver<()>,
    tick_interval: std::time::Duration,
) {
    loop {
        match shutdown_signal.try_recv() {
            Ok(()) => return,
            Err(TryRecvError::Empty) => (),
            Err(TryRecvError::Disconnected) => {
                panic!("Programming error: miner thread disconnected from the node.")
            }
        }

        while let Ok(transaction) = transactions.try_recv() {
            let uuid = transaction.uuid.clone();
            if let Err(err) = miner.submit_transaction(transaction) {
                log::debug!("transaction {} was not queued: {}", uuid, err);
            }
        }

        if let Err(err) = miner.step(unix_time()) {
            log::error!("{} failed to complete a tick: {}", miner.config().miner_id, err);
        }
        thread::sleep(tick_interval);
    }
}

fn unix_time() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_secs())
}

/// A handle to the background threads of a node. When this value is dropped, all background threads
/// are gracefully shut down.
pub struct Node {
    camera: MinerCamera,
    transactions: Sender<Transaction>,
    miner: Option<JoinHandle<()>>,
    miner_shutdown: Sender<()>,
    event_bus: Option<JoinHandle<()>>,
    event_bus_shutdown: Option<Sender<()>>,
}

impl Node {
    /// Returns a [camera](MinerCamera) onto the latest snapshot of the miner.
    pub fn camera(&self) -> &MinerCamera {
        &self.camera
    }

    /// Hand `transaction` to the miner thread, which queues it on its next tick. Whether it was
    /// rejected can be read from the camera with
    /// [`transaction_error`](MinerCamera::transaction_error).
    pub fn submit_transaction(&self, transaction: Transaction) {
        if self.transactions.send(transaction).is_err() {
            log::warn!("transaction submitted after the miner thread stopped");
        }
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        // The event bus is shut down first: the miner thread keeps publishing to it until it stops, and
        // publishing to a stopped event bus is a no-op.
        if let Some(shutdown) = self.event_bus_shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(event_bus) = self.event_bus.take() {
            let _ = event_bus.join();
        }

        let _ = self.miner_shutdown.send(());
        if let Some(miner) = self.miner.take() {
            let _ = miner.join();
        }
    }
}
