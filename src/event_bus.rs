/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The event bus thread, which fires the registered handlers for the events published by the miner.

use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::events::*;
use crate::logging::Logger;

pub type HandlerPtr<T> = Box<dyn Fn(&T) + Send>;

#[derive(Default)]
pub(crate) struct EventHandlers {
    pub(crate) insert_header_handlers: Vec<HandlerPtr<InsertHeaderEvent>>,
    pub(crate) complete_block_handlers: Vec<HandlerPtr<CompleteBlockEvent>>,
    pub(crate) mark_node_handlers: Vec<HandlerPtr<MarkNodeEvent>>,
    pub(crate) select_branch_handlers: Vec<HandlerPtr<SelectBranchEvent>>,
    pub(crate) push_block_handlers: Vec<HandlerPtr<PushBlockEvent>>,
    pub(crate) revert_ledger_handlers: Vec<HandlerPtr<RevertLedgerEvent>>,
    pub(crate) mine_block_handlers: Vec<HandlerPtr<MineBlockEvent>>,
    pub(crate) persist_ledger_handlers: Vec<HandlerPtr<PersistLedgerEvent>>,
    pub(crate) receive_response_handlers: Vec<HandlerPtr<ReceiveResponseEvent>>,
    pub(crate) affirm_remote_miner_handlers: Vec<HandlerPtr<AffirmRemoteMinerEvent>>,
}

/// User-registered handlers, one optional handler per event type.
#[derive(Default)]
pub(crate) struct UserHandlers {
    pub(crate) on_insert_header: Option<HandlerPtr<InsertHeaderEvent>>,
    pub(crate) on_complete_block: Option<HandlerPtr<CompleteBlockEvent>>,
    pub(crate) on_mark_node: Option<HandlerPtr<MarkNodeEvent>>,
    pub(crate) on_select_branch: Option<HandlerPtr<SelectBranchEvent>>,
    pub(crate) on_push_block: Option<HandlerPtr<PushBlockEvent>>,
    pub(crate) on_revert_ledger: Option<HandlerPtr<RevertLedgerEvent>>,
    pub(crate) on_mine_block: Option<HandlerPtr<MineBlockEvent>>,
    pub(crate) on_persist_ledger: Option<HandlerPtr<PersistLedgerEvent>>,
    pub(crate) on_receive_response: Option<HandlerPtr<ReceiveResponseEvent>>,
    pub(crate) on_affirm_remote_miner: Option<HandlerPtr<AffirmRemoteMinerEvent>>,
}

fn register<T: Logger>(handlers: &mut Vec<HandlerPtr<T>>, log_events: bool, user_handler: Option<HandlerPtr<T>>) {
    if log_events {
        handlers.push(T::get_logger());
    }
    if let Some(handler) = user_handler {
        handlers.push(handler);
    }
}

impl EventHandlers {
    /// Collect the default logging handlers (if `log_events`) followed by the user's handlers.
    pub(crate) fn new(log_events: bool, user: UserHandlers) -> EventHandlers {
        let mut handlers = EventHandlers::default();
        register(&mut handlers.insert_header_handlers, log_events, user.on_insert_header);
        register(&mut handlers.complete_block_handlers, log_events, user.on_complete_block);
        register(&mut handlers.mark_node_handlers, log_events, user.on_mark_node);
        register(&mut handlers.select_branch_handlers, log_events, user.on_select_branch);
        register(&mut handlers.push_block_handlers, log_events, user.on_push_block);
        register(&mut handlers.revert_ledger_handlers, log_events, user.on_revert_ledger);
        register(&mut handlers.mine_block_handlers, log_events, user.on_mine_block);
        register(&mut handlers.persist_ledger_handlers, log_events, user.on_persist_ledger);
        register(&mut handlers.receive_response_handlers, log_events, user.on_receive_response);
        register(&mut handlers.affirm_remote_miner_handlers, log_events, user.on_affirm_remote_miner);
        handlers
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.insert_header_handlers.is_empty()
            && self.complete_block_handlers.is_empty()
            && self.mark_node_handlers.is_empty()
            && self.select_branch_handlers.is_empty()
            && self.push_block_handlers.is_empty()
            && self.revert_ledger_handlers.is_empty()
            && self.mine_block_handlers.is_empty()
            && self.persist_ledger_handlers.is_empty()
            && self.receive_response_handlers.is_empty()
            && self.affirm_remote_miner_handlers.is_empty()
    }

    pub(crate) fn fire_handlers(&self, event: Event) {
        match event {
            Event::InsertHeader(insert_header_event) => self
                .insert_header_handlers
                .iter()
                .for_each(|handler| handler(&insert_header_event)),

            Event::CompleteBlock(complete_block_event) => self
                .complete_block_handlers
                .iter()
                .for_each(|handler| handler(&complete_block_event)),

            Event::MarkNode(mark_node_event) => self
                .mark_node_handlers
                .iter()
                .for_each(|handler| handler(&mark_node_event)),

            Event::SelectBranch(select_branch_event) => self
                .select_branch_handlers
                .iter()
                .for_each(|handler| handler(&select_branch_event)),

            Event::PushBlock(push_block_event) => self
                .push_block_handlers
                .iter()
                .for_each(|handler| handler(&push_block_event)),

            Event::RevertLedger(revert_ledger_event) => self
                .revert_ledger_handlers
                .iter()
                .for_each(|handler| handler(&revert_ledger_event)),

            Event::MineBlock(mine_block_event) => self
                .mine_block_handlers
                .iter()
                .for_each(|handler| handler(&mine_block_event)),

            Event::PersistLedger(persist_ledger_event) => self
                .persist_ledger_handlers
                .iter()
                .for_each(|handler| handler(&persist_ledger_event)),

            Event::ReceiveResponse(receive_response_event) => self
                .receive_response_handlers
                .iter()
                .for_each(|handler| handler(&receive_response_event)),

            Event::AffirmRemoteMiner(affirm_remote_miner_event) => self
                .affirm_remote_miner_handlers
                .iter()
                .for_each(|handler| handler(&affirm_remote_miner_event)),
        }
    }
}

/// Start the event bus thread. It fires handlers for every event received on `event_subscriber` until
/// it receives a shutdown signal or the publisher disconnects.
pub(crate) fn start_event_bus(
    event_handlers: EventHandlers,
    event_subscriber: Receiver<Event>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) => return,
            Err(TryRecvError::Empty) => (),
            Err(TryRecvError::Disconnected) => {
                panic!("Programming error: event bus thread disconnected from the node.")
            }
        }

        match event_subscriber.recv_timeout(Duration::from_millis(50)) {
            Ok(event) => event_handlers.fire_handlers(event),
            Err(RecvTimeoutError::Timeout) => (),
            Err(RecvTimeoutError::Disconnected) => return,
        }
    })
}
