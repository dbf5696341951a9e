/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A miner for a charm-ranked proof-of-stake blockchain.
//!
//! Registered miners extend the chain in turns decided by *charm*: a hash of the parent block's pose
//! and the miner's visage. Where branches compete, the one whose blocks carry the better charms wins,
//! unless rewriting it would reach past the rewrite window.
//!
//! The crate is organised bottom-up:
//! - [`versioned_store`]: an in-memory key-value store with numbered versions, cheap clones, and
//!   reverts.
//! - [`ledger`]: the chain's state on top of a versioned store, and the rules applying blocks and
//!   transactions to it.
//! - [`block_tree`]: every known branch, and how branches compare.
//! - [`miner`]: follows remote miners, selects the best branch, composes the ledger along it, and
//!   mines.
//! - [`node`]: runs a miner on a background thread.
//!
//! Messaging with remote miners and durable storage are pluggable, through the [`messenger`] and
//! [`persistence`] modules.

pub mod types;

pub mod versioned_store;

pub mod ledger;

pub mod block_tree;

pub mod messenger;

pub mod persistence;

pub mod miner;

pub mod node;

pub mod config;

pub mod events;

pub mod event_bus;

pub mod logging;
