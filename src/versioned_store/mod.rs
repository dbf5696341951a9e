/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A multi-version, copy-on-write key-value store.
//!
//! The ledger is a [`VersionedStore`] whose version is the number of blocks applied to it. The miner
//! keeps several handles onto the same store at once (the working ledger, the ledger published to
//! readers, scratch ledgers used to trial transactions), and moves the working handle back and forth
//! between competing branches with [`revert`](VersionedStore::revert) and
//! [`push_version`](VersionedStore::push_version). The handles share history through a tree of
//! [epochs](epoch), so none of these moves copies the ledger.
//!
//! ## Semantics
//!
//! - `get_raw_at(v, k)` returns the last value written to `k` at a version `<= v` in this handle's
//!   history.
//! - `set_raw(k, x)` writes at the handle's current version.
//! - `revert(v)` discards the handle's writes at versions `>= v`; reads at `v` then see the value as of
//!   `v - 1`.
//! - Writes by one handle are never visible to another handle that was cloned before them.
//!
//! All handles of a store share one [`RwLock`](std::sync::RwLock)-protected arena. Reads take the read
//! lock for the duration of one lookup, so handles can be sent to and read from other threads.

pub(crate) mod epoch;

mod store;
pub use store::VersionedStore;
