/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The epoch arena that backs every [`VersionedStore`](super::VersionedStore).
//!
//! ## Epochs
//!
//! An epoch is a copy-on-write layer holding, per key, a stack of `version → value` entries. Every entry
//! in an epoch is at a version at or above the epoch's `base_version`. Epochs form a tree: a child epoch
//! reads its parent only below its own base version, and owns everything from its base version up.
//! When a child is created it copies the entries its creator holds *exactly at* the base version, so
//! the version being written when the branch happened stays visible in the child.
//!
//! ## Clients
//!
//! Every store handle is a *client*: a cursor `(epoch, version)` that reads the layers of its epoch at
//! or below `version`, and then its ancestors. A client depends on layers `< version + 1` of its epoch;
//! a child epoch depends on layers `< base_version` of its parent. [`EpochPool::dependency_top`]
//! computes the highest such bound over every dependent of an epoch, and every mutation compares its
//! target version against it to decide between writing in place and branching.
//!
//! ## Optimizing
//!
//! [`EpochPool::optimize`] pops layers no dependent can reach and merges a child into its parent when
//! that child is the epoch's top dependent, re-pointing the child's clients and children to the parent.

use std::collections::{BTreeMap, BTreeSet, HashMap};

pub(crate) type EpochId = usize;
pub(crate) type ClientId = u64;

pub(crate) struct Epoch {
    pub(crate) parent: Option<EpochId>,
    pub(crate) base_version: u64,
    pub(crate) children: BTreeSet<EpochId>,
    pub(crate) clients: BTreeSet<ClientId>,
    /// Keys written at each version. Popping a layer removes exactly these stack entries.
    layers: BTreeMap<u64, BTreeSet<String>>,
    stacks: HashMap<String, BTreeMap<u64, Vec<u8>>>,
}

impl Epoch {
    fn new(parent: Option<EpochId>, base_version: u64) -> Epoch {
        Epoch {
            parent,
            base_version,
            children: BTreeSet::new(),
            clients: BTreeSet::new(),
            layers: BTreeMap::new(),
            stacks: HashMap::new(),
        }
    }

    /// One past the highest version written in this epoch, or the base version if nothing was written.
    pub(crate) fn top_version(&self) -> u64 {
        self.layers
            .keys()
            .next_back()
            .map_or(self.base_version, |version| version + 1)
    }

    /// The value of `key` at the highest version `<= version` in this epoch.
    fn get(&self, version: u64, key: &str) -> Option<&Vec<u8>> {
        self.stacks
            .get(key)?
            .range(..=version)
            .next_back()
            .map(|(_, value)| value)
    }

    fn set(&mut self, version: u64, key: &str, value: Vec<u8>) {
        debug_assert!(version >= self.base_version);
        self.stacks
            .entry(key.to_string())
            .or_default()
            .insert(version, value);
        self.layers
            .entry(version)
            .or_default()
            .insert(key.to_string());
    }

    /// Remove every layer at or above `version`.
    fn pop_layers_from(&mut self, version: u64) {
        while let Some((&top, _)) = self.layers.iter().next_back() {
            if top < version {
                break;
            }
            if let Some(keys) = self.layers.remove(&top) {
                for key in keys {
                    if let Some(stack) = self.stacks.get_mut(&key) {
                        stack.remove(&top);
                        if stack.is_empty() {
                            self.stacks.remove(&key);
                        }
                    }
                }
            }
        }
    }

    /// Entries written exactly at `version`.
    fn layer(&self, version: u64) -> Vec<(String, Vec<u8>)> {
        self.layers
            .get(&version)
            .map(|keys| {
                keys.iter()
                    .filter_map(|key| {
                        self.stacks
                            .get(key)
                            .and_then(|stack| stack.get(&version))
                            .map(|value| (key.clone(), value.clone()))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn has_dependents(&self) -> bool {
        !self.clients.is_empty() || !self.children.is_empty()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct ClientCursor {
    pub(crate) epoch: EpochId,
    pub(crate) version: u64,
}

/// Arena of [`Epoch`]s and the cursors of the clients reading them.
pub(crate) struct EpochPool {
    epochs: Vec<Option<Epoch>>,
    free: Vec<EpochId>,
    clients: HashMap<ClientId, ClientCursor>,
    next_client: ClientId,
}

impl EpochPool {
    /// Create a pool holding a single empty root epoch.
    pub(crate) fn new() -> EpochPool {
        EpochPool {
            epochs: vec![Some(Epoch::new(None, 0))],
            free: Vec::new(),
            clients: HashMap::new(),
            next_client: 0,
        }
    }

    /// Create a pool holding a single root epoch populated with `history`, a stack of
    /// `(version, value)` pairs per key.
    pub(crate) fn from_history(history: BTreeMap<String, Vec<(u64, Vec<u8>)>>) -> EpochPool {
        let mut root = Epoch::new(None, 0);
        for (key, entries) in history {
            for (version, value) in entries {
                root.set(version, &key, value);
            }
        }
        EpochPool {
            epochs: vec![Some(root)],
            free: Vec::new(),
            clients: HashMap::new(),
            next_client: 0,
        }
    }

    pub(crate) fn root(&self) -> EpochId {
        0
    }

    fn epoch(&self, id: EpochId) -> &Epoch {
        self.epochs[id]
            .as_ref()
            .expect("Programming error: epoch referenced after release.")
    }

    fn epoch_mut(&mut self, id: EpochId) -> &mut Epoch {
        self.epochs[id]
            .as_mut()
            .expect("Programming error: epoch referenced after release.")
    }

    fn alloc(&mut self, epoch: Epoch) -> EpochId {
        if let Some(id) = self.free.pop() {
            self.epochs[id] = Some(epoch);
            id
        } else {
            self.epochs.push(Some(epoch));
            self.epochs.len() - 1
        }
    }

    pub(crate) fn cursor(&self, client: ClientId) -> ClientCursor {
        *self
            .clients
            .get(&client)
            .expect("Programming error: unknown versioned store client.")
    }

    /// Number of live epochs.
    pub(crate) fn count_epochs(&self) -> usize {
        self.epochs.iter().filter(|epoch| epoch.is_some()).count()
    }

    /// Number of epochs between `client`'s epoch and the root, inclusive.
    pub(crate) fn chain_depth(&self, client: ClientId) -> usize {
        let mut depth = 0;
        let mut epoch = Some(self.cursor(client).epoch);
        while let Some(id) = epoch {
            depth += 1;
            epoch = self.epoch(id).parent;
        }
        depth
    }

    /* ↓↓↓ Clients ↓↓↓ */

    pub(crate) fn register_client(&mut self, epoch: EpochId, version: u64) -> ClientId {
        let client = self.next_client;
        self.next_client += 1;
        self.clients.insert(client, ClientCursor { epoch, version });
        self.epoch_mut(epoch).clients.insert(client);
        client
    }

    /// Register a new client at the same epoch and version as `client`.
    pub(crate) fn clone_client(&mut self, client: ClientId) -> ClientId {
        let cursor = self.cursor(client);
        self.register_client(cursor.epoch, cursor.version)
    }

    pub(crate) fn drop_client(&mut self, client: ClientId) {
        if let Some(cursor) = self.clients.remove(&client) {
            self.epoch_mut(cursor.epoch).clients.remove(&client);
            self.release(cursor.epoch);
        }
    }

    fn move_client(&mut self, client: ClientId, to: EpochId) {
        let from = self.cursor(client).epoch;
        if from == to {
            return;
        }
        self.epoch_mut(from).clients.remove(&client);
        self.epoch_mut(to).clients.insert(client);
        if let Some(cursor) = self.clients.get_mut(&client) {
            cursor.epoch = to;
        }
        self.release(from);
    }

    /// Remove `epoch`, and then each of its ancestors, for as long as they have no dependents.
    fn release(&mut self, epoch: EpochId) {
        let mut next = Some(epoch);
        while let Some(id) = next {
            if self.epoch(id).has_dependents() {
                return;
            }
            let parent = self.epoch(id).parent;
            match parent {
                Some(parent) => {
                    self.epoch_mut(parent).children.remove(&id);
                }
                None if id == self.root() => return,
                None => (),
            }
            self.epochs[id] = None;
            self.free.push(id);
            next = parent;
        }
    }

    /// One past the highest version of `epoch` that a dependent other than `exclude` reads.
    fn dependency_top(&self, epoch: EpochId, exclude: Option<ClientId>) -> u64 {
        let epoch = self.epoch(epoch);
        let client_top = epoch
            .clients
            .iter()
            .filter(|client| Some(**client) != exclude)
            .map(|client| self.cursor(*client).version + 1)
            .max()
            .unwrap_or(0);
        let child_top = epoch
            .children
            .iter()
            .map(|child| self.epoch(*child).base_version)
            .max()
            .unwrap_or(0);
        client_top.max(child_top)
    }

    /// Move `client` into a new epoch based at `base_version`. The new epoch copies the entries
    /// `client`'s epoch holds at `base_version` if `copy_base_layer` is set.
    fn branch(&mut self, client: ClientId, base_version: u64, copy_base_layer: bool) {
        let from = self.cursor(client).epoch;
        // An epoch based at version 0 reads nothing from its parent, but hangs under the root so that
        // `optimize` can merge it back.
        let parent = if self.epoch(from).base_version < base_version {
            Some(from)
        } else {
            self.epoch(from).parent.or(Some(from))
        };

        let mut epoch = Epoch::new(parent, base_version);
        if copy_base_layer {
            for (key, value) in self.epoch(from).layer(base_version) {
                epoch.set(base_version, &key, value);
            }
        }
        let id = self.alloc(epoch);
        if let Some(parent) = parent {
            self.epoch_mut(parent).children.insert(id);
        }
        self.move_client(client, id);
    }

    /// Ensure that nothing at or above `version` in `client`'s epoch is visible to it, branching if
    /// another dependent still reads those layers.
    fn clear_from(&mut self, client: ClientId, version: u64) {
        let epoch = self.cursor(client).epoch;
        if self.epoch(epoch).top_version() <= version {
            return;
        }
        if self.dependency_top(epoch, Some(client)) > version {
            self.branch(client, version, false);
        } else {
            self.epoch_mut(epoch).pop_layers_from(version);
        }
    }

    /* ↓↓↓ Reads ↓↓↓ */

    /// Walk the epoch chain from `client`'s epoch toward the root, returning the first value of `key`
    /// at or below `version`.
    pub(crate) fn get(&self, client: ClientId, version: u64, key: &str) -> Option<Vec<u8>> {
        let cursor = self.cursor(client);
        assert!(
            version <= cursor.version,
            "Programming error: read at version {} above the store's version {}.",
            version,
            cursor.version
        );

        let mut version = version;
        let mut next = Some(cursor.epoch);
        while let Some(id) = next {
            let epoch = self.epoch(id);
            if version >= epoch.base_version {
                if let Some(value) = epoch.get(version, key) {
                    return Some(value.clone());
                }
            }
            if epoch.base_version == 0 {
                return None;
            }
            version = version.min(epoch.base_version - 1);
            next = epoch.parent;
        }
        None
    }

    /// Every `(version, value)` entry visible to `client`, per key, in version order.
    pub(crate) fn history(&self, client: ClientId) -> BTreeMap<String, Vec<(u64, Vec<u8>)>> {
        let cursor = self.cursor(client);
        let mut history: BTreeMap<String, Vec<(u64, Vec<u8>)>> = BTreeMap::new();

        let mut limit = Some(cursor.version);
        let mut next = Some(cursor.epoch);
        while let (Some(id), Some(version)) = (next, limit) {
            let epoch = self.epoch(id);
            if version >= epoch.base_version {
                for (key, stack) in &epoch.stacks {
                    let entries = history.entry(key.clone()).or_default();
                    entries.extend(
                        stack
                            .range(..=version)
                            .map(|(version, value)| (*version, value.clone())),
                    );
                }
            }
            limit = epoch.base_version.checked_sub(1).map(|base| base.min(version));
            next = epoch.parent;
        }

        history.retain(|_, entries| !entries.is_empty());
        for entries in history.values_mut() {
            entries.sort_by_key(|(version, _)| *version);
        }
        history
    }

    /* ↓↓↓ Writes ↓↓↓ */

    /// Write `value` at `client`'s current version, branching first if another dependent reads that
    /// version of the client's epoch.
    pub(crate) fn set(&mut self, client: ClientId, key: &str, value: Vec<u8>) {
        let cursor = self.cursor(client);
        if self.dependency_top(cursor.epoch, Some(client)) > cursor.version {
            self.branch(client, cursor.version, true);
        } else if self.epoch(cursor.epoch).top_version() > cursor.version + 1 {
            self.epoch_mut(cursor.epoch)
                .pop_layers_from(cursor.version + 1);
        }
        let cursor = self.cursor(client);
        self.epoch_mut(cursor.epoch).set(cursor.version, key, value);
    }

    /// Advance `client` to the next, empty version.
    pub(crate) fn push_version(&mut self, client: ClientId) {
        let version = self.cursor(client).version + 1;
        self.clear_from(client, version);
        if let Some(cursor) = self.clients.get_mut(&client) {
            cursor.version = version;
        }
    }

    /// Move `client` into its own epoch, branched at its current version.
    pub(crate) fn push_epoch(&mut self, client: ClientId) {
        let cursor = self.cursor(client);
        self.branch(client, cursor.version, true);
    }

    /// Discard, for `client`, every write at or above `version`.
    pub(crate) fn revert(&mut self, client: ClientId, version: u64) {
        let cursor = self.cursor(client);
        assert!(
            version <= cursor.version,
            "Programming error: revert to version {} above the store's version {}.",
            version,
            cursor.version
        );

        let mut epoch = cursor.epoch;
        while self.epoch(epoch).base_version > version {
            match self.epoch(epoch).parent {
                Some(parent) => epoch = parent,
                None => break,
            }
        }
        self.move_client(client, epoch);
        self.clear_from(client, version);
        if let Some(cursor) = self.clients.get_mut(&client) {
            cursor.version = version;
        }
    }

    /* ↓↓↓ Optimizing ↓↓↓ */

    /// Pop layers no dependent reads, and merge epochs into their parents where a single child is the
    /// top dependent. Repeats until nothing changes.
    pub(crate) fn optimize(&mut self) {
        loop {
            let mut changed = false;
            let ids: Vec<EpochId> = (0..self.epochs.len())
                .filter(|id| self.epochs[*id].is_some())
                .collect();

            for id in ids {
                if self.epochs[id].is_none() {
                    continue;
                }

                let immutable_top = self.dependency_top(id, None);
                let epoch = self.epoch(id);
                if epoch.top_version() > immutable_top.max(epoch.base_version) {
                    let from = immutable_top.max(epoch.base_version);
                    self.epoch_mut(id).pop_layers_from(from);
                    changed = true;
                }

                if let Some(child) = self.mergeable_child(id) {
                    self.merge_child(id, child);
                    changed = true;
                }
            }

            if !changed {
                return;
            }
        }
    }

    /// The child that is the sole top dependent of `epoch`, if there is one.
    fn mergeable_child(&self, id: EpochId) -> Option<EpochId> {
        let epoch = self.epoch(id);
        let top_child = epoch.children.iter().copied().max_by_key(|child| {
            let child = self.epoch(*child);
            (child.base_version, child.top_version())
        })?;
        let top_child_base = self.epoch(top_child).base_version;

        let client_top = epoch
            .clients
            .iter()
            .map(|client| self.cursor(*client).version + 1)
            .max()
            .unwrap_or(0);
        if client_top > top_child_base {
            return None;
        }

        let contenders = epoch
            .children
            .iter()
            .filter(|child| self.epoch(**child).base_version == top_child_base)
            .count();
        if contenders > 1 {
            return None;
        }
        Some(top_child)
    }

    /// Splice `child` into its parent `id`. The child's clients and children are re-pointed to `id`.
    fn merge_child(&mut self, id: EpochId, child: EpochId) {
        let Some(child_epoch) = self.epochs[child].take() else {
            return;
        };
        self.free.push(child);

        let parent = self.epoch_mut(id);
        parent.children.remove(&child);
        parent.pop_layers_from(child_epoch.base_version);
        for (key, stack) in child_epoch.stacks {
            for (version, value) in stack {
                parent.set(version, &key, value);
            }
        }
        for grandchild in &child_epoch.children {
            parent.children.insert(*grandchild);
        }
        for client in &child_epoch.clients {
            parent.clients.insert(*client);
        }

        for grandchild in child_epoch.children {
            self.epoch_mut(grandchild).parent = Some(id);
        }
        for client in child_epoch.clients {
            if let Some(cursor) = self.clients.get_mut(&client) {
                cursor.epoch = id;
            }
        }
    }
}
