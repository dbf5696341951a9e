/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The block tree: every block header the local miner knows about, arranged by parent.
//!
//! # Nodes
//!
//! A block tree is a tree of [nodes](BlockTreeNode) rooted at the first header inserted into it, usually
//! the genesis block's, or the head of a ledger restored from persistence. Nodes are kept in an arena and
//! refer to each other by [`NodeId`]: a node knows its parent and its children, and is found by the
//! digest of its header through an index.
//!
//! Each node carries a [status](NodeStatus) describing how much is known about its block, and a
//! [meta](NodeMeta) flag marking it as *provisional* (a block the local miner may produce but has not
//! produced yet) or *refused* (the ledger rejected it or one of its ancestors).
//!
//! # Status propagation
//!
//! A new node inherits `Missing` or `Invalid` from its parent. When a node is marked later, the mark
//! also flows down to its existing descendants:
//! - `Missing` replaces `New` in every descendant.
//! - `Invalid` replaces `New` and `Missing` in every descendant, and flags every `Complete` descendant as
//!   refused.
//!
//! # Tags
//!
//! A tag is a named cursor into the tree, such as the miner's `"working"` (ledger) and `"best"` tags,
//! and one `"remote.<url>"` tag per remote miner. Tags refer to nodes but never keep them alive; many tags
//! may refer to the same node.
//!
//! # Forks
//!
//! Fork points and the order over branches are defined in [`fork`].

pub mod fork;
pub use fork::{AppendCheck, BlockTreeFork, BlockTreeSegment, RewriteMode};

pub mod node;
pub use node::{BlockTreeNode, NodeId, NodeMeta, NodeStatus};

pub mod sampler;
pub use sampler::BlockTreeSampler;

use std::collections::HashMap;

use crate::types::{
    block::{Block, BlockHeader},
    data_types::CryptoHash,
};

#[derive(Clone, Debug, Default)]
pub struct BlockTree {
    nodes: Vec<Option<BlockTreeNode>>,
    free: Vec<usize>,
    by_digest: HashMap<CryptoHash, NodeId>,
    tags: HashMap<String, NodeId>,
    root: Option<NodeId>,
}

impl BlockTree {
    pub fn new() -> BlockTree {
        BlockTree::default()
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub fn count_nodes(&self) -> usize {
        self.by_digest.len()
    }

    /// Get the node with `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` does not refer to a node of this tree. Ids are only handed out by the tree and are
    /// only invalidated by [`remove_provisional`](Self::remove_provisional).
    pub fn node(&self, id: NodeId) -> &BlockTreeNode {
        self.get(id)
            .expect("Programming error: node id does not refer to a node in the block tree.")
    }

    pub fn get(&self, id: NodeId) -> Option<&BlockTreeNode> {
        self.nodes.get(id.0).and_then(Option::as_ref)
    }

    fn node_mut(&mut self, id: NodeId) -> &mut BlockTreeNode {
        self.nodes
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .expect("Programming error: node id does not refer to a node in the block tree.")
    }

    pub fn find(&self, digest: &CryptoHash) -> Option<NodeId> {
        self.by_digest.get(digest).copied()
    }

    /* ↓↓↓ Tags ↓↓↓ */

    pub fn tagged(&self, tag: &str) -> Option<NodeId> {
        self.tags.get(tag).copied()
    }

    /// Point `tag` at `node`.
    pub fn tag(&mut self, tag: &str, node: NodeId) {
        self.tags.insert(tag.to_string(), node);
    }

    /// Point `tag` at the node `other` points to, if any.
    pub fn retag(&mut self, tag: &str, other: &str) -> Option<NodeId> {
        let node = self.tagged(other)?;
        self.tag(tag, node);
        Some(node)
    }

    pub fn untag(&mut self, tag: &str) {
        self.tags.remove(tag);
    }

    /* ↓↓↓ Insertion ↓↓↓ */

    /// Insert `header` if it is not in the tree yet, complete it with `block` if given, and point `tag`
    /// at its node.
    ///
    /// Returns `None`, leaving the tag untouched, if the header's parent is unknown and the tree already
    /// has a root.
    pub fn affirm(
        &mut self,
        tag: &str,
        header: BlockHeader,
        block: Option<Block>,
        is_provisional: bool,
    ) -> Option<NodeId> {
        let id = match self.find(&header.digest()) {
            Some(id) => id,
            None => self.insert(header, is_provisional)?,
        };
        self.tag(tag, id);
        if let Some(block) = block {
            self.update(block);
        }
        Some(id)
    }

    /// Insert the header of a block the local miner may produce, unless its parent already has a child
    /// by the same miner that is provisional or still usable, in which case that child is returned.
    pub fn affirm_provisional(&mut self, header: BlockHeader) -> Option<NodeId> {
        let parent = header.prev_digest.and_then(|digest| self.find(&digest))?;
        let existing = self.node(parent).children.iter().copied().find(|child| {
            let child = self.node(*child);
            child.header.miner_id == header.miner_id && (child.is_provisional() || !child.is_missing_or_invalid())
        });
        match existing {
            Some(id) => Some(id),
            None => self.insert(header, true),
        }
    }

    /// Remove the childless, untagged provisional children of `parent`.
    pub fn remove_provisional(&mut self, parent: NodeId) {
        let removable: Vec<NodeId> = self
            .node(parent)
            .children
            .iter()
            .copied()
            .filter(|child| {
                let node = self.node(*child);
                node.is_provisional() && node.children.is_empty() && !self.tags.values().any(|tagged| tagged == child)
            })
            .collect();

        for id in &removable {
            if let Some(node) = self.nodes[id.0].take() {
                self.by_digest.remove(&node.digest);
                self.free.push(id.0);
            }
        }
        self.node_mut(parent)
            .children
            .retain(|child| !removable.contains(child));
    }

    fn insert(&mut self, header: BlockHeader, is_provisional: bool) -> Option<NodeId> {
        let parent = header.prev_digest.and_then(|digest| self.find(&digest));
        if parent.is_none() && self.root.is_some() {
            return None;
        }

        let meta = if is_provisional {
            NodeMeta::Provisional
        } else {
            NodeMeta::None
        };
        let mut node = BlockTreeNode::new(header, meta, parent);

        if let Some(parent) = parent {
            let parent = self.node(parent);
            if matches!(parent.status, NodeStatus::Missing | NodeStatus::Invalid) {
                node.status = parent.status;
            }
            if parent.is_refused() && !is_provisional {
                node.meta = NodeMeta::Refused;
            }
        }

        let digest = node.digest;
        let id = match self.free.pop() {
            Some(index) => {
                self.nodes[index] = Some(node);
                NodeId(index)
            }
            None => {
                self.nodes.push(Some(node));
                NodeId(self.nodes.len() - 1)
            }
        };

        match parent {
            Some(parent) => self.node_mut(parent).children.push(id),
            None => self.root = Some(id),
        }
        self.by_digest.insert(digest, id);
        Some(id)
    }

    /// Attach `block` to the node of its header and mark it complete.
    ///
    /// Does nothing and returns `None` if the header is not in the tree, the body does not match the
    /// header, or the node is already complete or invalid.
    pub fn update(&mut self, block: Block) -> Option<NodeId> {
        let id = self.find(&block.digest())?;
        if !block.is_correct() {
            return None;
        }
        let node = self.node_mut(id);
        if !node.status.can_become(NodeStatus::Complete) {
            return None;
        }
        node.block = Some(block);
        node.status = NodeStatus::Complete;
        Some(id)
    }

    /* ↓↓↓ Status ↓↓↓ */

    /// Mark `node` as `Missing` or `Invalid`, and propagate the mark to its descendants.
    ///
    /// Returns whether the node's own status changed. Marking a node `New` or `Complete` does nothing;
    /// nodes only become complete through [`update`](Self::update).
    pub fn mark(&mut self, node: NodeId, status: NodeStatus) -> bool {
        if !matches!(status, NodeStatus::Missing | NodeStatus::Invalid) {
            return false;
        }

        let changed = self.node(node).status.can_become(status);
        if changed {
            self.node_mut(node).status = status;
            log::debug!("marked block {} at height {} {}", self.node(node).digest, self.node(node).height(), status);
        }

        let mut stack = self.node(node).children.clone();
        while let Some(id) = stack.pop() {
            let descendant = self.node_mut(id);
            match (status, descendant.status) {
                (_, NodeStatus::New) | (NodeStatus::Invalid, NodeStatus::Missing) => descendant.status = status,
                (NodeStatus::Invalid, NodeStatus::Complete) => descendant.meta = NodeMeta::Refused,
                _ => (),
            }
            stack.extend(descendant.children.iter().copied());
        }
        changed
    }

    /// Flag `node` and all of its descendants as refused.
    pub fn refuse(&mut self, node: NodeId) {
        let mut stack = vec![node];
        while let Some(id) = stack.pop() {
            let node = self.node_mut(id);
            node.meta = NodeMeta::Refused;
            stack.extend(node.children.iter().copied());
        }
    }

    /// Walk up from `node` past every missing, invalid, or refused node.
    ///
    /// The root is returned if every node on the way is trimmed.
    pub fn trim_missing_or_invalid(&self, node: NodeId) -> NodeId {
        let mut cursor = node;
        while self.node(cursor).is_missing_or_invalid() {
            match self.node(cursor).parent {
                Some(parent) => cursor = parent,
                None => break,
            }
        }
        cursor
    }

    /// `node` followed by its ancestors, up to and including the root.
    pub fn ancestors(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(Some(node), move |id| self.node(*id).parent)
    }

    /* ↓↓↓ Logging ↓↓↓ */

    /// Log the tree, one line per run of single-child nodes, indented by depth. A `max_depth` of 0
    /// logs every run.
    pub fn log_tree(&self, prefix: &str, max_depth: usize) {
        let Some(root) = self.root else {
            return;
        };

        let mut stack = vec![(root, 0usize)];
        while let Some((start, depth)) = stack.pop() {
            if max_depth > 0 && depth >= max_depth {
                continue;
            }

            let mut line = ".   ".repeat(depth);
            let mut cursor = Some(start);
            let mut first = true;
            while let Some(id) = cursor {
                let node = self.node(id);
                if !first {
                    line.push(',');
                }
                first = false;
                let miner = if node.height().int() > 0 { node.header.miner_id.as_str() } else { "-" };
                line.push_str(&format!("[{}]", miner));

                cursor = match node.children.as_slice() {
                    [only] => Some(*only),
                    children => {
                        for child in children.iter().rev() {
                            stack.push((*child, depth + 1));
                        }
                        None
                    }
                };
            }
            log::info!("{}{}", prefix, line);
        }
    }
}
