/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Sampling the branch tips known in one tick.

use super::{node::NodeId, BlockTree};

/// Collects branch tips and finds the subtree they all share.
#[derive(Clone, Debug, Default)]
pub struct BlockTreeSampler {
    leaves: Vec<NodeId>,
}

impl BlockTreeSampler {
    pub fn new() -> BlockTreeSampler {
        BlockTreeSampler { leaves: Vec::new() }
    }

    /// Add a branch tip. Tips already sampled are ignored.
    pub fn add_leaf(&mut self, leaf: NodeId) {
        if !self.leaves.contains(&leaf) {
            self.leaves.push(leaf);
        }
    }

    pub fn leaves(&self) -> &[NodeId] {
        &self.leaves
    }

    /// The deepest node that is an ancestor of (or equal to) every sampled leaf, or `None` if nothing
    /// was sampled.
    pub fn sample(&self, tree: &BlockTree) -> Option<NodeId> {
        let (first, rest) = self.leaves.split_first()?;
        Some(rest.iter().fold(*first, |root, leaf| tree.find_root(root, *leaf)))
    }
}
