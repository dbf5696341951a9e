/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Nodes of the [block tree](super::BlockTree).

use std::fmt::{self, Display, Formatter};

use crate::types::{
    block::{Block, BlockHeader},
    data_types::{BlockHeight, CryptoHash},
};

/// Stable index of a node in the block tree's arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub(super) usize);

impl NodeId {
    pub const fn int(&self) -> usize {
        self.0
    }
}

/// How much the tree knows about the block of a node.
///
/// `New` may become any other status; `Missing` may still become `Complete` or `Invalid`. `Complete` and
/// `Invalid` are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeStatus {
    /// Only the header is known.
    New,
    /// No remote miner could provide the block when last asked.
    Missing,
    /// The block is known and matches the header.
    Complete,
    /// The block, or one of its ancestors, failed validation.
    Invalid,
}

impl NodeStatus {
    pub(super) fn can_become(&self, next: NodeStatus) -> bool {
        match (self, next) {
            (NodeStatus::Complete, _) | (NodeStatus::Invalid, _) => false,
            (NodeStatus::Missing, NodeStatus::New) => false,
            (current, next) => *current != next,
        }
    }
}

impl Display for NodeStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeStatus::New => "new",
            NodeStatus::Missing => "missing",
            NodeStatus::Complete => "complete",
            NodeStatus::Invalid => "invalid",
        };
        write!(f, "{}", name)
    }
}

/// Flags orthogonal to [`NodeStatus`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeMeta {
    None,
    /// A header-only placeholder for a block the local miner may produce.
    Provisional,
    /// The ledger rejected this block or one of its ancestors. The node's status is left untouched.
    Refused,
}

#[derive(Clone, Debug)]
pub struct BlockTreeNode {
    pub(super) header: BlockHeader,
    pub(super) digest: CryptoHash,
    pub(super) block: Option<Block>,
    pub(super) status: NodeStatus,
    pub(super) meta: NodeMeta,
    pub(super) parent: Option<NodeId>,
    pub(super) children: Vec<NodeId>,
}

impl BlockTreeNode {
    pub(super) fn new(header: BlockHeader, meta: NodeMeta, parent: Option<NodeId>) -> BlockTreeNode {
        BlockTreeNode {
            digest: header.digest(),
            header,
            block: None,
            status: NodeStatus::New,
            meta,
            parent,
            children: Vec::new(),
        }
    }

    pub fn header(&self) -> &BlockHeader {
        &self.header
    }

    pub fn digest(&self) -> CryptoHash {
        self.digest
    }

    pub fn height(&self) -> BlockHeight {
        self.header.height
    }

    pub fn block(&self) -> Option<&Block> {
        self.block.as_ref()
    }

    pub fn status(&self) -> NodeStatus {
        self.status
    }

    pub fn meta(&self) -> NodeMeta {
        self.meta
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn is_complete(&self) -> bool {
        self.status == NodeStatus::Complete
    }

    pub fn is_provisional(&self) -> bool {
        self.meta == NodeMeta::Provisional
    }

    pub fn is_refused(&self) -> bool {
        self.meta == NodeMeta::Refused
    }

    /// Missing, invalid, and refused nodes are trimmed from the end of a branch before it is considered.
    pub fn is_missing_or_invalid(&self) -> bool {
        matches!(self.status, NodeStatus::Missing | NodeStatus::Invalid) || self.is_refused()
    }
}
