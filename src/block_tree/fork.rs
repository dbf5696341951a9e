/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Fork points and the total order over branches.
//!
//! # Segments
//!
//! [`BlockTree::find_fork`] splits two branches at their deepest common ancestor, the *root*. Each side
//! becomes a [`BlockTreeSegment`] with:
//! - `top`: the node the branch was given by.
//! - `tail`: the ancestor of `top` at the height of the lower of the two tops.
//! - `head`: the first node after the root on the way to `top`, if `top` is not the root itself.
//!
//! Both segments have the same [seg length](BlockTreeSegment::seg_length) (root to tail); their [full
//! lengths](BlockTreeSegment::full_length) (root to top) may differ.
//!
//! # Comparison
//!
//! [`BlockTree::compare`] orders two branches as follows:
//! 1. Under [`RewriteMode::Window`], if one branch is longer than the other, the shorter one loses unless
//!    its seg length reaches the longer one's [defeat count](BlockTreeSegment::rewrite_defeat_count),
//!    the number of blocks needed to overturn the time the longer segment spans.
//! 2. Otherwise the headers of the two segments are compared pairwise by charm, from the tails down to
//!    the root, and the side that wins more pairs is preferred.
//! 3. On an even score the longer branch is preferred, and between equally long branches the one with
//!    the smaller tip digest.

use std::cmp::Ordering;

use super::{
    node::{NodeId, NodeStatus},
    BlockTree,
};
use crate::types::{block::BlockHeader, data_types::BlockHeight};

/// Whether a shorter branch may overturn a longer one without limit, or only within the rewrite window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RewriteMode {
    Unrestricted,
    Window,
}

impl Default for RewriteMode {
    fn default() -> Self {
        RewriteMode::Window
    }
}

/// One side of a [`BlockTreeFork`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockTreeSegment {
    pub head: Option<NodeId>,
    pub tail: NodeId,
    pub top: NodeId,
    seg_length: u64,
    full_length: u64,
    defeat_count: u64,
}

impl BlockTreeSegment {
    /// Number of blocks from the root to the tail.
    pub fn seg_length(&self) -> u64 {
        self.seg_length
    }

    /// Number of blocks from the root to the top.
    pub fn full_length(&self) -> u64 {
        self.full_length
    }

    /// Number of blocks a competing segment needs to overturn this one.
    pub fn rewrite_defeat_count(&self) -> u64 {
        self.defeat_count
    }
}

/// Two branches split at their deepest common ancestor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockTreeFork {
    pub root: NodeId,
    pub seg0: BlockTreeSegment,
    pub seg1: BlockTreeSegment,
}

impl BlockTreeFork {
    pub fn seg_length(&self) -> u64 {
        self.seg0.seg_length
    }
}

/// Outcome of [`BlockTree::check_append`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AppendCheck {
    AlreadyExists,
    MissingParent,
    /// The header is below the tree's root, or its parent is refused or invalid.
    Refused,
    /// The header's time is earlier than its parent allows.
    TooSoon,
    Ok,
}

impl BlockTree {
    /// Split the branches ending at `node0` and `node1` at their deepest common ancestor.
    pub fn find_fork(&self, node0: NodeId, node1: NodeId) -> BlockTreeFork {
        let height0 = self.node(node0).height();
        let height1 = self.node(node1).height();
        let height = height0.min(height1);

        let mut cursor0 = self.ancestor_at(node0, height);
        let mut cursor1 = self.ancestor_at(node1, height);
        let (tail0, tail1) = (cursor0, cursor1);

        while cursor0 != cursor1 {
            cursor0 = self.expect_parent(cursor0);
            cursor1 = self.expect_parent(cursor1);
        }
        let root = cursor0;

        BlockTreeFork {
            root,
            seg0: self.segment(root, tail0, node0),
            seg1: self.segment(root, tail1, node1),
        }
    }

    /// The deepest common ancestor of `node0` and `node1`.
    pub fn find_root(&self, node0: NodeId, node1: NodeId) -> NodeId {
        self.find_fork(node0, node1).root
    }

    /// Order two branches. `Ordering::Less` means the branch ending at `node0` is preferred.
    ///
    /// The order is total and antisymmetric over any fixed set of branches: `compare(a, b)` is the
    /// reverse of `compare(b, a)`, and `Ordering::Equal` only when `node0 == node1`.
    pub fn compare(&self, node0: NodeId, node1: NodeId, rewrite_mode: RewriteMode) -> Ordering {
        if node0 == node1 {
            return Ordering::Equal;
        }

        let fork = self.find_fork(node0, node1);
        let full_length0 = fork.seg0.full_length();
        let full_length1 = fork.seg1.full_length();

        if rewrite_mode == RewriteMode::Window {
            let seg_length = fork.seg_length();
            if seg_length < full_length0 && seg_length < fork.seg0.rewrite_defeat_count() {
                return Ordering::Less;
            }
            if seg_length < full_length1 && seg_length < fork.seg1.rewrite_defeat_count() {
                return Ordering::Greater;
            }
        }

        let mut score: i64 = 0;
        let mut cursor0 = fork.seg0.tail;
        let mut cursor1 = fork.seg1.tail;
        while cursor0 != cursor1 {
            score += match BlockHeader::compare_charm(&self.node(cursor0).header.charm, &self.node(cursor1).header.charm)
            {
                Ordering::Less => -1,
                Ordering::Equal => 0,
                Ordering::Greater => 1,
            };
            cursor0 = self.expect_parent(cursor0);
            cursor1 = self.expect_parent(cursor1);
        }

        score
            .cmp(&0)
            .then_with(|| full_length1.cmp(&full_length0))
            .then_with(|| self.node(node0).digest().cmp(&self.node(node1).digest()))
    }

    /// Whether `ancestor` is `node` or one of its ancestors.
    pub fn is_ancestor_of(&self, ancestor: NodeId, node: NodeId) -> bool {
        let ancestor_height = self.node(ancestor).height();
        if self.node(node).height() < ancestor_height {
            return false;
        }
        self.ancestor_at(node, ancestor_height) == ancestor
    }

    /// Classify `header` before inserting it.
    pub fn check_append(&self, header: &BlockHeader) -> AppendCheck {
        let Some(root) = self.root else {
            return AppendCheck::Ok;
        };
        if header.height < self.node(root).height() {
            return AppendCheck::Refused;
        }
        if self.find(&header.digest()).is_some() {
            return AppendCheck::AlreadyExists;
        }

        let Some(parent) = header.prev_digest.and_then(|digest| self.find(&digest)) else {
            return AppendCheck::MissingParent;
        };
        let parent = self.node(parent);
        if parent.is_refused() || parent.status() == NodeStatus::Invalid {
            return AppendCheck::Refused;
        }
        if header.time < parent.header().next_time() {
            return AppendCheck::TooSoon;
        }
        AppendCheck::Ok
    }

    /// The ancestor of `node` at `height`, which must not be above `node`.
    pub(super) fn ancestor_at(&self, node: NodeId, height: BlockHeight) -> NodeId {
        let mut cursor = node;
        while self.node(cursor).height() > height {
            cursor = self.expect_parent(cursor);
        }
        cursor
    }

    fn expect_parent(&self, node: NodeId) -> NodeId {
        self.node(node)
            .parent()
            .expect("Programming error: walked past the root of the block tree.")
    }

    fn segment(&self, root: NodeId, tail: NodeId, top: NodeId) -> BlockTreeSegment {
        let root_height = self.node(root).height();
        let top_node = self.node(top);

        let head = if top == root {
            None
        } else {
            let mut cursor = top;
            while self.node(cursor).parent() != Some(root) {
                cursor = self.expect_parent(cursor);
            }
            Some(cursor)
        };

        let defeat_count = match head {
            None => 0,
            Some(head) => {
                let head_header = self.node(head).header();
                let elapsed = top_node.header().time.saturating_sub(head_header.time);
                match head_header.rewrite_window {
                    0 => u64::MAX,
                    window => (elapsed + window - 1) / window,
                }
            }
        };

        BlockTreeSegment {
            head,
            tail,
            top,
            seg_length: self.node(tail).height() - root_height,
            full_length: top_node.height() - root_height,
            defeat_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        block::Block,
        crypto_primitives::{make_visage, Keypair, SigningKey},
        data_types::CryptoHash,
    };

    fn keypair(seed: u8) -> Keypair {
        Keypair::new(SigningKey::from_bytes(&[seed; 32]))
    }

    fn child(parent: &BlockHeader, miner: &str, seed: u8, time: u64) -> Block {
        let keypair = keypair(seed);
        let visage = make_visage(&keypair, miner);
        Block::new(parent.next(miner, &keypair, visage, time, 0), 0, Vec::new()).sign(&keypair)
    }

    /// A header on `parent` with a chosen charm. Fork choice reads headers only, so it needs no pose.
    fn ranked(parent: &BlockHeader, miner: &str, charm: u8, time: u64) -> BlockHeader {
        BlockHeader {
            height: BlockHeight::new(parent.height.int() + 1),
            prev_digest: Some(parent.digest()),
            miner_id: miner.to_string(),
            charm: CryptoHash::new([charm; 32]),
            time,
            ..parent.clone()
        }
    }

    fn tree_with_genesis(rewrite_window: u64) -> (BlockTree, BlockHeader) {
        let mut tree = BlockTree::new();
        let genesis = BlockHeader::genesis(0, 10, rewrite_window);
        tree.affirm("root", genesis.clone(), None, false).unwrap();
        (tree, genesis)
    }

    /// Affirm a branch on `parent` with one block per entry of `times`, all with the same charm.
    fn extend(
        tree: &mut BlockTree,
        parent: &BlockHeader,
        miner: &str,
        charm: u8,
        times: &[u64],
    ) -> Vec<(BlockHeader, NodeId)> {
        let mut parent = parent.clone();
        let mut branch = Vec::new();
        for time in times {
            let header = ranked(&parent, miner, charm, *time);
            let id = tree.affirm(miner, header.clone(), None, false).unwrap();
            branch.push((header.clone(), id));
            parent = header;
        }
        branch
    }

    #[test]
    fn fork_of_a_branch_and_its_ancestor() {
        let mut tree = BlockTree::new();
        let genesis = Block::genesis(BlockHeader::genesis(0, 10, 60), Vec::new());
        let genesis_id = tree.affirm("root", genesis.header.clone(), Some(genesis.clone()), false).unwrap();

        let b1 = child(&genesis.header, "a", 1, 10);
        let b2 = child(&b1.header, "a", 1, 20);
        tree.affirm("a", b1.header.clone(), Some(b1.clone()), false).unwrap();
        let b2_id = tree.affirm("a", b2.header.clone(), Some(b2.clone()), false).unwrap();

        let fork = tree.find_fork(b2_id, genesis_id);
        assert_eq!(fork.root, genesis_id);
        assert_eq!(fork.seg_length(), 0);
        assert_eq!(fork.seg0.full_length(), 2);
        assert_eq!(fork.seg1.full_length(), 0);
        assert_eq!(fork.seg1.head, None);
        assert_eq!(tree.node(fork.seg0.head.unwrap()).digest(), b1.digest());
        assert!(tree.is_ancestor_of(genesis_id, b2_id));
        assert!(!tree.is_ancestor_of(b2_id, genesis_id));

        // An extension of a branch beats the branch itself.
        assert_eq!(tree.compare(b2_id, genesis_id, RewriteMode::Unrestricted), Ordering::Less);
    }

    #[test]
    fn zero_rewrite_window_makes_defeat_impossible() {
        let mut tree = BlockTree::new();
        let genesis = Block::genesis(BlockHeader::genesis(0, 10, 0), Vec::new());
        tree.affirm("root", genesis.header.clone(), Some(genesis.clone()), false).unwrap();

        let b1 = child(&genesis.header, "a", 1, 10);
        let b1_id = tree.affirm("a", b1.header.clone(), None, false).unwrap();
        let fork = tree.find_fork(b1_id, b1_id);
        assert_eq!(fork.seg0.rewrite_defeat_count(), 0);

        let b2 = child(&b1.header, "a", 1, 20);
        let b2_id = tree.affirm("a", b2.header.clone(), None, false).unwrap();
        let root = tree.root().unwrap();
        assert_eq!(tree.find_fork(b2_id, root).seg0.rewrite_defeat_count(), u64::MAX);
        assert_ne!(tree.node(b2_id).digest(), CryptoHash::zero());
    }

    #[test]
    fn window_mode_keeps_a_short_branch_from_overturning_a_long_one() {
        let (mut tree, genesis) = tree_with_genesis(60);
        // The long branch spans 210 seconds from its head, so it takes 4 blocks to defeat.
        let long = extend(&mut tree, &genesis, "a", 1, &[10, 80, 150, 220]);
        let short = extend(&mut tree, &genesis, "b", 200, &[10, 20, 30, 40]);
        let long_top = long[3].1;

        let fork = tree.find_fork(short[1].1, long_top);
        assert_eq!(fork.root, tree.root().unwrap());
        assert_eq!(fork.seg_length(), 2);
        assert_eq!(fork.seg0.rewrite_defeat_count(), 1);
        assert_eq!(fork.seg1.rewrite_defeat_count(), 4);

        // Two or three blocks with better charms lose to the long branch.
        assert_eq!(tree.compare(short[1].1, long_top, RewriteMode::Window), Ordering::Greater);
        assert_eq!(tree.compare(long_top, short[1].1, RewriteMode::Window), Ordering::Less);
        assert_eq!(tree.compare(short[2].1, long_top, RewriteMode::Window), Ordering::Greater);

        // Without the window, the charm score decides.
        assert_eq!(tree.compare(short[1].1, long_top, RewriteMode::Unrestricted), Ordering::Less);

        // Four blocks reach the defeat count.
        assert_eq!(tree.compare(short[3].1, long_top, RewriteMode::Window), Ordering::Less);
        assert_eq!(tree.compare(long_top, short[3].1, RewriteMode::Window), Ordering::Greater);
    }

    #[test]
    fn equal_charm_scores_prefer_the_longer_branch_then_the_smaller_digest() {
        let (mut tree, genesis) = tree_with_genesis(60);
        let x = extend(&mut tree, &genesis, "x", 5, &[10, 20]);
        let y = extend(&mut tree, &genesis, "y", 5, &[10]);

        for mode in [RewriteMode::Unrestricted, RewriteMode::Window] {
            assert_eq!(tree.compare(x[1].1, y[0].1, mode), Ordering::Less);
            assert_eq!(tree.compare(y[0].1, x[1].1, mode), Ordering::Greater);

            let by_digest = x[0].0.digest().cmp(&y[0].0.digest());
            assert_ne!(by_digest, Ordering::Equal);
            assert_eq!(tree.compare(x[0].1, y[0].1, mode), by_digest);
            assert_eq!(tree.compare(y[0].1, x[0].1, mode), by_digest.reverse());
        }
    }

    #[test]
    fn forks_split_at_the_deepest_common_ancestor() {
        let (mut tree, genesis) = tree_with_genesis(60);
        let genesis_id = tree.root().unwrap();
        let p = extend(&mut tree, &genesis, "p", 50, &[10, 20]);
        let q = extend(&mut tree, &genesis, "q", 90, &[10]);
        let r = extend(&mut tree, &p[0].0, "r", 70, &[20]);
        let s = extend(&mut tree, &genesis, "s", 10, &[10, 20, 30]);

        assert_eq!(tree.find_root(p[1].1, r[0].1), p[0].1);
        assert_eq!(tree.find_root(r[0].1, p[1].1), p[0].1);
        assert_eq!(tree.find_root(p[1].1, q[0].1), genesis_id);
        assert_eq!(tree.find_root(r[0].1, s[2].1), genesis_id);
        assert_eq!(tree.find_root(s[2].1, s[0].1), s[0].1);

        let fork = tree.find_fork(r[0].1, p[1].1);
        assert_eq!(fork.seg0.head, Some(r[0].1));
        assert_eq!(fork.seg1.head, Some(p[1].1));

        // No common ancestor of a pair is deeper than its fork root.
        let mut nodes = vec![genesis_id];
        nodes.extend(p.iter().chain(&q).chain(&r).chain(&s).map(|(_, id)| *id));
        for a in &nodes {
            for b in &nodes {
                let root = tree.find_root(*a, *b);
                assert!(tree.is_ancestor_of(root, *a) && tree.is_ancestor_of(root, *b));
                for common in nodes
                    .iter()
                    .filter(|node| tree.is_ancestor_of(**node, *a) && tree.is_ancestor_of(**node, *b))
                {
                    assert!(tree.node(*common).height() <= tree.node(root).height());
                }
            }
        }
    }

    #[test]
    fn compare_orders_competing_branches_consistently() {
        let (mut tree, genesis) = tree_with_genesis(60);
        let p = extend(&mut tree, &genesis, "p", 50, &[10, 20]);
        let q = extend(&mut tree, &genesis, "q", 90, &[10]);
        let r = extend(&mut tree, &p[0].0, "r", 70, &[20]);
        let s = extend(&mut tree, &genesis, "s", 10, &[10, 20, 30]);
        let (p2, q1, r2, s3) = (p[1].1, q[0].1, r[0].1, s[2].1);
        let leaves = [s3, p2, q1, r2];

        for mode in [RewriteMode::Unrestricted, RewriteMode::Window] {
            let mut sorted = leaves.to_vec();
            sorted.sort_by(|a, b| tree.compare(*a, *b, mode));
            assert_eq!(sorted, vec![q1, r2, p2, s3]);

            for a in leaves {
                for b in leaves {
                    let ab = tree.compare(a, b, mode);
                    assert_eq!(ab, tree.compare(b, a, mode).reverse());
                    assert_eq!(ab == Ordering::Equal, a == b);
                    for c in leaves {
                        if ab == Ordering::Less && tree.compare(b, c, mode) == Ordering::Less {
                            assert_eq!(tree.compare(a, c, mode), Ordering::Less);
                        }
                    }
                }
            }
        }
    }
}
