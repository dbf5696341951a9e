/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for the [`BlockHeader`] and [`Block`] types, and the [`VerificationPolicy`] used when a
//! block is applied to a ledger.
//!
//! ## Digests
//!
//! A header's [digest](BlockHeader::digest) is the SHA256 hash of every header field except the
//! signature. One of those fields is `body_hash`, the hash of the block's reward and transactions, so
//! the digest of a block and the digest of its header are the same value and both commit to the
//! transactions.
//!
//! ## Charm
//!
//! Every header carries a charm computed from its parent's pose and its miner's visage (see
//! [`calculate_charm`]). [`BlockHeader::compare_charm`] orders headers by charm; a larger charm is
//! preferred.

use std::{
    cmp::Ordering,
    ops::{BitAnd, BitOr},
};

use borsh::{BorshDeserialize, BorshSerialize};

use super::{
    crypto_primitives::{
        calculate_charm, make_pose, pose_message, verify_signature, CryptoHasher, Digest, Keypair,
        PublicKeyBytes,
    },
    data_types::{BlockHeight, CryptoHash, SignatureBytes},
    transaction::Transaction,
};

/// A bitmask of the independently togglable checks [`Block::verify`](crate::ledger) performs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VerificationPolicy(u8);

impl VerificationPolicy {
    pub const NONE: VerificationPolicy = VerificationPolicy(0);
    /// The pose must be the miner's signature over the parent's pose.
    pub const VERIFY_POSE: VerificationPolicy = VerificationPolicy(1 << 0);
    /// The charm must follow from the parent's pose and the miner's visage.
    pub const VERIFY_CHARM: VerificationPolicy = VerificationPolicy(1 << 1);
    /// The header signature must verify against the miner's key.
    pub const VERIFY_BLOCK_SIG: VerificationPolicy = VerificationPolicy(1 << 2);
    /// Every transaction signature must verify against the maker's key.
    pub const VERIFY_TRANSACTION_SIG: VerificationPolicy = VerificationPolicy(1 << 3);
    pub const ALL: VerificationPolicy = VerificationPolicy(0b1111);

    pub const fn contains(&self, other: VerificationPolicy) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn bits(&self) -> u8 {
        self.0
    }
}

impl Default for VerificationPolicy {
    fn default() -> Self {
        VerificationPolicy::ALL
    }
}

impl BitOr for VerificationPolicy {
    type Output = VerificationPolicy;
    fn bitor(self, rhs: Self) -> Self::Output {
        VerificationPolicy(self.0 | rhs.0)
    }
}

impl BitAnd for VerificationPolicy {
    type Output = VerificationPolicy;
    fn bitand(self, rhs: Self) -> Self::Output {
        VerificationPolicy(self.0 & rhs.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct BlockHeader {
    pub height: BlockHeight,
    /// Digest of the parent block. `None` only for the genesis block.
    pub prev_digest: Option<CryptoHash>,
    /// Name of the account of the miner that produced the block. Empty for the genesis block.
    pub miner_id: String,
    pub visage: SignatureBytes,
    pub pose: SignatureBytes,
    pub charm: CryptoHash,
    /// Seconds since the Unix epoch.
    pub time: u64,
    pub block_delay: u64,
    pub rewrite_window: u64,
    pub release: u64,
    pub body_hash: CryptoHash,
    pub signature: SignatureBytes,
}

impl BlockHeader {
    /// Create the header of the genesis block.
    pub fn genesis(time: u64, block_delay: u64, rewrite_window: u64) -> BlockHeader {
        BlockHeader {
            height: BlockHeight::new(0),
            prev_digest: None,
            miner_id: String::new(),
            visage: SignatureBytes::zero(),
            pose: SignatureBytes::zero(),
            charm: CryptoHash::zero(),
            time,
            block_delay,
            rewrite_window,
            release: 0,
            body_hash: CryptoHash::zero(),
            signature: SignatureBytes::zero(),
        }
    }

    /// Create an unsigned header for a block following `self`, mined by `miner_id` with `keypair`.
    ///
    /// The pose and charm are final; the body hash and signature are filled in by [`Block::new`] and
    /// [`Block::sign`].
    pub fn next(
        &self,
        miner_id: &str,
        keypair: &Keypair,
        visage: SignatureBytes,
        time: u64,
        release: u64,
    ) -> BlockHeader {
        BlockHeader {
            height: self.height + 1,
            prev_digest: Some(self.digest()),
            miner_id: miner_id.to_string(),
            visage,
            pose: make_pose(keypair, &self.pose),
            charm: self.next_charm(&visage),
            time,
            block_delay: self.block_delay,
            rewrite_window: self.rewrite_window,
            release,
            body_hash: CryptoHash::zero(),
            signature: SignatureBytes::zero(),
        }
    }

    /// SHA256 hash of all fields except the signature.
    pub fn digest(&self) -> CryptoHash {
        let mut bytes = Vec::new();
        // Writing into a Vec<u8> cannot fail.
        let _ = self.height.serialize(&mut bytes);
        let _ = self.prev_digest.serialize(&mut bytes);
        let _ = self.miner_id.serialize(&mut bytes);
        let _ = self.visage.serialize(&mut bytes);
        let _ = self.pose.serialize(&mut bytes);
        let _ = self.charm.serialize(&mut bytes);
        let _ = self.time.serialize(&mut bytes);
        let _ = self.block_delay.serialize(&mut bytes);
        let _ = self.rewrite_window.serialize(&mut bytes);
        let _ = self.release.serialize(&mut bytes);
        let _ = self.body_hash.serialize(&mut bytes);

        let mut hasher = CryptoHasher::new();
        hasher.update(&bytes);
        CryptoHash::new(hasher.finalize().into())
    }

    /// Earliest time at which a child of this block may be mined.
    pub fn next_time(&self) -> u64 {
        self.time.saturating_add(self.block_delay)
    }

    /// Whether a block mined at `now` could still replace this one.
    pub fn is_in_rewrite_window(&self, now: u64) -> bool {
        now < self.time.saturating_add(self.rewrite_window)
    }

    /// Charm of a child of this block mined by a miner with `visage`.
    pub fn next_charm(&self, visage: &SignatureBytes) -> CryptoHash {
        calculate_charm(&self.pose, visage)
    }

    /// Whether `self` is the parent of `child`.
    pub fn is_parent_of(&self, child: &BlockHeader) -> bool {
        child.prev_digest == Some(self.digest()) && child.height == self.height + 1
    }

    pub fn is_genesis(&self) -> bool {
        self.height.int() == 0
    }

    /// Order two charms. `Ordering::Less` means `charm0` is preferred.
    pub fn compare_charm(charm0: &CryptoHash, charm1: &CryptoHash) -> Ordering {
        charm1.cmp(charm0)
    }

    /// Check that the pose of this header is the signature of `miner_key` over `prev_pose`.
    pub fn has_valid_pose(&self, miner_key: &PublicKeyBytes, prev_pose: &SignatureBytes) -> bool {
        verify_signature(miner_key, &pose_message(prev_pose).bytes(), &self.pose)
    }

    /// Check that the signature of this header is the signature of `miner_key` over its digest.
    pub fn has_valid_signature(&self, miner_key: &PublicKeyBytes) -> bool {
        verify_signature(miner_key, &self.digest().bytes(), &self.signature)
    }
}

/// A header, a reward, and an ordered sequence of transactions.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Block {
    pub header: BlockHeader,
    /// Reward requested by the miner.
    pub reward: u64,
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Create a block from `header`, setting the header's body hash to commit to `reward` and
    /// `transactions`.
    pub fn new(mut header: BlockHeader, reward: u64, transactions: Vec<Transaction>) -> Block {
        header.body_hash = Block::body_hash(reward, &transactions);
        Block {
            header,
            reward,
            transactions,
        }
    }

    /// Create the genesis block.
    pub fn genesis(header: BlockHeader, transactions: Vec<Transaction>) -> Block {
        Block::new(header, 0, transactions)
    }

    pub fn body_hash(reward: u64, transactions: &Vec<Transaction>) -> CryptoHash {
        let mut bytes = Vec::new();
        let _ = reward.serialize(&mut bytes);
        let _ = transactions.serialize(&mut bytes);

        let mut hasher = CryptoHasher::new();
        hasher.update(&bytes);
        CryptoHash::new(hasher.finalize().into())
    }

    /// Sign the header with `keypair`.
    pub fn sign(mut self, keypair: &Keypair) -> Block {
        self.header.signature = keypair.sign(&self.header.digest().bytes());
        self
    }

    pub fn digest(&self) -> CryptoHash {
        self.header.digest()
    }

    pub fn height(&self) -> BlockHeight {
        self.header.height
    }

    /// Checks that the header commits to this block's body.
    pub fn is_correct(&self) -> bool {
        self.header.body_hash == Block::body_hash(self.reward, &self.transactions)
    }

    /// Total weight of the block's transactions.
    pub fn weight(&self) -> u64 {
        self.transactions.iter().map(Transaction::weight).sum()
    }
}
