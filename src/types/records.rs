/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Records stored in the [ledger](crate::ledger).

use std::collections::BTreeMap;

use borsh::{BorshDeserialize, BorshSerialize};

use super::{
    crypto_primitives::{verify_signature, PublicKeyBytes},
    data_types::{AccountIndex, BlockHeight, SignatureBytes},
};

/// A named key held by an account, together with the policy that restricts what it may sign.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct KeyAndPolicy {
    pub key: PublicKeyBytes,
    /// Names of the transaction types this key may authorize. Empty means every type.
    pub restrictions: Vec<String>,
}

impl KeyAndPolicy {
    /// A key that may authorize every transaction type.
    pub fn unrestricted(key: PublicKeyBytes) -> KeyAndPolicy {
        KeyAndPolicy {
            key,
            restrictions: Vec::new(),
        }
    }

    pub fn permits(&self, transaction_type: &str) -> bool {
        self.restrictions.is_empty() || self.restrictions.iter().any(|r| r == transaction_type)
    }
}

/// Balance, transaction nonce, and keys of one account.
#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Account {
    pub balance: u64,
    /// Nonce the next transaction made by this account must carry.
    pub nonce: u64,
    pub keys: BTreeMap<String, KeyAndPolicy>,
}

impl Account {
    pub fn key(&self, key_name: &str) -> Option<&KeyAndPolicy> {
        self.keys.get(key_name)
    }
}

/// Registration record of a miner.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct MinerInfo {
    pub key: PublicKeyBytes,
    pub url: String,
    pub motto: String,
    /// Signature of `motto` by `key`.
    pub visage: SignatureBytes,
}

impl MinerInfo {
    /// Check that the visage is the miner key's signature over the motto.
    pub fn has_valid_visage(&self) -> bool {
        verify_signature(&self.key, self.motto.as_bytes(), &self.visage)
    }
}

/// Value of one field of an [Asset].
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum AssetFieldValue {
    Bool(bool),
    Number(i64),
    String(String),
}

impl AssetFieldValue {
    /// Whether `self` and `other` hold the same variant.
    pub fn same_type(&self, other: &AssetFieldValue) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

/// An asset: an instance of a type defined in the ledger's [Schema], owned by one account.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Asset {
    pub type_name: String,
    pub owner: AccountIndex,
    /// Position of this asset in its owner's inventory.
    pub position: u64,
    pub fields: BTreeMap<String, AssetFieldValue>,
}

/// The fields, with their default values, of one asset type.
#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct AssetDefinition {
    pub fields: BTreeMap<String, AssetFieldValue>,
}

/// Asset type definitions published to the ledger.
#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Schema {
    pub version: u64,
    pub definitions: BTreeMap<String, AssetDefinition>,
}

impl Schema {
    /// Merge `update` into this schema. Definitions in `update` replace definitions of the same name.
    pub fn compose(&mut self, update: &Schema) {
        self.version = self.version.max(update.version);
        for (name, definition) in &update.definitions {
            self.definitions.insert(name.clone(), definition.clone());
        }
    }
}

/// A block whose transactions are not all applied yet, with the height at which the next of them
/// matures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct UnfinishedBlock {
    pub block_height: BlockHeight,
    pub maturity: BlockHeight,
}

/// The ledger's queue of [UnfinishedBlock]s, in order of insertion.
#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct UnfinishedBlockList(pub Vec<UnfinishedBlock>);

impl UnfinishedBlockList {
    pub fn iter(&self) -> std::slice::Iter<'_, UnfinishedBlock> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains_block(&self, block_height: BlockHeight) -> bool {
        self.0.iter().any(|entry| entry.block_height == block_height)
    }
}
