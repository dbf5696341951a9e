/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Keys that specify where each ledger variable is stored in the [versioned store](crate::versioned_store).
//!
//! # List of ledger variables
//!
//! All values are Borsh-serialized.
//!
//! ## Chain
//!
//! |Key|Type|Description|
//! |---|---|---|
//! |`identity`|[`String`]|Name of the chain, set by the genesis transaction.|
//! |`genesisHash`|[`CryptoHash`](crate::types::data_types::CryptoHash)|Digest of the genesis block.|
//! |`config.blockDelay`, `config.rewriteWindow`, `config.maxBlockWeight`|[`u64`]|Chain parameters every header must repeat.|
//! |`entropy`|[`CryptoHash`](crate::types::data_types::CryptoHash)|Hash chain over every applied block's pose.|
//! |`unfinished`|[`UnfinishedBlockList`](crate::types::records::UnfinishedBlockList)|Blocks holding transactions that have not matured yet.|
//! |`schema`|[`Schema`](crate::types::records::Schema)|Published asset definitions.|
//!
//! ## Blocks
//!
//! |Key|Type|Description|
//! |---|---|---|
//! |`block.<height>.hash`|[`CryptoHash`](crate::types::data_types::CryptoHash)|Digest of the block at `height`.|
//! |`block.<height>.header`|[`BlockHeader`](crate::types::block::BlockHeader)||
//! |`block.<height>.body`|[`BlockBody`](super::BlockBody)|Reward and transactions.|
//! |`block.<height>.pose`|[`SignatureBytes`](crate::types::data_types::SignatureBytes)||
//! |`blockHeight.<digest>`|[`BlockHeight`](crate::types::data_types::BlockHeight)|Reverse lookup from digest to height.|
//!
//! ## Accounts and assets
//!
//! |Key|Type|Description|
//! |---|---|---|
//! |`globalAccountCount`, `globalAssetCount`|[`u64`]|Number of accounts and assets ever allocated.|
//! |`accountName.<name>`|[`AccountIndex`](crate::types::data_types::AccountIndex)|Lookup from name to index.|
//! |`account.<index>`|[`Account`](crate::types::records::Account)|Balance, nonce and keys.|
//! |`account.<index>.name`|[`String`]||
//! |`account.<index>.assetCount`|[`u64`]|Size of the account's inventory.|
//! |`account.<index>.assets.<position>`|[`AssetIndex`](crate::types::data_types::AssetIndex)|Inventory slots, kept dense.|
//! |`account.<index>.miner`|[`MinerInfo`](crate::types::records::MinerInfo)|Present if the account is a registered miner.|
//! |`account.<index>.minerHeight`|[`BlockHeight`](crate::types::data_types::BlockHeight)|Height of the block that registered the miner.|
//! |`account.<index>.minerBlockCount`|[`u64`]|Blocks rewarded to the miner.|
//! |`account.<index>.transaction.<uuid>`|[`BlockHeight`](crate::types::data_types::BlockHeight)|Height at which the account applied the transaction with `uuid`.|
//! |`asset.<index>`|[`Asset`](crate::types::records::Asset)||
//! |`miners`|[`Vec<AccountIndex>`]|Registered miners, in order of registration.|
//!
//! ## Monetary policy
//!
//! |Key|Type|Description|
//! |---|---|---|
//! |`rewardPool`|[`u64`]|Remaining funds from which block rewards are paid.|
//! |`payoutPool`|[`u64`]|Collected taxes and profit shares awaiting distribution to miners.|

use crate::types::data_types::{AccountIndex, AssetIndex, BlockHeight, CryptoHash};

pub const IDENTITY: &str = "identity";
pub const GENESIS_HASH: &str = "genesisHash";
pub const BLOCK_DELAY: &str = "config.blockDelay";
pub const REWRITE_WINDOW: &str = "config.rewriteWindow";
pub const MAX_BLOCK_WEIGHT: &str = "config.maxBlockWeight";
pub const ENTROPY: &str = "entropy";
pub const UNFINISHED: &str = "unfinished";
pub const SCHEMA: &str = "schema";
pub const GLOBAL_ACCOUNT_COUNT: &str = "globalAccountCount";
pub const GLOBAL_ASSET_COUNT: &str = "globalAssetCount";
pub const MINERS: &str = "miners";
pub const REWARD_POOL: &str = "rewardPool";
pub const PAYOUT_POOL: &str = "payoutPool";

pub fn block_hash(height: BlockHeight) -> String {
    format!("block.{}.hash", height)
}

pub fn block_header(height: BlockHeight) -> String {
    format!("block.{}.header", height)
}

pub fn block_body(height: BlockHeight) -> String {
    format!("block.{}.body", height)
}

pub fn block_pose(height: BlockHeight) -> String {
    format!("block.{}.pose", height)
}

pub fn block_height_for_digest(digest: &CryptoHash) -> String {
    format!("blockHeight.{}", digest)
}

pub fn account_index_for_name(name: &str) -> String {
    format!("accountName.{}", name)
}

pub fn account(index: AccountIndex) -> String {
    format!("account.{}", index)
}

pub fn account_name(index: AccountIndex) -> String {
    format!("account.{}.name", index)
}

pub fn account_asset_count(index: AccountIndex) -> String {
    format!("account.{}.assetCount", index)
}

pub fn account_asset(index: AccountIndex, position: u64) -> String {
    format!("account.{}.assets.{}", index, position)
}

pub fn account_miner(index: AccountIndex) -> String {
    format!("account.{}.miner", index)
}

pub fn account_miner_height(index: AccountIndex) -> String {
    format!("account.{}.minerHeight", index)
}

pub fn account_miner_block_count(index: AccountIndex) -> String {
    format!("account.{}.minerBlockCount", index)
}

pub fn account_transaction(index: AccountIndex, uuid: &str) -> String {
    format!("account.{}.transaction.{}", index, uuid)
}

pub fn asset(index: AssetIndex) -> String {
    format!("asset.{}", index)
}
