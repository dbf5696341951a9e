/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Accounts, miners, and assets.

use std::collections::BTreeMap;

use super::{errors::TransactionError, keys, Ledger, StorageError};
use crate::types::{
    crypto_primitives::PublicKeyBytes,
    data_types::{AccountIndex, AssetIndex, BlockHeight},
    records::{Account, Asset, AssetFieldValue, KeyAndPolicy, MinerInfo},
};

/// Name of the key every new account is opened with.
pub const MASTER_KEY_NAME: &str = "master";

impl Ledger {
    /* ↓↓↓ Accounts ↓↓↓ */

    pub fn account_index(&self, name: &str) -> Result<Option<AccountIndex>, StorageError> {
        self.get_value(&keys::account_index_for_name(name))
    }

    pub fn account(&self, index: AccountIndex) -> Result<Option<Account>, StorageError> {
        self.get_value(&keys::account(index))
    }

    pub fn account_by_name(&self, name: &str) -> Result<Option<(AccountIndex, Account)>, StorageError> {
        let Some(index) = self.account_index(name)? else {
            return Ok(None);
        };
        let account = self.get_expected(&keys::account(index))?;
        Ok(Some((index, account)))
    }

    pub fn account_name(&self, index: AccountIndex) -> Result<Option<String>, StorageError> {
        self.get_value(&keys::account_name(index))
    }

    pub fn count_accounts(&self) -> Result<u64, StorageError> {
        self.get_or_default(keys::GLOBAL_ACCOUNT_COUNT)
    }

    pub(crate) fn set_account(&mut self, index: AccountIndex, account: &Account) -> Result<(), StorageError> {
        self.set_value(&keys::account(index), account)
    }

    /// Allocate the next account index for a new account called `name`.
    pub(crate) fn new_account(&mut self, name: &str, account: &Account) -> Result<AccountIndex, StorageError> {
        let index = AccountIndex::new(self.count_accounts()?);
        self.set_value(keys::GLOBAL_ACCOUNT_COUNT, &(index.int() + 1))?;
        self.set_value(&keys::account_index_for_name(name), &index)?;
        self.set_value(&keys::account_name(index), &name.to_string())?;
        self.set_account(index, account)?;
        Ok(index)
    }

    /// Open the account `<parent>.<suffix>` holding `grant`, with `key` as its master key.
    ///
    /// The grant is not debited here: the caller pays for it as part of the transaction cost.
    pub(crate) fn open_account(
        &mut self,
        parent: &str,
        suffix: &str,
        key: PublicKeyBytes,
        grant: u64,
    ) -> Result<AccountIndex, TransactionError> {
        let name = format!("{}.{}", parent, suffix);
        if !is_valid_name_segment(suffix) {
            return Err(TransactionError::InvalidAccountName { account: name });
        }
        if self.account_index(&name)?.is_some() {
            return Err(TransactionError::AccountAlreadyExists { account: name });
        }

        let mut account = Account {
            balance: grant,
            ..Default::default()
        };
        account
            .keys
            .insert(MASTER_KEY_NAME.to_string(), KeyAndPolicy::unrestricted(key));
        Ok(self.new_account(&name, &account)?)
    }

    /// Add `amount` to the balance of the account at `index`.
    pub(crate) fn credit(&mut self, index: AccountIndex, amount: u64) -> Result<(), StorageError> {
        let mut account: Account = self.get_expected(&keys::account(index))?;
        account.balance = account.balance.saturating_add(amount);
        self.set_account(index, &account)
    }

    pub(crate) fn has_transaction(&self, index: AccountIndex, uuid: &str) -> Result<bool, StorageError> {
        Ok(self.store().has_key(&keys::account_transaction(index, uuid)))
    }

    pub(crate) fn record_transaction(
        &mut self,
        index: AccountIndex,
        uuid: &str,
        height: BlockHeight,
    ) -> Result<(), StorageError> {
        self.set_value(&keys::account_transaction(index, uuid), &height)
    }

    /* ↓↓↓ Miners ↓↓↓ */

    pub fn miner_info(&self, index: AccountIndex) -> Result<Option<MinerInfo>, StorageError> {
        self.get_value(&keys::account_miner(index))
    }

    pub fn miner_info_by_name(&self, name: &str) -> Result<Option<MinerInfo>, StorageError> {
        match self.account_index(name)? {
            Some(index) => self.miner_info(index),
            None => Ok(None),
        }
    }

    /// Height of the block in which the account called `name` became a miner.
    pub fn miner_height(&self, name: &str) -> Result<Option<BlockHeight>, StorageError> {
        match self.account_index(name)? {
            Some(index) => self.get_value(&keys::account_miner_height(index)),
            None => Ok(None),
        }
    }

    pub fn miner_block_count(&self, name: &str) -> Result<u64, StorageError> {
        match self.account_index(name)? {
            Some(index) => self.get_or_default(&keys::account_miner_block_count(index)),
            None => Ok(0),
        }
    }

    pub(crate) fn increment_miner_block_count(&mut self, index: AccountIndex) -> Result<(), StorageError> {
        let key = keys::account_miner_block_count(index);
        let count: u64 = self.get_or_default(&key)?;
        self.set_value(&key, &(count + 1))
    }

    /// Indices of the registered miners, in order of registration.
    pub fn miners(&self) -> Result<Vec<AccountIndex>, StorageError> {
        self.get_or_default(keys::MINERS)
    }

    /// Names and URLs of the registered miners.
    pub fn miner_urls(&self) -> Result<BTreeMap<String, String>, StorageError> {
        let mut urls = BTreeMap::new();
        for index in self.miners()? {
            let name = self.get_expected(&keys::account_name(index))?;
            let info: MinerInfo = self.get_expected(&keys::account_miner(index))?;
            urls.insert(name, info.url);
        }
        Ok(urls)
    }

    /// Register the account at `index` as a miner, effective from `height`.
    pub(crate) fn register_miner(
        &mut self,
        index: AccountIndex,
        info: &MinerInfo,
        height: BlockHeight,
    ) -> Result<(), TransactionError> {
        if !info.has_valid_visage() {
            return Err(TransactionError::InvalidVisage);
        }
        if self.miner_info(index)?.is_some() {
            let account = self.account_name(index)?.unwrap_or_default();
            return Err(TransactionError::MinerAlreadyRegistered { account });
        }

        self.set_value(&keys::account_miner(index), info)?;
        self.set_value(&keys::account_miner_height(index), &height)?;
        let mut miners = self.miners()?;
        miners.push(index);
        self.set_value(keys::MINERS, &miners)?;
        Ok(())
    }

    /* ↓↓↓ Assets ↓↓↓ */

    pub fn asset(&self, index: AssetIndex) -> Result<Option<Asset>, StorageError> {
        self.get_value(&keys::asset(index))
    }

    pub fn count_assets(&self) -> Result<u64, StorageError> {
        self.get_or_default(keys::GLOBAL_ASSET_COUNT)
    }

    /// Assets owned by the account at `index`, in inventory order.
    pub fn inventory(&self, index: AccountIndex) -> Result<Vec<AssetIndex>, StorageError> {
        let count: u64 = self.get_or_default(&keys::account_asset_count(index))?;
        (0..count)
            .map(|position| self.get_expected(&keys::account_asset(index, position)))
            .collect()
    }

    fn push_inventory(&mut self, owner: AccountIndex, asset: AssetIndex) -> Result<u64, StorageError> {
        let count_key = keys::account_asset_count(owner);
        let position: u64 = self.get_or_default(&count_key)?;
        self.set_value(&keys::account_asset(owner, position), &asset)?;
        self.set_value(&count_key, &(position + 1))?;
        Ok(position)
    }

    /// Remove the asset at `position` of `owner`'s inventory, moving the last asset into its slot.
    fn remove_inventory(&mut self, owner: AccountIndex, position: u64) -> Result<(), StorageError> {
        let count_key = keys::account_asset_count(owner);
        let count: u64 = self.get_or_default(&count_key)?;
        let last = count.saturating_sub(1);
        if position != last {
            let moved: AssetIndex = self.get_expected(&keys::account_asset(owner, last))?;
            self.set_value(&keys::account_asset(owner, position), &moved)?;
            let mut moved_asset: Asset = self.get_expected(&keys::asset(moved))?;
            moved_asset.position = position;
            self.set_value(&keys::asset(moved), &moved_asset)?;
        }
        self.set_value(&count_key, &last)
    }

    /// Create an asset of `type_name` owned by `owner`. Fields start from the schema defaults and are
    /// overridden by `fields`.
    pub(crate) fn mint_asset(
        &mut self,
        owner: AccountIndex,
        type_name: &str,
        fields: &[(String, AssetFieldValue)],
    ) -> Result<AssetIndex, TransactionError> {
        let schema = self.schema()?;
        let definition = schema
            .definitions
            .get(type_name)
            .ok_or_else(|| TransactionError::UnknownAssetType {
                type_name: type_name.to_string(),
            })?;

        let mut values = definition.fields.clone();
        for (field, value) in fields {
            let default = values
                .get_mut(field)
                .ok_or_else(|| TransactionError::UnknownAssetField {
                    field: field.clone(),
                })?;
            if !default.same_type(value) {
                return Err(TransactionError::AssetFieldTypeMismatch {
                    field: field.clone(),
                });
            }
            *default = value.clone();
        }

        let index = AssetIndex::new(self.count_assets()?);
        self.set_value(keys::GLOBAL_ASSET_COUNT, &(index.int() + 1))?;
        let position = self.push_inventory(owner, index)?;
        let asset = Asset {
            type_name: type_name.to_string(),
            owner,
            position,
            fields: values,
        };
        self.set_value(&keys::asset(index), &asset)?;
        Ok(index)
    }

    /// Move `asset` from `from`'s inventory to `to`'s.
    pub(crate) fn transfer_asset(
        &mut self,
        asset_index: AssetIndex,
        from: AccountIndex,
        to: AccountIndex,
    ) -> Result<(), TransactionError> {
        let mut asset = self
            .asset(asset_index)?
            .ok_or(TransactionError::AssetNotFound)?;
        if asset.owner != from {
            return Err(TransactionError::NotAssetOwner);
        }
        self.remove_inventory(from, asset.position)?;
        asset.position = self.push_inventory(to, asset_index)?;
        asset.owner = to;
        self.set_value(&keys::asset(asset_index), &asset)?;
        Ok(())
    }
}

/// A name segment is non-empty and made of ASCII letters, digits, `-` and `_`.
fn is_valid_name_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
