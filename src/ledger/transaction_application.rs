/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Applying a single transaction.
//!
//! Every transaction except the genesis transaction is checked in the same order before its body
//! runs: the envelope (UUID length and expiry), then the maker (account, key, key policy, nonce,
//! signature, UUID reuse), then the maker's balance against the total cost. Only then are the fees and
//! the body cost debited, the nonce advanced, the UUID recorded, and the body applied.

use super::{
    accounts::MASTER_KEY_NAME,
    block_application::TransactionFees,
    errors::TransactionError,
    keys, Ledger,
};
use crate::types::{
    block::VerificationPolicy,
    crypto_primitives::verify_signature,
    data_types::{AccountIndex, BlockHeight},
    records::{Account, KeyAndPolicy},
    transaction::{GenesisBody, Transaction, TransactionBody, TransactionMaker, MAX_UUID_LENGTH},
};

impl Transaction {
    /// Apply this transaction to `ledger` at `height`, in a block with time `time`.
    pub fn apply(
        &self,
        ledger: &mut Ledger,
        height: BlockHeight,
        time: u64,
        policy: VerificationPolicy,
    ) -> Result<TransactionFees, TransactionError> {
        self.check_envelope(height, time)?;

        if let TransactionBody::Genesis(body) = &self.body {
            if height.int() != 0 {
                return Err(TransactionError::GenesisNotAtHeightZero);
            }
            apply_genesis(ledger, body)?;
            return Ok(TransactionFees::default());
        }

        let (maker_index, mut account) = self.check_maker(ledger, policy)?;
        let maker = self.maker.as_ref().ok_or(TransactionError::MissingMaker)?;

        let cost = maker.fees().saturating_add(self.body.cost());
        if account.balance < cost {
            return Err(TransactionError::InsufficientFunds {
                balance: account.balance,
                cost,
            });
        }
        account.balance -= cost;
        account.nonce += 1;
        ledger.set_account(maker_index, &account)?;
        ledger.record_transaction(maker_index, &self.uuid, height)?;

        self.apply_body(ledger, maker, maker_index, height)?;

        Ok(TransactionFees {
            gratuity: maker.gratuity,
            profit_share: maker.profit_share,
            transfer_tax: maker.transfer_tax,
        })
    }

    /// Check the UUID and the expiry limits.
    pub fn check_envelope(&self, height: BlockHeight, time: u64) -> Result<(), TransactionError> {
        if self.uuid.len() > MAX_UUID_LENGTH {
            return Err(TransactionError::UuidTooLong);
        }
        if self.max_height != 0 && height.int() > self.max_height {
            return Err(TransactionError::ExpiredAtHeight {
                max_height: self.max_height,
            });
        }
        if self.record_by != 0 && time > self.record_by {
            return Err(TransactionError::ExpiredAtTime {
                record_by: self.record_by,
            });
        }
        Ok(())
    }

    /// Check that the maker exists, holds a key permitted to authorize this transaction, uses the
    /// next nonce, has signed the transaction, and has not used the UUID before.
    pub fn check_maker(
        &self,
        ledger: &Ledger,
        policy: VerificationPolicy,
    ) -> Result<(AccountIndex, Account), TransactionError> {
        let maker = self.maker.as_ref().ok_or(TransactionError::MissingMaker)?;
        let (index, account) = ledger.account_by_name(&maker.account)?.ok_or_else(|| {
            TransactionError::MakerAccountNotFound {
                account: maker.account.clone(),
            }
        })?;

        let key = account
            .key(&maker.key_name)
            .ok_or_else(|| TransactionError::MakerKeyNotFound {
                key_name: maker.key_name.clone(),
            })?;
        if !key.permits(self.type_name()) {
            return Err(TransactionError::KeyNotPermitted {
                key_name: maker.key_name.clone(),
                transaction_type: self.type_name().to_string(),
            });
        }

        if maker.nonce != account.nonce {
            return Err(TransactionError::InvalidNonce {
                expected: account.nonce,
                found: maker.nonce,
            });
        }

        if policy.contains(VerificationPolicy::VERIFY_TRANSACTION_SIG) {
            let signature = self.signature.as_ref().ok_or(TransactionError::MissingSignature)?;
            if !verify_signature(&key.key, &self.signing_bytes(), signature) {
                return Err(TransactionError::InvalidSignature);
            }
        }

        if ledger.has_transaction(index, &self.uuid)? {
            return Err(TransactionError::UuidAlreadyUsed);
        }

        Ok((index, account))
    }

    fn apply_body(
        &self,
        ledger: &mut Ledger,
        maker: &TransactionMaker,
        maker_index: AccountIndex,
        height: BlockHeight,
    ) -> Result<(), TransactionError> {
        match &self.body {
            TransactionBody::Genesis(_) => Err(TransactionError::GenesisNotAtHeightZero),

            TransactionBody::OpenAccount { suffix, key, grant } => {
                ledger.open_account(&maker.account, suffix, *key, *grant)?;
                Ok(())
            }

            TransactionBody::AffirmKey { key_name, key } => {
                let mut account: Account = ledger.get_expected(&keys::account(maker_index))?;
                account.keys.insert(key_name.clone(), key.clone());
                ledger.set_account(maker_index, &account)?;
                Ok(())
            }

            TransactionBody::RegisterMiner(info) => ledger.register_miner(maker_index, info, height),

            TransactionBody::SendVol { to, amount } => {
                let to_index = ledger
                    .account_index(to)?
                    .ok_or_else(|| TransactionError::AccountNotFound { account: to.clone() })?;
                ledger.credit(to_index, *amount)?;
                Ok(())
            }

            TransactionBody::PublishSchema(schema) => {
                ledger.publish_schema(schema)?;
                Ok(())
            }

            TransactionBody::MintAsset { type_name, fields } => {
                ledger.mint_asset(maker_index, type_name, fields)?;
                Ok(())
            }

            TransactionBody::SendAsset { to, asset } => {
                let to_index = ledger
                    .account_index(to)?
                    .ok_or_else(|| TransactionError::AccountNotFound { account: to.clone() })?;
                ledger.transfer_asset(*asset, maker_index, to_index)
            }
        }
    }
}

/// Set the chain parameters and create the initial accounts and miners.
fn apply_genesis(ledger: &mut Ledger, body: &GenesisBody) -> Result<(), TransactionError> {
    if ledger.identity()?.is_some() {
        return Err(TransactionError::GenesisNotAtHeightZero);
    }

    ledger.set_value(keys::IDENTITY, &body.identity)?;
    ledger.set_value(keys::BLOCK_DELAY, &body.block_delay)?;
    ledger.set_value(keys::REWRITE_WINDOW, &body.rewrite_window)?;
    ledger.set_value(keys::MAX_BLOCK_WEIGHT, &body.max_block_weight)?;
    ledger.set_reward_pool(body.reward_pool)?;

    for genesis_account in &body.accounts {
        if genesis_account.name.is_empty() {
            return Err(TransactionError::InvalidAccountName {
                account: genesis_account.name.clone(),
            });
        }
        if ledger.account_index(&genesis_account.name)?.is_some() {
            return Err(TransactionError::AccountAlreadyExists {
                account: genesis_account.name.clone(),
            });
        }

        let mut account = Account {
            balance: genesis_account.balance,
            ..Default::default()
        };
        account.keys.insert(
            MASTER_KEY_NAME.to_string(),
            KeyAndPolicy::unrestricted(genesis_account.key),
        );
        let index = ledger.new_account(&genesis_account.name, &account)?;

        if let Some(miner) = &genesis_account.miner {
            ledger.register_miner(index, miner, BlockHeight::new(0))?;
        }
    }
    Ok(())
}
