/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Applying and verifying blocks.
//!
//! # Applying a block
//!
//! [`Block::apply`] runs the following steps against a ledger whose version equals the block's height:
//! 1. At height 0, record the block as the genesis block.
//! 2. [Verify](Block::verify) the block.
//! 3. Extend the entropy chain with the block's pose.
//! 4. Apply the transactions of earlier blocks that mature at this height, re-queueing blocks that
//!    still hold immature transactions.
//! 5. Apply the block's own transactions that mature at this height, and queue the block if any of
//!    its transactions mature later.
//! 6. Pay the block reward, credit the net gratuity to the miner, and distribute taxes.
//! 7. Record the block under its height.
//!
//! Fees of a deferred transaction go to the miner of the block that included it, not to the miner of
//! the block at which it matures.
//!
//! # Deferred transactions
//!
//! A transaction with a non-zero maturity is checked in full only when it matures. Until then it is
//! *pending*, and a block may not include a second deferred transaction with the same maker and the
//! same UUID or nonce. A deferred transaction that fails when it matures is skipped: the block at which
//! it matures did not include it and is not rejected for it.

use std::ops::AddAssign;

use super::{
    errors::{BlockVerifyError, LedgerError, StorageError, TransactionError},
    keys, Ledger,
};
use crate::types::{
    block::{Block, VerificationPolicy},
    crypto_primitives::calculate_charm,
    data_types::BlockHeight,
    records::{UnfinishedBlock, UnfinishedBlockList},
};

/// Fees collected from the transactions of one block.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransactionFees {
    pub gratuity: u64,
    pub profit_share: u64,
    pub transfer_tax: u64,
}

impl TransactionFees {
    /// Part of the gratuity that goes to the miner.
    pub fn net_gratuity(&self) -> u64 {
        self.gratuity.saturating_sub(self.profit_share)
    }

    /// Amount routed to the payout pool.
    pub fn tax(&self) -> u64 {
        self.profit_share
            .min(self.gratuity)
            .saturating_add(self.transfer_tax)
    }
}

impl AddAssign for TransactionFees {
    fn add_assign(&mut self, rhs: Self) {
        self.gratuity = self.gratuity.saturating_add(rhs.gratuity);
        self.profit_share = self.profit_share.saturating_add(rhs.profit_share);
        self.transfer_tax = self.transfer_tax.saturating_add(rhs.transfer_tax);
    }
}

/// Result of applying the mature transactions of a block.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AppliedTransactions {
    pub fees: TransactionFees,
    /// Earliest height at which one of the block's remaining transactions matures.
    pub next_maturity: Option<BlockHeight>,
}

/// A deferred transaction included in an earlier block that has not matured yet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingTransaction {
    pub account: String,
    pub nonce: u64,
    pub uuid: String,
    pub maturity: BlockHeight,
}

impl Block {
    /// Apply this block to `ledger`, whose version must equal the block's height.
    ///
    /// The ledger's version is not advanced; [`Ledger::push_block`] does that, and also discards any
    /// partial writes if this fails.
    ///
    /// A version that differs from the block's height is reported as
    /// [`BlockVerifyError::HeightMismatch`] rather than aborting: the ledger cannot tell a caller's
    /// bookkeeping fault from a bad block, and the miner asserts the height before pushing.
    pub fn apply(&self, ledger: &mut Ledger, policy: VerificationPolicy) -> Result<(), LedgerError> {
        let height = self.height();
        if ledger.version() != height.int() {
            return Err(BlockVerifyError::HeightMismatch {
                ledger_version: ledger.version(),
                block_height: height,
            }
            .into());
        }

        if height.int() == 0 {
            ledger.init_genesis_hash(&self.digest())?;
        }

        self.verify(ledger, policy)?;
        ledger.apply_entropy(&self.header)?;

        let mut unfinished = UnfinishedBlockList::default();
        for entry in ledger.unfinished()?.iter() {
            if entry.maturity != height {
                unfinished.0.push(*entry);
                continue;
            }

            let deferred = ledger.block(entry.block_height)?.ok_or_else(|| {
                StorageError::ValueExpectedButNotFound {
                    key: keys::block_body(entry.block_height),
                }
            })?;
            let applied = deferred.apply_transactions(ledger, policy, self.header.time)?;
            ledger.settle_fees(&deferred.header.miner_id, &applied.fees)?;
            if let Some(maturity) = applied.next_maturity {
                unfinished.0.push(UnfinishedBlock {
                    block_height: entry.block_height,
                    maturity,
                });
            }
        }

        let applied = self.apply_transactions(ledger, policy, self.header.time)?;
        if let Some(maturity) = applied.next_maturity {
            unfinished.0.push(UnfinishedBlock {
                block_height: height,
                maturity,
            });
        }
        ledger.set_unfinished(&unfinished)?;

        if height.int() > 0 {
            ledger.invoke_reward(&self.header.miner_id, self.reward, self.header.time)?;
        }
        ledger.settle_fees(&self.header.miner_id, &applied.fees)?;

        ledger.set_block(self)?;
        Ok(())
    }

    /// Apply those transactions of this block that mature at the ledger's current version.
    pub fn apply_transactions(
        &self,
        ledger: &mut Ledger,
        policy: VerificationPolicy,
        time: u64,
    ) -> Result<AppliedTransactions, LedgerError> {
        let version = BlockHeight::new(ledger.version());
        let mut applied = AppliedTransactions::default();

        for transaction in &self.transactions {
            let maturity = transaction
                .maturity_height(self.height())
                .ok_or_else(|| LedgerError::Transaction {
                    uuid: transaction.uuid.clone(),
                    error: TransactionError::InvalidMaturity {
                        maturity: transaction.maturity,
                    },
                })?;
            if maturity == version && transaction.maturity == 0 {
                let fees = transaction
                    .apply(ledger, version, time, policy)
                    .map_err(|error| LedgerError::Transaction {
                        uuid: transaction.uuid.clone(),
                        error,
                    })?;
                applied.fees += fees;
            } else if maturity == version {
                // A deferred transaction that fails here is skipped, leaving no partial writes.
                let mut trial = ledger.clone();
                match transaction.apply(&mut trial, version, time, policy) {
                    Ok(fees) => {
                        *ledger = trial;
                        applied.fees += fees;
                    }
                    Err(error) => log::warn!(
                        "deferred transaction {} from block {} skipped at height {}: {}",
                        transaction.uuid,
                        self.height(),
                        version,
                        error
                    ),
                }
            } else if maturity > version {
                applied.next_maturity = Some(
                    applied
                        .next_maturity
                        .map_or(maturity, |next| next.min(maturity)),
                );
            }
        }
        Ok(applied)
    }

    /// Check this block against the ledger state at its parent.
    ///
    /// Reads the ledger only, so calling it again with the same block, ledger, and policy gives the
    /// same result.
    pub fn verify(&self, ledger: &Ledger, policy: VerificationPolicy) -> Result<(), LedgerError> {
        if !self.is_correct() {
            return Err(BlockVerifyError::BodyHashMismatch.into());
        }

        let Some(parent_height) = self.height().parent() else {
            return match ledger.genesis_hash()? {
                Some(hash) if hash == self.digest() => Ok(()),
                _ => Err(BlockVerifyError::GenesisHashMismatch.into()),
            };
        };

        let header = &self.header;
        if ledger.block_hash(parent_height)? != header.prev_digest {
            return Err(BlockVerifyError::ParentHashMismatch.into());
        }
        if header.block_delay != ledger.block_delay()? {
            return Err(BlockVerifyError::BlockDelayMismatch.into());
        }
        if header.rewrite_window != ledger.rewrite_window()? {
            return Err(BlockVerifyError::RewriteWindowMismatch.into());
        }
        let max_weight = ledger.max_block_weight()?;
        let weight = self.weight();
        if weight > max_weight {
            return Err(BlockVerifyError::MaxWeightExceeded { weight, max_weight }.into());
        }

        let miner = ledger
            .miner_info_by_name(&header.miner_id)?
            .ok_or_else(|| BlockVerifyError::MinerInfoNotFound {
                miner_id: header.miner_id.clone(),
            })?;

        let prev_pose = ledger.pose(parent_height)?.unwrap_or_default();

        if policy.contains(VerificationPolicy::VERIFY_POSE) && !header.has_valid_pose(&miner.key, &prev_pose) {
            return Err(BlockVerifyError::InvalidPose.into());
        }

        if policy.contains(VerificationPolicy::VERIFY_CHARM)
            && (header.visage != miner.visage || header.charm != calculate_charm(&prev_pose, &miner.visage))
        {
            return Err(BlockVerifyError::InvalidCharm.into());
        }

        if policy.contains(VerificationPolicy::VERIFY_BLOCK_SIG) && !header.has_valid_signature(&miner.key) {
            return Err(BlockVerifyError::InvalidSignature.into());
        }

        self.verify_deferred(ledger)
    }

    /// Check that every transaction matures at a representable height, and that no deferred
    /// transaction duplicates a pending one, or another deferred transaction of this block.
    fn verify_deferred(&self, ledger: &Ledger) -> Result<(), LedgerError> {
        let height = self.height();
        let mut pending: Option<Vec<PendingTransaction>> = None;
        let mut included: Vec<(&str, u64, &str)> = Vec::new();

        for transaction in &self.transactions {
            let fail = |error| LedgerError::Transaction {
                uuid: transaction.uuid.clone(),
                error,
            };
            if transaction.maturity_height(height).is_none() {
                return Err(fail(TransactionError::InvalidMaturity {
                    maturity: transaction.maturity,
                }));
            }
            if transaction.maturity == 0 {
                continue;
            }
            let Some(maker) = transaction.maker.as_ref() else {
                continue;
            };

            if pending.is_none() {
                pending = Some(ledger.pending_transactions()?);
            }
            let conflicts_pending = pending.iter().flatten().any(|other| {
                other.account == maker.account && (other.uuid == transaction.uuid || other.nonce == maker.nonce)
            });
            let conflicts_included = included.iter().any(|(account, nonce, uuid)| {
                *account == maker.account && (*uuid == transaction.uuid || *nonce == maker.nonce)
            });
            if conflicts_pending || conflicts_included {
                return Err(fail(TransactionError::DeferredTransactionPending {
                    account: maker.account.clone(),
                }));
            }
            included.push((maker.account.as_str(), maker.nonce, transaction.uuid.as_str()));
        }
        Ok(())
    }
}

impl Ledger {
    /// Deferred transactions of earlier blocks that mature at or above the current version.
    pub fn pending_transactions(&self) -> Result<Vec<PendingTransaction>, StorageError> {
        let version = BlockHeight::new(self.version());
        let mut pending = Vec::new();
        for entry in self.unfinished()?.iter() {
            let block = self.block(entry.block_height)?.ok_or_else(|| StorageError::ValueExpectedButNotFound {
                key: keys::block_body(entry.block_height),
            })?;
            for transaction in &block.transactions {
                let (Some(maker), Some(maturity)) =
                    (transaction.maker.as_ref(), transaction.maturity_height(block.height()))
                else {
                    continue;
                };
                if transaction.maturity > 0 && maturity >= version {
                    pending.push(PendingTransaction {
                        account: maker.account.clone(),
                        nonce: maker.nonce,
                        uuid: transaction.uuid.clone(),
                        maturity,
                    });
                }
            }
        }
        Ok(pending)
    }
}

impl Ledger {
    /// Credit the net gratuity of `fees` to `miner_id` and distribute the rest.
    pub(crate) fn settle_fees(&mut self, miner_id: &str, fees: &TransactionFees) -> Result<(), StorageError> {
        if fees.net_gratuity() > 0 {
            if let Some(index) = self.account_index(miner_id)? {
                self.credit(index, fees.net_gratuity())?;
            }
        }
        if fees.tax() > 0 {
            self.distribute(fees.tax())?;
        }
        Ok(())
    }
}
