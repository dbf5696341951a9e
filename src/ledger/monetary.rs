/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Block rewards and fee distribution.

use super::{keys, Ledger, StorageError};

impl Ledger {
    /// Funds left for block rewards.
    pub fn reward_pool(&self) -> Result<u64, StorageError> {
        self.get_or_default(keys::REWARD_POOL)
    }

    /// Collected taxes and profit shares not yet paid out.
    pub fn payout_pool(&self) -> Result<u64, StorageError> {
        self.get_or_default(keys::PAYOUT_POOL)
    }

    pub(crate) fn set_reward_pool(&mut self, amount: u64) -> Result<(), StorageError> {
        self.set_value(keys::REWARD_POOL, &amount)
    }

    /// The reward a miner requesting `requested` actually receives.
    pub fn choose_reward(&self, requested: u64) -> Result<u64, StorageError> {
        Ok(requested.min(self.reward_pool()?))
    }

    /// Pay `reward` out of the reward pool to `miner_id` and count the block towards the miner.
    ///
    /// `time` is the time of the rewarded block; the reward itself does not depend on it.
    pub fn invoke_reward(&mut self, miner_id: &str, reward: u64, time: u64) -> Result<(), StorageError> {
        let index = self
            .account_index(miner_id)?
            .ok_or_else(|| StorageError::ValueExpectedButNotFound {
                key: keys::account_index_for_name(miner_id),
            })?;

        let reward = self.choose_reward(reward)?;
        if reward > 0 {
            let pool = self.reward_pool()?;
            self.set_reward_pool(pool - reward)?;
            self.credit(index, reward)?;
        }
        self.increment_miner_block_count(index)?;
        log::trace!("reward of {} paid to {} for block at time {}", reward, miner_id, time);
        Ok(())
    }

    /// Add `tax` to the payout pool, then pay the pool out in equal shares to every registered miner.
    /// Whatever does not divide evenly stays in the pool.
    pub fn distribute(&mut self, tax: u64) -> Result<(), StorageError> {
        let pool = self.payout_pool()?.saturating_add(tax);
        let miners = self.miners()?;
        let count = miners.len() as u64;

        if count == 0 || pool < count {
            return self.set_value(keys::PAYOUT_POOL, &pool);
        }

        let share = pool / count;
        for miner in miners {
            self.credit(miner, share)?;
        }
        self.set_value(keys::PAYOUT_POOL, &(pool - share * count))
    }
}
