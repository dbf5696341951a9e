/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Transactions waiting to be mined.
//!
//! Queued transactions are grouped by maker and ordered by nonce, so that a maker may queue several
//! transactions ahead of the ledger. A transaction leaves the queue when a block applying it reaches
//! the ledger ([`prune`](TransactionQueue::prune)), when it expires, or when it fails to apply while a
//! block is being filled. In the last case its error is kept, keyed by UUID, so that the submitter can
//! find out what happened.
//!
//! A deferred transaction leaves the queue as soon as a block including it reaches the ledger, since
//! its maker's nonce only advances when it matures. Until then its maker's other transactions are held.

use std::collections::{BTreeMap, HashMap};

use crate::ledger::{Ledger, TransactionError};
use crate::types::{block::VerificationPolicy, data_types::BlockHeight, transaction::Transaction};

#[derive(Clone, Debug, Default)]
pub struct TransactionQueue {
    queue: BTreeMap<String, BTreeMap<u64, Transaction>>,
    errors: HashMap<String, String>,
}

impl TransactionQueue {
    pub fn new() -> TransactionQueue {
        TransactionQueue::default()
    }

    /// Validate `transaction` against `ledger` and queue it.
    ///
    /// A transaction may carry a nonce ahead of its maker's next nonce; it is then held until the
    /// transactions before it are mined. A transaction with the same maker and nonce as a queued one
    /// replaces it.
    pub fn push_transaction(
        &mut self,
        transaction: Transaction,
        ledger: &Ledger,
        policy: VerificationPolicy,
    ) -> Result<(), TransactionError> {
        let result = TransactionQueue::check(&transaction, ledger, policy);
        if let Err(err) = &result {
            log::debug!("rejected transaction {}: {}", transaction.uuid, err);
            self.errors.insert(transaction.uuid.clone(), err.to_string());
            return result;
        }

        let Some(maker) = transaction.maker.as_ref() else {
            return Err(TransactionError::MissingMaker);
        };
        self.errors.remove(&transaction.uuid);
        self.queue
            .entry(maker.account.clone())
            .or_default()
            .insert(maker.nonce, transaction);
        Ok(())
    }

    fn check(transaction: &Transaction, ledger: &Ledger, policy: VerificationPolicy) -> Result<(), TransactionError> {
        let height = BlockHeight::new(ledger.version());
        if transaction.max_height != 0 && height.int() > transaction.max_height {
            return Err(TransactionError::ExpiredAtHeight {
                max_height: transaction.max_height,
            });
        }
        if let Some(maker) = transaction.maker.as_ref() {
            if TransactionQueue::pending_accounts(ledger)
                .iter()
                .any(|(account, uuid)| *account == maker.account && *uuid == transaction.uuid)
            {
                return Err(TransactionError::DeferredTransactionPending {
                    account: maker.account.clone(),
                });
            }
        }
        match transaction.check_maker(ledger, policy) {
            Ok(_) => Ok(()),
            Err(TransactionError::InvalidNonce { expected, found }) if found > expected => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// `(maker, UUID)` of every deferred transaction `ledger` holds that has not matured yet.
    fn pending_accounts(ledger: &Ledger) -> Vec<(String, String)> {
        match ledger.pending_transactions() {
            Ok(pending) => pending
                .into_iter()
                .map(|transaction| (transaction.account, transaction.uuid))
                .collect(),
            Err(err) => {
                log::warn!("failed to read pending transactions: {}", err);
                Vec::new()
            }
        }
    }

    /// Remove the transactions `ledger` has already applied or holds as pending, and those that can
    /// no longer be applied at the ledger's next height.
    pub fn prune(&mut self, ledger: &Ledger) {
        let height = ledger.version();
        let pending = TransactionQueue::pending_accounts(ledger);
        self.queue.retain(|account, transactions| {
            let next_nonce = match ledger.account_by_name(account) {
                Ok(Some((_, account))) => account.nonce,
                _ => return true,
            };
            transactions.retain(|nonce, transaction| {
                let is_pending = pending
                    .iter()
                    .any(|(maker, uuid)| maker == account && *uuid == transaction.uuid);
                !is_pending
                    && *nonce >= next_nonce
                    && (transaction.max_height == 0 || height <= transaction.max_height)
            });
            !transactions.is_empty()
        });
    }

    /// Choose the transactions of a block at `height` with time `time`, mined on top of `ledger`.
    ///
    /// Transactions are trial-applied, in nonce order per maker, to a clone of `ledger`. A maker's
    /// transactions are skipped from the first one that offers less than `minimum_gratuity`, would push
    /// the block past `max_weight`, or does not follow its predecessor's nonce. Makers with a pending
    /// deferred transaction in `ledger` are skipped entirely. A transaction that fails to apply is
    /// dropped from the queue and its error recorded.
    pub fn fill_block(
        &mut self,
        ledger: &Ledger,
        height: BlockHeight,
        time: u64,
        policy: VerificationPolicy,
        minimum_gratuity: u64,
        max_weight: u64,
    ) -> Vec<Transaction> {
        let mut trial = ledger.clone();
        let mut selected = Vec::new();
        let mut weight = 0u64;
        let mut rejected: Vec<(String, u64, String, String)> = Vec::new();
        let pending = TransactionQueue::pending_accounts(ledger);

        for (account, transactions) in &self.queue {
            if pending.iter().any(|(maker, _)| maker == account) {
                continue;
            }
            for (nonce, transaction) in transactions {
                if transaction.gratuity() < minimum_gratuity {
                    break;
                }
                let transaction_weight = transaction.weight();
                if weight.saturating_add(transaction_weight) > max_weight {
                    break;
                }

                let result = if transaction.maturity == 0 {
                    transaction.apply(&mut trial, height, time, policy).map(|_| ())
                } else {
                    transaction
                        .check_envelope(height, time)
                        .and_then(|_| transaction.check_maker(&trial, policy).map(|_| ()))
                };

                match result {
                    Ok(()) => {
                        weight += transaction_weight;
                        selected.push(transaction.clone());
                        // A deferred transaction advances its maker's nonce only when it matures.
                        if transaction.maturity > 0 {
                            break;
                        }
                    }
                    Err(TransactionError::InvalidNonce { expected, found }) if found > expected => break,
                    Err(err) => {
                        rejected.push((account.clone(), *nonce, transaction.uuid.clone(), err.to_string()));
                        break;
                    }
                }
            }
        }

        for (account, nonce, uuid, error) in rejected {
            log::debug!("dropped transaction {} from the queue: {}", uuid, error);
            if let Some(transactions) = self.queue.get_mut(&account) {
                transactions.remove(&nonce);
                if transactions.is_empty() {
                    self.queue.remove(&account);
                }
            }
            self.errors.insert(uuid, error);
        }
        selected
    }

    /// Error recorded for the transaction with `uuid`, if it was rejected.
    pub fn transaction_error(&self, uuid: &str) -> Option<&String> {
        self.errors.get(uuid)
    }

    pub fn errors(&self) -> &HashMap<String, String> {
        &self.errors
    }

    pub fn contains(&self, uuid: &str) -> bool {
        self.queue
            .values()
            .flat_map(|transactions| transactions.values())
            .any(|transaction| transaction.uuid == uuid)
    }

    pub fn len(&self) -> usize {
        self.queue.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        block::{Block, BlockHeader},
        crypto_primitives::{make_visage, Keypair, SigningKey},
        records::MinerInfo,
        transaction::{GenesisAccount, GenesisBody, TransactionBody, TransactionMaker},
    };

    fn keypair(seed: u8) -> Keypair {
        Keypair::new(SigningKey::from_bytes(&[seed; 32]))
    }

    fn ledger() -> Ledger {
        let alice = keypair(1);
        let body = GenesisBody {
            identity: String::from("test"),
            block_delay: 10,
            rewrite_window: 600,
            max_block_weight: 100_000,
            reward_pool: 0,
            accounts: vec![
                GenesisAccount {
                    name: String::from("alice"),
                    key: alice.public_bytes(),
                    balance: 1_000,
                    miner: Some(MinerInfo {
                        key: alice.public_bytes(),
                        url: String::from("alice.test"),
                        motto: String::from("alice"),
                        visage: make_visage(&alice, "alice"),
                    }),
                },
                GenesisAccount {
                    name: String::from("bob"),
                    key: keypair(2).public_bytes(),
                    balance: 0,
                    miner: None,
                },
            ],
        };
        let genesis = Block::genesis(BlockHeader::genesis(0, 10, 600), vec![Transaction::genesis(body)]);
        let mut ledger = Ledger::new();
        ledger.push_block(&genesis, VerificationPolicy::ALL).unwrap();
        ledger
    }

    fn send(uuid: &str, nonce: u64, amount: u64, gratuity: u64) -> Transaction {
        Transaction::new(
            uuid,
            TransactionBody::SendVol {
                to: String::from("bob"),
                amount,
            },
        )
        .with_maker(TransactionMaker::new("alice", "master", nonce).with_gratuity(gratuity))
        .signed(&keypair(1))
    }

    #[test]
    fn queued_transactions_fill_blocks_in_nonce_order() {
        let ledger = ledger();
        let mut queue = TransactionQueue::new();
        queue
            .push_transaction(send("b", 1, 10, 1), &ledger, VerificationPolicy::ALL)
            .unwrap();
        queue
            .push_transaction(send("a", 0, 10, 1), &ledger, VerificationPolicy::ALL)
            .unwrap();
        assert_eq!(queue.len(), 2);

        let selected = queue.fill_block(&ledger, BlockHeight::new(1), 10, VerificationPolicy::ALL, 0, 100_000);
        let uuids: Vec<&str> = selected.iter().map(|tx| tx.uuid.as_str()).collect();
        assert_eq!(uuids, vec!["a", "b"]);
        // Filling a block does not touch the ledger it starts from.
        assert_eq!(ledger.account_by_name("alice").unwrap().unwrap().1.nonce, 0);
    }

    #[test]
    fn minimum_gratuity_and_failures_are_respected() {
        let ledger = ledger();
        let mut queue = TransactionQueue::new();
        queue
            .push_transaction(send("cheap", 0, 10, 0), &ledger, VerificationPolicy::ALL)
            .unwrap();
        assert!(queue
            .fill_block(&ledger, BlockHeight::new(1), 10, VerificationPolicy::ALL, 5, 100_000)
            .is_empty());
        assert!(queue.contains("cheap"));

        let mut queue = TransactionQueue::new();
        queue
            .push_transaction(send("broke", 0, 5_000, 0), &ledger, VerificationPolicy::ALL)
            .unwrap();
        assert!(queue
            .fill_block(&ledger, BlockHeight::new(1), 10, VerificationPolicy::ALL, 0, 100_000)
            .is_empty());
        assert!(!queue.contains("broke"));
        assert!(queue.transaction_error("broke").is_some());
    }

    #[test]
    fn invalid_transactions_are_rejected_on_submission() {
        let ledger = ledger();
        let mut queue = TransactionQueue::new();

        let unsigned = Transaction::new(
            "unsigned",
            TransactionBody::SendVol {
                to: String::from("bob"),
                amount: 1,
            },
        )
        .with_maker(TransactionMaker::new("alice", "master", 0));
        assert_eq!(
            queue.push_transaction(unsigned, &ledger, VerificationPolicy::ALL),
            Err(TransactionError::MissingSignature)
        );
        assert!(queue.transaction_error("unsigned").is_some());
        assert!(queue.is_empty());

        queue
            .push_transaction(send("a", 0, 10, 1), &ledger, VerificationPolicy::ALL)
            .unwrap();
        queue.prune(&ledger);
        assert_eq!(queue.len(), 1);
    }
}
