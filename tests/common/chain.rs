/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Test accounts, genesis blocks, and hand-mined blocks.

use std::time::Duration;

use charm_chain::{
    config::Configuration,
    types::{
        block::{Block, BlockHeader},
        crypto_primitives::{make_visage, Keypair, SigningKey},
        data_types::SignatureBytes,
        records::MinerInfo,
        transaction::{GenesisAccount, GenesisBody, Transaction, TransactionBody, TransactionMaker},
    },
};

pub(crate) const BLOCK_DELAY: u64 = 10;
pub(crate) const REWRITE_WINDOW: u64 = 10_000;
pub(crate) const INITIAL_BALANCE: u64 = 1_000;

/// An account of the test chain, with a deterministic key.
#[derive(Clone)]
pub(crate) struct TestAccount {
    pub(crate) name: String,
    pub(crate) seed: u8,
}

impl TestAccount {
    pub(crate) fn new(name: &str, seed: u8) -> TestAccount {
        TestAccount {
            name: name.to_string(),
            seed,
        }
    }

    pub(crate) fn signing_key(&self) -> SigningKey {
        SigningKey::from_bytes(&[self.seed; 32])
    }

    pub(crate) fn keypair(&self) -> Keypair {
        Keypair::new(self.signing_key())
    }

    pub(crate) fn url(&self) -> String {
        format!("{}.test", self.name)
    }

    pub(crate) fn visage(&self) -> SignatureBytes {
        make_visage(&self.keypair(), &self.name)
    }

    pub(crate) fn miner_info(&self) -> MinerInfo {
        MinerInfo {
            key: self.keypair().public_bytes(),
            url: self.url(),
            motto: self.name.clone(),
            visage: self.visage(),
        }
    }

    /// A miner configuration for this account, with short retry intervals.
    pub(crate) fn configuration(&self) -> Configuration {
        Configuration::builder()
            .miner_id(self.name.clone())
            .keypair(self.signing_key())
            .motto(self.name.clone())
            .url(self.url())
            .request_retry_interval(1)
            .tick_interval(Duration::from_millis(10))
            .build()
    }

    /// A transaction made by this account, signed with its master key.
    pub(crate) fn transaction(&self, uuid: &str, nonce: u64, body: TransactionBody) -> Transaction {
        Transaction::new(uuid, body)
            .with_maker(TransactionMaker::new(&self.name, "master", nonce))
            .signed(&self.keypair())
    }

    pub(crate) fn send(&self, uuid: &str, nonce: u64, to: &TestAccount, amount: u64) -> Transaction {
        self.transaction(
            uuid,
            nonce,
            TransactionBody::SendVol {
                to: to.name.clone(),
                amount,
            },
        )
    }

    /// A transfer that takes effect `maturity` blocks above the block that includes it.
    pub(crate) fn deferred_send(
        &self,
        uuid: &str,
        nonce: u64,
        to: &TestAccount,
        amount: u64,
        maturity: u64,
    ) -> Transaction {
        Transaction::new(
            uuid,
            TransactionBody::SendVol {
                to: to.name.clone(),
                amount,
            },
        )
        .with_maturity(maturity)
        .with_maker(TransactionMaker::new(&self.name, "master", nonce))
        .signed(&self.keypair())
    }
}

/// A genesis block at time 0 registering `miners` as miners, and opening `others` as plain accounts.
/// Every account starts with [`INITIAL_BALANCE`].
pub(crate) fn genesis_block(identity: &str, miners: &[&TestAccount], others: &[&TestAccount]) -> Block {
    let mut accounts = Vec::new();
    for miner in miners {
        accounts.push(GenesisAccount {
            name: miner.name.clone(),
            key: miner.keypair().public_bytes(),
            balance: INITIAL_BALANCE,
            miner: Some(miner.miner_info()),
        });
    }
    for other in others {
        accounts.push(GenesisAccount {
            name: other.name.clone(),
            key: other.keypair().public_bytes(),
            balance: INITIAL_BALANCE,
            miner: None,
        });
    }

    let body = GenesisBody {
        identity: identity.to_string(),
        block_delay: BLOCK_DELAY,
        rewrite_window: REWRITE_WINDOW,
        max_block_weight: 1_000_000,
        reward_pool: 0,
        accounts,
    };
    Block::genesis(
        BlockHeader::genesis(0, BLOCK_DELAY, REWRITE_WINDOW),
        vec![Transaction::genesis(body)],
    )
}

/// A signed block mined by `miner` on top of `parent` at `time`.
pub(crate) fn mine_on(parent: &BlockHeader, miner: &TestAccount, time: u64, transactions: Vec<Transaction>) -> Block {
    let keypair = miner.keypair();
    let header = parent.next(&miner.name, &keypair, miner.visage(), time, 0);
    Block::new(header, 0, transactions).sign(&keypair)
}
