/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use charm_chain::{
    miner::{Miner, MinerError},
    persistence::{KVPersistenceProvider, PersistenceError, PersistenceProvider},
    versioned_store::VersionedStore,
};
use log::LevelFilter;

mod common;

use crate::common::{
    chain::{genesis_block, TestAccount, INITIAL_BALANCE},
    logging::setup_logger,
    mem_db::MemDB,
    network::SimNetwork,
};

#[test]
fn snapshots_restore_the_persisted_version() {
    let mut store = VersionedStore::new();
    store.set_raw("a", vec![0]);
    store.set_raw("b", vec![0]);
    store.push_version();
    store.set_raw("a", vec![1]);
    store.push_version();

    let mut provider = KVPersistenceProvider::new(MemDB::new());
    provider.persist(&store, "master").unwrap();
    assert_eq!(provider.read("master", "a").unwrap(), Some(vec![1]));
    assert_eq!(provider.read("other", "a").unwrap(), None);

    let restored = provider.restore("master").unwrap().unwrap();
    assert_eq!(restored.version(), 2);
    assert_eq!(restored.get_raw("a"), Some(vec![1]));
    assert_eq!(restored.get_raw_at(0, "a"), Some(vec![0]));
    assert_eq!(restored.get_raw("b"), Some(vec![0]));

    // A later snapshot replaces the earlier one, including removed keys.
    store.revert(1);
    store.set_raw("c", vec![2]);
    store.push_version();
    store.revert(0);
    store.set_raw("a", vec![3]);
    store.push_version();
    provider.persist(&store, "master").unwrap();

    let restored = provider.restore("master").unwrap().unwrap();
    assert_eq!(restored.version(), 1);
    assert_eq!(restored.get_raw("a"), Some(vec![3]));
    assert_eq!(restored.get_raw("b"), None);
    assert_eq!(restored.get_raw("c"), None);
    assert!(provider.restore("other").unwrap().is_none());
}

#[test]
fn miner_resumes_from_the_persisted_ledger() {
    setup_logger(LevelFilter::Debug);

    let alice = TestAccount::new("alice", 1);
    let bob = TestAccount::new("bob", 2);
    let genesis = genesis_block("persisted", &[&alice], &[&bob]);
    let network = SimNetwork::new();
    let db = MemDB::new();

    // 1. Mine a block with persistence enabled.
    let head = {
        let mut miner = Miner::new(
            alice.configuration(),
            genesis.clone(),
            network.messenger(),
            Some(Box::new(KVPersistenceProvider::new(db.clone()))),
            None,
        )
        .unwrap();
        miner.submit_transaction(alice.send("pay-bob", 0, &bob, 10)).unwrap();
        miner.step(10).unwrap();
        assert_eq!(miner.ledger().count_blocks(), 2);
        miner.ledger().head_block().unwrap().unwrap()
    };

    // 2. A new miner on the same storage picks up where the first one stopped.
    let miner = Miner::new(
        alice.configuration(),
        genesis.clone(),
        network.messenger(),
        Some(Box::new(KVPersistenceProvider::new(db.clone()))),
        None,
    )
    .unwrap();
    assert_eq!(miner.ledger().count_blocks(), 2);
    assert_eq!(miner.ledger().head_block().unwrap(), Some(head));
    assert_eq!(
        miner.ledger().account_by_name("bob").unwrap().unwrap().1.balance,
        INITIAL_BALANCE + 10
    );
    drop(miner);

    // 3. The persisted ledger belongs to a different chain than this genesis block.
    let other_genesis = genesis_block("another chain", &[&alice], &[&bob]);
    let result = Miner::new(
        alice.configuration(),
        other_genesis,
        network.messenger(),
        Some(Box::new(KVPersistenceProvider::new(db))),
        None,
    );
    assert!(matches!(result, Err(MinerError::GenesisMismatch)));
}

/// A provider that silently loses the first `lost` snapshots it is asked to persist.
struct LossyProvider {
    inner: KVPersistenceProvider<MemDB>,
    lost: usize,
    persist_calls: Arc<AtomicUsize>,
}

impl PersistenceProvider for LossyProvider {
    fn persist(&mut self, store: &VersionedStore, label: &str) -> Result<(), PersistenceError> {
        if self.persist_calls.fetch_add(1, Ordering::SeqCst) < self.lost {
            return Ok(());
        }
        self.inner.persist(store, label)
    }

    fn restore(&self, label: &str) -> Result<Option<VersionedStore>, PersistenceError> {
        self.inner.restore(label)
    }

    fn read(&self, label: &str, key: &str) -> Result<Option<Vec<u8>>, PersistenceError> {
        self.inner.read(label, key)
    }
}

#[test]
fn a_lost_snapshot_is_persisted_again() {
    setup_logger(LevelFilter::Debug);

    let alice = TestAccount::new("alice", 1);
    let bob = TestAccount::new("bob", 2);
    let genesis = genesis_block("lossy", &[&alice], &[&bob]);
    let network = SimNetwork::new();
    let db = MemDB::new();
    let persist_calls = Arc::new(AtomicUsize::new(0));

    let mut config = alice.configuration();
    config.persistence_retry_limit = 2;
    config.persistence_retry_sleep = Duration::from_millis(1);
    let provider = LossyProvider {
        inner: KVPersistenceProvider::new(db.clone()),
        lost: 1,
        persist_calls: persist_calls.clone(),
    };

    // The first snapshot is lost, so the miner persists the genesis ledger a second time.
    let miner = Miner::new(config, genesis.clone(), network.messenger(), Some(Box::new(provider)), None).unwrap();
    assert_eq!(persist_calls.load(Ordering::SeqCst), 2);
    drop(miner);

    let restored = KVPersistenceProvider::new(db).restore("master").unwrap().unwrap();
    assert_eq!(restored.version(), 1);
}
