/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

use charm_chain::{
    miner::Miner,
    types::{block::Block, data_types::BlockHeight, transaction::TransactionBody},
};
use log::LevelFilter;

mod common;

use crate::common::{
    chain::{genesis_block, mine_on, TestAccount, INITIAL_BALANCE},
    logging::setup_logger,
    network::{SimMessenger, SimNetwork},
};

fn start_miner(account: &TestAccount, network: &SimNetwork, genesis: &Block) -> Miner<SimMessenger> {
    let miner = Miner::new(account.configuration(), genesis.clone(), network.messenger(), None, None).unwrap();
    network.register(&account.url(), miner.camera());
    miner
}

#[test]
fn solo_miner_mines_only_when_it_has_transactions() {
    setup_logger(LevelFilter::Debug);

    let alice = TestAccount::new("alice", 1);
    let bob = TestAccount::new("bob", 2);
    let genesis = genesis_block("solo", &[&alice], &[&bob]);
    let network = SimNetwork::new();
    let mut miner = start_miner(&alice, &network, &genesis);
    assert!(miner.is_miner());
    assert_eq!(miner.ledger().count_blocks(), 1);

    // 1. A miner with no remote miners contributing only mines blocks with transactions.
    miner.submit_transaction(alice.send("pay-bob", 0, &bob, 100)).unwrap();
    miner.step(10).unwrap();

    let ledger = miner.ledger();
    assert_eq!(ledger.count_blocks(), 2);
    let head = ledger.head_block().unwrap().unwrap();
    assert_eq!(head.header.miner_id, "alice");
    assert_eq!(head.transactions.len(), 1);
    assert_eq!(ledger.account_by_name("bob").unwrap().unwrap().1.balance, INITIAL_BALANCE + 100);
    assert_eq!(ledger.miner_block_count("alice").unwrap(), 1);

    let status = miner.camera().status();
    assert_eq!(status.total_blocks, 2);
    assert_eq!(status.best_digest, head.digest());
    assert_eq!(status.miner_block_count, 1);

    // 2. Without transactions, no further block is mined.
    miner.step(20).unwrap();
    miner.step(30).unwrap();
    assert_eq!(miner.ledger().count_blocks(), 2);
    assert_eq!(miner.camera().snapshot().queued_transactions, 0);
}

#[test]
fn deferred_transactions_are_mined_once_and_the_chain_keeps_growing() {
    setup_logger(LevelFilter::Debug);

    let alice = TestAccount::new("alice", 1);
    let bob = TestAccount::new("bob", 2);
    let genesis = genesis_block("deferred", &[&alice], &[&bob]);
    let network = SimNetwork::new();
    let mut miner = start_miner(&alice, &network, &genesis);

    // 1. Block 1 includes a transfer that matures at height 3.
    miner.submit_transaction(alice.deferred_send("deferred", 0, &bob, 100, 2)).unwrap();
    miner.step(10).unwrap();
    assert_eq!(miner.ledger().count_blocks(), 2);

    // 2. It is not mined again, and alice's next transaction waits until it matures.
    assert!(miner.submit_transaction(alice.deferred_send("deferred", 0, &bob, 100, 2)).is_err());
    miner.submit_transaction(alice.send("after", 1, &bob, 50)).unwrap();
    miner.submit_transaction(bob.send("first", 0, &alice, 1)).unwrap();
    miner.step(20).unwrap();
    assert!(!miner.transaction_queue().contains("deferred"));
    miner.submit_transaction(bob.send("second", 1, &alice, 1)).unwrap();
    miner.step(30).unwrap();

    let ledger = miner.ledger();
    assert_eq!(ledger.count_blocks(), 4);
    for height in [2, 3] {
        let block = ledger.block(BlockHeight::new(height)).unwrap().unwrap();
        let uuids: Vec<&str> = block.transactions.iter().map(|transaction| transaction.uuid.as_str()).collect();
        assert!(!uuids.contains(&"deferred"));
        assert!(!uuids.contains(&"after"));
    }
    assert_eq!(ledger.account_by_name("alice").unwrap().unwrap().1.nonce, 1);
    assert_eq!(ledger.account_by_name("bob").unwrap().unwrap().1.balance, INITIAL_BALANCE + 100 - 2);

    // 3. Once it has matured, alice's next transaction is mined.
    miner.step(40).unwrap();
    let ledger = miner.ledger();
    assert_eq!(ledger.count_blocks(), 5);
    let head = ledger.head_block().unwrap().unwrap();
    assert_eq!(head.transactions.len(), 1);
    assert_eq!(head.transactions[0].uuid, "after");
    assert_eq!(ledger.account_by_name("alice").unwrap().unwrap().1.nonce, 2);
    assert_eq!(ledger.account_by_name("bob").unwrap().unwrap().1.balance, INITIAL_BALANCE + 150 - 2);

    miner.step(50).unwrap();
    assert_eq!(miner.ledger().count_blocks(), 5);
    assert!(miner.transaction_queue().is_empty());
}

#[test]
fn invalid_transactions_are_reported_through_the_camera() {
    setup_logger(LevelFilter::Debug);

    let alice = TestAccount::new("alice", 1);
    let bob = TestAccount::new("bob", 2);
    let genesis = genesis_block("errors", &[&alice], &[&bob]);
    let network = SimNetwork::new();
    let mut miner = start_miner(&alice, &network, &genesis);

    // Signed with bob's key, but made by alice.
    let mut forged = bob.send("forged", 0, &alice, 10);
    if let Some(maker) = forged.maker.as_mut() {
        maker.account = String::from("alice");
    }
    assert!(miner.submit_transaction(forged).is_err());

    miner.step(10).unwrap();
    assert!(miner.camera().transaction_error("forged").is_some());
    assert_eq!(miner.ledger().count_blocks(), 1);
}

#[test]
fn miner_does_not_rewrite_history_from_before_its_registration() {
    setup_logger(LevelFilter::Debug);

    let alice = TestAccount::new("alice", 1);
    let carol = TestAccount::new("carol", 3);
    let genesis = genesis_block("registration", &[&alice], &[&carol]);
    let network = SimNetwork::new();
    let mut miner = start_miner(&carol, &network, &genesis);
    assert!(!miner.is_miner());

    // 1. Branch X: alice mines three blocks, the second of which registers carol as a miner.
    let register = carol.transaction("register-carol", 0, TransactionBody::RegisterMiner(carol.miner_info()));
    let x1 = mine_on(&genesis.header, &alice, 10, Vec::new());
    let x2 = mine_on(&x1.header, &alice, 20, vec![register]);
    let x3 = mine_on(&x2.header, &alice, 30, Vec::new());
    miner.affirm_block("x", x1).unwrap();
    miner.affirm_block("x", x2).unwrap();
    let x3_id = miner.affirm_block("x", x3.clone()).unwrap();
    miner.compose_chain(x3_id).unwrap();

    assert_eq!(miner.ledger().count_blocks(), 4);
    assert!(miner.is_miner());
    assert_eq!(miner.miner_height(), BlockHeight::new(2));

    // 2. Branch Y forks off below carol's registration height: carol may not extend it.
    let y1 = mine_on(&genesis.header, &alice, 15, Vec::new());
    let y1_id = miner.affirm_block("y", y1).unwrap();
    let count_nodes = miner.block_tree().count_nodes();
    assert_eq!(miner.improve_branch(y1_id, BlockHeight::new(0), 1_000), y1_id);
    assert_eq!(miner.block_tree().count_nodes(), count_nodes);

    // 3. Branch X may be extended above carol's registration height.
    let improved = miner.improve_branch(x3_id, BlockHeight::new(0), 1_000);
    assert_ne!(improved, x3_id);
    assert_eq!(miner.block_tree().count_nodes(), count_nodes + 1);
    let node = miner.block_tree().node(improved);
    assert!(node.is_provisional());
    assert_eq!(node.header().miner_id, "carol");
    let parent = miner.block_tree().node(node.parent().unwrap());
    assert!(parent.digest() == x3.digest() || parent.digest() == x3.header.prev_digest.unwrap());
}

#[test]
fn follower_converges_on_the_miners_chain() {
    setup_logger(LevelFilter::Debug);

    let alice = TestAccount::new("alice", 1);
    let bob = TestAccount::new("bob", 2);
    let genesis = genesis_block("pair", &[&alice, &bob], &[]);
    let network = SimNetwork::new();

    let mut alice_miner = start_miner(&alice, &network, &genesis);
    let mut bob_configuration = bob.configuration();
    bob_configuration.muted = true;
    let mut bob_miner = Miner::new(bob_configuration, genesis.clone(), network.messenger(), None, None).unwrap();
    network.register(&bob.url(), bob_miner.camera());

    // 1. Alice mines while bob follows.
    for tick in 1..=40 {
        let now = tick * 10;
        alice_miner.step(now).unwrap();
        bob_miner.step(now).unwrap();
    }

    // 2. Time stands still, so alice cannot mine any more, and bob catches up.
    for _ in 0..30 {
        alice_miner.step(400).unwrap();
        bob_miner.step(400).unwrap();
    }

    let alice_head = alice_miner.ledger().head_block().unwrap().unwrap();
    let bob_head = bob_miner.ledger().head_block().unwrap().unwrap();
    assert!(alice_miner.ledger().count_blocks() >= 3);
    assert_eq!(bob_head.digest(), alice_head.digest());
    assert_eq!(bob_miner.ledger().miner_block_count("bob").unwrap(), 0);
    assert!(alice_miner.remote_miners().any(|remote| remote.miner_id() == Some("bob")));
    assert!(bob_miner.remote_miners().any(|remote| remote.miner_id() == Some("alice")));
}
