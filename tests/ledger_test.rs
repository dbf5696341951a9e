/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

use charm_chain::{
    ledger::{BlockVerifyError, Ledger, LedgerError, TransactionError},
    types::{block::VerificationPolicy, data_types::BlockHeight},
};

mod common;

use crate::common::chain::{genesis_block, mine_on, TestAccount, BLOCK_DELAY, INITIAL_BALANCE};

fn balance(ledger: &Ledger, name: &str) -> u64 {
    ledger.account_by_name(name).unwrap().unwrap().1.balance
}

fn nonce(ledger: &Ledger, name: &str) -> u64 {
    ledger.account_by_name(name).unwrap().unwrap().1.nonce
}

#[test]
fn genesis_sets_up_the_chain() {
    let alice = TestAccount::new("alice", 1);
    let bob = TestAccount::new("bob", 2);
    let genesis = genesis_block("ledger", &[&alice], &[&bob]);

    let mut ledger = Ledger::new();
    ledger.push_block(&genesis, VerificationPolicy::ALL).unwrap();

    assert_eq!(ledger.count_blocks(), 1);
    assert_eq!(ledger.identity().unwrap(), Some(String::from("ledger")));
    assert_eq!(ledger.genesis_hash().unwrap(), Some(genesis.digest()));
    assert_eq!(ledger.block_delay().unwrap(), BLOCK_DELAY);
    assert_eq!(ledger.count_accounts().unwrap(), 2);
    assert_eq!(balance(&ledger, "bob"), INITIAL_BALANCE);
    assert_eq!(ledger.miner_height("alice").unwrap(), Some(BlockHeight::new(0)));
    assert_eq!(ledger.miner_height("bob").unwrap(), None);
    assert_eq!(ledger.miner_urls().unwrap().get("alice"), Some(&alice.url()));
    assert_eq!(ledger.head_block().unwrap(), Some(genesis));
}

#[test]
fn blocks_apply_and_revert() {
    let alice = TestAccount::new("alice", 1);
    let bob = TestAccount::new("bob", 2);
    let genesis = genesis_block("ledger", &[&alice], &[&bob]);
    let mut ledger = Ledger::new();
    ledger.push_block(&genesis, VerificationPolicy::ALL).unwrap();

    let b1 = mine_on(&genesis.header, &alice, 10, vec![alice.send("one", 0, &bob, 100)]);
    let b2 = mine_on(&b1.header, &alice, 20, vec![alice.send("two", 1, &bob, 50)]);
    ledger.push_block(&b1, VerificationPolicy::ALL).unwrap();
    let snapshot = ledger.clone();
    ledger.push_block(&b2, VerificationPolicy::ALL).unwrap();

    assert_eq!(ledger.count_blocks(), 3);
    assert_eq!(balance(&ledger, "bob"), INITIAL_BALANCE + 150);
    assert_eq!(ledger.block_for_digest(&b2.digest()).unwrap(), Some(b2.clone()));
    assert_eq!(ledger.height_for_digest(&b1.digest()).unwrap(), Some(BlockHeight::new(1)));
    assert_eq!(ledger.miner_block_count("alice").unwrap(), 2);

    // A clone stays at the version it was cloned at.
    assert_eq!(snapshot.count_blocks(), 2);
    assert_eq!(balance(&snapshot, "bob"), INITIAL_BALANCE + 100);

    ledger.revert_and_clear(2);
    assert_eq!(ledger.count_blocks(), 2);
    assert_eq!(balance(&ledger, "bob"), INITIAL_BALANCE + 100);
    assert_eq!(ledger.block_for_digest(&b2.digest()).unwrap(), None);

    // The reverted block can be pushed again.
    ledger.push_block(&b2, VerificationPolicy::ALL).unwrap();
    assert_eq!(balance(&ledger, "bob"), INITIAL_BALANCE + 150);
}

#[test]
fn rejected_blocks_leave_the_ledger_untouched() {
    let alice = TestAccount::new("alice", 1);
    let bob = TestAccount::new("bob", 2);
    let dave = TestAccount::new("dave", 4);
    let genesis = genesis_block("ledger", &[&alice], &[&bob]);
    let mut ledger = Ledger::new();
    ledger.push_block(&genesis, VerificationPolicy::ALL).unwrap();

    // 1. A block by an account that is not a registered miner.
    let by_stranger = mine_on(&genesis.header, &dave, 10, Vec::new());
    match ledger.push_block(&by_stranger, VerificationPolicy::ALL) {
        Err(LedgerError::Verify(BlockVerifyError::MinerInfoNotFound { miner_id })) => assert_eq!(miner_id, "dave"),
        other => panic!("unexpected result: {:?}", other),
    }

    // 2. A block whose body was tampered with after signing.
    let mut tampered = mine_on(&genesis.header, &alice, 10, Vec::new());
    tampered.reward = 5;
    assert!(matches!(
        ledger.push_block(&tampered, VerificationPolicy::ALL),
        Err(LedgerError::Verify(BlockVerifyError::BodyHashMismatch))
    ));

    // 3. A block with a transaction that cannot apply.
    let overdrawn = mine_on(&genesis.header, &alice, 10, vec![alice.send("too-much", 0, &bob, INITIAL_BALANCE + 1)]);
    match ledger.push_block(&overdrawn, VerificationPolicy::ALL) {
        Err(LedgerError::Transaction { uuid, .. }) => assert_eq!(uuid, "too-much"),
        other => panic!("unexpected result: {:?}", other),
    }

    // 4. A block that does not sit at the ledger's next height.
    let b1 = mine_on(&genesis.header, &alice, 10, Vec::new());
    let b2 = mine_on(&b1.header, &alice, 20, Vec::new());
    match ledger.push_block(&b2, VerificationPolicy::ALL) {
        Err(LedgerError::Verify(BlockVerifyError::HeightMismatch {
            ledger_version,
            block_height,
        })) => {
            assert_eq!(ledger_version, 1);
            assert_eq!(block_height, BlockHeight::new(2));
        }
        other => panic!("unexpected result: {:?}", other),
    }

    assert_eq!(ledger.count_blocks(), 1);
    assert_eq!(balance(&ledger, "alice"), INITIAL_BALANCE);
    assert_eq!(balance(&ledger, "bob"), INITIAL_BALANCE);
}

#[test]
fn reverted_blocks_can_be_replaced_by_another_branch() {
    let alice = TestAccount::new("alice", 1);
    let bob = TestAccount::new("bob", 2);
    let genesis = genesis_block("ledger", &[&alice], &[&bob]);
    let mut ledger = Ledger::new();
    ledger.push_block(&genesis, VerificationPolicy::ALL).unwrap();

    // 1. Push blocks 1 to 5, each paying bob 10.
    let mut blocks = vec![genesis];
    for nonce in 0..5u64 {
        let parent = blocks[nonce as usize].header.clone();
        let pay = alice.send(&format!("pay-{}", nonce), nonce, &bob, 10);
        let block = mine_on(&parent, &alice, BLOCK_DELAY * (nonce + 1), vec![pay]);
        ledger.push_block(&block, VerificationPolicy::ALL).unwrap();
        blocks.push(block);
    }
    assert_eq!(ledger.count_blocks(), 6);
    assert_eq!(balance(&ledger, "bob"), INITIAL_BALANCE + 50);

    // 2. Revert to block 2.
    ledger.revert_and_clear(3);
    assert_eq!(ledger.count_blocks(), 3);
    assert_eq!(balance(&ledger, "bob"), INITIAL_BALANCE + 20);
    assert_eq!(nonce(&ledger, "alice"), 2);
    assert_eq!(ledger.head_block().unwrap(), Some(blocks[2].clone()));
    for reverted in &blocks[3..] {
        assert_eq!(ledger.block_for_digest(&reverted.digest()).unwrap(), None);
    }

    // 3. A different block 3 takes the place of the reverted one.
    let replacement = mine_on(&blocks[2].header, &alice, 35, vec![alice.send("other", 2, &bob, 7)]);
    assert_ne!(replacement.digest(), blocks[3].digest());
    ledger.push_block(&replacement, VerificationPolicy::ALL).unwrap();
    assert_eq!(ledger.count_blocks(), 4);
    assert_eq!(balance(&ledger, "bob"), INITIAL_BALANCE + 27);
    assert_eq!(nonce(&ledger, "alice"), 3);
    assert_eq!(ledger.block(BlockHeight::new(3)).unwrap(), Some(replacement.clone()));
    assert_eq!(ledger.head_block().unwrap(), Some(replacement));

    // 4. The old block 4 no longer extends the chain.
    assert!(matches!(
        ledger.push_block(&blocks[4], VerificationPolicy::ALL),
        Err(LedgerError::Verify(BlockVerifyError::ParentHashMismatch))
    ));
    assert_eq!(ledger.count_blocks(), 4);
}

#[test]
fn deferred_transactions_apply_at_their_maturity_height() {
    let alice = TestAccount::new("alice", 1);
    let bob = TestAccount::new("bob", 2);
    let genesis = genesis_block("ledger", &[&alice], &[&bob]);
    let mut ledger = Ledger::new();
    ledger.push_block(&genesis, VerificationPolicy::ALL).unwrap();

    let b1 = mine_on(&genesis.header, &alice, 10, vec![alice.deferred_send("later", 0, &bob, 100, 2)]);
    let b2 = mine_on(&b1.header, &alice, 20, Vec::new());
    let b3 = mine_on(&b2.header, &alice, 30, Vec::new());

    // 1. Below its maturity height the transaction is pending.
    for block in [&b1, &b2] {
        ledger.push_block(block, VerificationPolicy::ALL).unwrap();
        assert_eq!(balance(&ledger, "bob"), INITIAL_BALANCE);
        assert_eq!(nonce(&ledger, "alice"), 0);
        let pending = ledger.pending_transactions().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].uuid, "later");
        assert_eq!(pending[0].maturity, BlockHeight::new(3));
    }

    // 2. Block 3 applies it.
    ledger.push_block(&b3, VerificationPolicy::ALL).unwrap();
    assert_eq!(balance(&ledger, "bob"), INITIAL_BALANCE + 100);
    assert_eq!(nonce(&ledger, "alice"), 1);
    assert!(ledger.pending_transactions().unwrap().is_empty());

    // 3. Reverting block 3 makes it pending again, and pushing block 3 again reapplies it.
    ledger.revert_and_clear(3);
    assert_eq!(balance(&ledger, "bob"), INITIAL_BALANCE);
    assert_eq!(nonce(&ledger, "alice"), 0);
    assert_eq!(ledger.pending_transactions().unwrap().len(), 1);

    ledger.push_block(&b3, VerificationPolicy::ALL).unwrap();
    assert_eq!(balance(&ledger, "bob"), INITIAL_BALANCE + 100);
    assert_eq!(nonce(&ledger, "alice"), 1);
}

#[test]
fn deferred_transactions_are_included_once_and_skipped_if_they_fail() {
    let alice = TestAccount::new("alice", 1);
    let bob = TestAccount::new("bob", 2);
    let nobody = TestAccount::new("nobody", 9);
    let genesis = genesis_block("ledger", &[&alice], &[&bob]);
    let mut ledger = Ledger::new();
    ledger.push_block(&genesis, VerificationPolicy::ALL).unwrap();

    let b1 = mine_on(&genesis.header, &alice, 10, vec![alice.deferred_send("later", 0, &bob, 100, 2)]);
    ledger.push_block(&b1, VerificationPolicy::ALL).unwrap();

    // 1. The pending transaction cannot be included again, under its UUID or its nonce.
    let same_uuid = mine_on(&b1.header, &alice, 20, vec![alice.deferred_send("later", 0, &bob, 100, 2)]);
    match ledger.push_block(&same_uuid, VerificationPolicy::ALL) {
        Err(LedgerError::Transaction {
            uuid,
            error: TransactionError::DeferredTransactionPending { account },
        }) => {
            assert_eq!(uuid, "later");
            assert_eq!(account, "alice");
        }
        other => panic!("unexpected result: {:?}", other),
    }
    let same_nonce = mine_on(&b1.header, &alice, 20, vec![alice.deferred_send("again", 0, &bob, 5, 1)]);
    assert!(matches!(
        ledger.push_block(&same_nonce, VerificationPolicy::ALL),
        Err(LedgerError::Transaction {
            error: TransactionError::DeferredTransactionPending { .. },
            ..
        })
    ));

    // 2. Neither can two deferred transactions of one maker with the same nonce in one block.
    let twice = mine_on(
        &b1.header,
        &alice,
        20,
        vec![bob.deferred_send("first", 0, &alice, 1, 1), bob.deferred_send("second", 0, &alice, 1, 1)],
    );
    match ledger.push_block(&twice, VerificationPolicy::ALL) {
        Err(LedgerError::Transaction { uuid, .. }) => assert_eq!(uuid, "second"),
        other => panic!("unexpected result: {:?}", other),
    }
    assert_eq!(ledger.count_blocks(), 2);

    // 3. A deferred transaction that fails at its maturity height is skipped, without partial writes.
    let b2 = mine_on(&b1.header, &alice, 20, vec![bob.deferred_send("doomed", 0, &nobody, 10, 1)]);
    let b3 = mine_on(&b2.header, &alice, 30, Vec::new());
    ledger.push_block(&b2, VerificationPolicy::ALL).unwrap();
    ledger.push_block(&b3, VerificationPolicy::ALL).unwrap();

    assert_eq!(ledger.count_blocks(), 4);
    assert_eq!(balance(&ledger, "bob"), INITIAL_BALANCE + 100);
    assert_eq!(nonce(&ledger, "bob"), 0);
    assert_eq!(nonce(&ledger, "alice"), 1);
    assert!(ledger.pending_transactions().unwrap().is_empty());

    // 4. The chain keeps growing.
    let b4 = mine_on(&b3.header, &alice, 40, vec![alice.send("next", 1, &bob, 1)]);
    ledger.push_block(&b4, VerificationPolicy::ALL).unwrap();
    assert_eq!(balance(&ledger, "bob"), INITIAL_BALANCE + 101);
}

#[test]
fn maturities_beyond_the_last_block_height_are_rejected() {
    let alice = TestAccount::new("alice", 1);
    let bob = TestAccount::new("bob", 2);
    let genesis = genesis_block("ledger", &[&alice], &[&bob]);
    let mut ledger = Ledger::new();
    ledger.push_block(&genesis, VerificationPolicy::ALL).unwrap();

    let forged = mine_on(&genesis.header, &alice, 10, vec![alice.deferred_send("never", 0, &bob, 1, u64::MAX)]);
    match ledger.push_block(&forged, VerificationPolicy::ALL) {
        Err(LedgerError::Transaction {
            uuid,
            error: TransactionError::InvalidMaturity { maturity },
        }) => {
            assert_eq!(uuid, "never");
            assert_eq!(maturity, u64::MAX);
        }
        other => panic!("unexpected result: {:?}", other),
    }
    assert_eq!(ledger.count_blocks(), 1);
    assert!(ledger.pending_transactions().unwrap().is_empty());
}
