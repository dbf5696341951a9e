/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

use charm_chain::versioned_store::VersionedStore;

#[test]
fn reads_see_the_latest_write_at_or_below_a_version() {
    let mut store = VersionedStore::new();
    assert_eq!(store.version(), 0);

    store.set_raw("a", vec![0]);
    store.push_version();
    store.set_raw("b", vec![1]);
    store.push_version();
    store.set_raw("a", vec![2]);

    assert_eq!(store.version(), 2);
    assert_eq!(store.get_raw("a"), Some(vec![2]));
    assert_eq!(store.get_raw_at(1, "a"), Some(vec![0]));
    assert_eq!(store.get_raw_at(0, "b"), None);
    assert_eq!(store.get_raw_at(1, "b"), Some(vec![1]));
    assert!(!store.has_key("c"));

    store.set("c", &42u64).unwrap();
    assert_eq!(store.get::<u64>("c").unwrap(), Some(42));
}

#[test]
fn revert_discards_writes_at_and_above_the_version() {
    let mut store = VersionedStore::new();
    store.set_raw("a", vec![0]);
    store.push_version();
    store.set_raw("a", vec![1]);
    store.set_raw("b", vec![1]);
    store.push_version();
    store.set_raw("c", vec![2]);

    store.revert(1);
    assert_eq!(store.version(), 1);
    assert_eq!(store.get_raw("a"), Some(vec![0]));
    assert_eq!(store.get_raw("b"), None);
    assert_eq!(store.get_raw("c"), None);

    // The store can be written again at the reverted version.
    store.set_raw("b", vec![3]);
    store.push_version();
    assert_eq!(store.get_raw("b"), Some(vec![3]));
    assert_eq!(store.history().len(), 2);
}

#[test]
fn clones_read_and_write_independently() {
    let mut store = VersionedStore::new();
    store.set_raw("a", vec![0]);
    store.push_version();

    let mut clone = store.clone();
    store.set_raw("a", vec![1]);
    store.push_version();
    clone.set_raw("a", vec![9]);
    clone.set_raw("z", vec![9]);

    assert_eq!(store.version(), 2);
    assert_eq!(store.get_raw("a"), Some(vec![1]));
    assert_eq!(store.get_raw("z"), None);
    assert_eq!(clone.version(), 1);
    assert_eq!(clone.get_raw("a"), Some(vec![9]));
    assert_eq!(clone.get_raw_at(0, "a"), Some(vec![0]));

    // Dropping a clone leaves the store it was cloned from intact.
    drop(clone);
    store.optimize();
    assert_eq!(store.get_raw("a"), Some(vec![1]));
    assert_eq!(store.get_raw_at(0, "a"), Some(vec![0]));
}

#[test]
fn a_store_rebuilt_from_its_history_reads_the_same() {
    let mut store = VersionedStore::new();
    for version in 0..5u8 {
        store.set_raw("counter", vec![version]);
        if version % 2 == 0 {
            store.set_raw(&format!("even-{}", version), vec![version]);
        }
        store.push_version();
    }

    let rebuilt = VersionedStore::from_history(store.version(), store.history());
    assert_eq!(rebuilt.version(), 5);
    assert_eq!(rebuilt.get_raw("counter"), Some(vec![4]));
    assert_eq!(rebuilt.get_raw_at(2, "counter"), Some(vec![2]));
    assert_eq!(rebuilt.get_raw_at(1, "even-2"), None);
    assert_eq!(rebuilt.get_raw("even-2"), Some(vec![2]));
}
