//! Concurrent insert scenarios.
//!
//! These tests push many threads through the same tree so that leaf splits,
//! parent splits and root replacement race with each other. Every scenario
//! ends by validating the quiescent tree and looking up every key.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::btree::BLinkTree;

fn shuffled_keys(count: u64, seed: u64) -> Vec<u64> {
    let mut keys: Vec<u64> = (0..count).collect();
    keys.shuffle(&mut StdRng::seed_from_u64(seed));
    keys
}

/// Insert `keys` split into `threads` contiguous chunks, one per thread.
fn insert_in_chunks(tree: &BLinkTree<u64, u64>, keys: &[u64], threads: usize) {
    let chunk_size = keys.len().div_ceil(threads);
    thread::scope(|scope| {
        for chunk in keys.chunks(chunk_size) {
            scope.spawn(move || {
                for &key in chunk {
                    assert!(tree.insert(key, key * 3), "key {key} rejected");
                }
            });
        }
    });
}

fn assert_all_present(tree: &BLinkTree<u64, u64>, keys: &[u64]) {
    let stats = tree.validate().expect("tree is valid after concurrent inserts");
    assert_eq!(stats.keys, keys.len());
    assert_eq!(tree.len(), keys.len());

    let missing: Vec<u64> = keys
        .iter()
        .copied()
        .filter(|key| tree.get(key) != Some(key * 3))
        .collect();
    assert!(missing.is_empty(), "missing keys: {:?}", &missing[..missing.len().min(20)]);
}

#[test]
fn test_concurrent_disjoint_shuffled_inserts() {
    for order in [2, 3, 8] {
        let tree = BLinkTree::with_order(order).expect("valid order");
        let keys = shuffled_keys(20_000, 7);

        insert_in_chunks(&tree, &keys, 8);

        assert_all_present(&tree, &keys);
        assert!(!tree.contains(&20_000));
    }
}

#[test]
fn test_concurrent_ascending_chunks() {
    // Each thread appends to its own region, so splits happen everywhere at once
    let tree = BLinkTree::with_order(2).expect("valid order");
    let keys: Vec<u64> = (0..16_000).collect();

    insert_in_chunks(&tree, &keys, 8);

    assert_all_present(&tree, &keys);
}

#[test]
fn test_concurrent_interleaved_keys() {
    // Neighbouring keys come from different threads: maximum leaf contention
    let tree = BLinkTree::with_order(2).expect("valid order");
    let threads = 8u64;
    let per_thread = 2_000u64;

    thread::scope(|scope| {
        for t in 0..threads {
            let tree = &tree;
            scope.spawn(move || {
                for i in 0..per_thread {
                    let key = i * threads + t;
                    assert!(tree.insert(key, key * 3));
                }
            });
        }
    });

    let keys: Vec<u64> = (0..threads * per_thread).collect();
    assert_all_present(&tree, &keys);
}

#[test]
fn test_concurrent_inserts_from_empty_tree() {
    // Every thread races to plant the first root
    for round in 0..20 {
        let tree = BLinkTree::with_order(2).expect("valid order");
        thread::scope(|scope| {
            for t in 0..8u64 {
                let tree = &tree;
                scope.spawn(move || {
                    for i in 0..50 {
                        assert!(tree.insert(i * 8 + t, (i * 8 + t) * 3));
                    }
                });
            }
        });

        let keys: Vec<u64> = (0..400).collect();
        assert_all_present(&tree, &keys);
        assert!(tree.height() >= 3, "round {round} produced a shallow tree");
    }
}

#[test]
fn test_concurrent_duplicate_races() {
    // All threads insert the same keys; exactly one insert per key may win
    let tree = BLinkTree::with_order(3).expect("valid order");
    let wins = AtomicUsize::new(0);
    let count = 5_000u64;

    thread::scope(|scope| {
        for seed in 0..6 {
            let tree = &tree;
            let wins = &wins;
            scope.spawn(move || {
                for key in shuffled_keys(count, seed) {
                    if tree.insert(key, key * 3) {
                        wins.fetch_add(1, Ordering::Relaxed);
                    }
                }
            });
        }
    });

    assert_eq!(wins.load(Ordering::Relaxed), 5_000);
    let keys: Vec<u64> = (0..count).collect();
    assert_all_present(&tree, &keys);
}

#[test]
fn test_readers_see_settled_keys_during_inserts() {
    let tree = BLinkTree::with_order(2).expect("valid order");
    let settled: Vec<u64> = (0..4_000).map(|k| k * 2).collect();
    for &key in &settled {
        assert!(tree.insert(key, key * 3));
    }

    let writers_done = AtomicBool::new(false);
    let lost = AtomicUsize::new(0);

    thread::scope(|scope| {
        for _ in 0..3 {
            scope.spawn(|| {
                while !writers_done.load(Ordering::Acquire) {
                    for key in &settled {
                        if tree.get(key) != Some(key * 3) {
                            lost.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            });
        }

        let writers: Vec<_> = (0..4u64)
            .map(|t| {
                let tree = &tree;
                scope.spawn(move || {
                    for i in 0..1_000u64 {
                        let key = (i * 4 + t) * 2 + 1;
                        assert!(tree.insert(key, key * 3));
                    }
                })
            })
            .collect();
        let joined: Vec<_> = writers.into_iter().map(|w| w.join()).collect();
        // Stop the readers before reporting, or a failed writer hangs the scope
        writers_done.store(true, Ordering::Release);
        assert!(joined.iter().all(Result::is_ok), "a writer panicked");
    });

    assert_eq!(lost.load(Ordering::Relaxed), 0, "readers missed settled keys");
    let keys: Vec<u64> = (0..8_000).collect();
    assert_all_present(&tree, &keys);
}

#[test]
fn test_concurrent_string_keys() {
    let tree = BLinkTree::with_order(4).expect("valid order");
    thread::scope(|scope| {
        for t in 0..4 {
            let tree = &tree;
            scope.spawn(move || {
                for i in 0..1_000 {
                    assert!(tree.insert(format!("key-{t}-{i:05}"), i));
                }
            });
        }
    });

    let stats = tree.validate().expect("valid tree");
    assert_eq!(stats.keys, 4_000);

    let mut seen = HashSet::new();
    for t in 0..4 {
        for i in 0..1_000 {
            let key = format!("key-{t}-{i:05}");
            assert_eq!(tree.get(&key), Some(i));
            assert!(seen.insert(key));
        }
    }
}
