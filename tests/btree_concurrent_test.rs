//! Multi-threaded B+ tree tests

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use arbor::buffer::BufferPoolManager;
use arbor::common::{PageId, RecordId, SlotId};
use arbor::index::{integer_key, BPlusTree, IndexOptions, IntegerComparator};
use arbor::storage::disk::MemoryPageStore;
use arbor::storage::page::IndexDirectory;
use rand::seq::SliceRandom;
use rand::{rngs::StdRng, SeedableRng};

const THREADS: i64 = 8;

fn rid(k: i64) -> RecordId {
    RecordId::new(PageId::new(k as u32), SlotId::new((k & 0xffff) as u16))
}

fn key_of(bytes: &[u8]) -> i64 {
    i64::from_le_bytes(bytes.try_into().unwrap())
}

fn shared_tree(pool_size: usize, leaf: usize, internal: usize) -> Arc<BPlusTree<IntegerComparator>> {
    let bpm = Arc::new(BufferPoolManager::new(pool_size, Arc::new(MemoryPageStore::new())));
    let directory = Arc::new(IndexDirectory::open(Arc::clone(&bpm)).unwrap());
    let options = IndexOptions::default().with_capacities(leaf, internal);
    Arc::new(BPlusTree::new("idx", bpm, directory, IntegerComparator, options).unwrap())
}

fn scan(tree: &BPlusTree<IntegerComparator>) -> Vec<i64> {
    tree.begin()
        .unwrap()
        .map(|entry| key_of(&entry.unwrap().0))
        .collect()
}

#[test]
fn test_concurrent_disjoint_inserts() {
    let tree = shared_tree(256, 4, 4);
    let per_thread = 300;

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let tree = Arc::clone(&tree);
            thread::spawn(move || {
                let mut keys: Vec<i64> = (t * per_thread..(t + 1) * per_thread).collect();
                keys.shuffle(&mut StdRng::seed_from_u64(t as u64));
                for k in keys {
                    assert!(tree.insert(&integer_key(k), rid(k)).unwrap());
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let total = THREADS * per_thread;
    assert_eq!(tree.check_integrity().unwrap().num_keys, total as usize);
    assert_eq!(scan(&tree), (0..total).collect::<Vec<_>>());
    for k in (0..total).step_by(37) {
        assert_eq!(tree.get_value(&integer_key(k)).unwrap(), Some(rid(k)));
    }
}

#[test]
fn test_concurrent_interleaved_inserts() {
    // Threads share every leaf: thread t owns keys congruent to t
    let tree = shared_tree(256, 3, 3);
    let total = 2000;

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let tree = Arc::clone(&tree);
            thread::spawn(move || {
                for k in (t..total).step_by(THREADS as usize) {
                    tree.insert(&integer_key(k), rid(k)).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(tree.check_integrity().unwrap().num_keys, total as usize);
    assert_eq!(scan(&tree), (0..total).collect::<Vec<_>>());
}

#[test]
fn test_concurrent_mixed_insert_remove() {
    let tree = shared_tree(256, 4, 4);
    let total = 2400;

    // Even keys are preloaded and later removed; odd keys arrive concurrently
    for k in (0..total).step_by(2) {
        tree.insert(&integer_key(k), rid(k)).unwrap();
    }

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let tree = Arc::clone(&tree);
            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(100 + t as u64);
                let mut keys: Vec<i64> = (t..total).step_by(THREADS as usize).collect();
                keys.shuffle(&mut rng);
                for k in keys {
                    if k % 2 == 0 {
                        tree.remove(&integer_key(k)).unwrap();
                    } else {
                        assert!(tree.insert(&integer_key(k), rid(k)).unwrap());
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let odd: Vec<i64> = (1..total).step_by(2).collect();
    assert_eq!(tree.check_integrity().unwrap().num_keys, odd.len());
    assert_eq!(scan(&tree), odd);
}

#[test]
fn test_concurrent_remove_everything() {
    let tree = shared_tree(256, 3, 3);
    let total = 1600;
    for k in 0..total {
        tree.insert(&integer_key(k), rid(k)).unwrap();
    }

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let tree = Arc::clone(&tree);
            thread::spawn(move || {
                let mut keys: Vec<i64> = (t..total).step_by(THREADS as usize).collect();
                keys.shuffle(&mut StdRng::seed_from_u64(t as u64));
                for k in keys {
                    tree.remove(&integer_key(k)).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert!(tree.is_empty());
    assert_eq!(tree.check_integrity().unwrap().num_keys, 0);
}

#[test]
fn test_readers_during_writes() {
    let tree = shared_tree(256, 4, 4);
    let stable = 1000;

    // Multiples of 10 stay put for the whole test
    for k in (0..stable).map(|k| k * 10) {
        tree.insert(&integer_key(k), rid(k)).unwrap();
    }

    let done = Arc::new(AtomicBool::new(false));

    let writers: Vec<_> = (0..4i64)
        .map(|t| {
            let tree = Arc::clone(&tree);
            thread::spawn(move || {
                let keys: Vec<i64> = (0..stable).map(|k| k * 10 + 1 + t).collect();
                for &k in &keys {
                    tree.insert(&integer_key(k), rid(k)).unwrap();
                }
                for &k in keys.iter().step_by(2) {
                    tree.remove(&integer_key(k)).unwrap();
                }
            })
        })
        .collect();

    let point_reader = {
        let tree = Arc::clone(&tree);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let mut rounds = 0;
            while !done.load(Ordering::Acquire) || rounds == 0 {
                for k in (0..stable).step_by(7).map(|k| k * 10) {
                    assert_eq!(tree.get_value(&integer_key(k)).unwrap(), Some(rid(k)));
                }
                rounds += 1;
            }
        })
    };

    let scanners: Vec<_> = (0..2)
        .map(|_| {
            let tree = Arc::clone(&tree);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut rounds = 0;
                while !done.load(Ordering::Acquire) || rounds == 0 {
                    let keys = scan(&tree);
                    assert!(keys.windows(2).all(|pair| pair[0] < pair[1]));
                    let stable_seen = keys.iter().filter(|&&k| k % 10 == 0).count();
                    assert_eq!(stable_seen, stable as usize);
                    rounds += 1;
                }
            })
        })
        .collect();

    for writer in writers {
        writer.join().unwrap();
    }
    done.store(true, Ordering::Release);
    point_reader.join().unwrap();
    for scanner in scanners {
        scanner.join().unwrap();
    }

    let stats = tree.check_integrity().unwrap();
    assert_eq!(stats.num_keys, stable as usize + 4 * stable as usize / 2);
}

#[test]
fn test_concurrent_inserts_with_small_pool() {
    // Few frames force constant eviction under contention
    let tree = shared_tree(96, 4, 4);
    let per_thread = 250;

    let handles: Vec<_> = (0..4i64)
        .map(|t| {
            let tree = Arc::clone(&tree);
            thread::spawn(move || {
                for k in (t * per_thread..(t + 1) * per_thread).rev() {
                    tree.insert(&integer_key(k), rid(k)).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(scan(&tree), (0..4 * per_thread).collect::<Vec<_>>());
}
