//! Recency ordering of the shared cache under concurrent access.

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use rand::Rng;
use ride_comfort::SharedLruCache;

const TRIALS: usize = 200;

fn jitter() {
    let micros = rand::thread_rng().gen_range(0..50);
    thread::sleep(Duration::from_micros(micros));
}

/// A, B, C inserted in order; A updated and B read concurrently; D inserted.
/// Whatever the interleaving, C is the least recently used entry.
#[test]
fn test_concurrent_update_and_read_then_insert_evicts_c() {
    for trial in 0..TRIALS {
        let cache = Arc::new(SharedLruCache::new(3).unwrap());
        cache.set("A", 1);
        cache.set("B", 2);
        cache.set("C", 3);

        let barrier = Arc::new(Barrier::new(2));
        let writer = {
            let cache = Arc::clone(&cache);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                jitter();
                cache.set("A", 10);
            })
        };
        let reader = {
            let cache = Arc::clone(&cache);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                jitter();
                cache.get(&"B")
            })
        };
        writer.join().unwrap();
        assert_eq!(reader.join().unwrap(), Some(2), "trial {}", trial);

        let evicted = cache.set("D", 4);
        assert_eq!(evicted, Some(("C", 3)), "trial {}", trial);
        assert_eq!(cache.len(), 3);
        assert!(cache.contains(&"A"));
        assert!(cache.contains(&"B"));
        assert!(cache.contains(&"D"));
        assert_eq!(cache.most_recent(), Some("D"));
        assert_eq!(cache.get(&"A"), Some(10));

        let order = cache.recency_order();
        assert_eq!(order.len(), 3);
        assert_eq!(order[2], "A");
    }
}

#[test]
fn test_many_threads_never_exceed_capacity() {
    let cache = Arc::new(SharedLruCache::new(16).unwrap());
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let cache = Arc::clone(&cache);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let mut rng = rand::thread_rng();
                for _ in 0..1_000 {
                    let key = rng.gen_range(0..64u32);
                    if rng.gen_bool(0.5) {
                        cache.set(key, t);
                    } else {
                        cache.get(&key);
                    }
                    assert!(cache.len() <= 16);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let order = cache.recency_order();
    assert_eq!(order.len(), cache.len());
    let mut deduped = order.clone();
    deduped.sort_unstable();
    deduped.dedup();
    assert_eq!(deduped.len(), order.len());
}
