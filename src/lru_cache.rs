//! # LRU Cache
//!
//! A bounded Least Recently Used (LRU) cache, plus a thread-safe wrapper.
//! Used to memoize expensive external lookups such as attribute-provider
//! queries keyed by step geometry.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::{ComfortError, Result};

/// A simple LRU cache with O(n) eviction.
///
/// Every entry carries a recency rank taken from a monotonic access counter.
/// For the capacities used here (a few hundred entries) the linear scan for
/// eviction is acceptable and simpler than maintaining a linked list.
#[derive(Debug)]
pub struct LruCache<K, V> {
    capacity: usize,
    entries: HashMap<K, CacheEntry<V>>,
    access_counter: u64,
}

#[derive(Debug)]
struct CacheEntry<V> {
    value: V,
    last_access: u64,
}

impl<K: Eq + Hash + Clone, V: Clone> LruCache<K, V> {
    /// Create a new LRU cache with the given capacity.
    ///
    /// A zero capacity is a programming error and is rejected.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(ComfortError::invalid_config(
                "capacity",
                "cache capacity must be at least 1",
            ));
        }
        Ok(Self {
            capacity,
            entries: HashMap::with_capacity(capacity),
            access_counter: 0,
        })
    }

    /// Create a cache, raising a zero capacity to one.
    pub(crate) fn with_min_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity),
            access_counter: 0,
        }
    }

    fn touch(&mut self) -> u64 {
        self.access_counter += 1;
        self.access_counter
    }

    /// Get a value from the cache, promoting it to most-recently-used.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let rank = self.access_counter + 1;
        match self.entries.get_mut(key) {
            Some(entry) => {
                entry.last_access = rank;
                self.access_counter = rank;
                Some(&entry.value)
            }
            None => None,
        }
    }

    /// Get a value without changing its recency.
    pub fn peek(&self, key: &K) -> Option<&V> {
        self.entries.get(key).map(|entry| &entry.value)
    }

    /// Insert or update a value, promoting it to most-recently-used.
    ///
    /// When a new key would exceed capacity, the least recently used entry is
    /// evicted first and returned.
    pub fn set(&mut self, key: K, value: V) -> Option<(K, V)> {
        let rank = self.touch();

        // If key exists, just update it
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.value = value;
            entry.last_access = rank;
            return None;
        }

        let evicted = if self.entries.len() >= self.capacity {
            self.evict_oldest()
        } else {
            None
        };

        self.entries.insert(
            key,
            CacheEntry {
                value,
                last_access: rank,
            },
        );
        evicted
    }

    /// Remove a specific key from the cache.
    pub fn invalidate(&mut self, key: &K) -> Option<V> {
        self.entries.remove(key).map(|entry| entry.value)
    }

    /// Clear all entries from the cache.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.access_counter = 0;
    }

    /// Get the number of entries in the cache.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Check if the cache contains a key (does not affect recency).
    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Keys ordered from least to most recently used.
    pub fn recency_order(&self) -> Vec<K> {
        let mut ranked: Vec<(&K, u64)> = self
            .entries
            .iter()
            .map(|(k, entry)| (k, entry.last_access))
            .collect();
        ranked.sort_by_key(|(_, rank)| *rank);
        ranked.into_iter().map(|(k, _)| k.clone()).collect()
    }

    /// The most recently used key, if any.
    pub fn most_recent(&self) -> Option<K> {
        self.entries
            .iter()
            .max_by_key(|(_, entry)| entry.last_access)
            .map(|(k, _)| k.clone())
    }

    /// Evict the least recently used entry.
    fn evict_oldest(&mut self) -> Option<(K, V)> {
        let oldest_key = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_access)
            .map(|(k, _)| k.clone())?;

        self.entries
            .remove(&oldest_key)
            .map(|entry| (oldest_key, entry.value))
    }
}

/// Thread-safe LRU cache.
///
/// All reads and writes go through a single mutex, so every recency update is
/// applied atomically and the final order is a valid linearization of the
/// interleaved calls. Values are returned by clone.
#[derive(Debug)]
pub struct SharedLruCache<K, V> {
    inner: Mutex<LruCache<K, V>>,
}

impl<K: Eq + Hash + Clone, V: Clone> SharedLruCache<K, V> {
    pub fn new(capacity: usize) -> Result<Self> {
        Ok(Self {
            inner: Mutex::new(LruCache::new(capacity)?),
        })
    }

    pub(crate) fn with_min_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(LruCache::with_min_capacity(capacity)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<K, V>> {
        // The cache holds no invariants a panicking caller could break mid-update
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get a cloned value, promoting the key.
    pub fn get(&self, key: &K) -> Option<V> {
        self.lock().get(key).cloned()
    }

    /// Insert or update a value, promoting the key. Returns the evicted entry.
    pub fn set(&self, key: K, value: V) -> Option<(K, V)> {
        self.lock().set(key, value)
    }

    /// Return the cached value or compute and insert it.
    ///
    /// `compute` runs outside the lock, so two racing callers may both compute;
    /// the last write wins and both see a valid value.
    pub fn get_or_insert_with<F>(&self, key: K, compute: F) -> V
    where
        F: FnOnce() -> V,
    {
        if let Some(value) = self.get(&key) {
            return value;
        }
        let value = compute();
        self.set(key, value.clone());
        value
    }

    pub fn invalidate(&self, key: &K) -> Option<V> {
        self.lock().invalidate(key)
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.lock().contains(key)
    }

    /// Keys ordered from least to most recently used (consistent snapshot).
    pub fn recency_order(&self) -> Vec<K> {
        self.lock().recency_order()
    }

    pub fn most_recent(&self) -> Option<K> {
        self.lock().most_recent()
    }
}
