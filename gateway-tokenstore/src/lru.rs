//! Bounded local LRU cache for hot token metadata.
//!
//! Built directly on `dashmap` — no extra LRU crate. Eviction picks the
//! least recently touched entry; with `local_lru_size` in the low thousands
//! (the intended range) a linear scan over entries on eviction is cheap
//! relative to the cache-miss cost it avoids.

use dashmap::DashMap;
use gateway_core::RoutingMetadata;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

struct Entry {
    value: RoutingMetadata,
    last_touched: u64,
}

/// A capacity-bounded, thread-safe LRU cache keyed by hashed token.
#[derive(Clone)]
pub struct LocalLru {
    inner: Arc<DashMap<String, Entry>>,
    capacity: usize,
    clock: Arc<AtomicU64>,
}

impl LocalLru {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(DashMap::with_capacity(capacity)),
            capacity: capacity.max(1),
            clock: Arc::new(AtomicU64::new(0)),
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    pub fn get(&self, key: &str) -> Option<RoutingMetadata> {
        let tick = self.tick();
        let mut entry = self.inner.get_mut(key)?;
        entry.last_touched = tick;
        Some(entry.value.clone())
    }

    pub fn insert(&self, key: String, value: RoutingMetadata) {
        let tick = self.tick();
        if !self.inner.contains_key(&key) && self.inner.len() >= self.capacity {
            self.evict_one();
        }
        self.inner.insert(
            key,
            Entry {
                value,
                last_touched: tick,
            },
        );
    }

    pub fn remove(&self, key: &str) {
        self.inner.remove(key);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    fn evict_one(&self) {
        let oldest = self
            .inner
            .iter()
            .min_by_key(|entry| entry.value().last_touched)
            .map(|entry| entry.key().clone());
        if let Some(key) = oldest {
            self.inner.remove(&key);
        }
    }
}
