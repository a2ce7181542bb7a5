//! In-memory image tier bounded by entry count and total cost.
//!
//! Recency order comes from [`lru::LruCache`]; cost accounting sits on top of
//! it. Insertions that would breach either bound evict least recently used
//! entries first. The tier is never persisted and is emptied wholesale on a
//! memory pressure signal.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use lru::LruCache;
use stride_core::{CacheCost, CacheKey, CacheSettings, CachedImageEntry};
use tracing::{debug, info};

use super::pressure::MemoryPressureListener;
use super::traits::CacheStats;

struct Slot {
    entry: Arc<CachedImageEntry>,
    cost: CacheCost,
}

struct VolatileInner {
    entries: LruCache<CacheKey, Slot>,
    total_cost: CacheCost,
    stats: CacheStats,
}

/// Cost- and count-bounded in-memory cache of decoded images.
pub struct VolatileTierCache {
    inner: Mutex<VolatileInner>,
    max_entries: usize,
    max_total_cost: CacheCost,
}

impl VolatileTierCache {
    /// Create a cache with the given bounds.
    ///
    /// # Arguments
    ///
    /// * `max_entries` - Maximum number of entries (default policy: 50)
    /// * `max_total_cost` - Maximum summed cost (default policy: 20 MiB)
    pub fn new(max_entries: usize, max_total_cost: CacheCost) -> Self {
        Self {
            inner: Mutex::new(VolatileInner {
                entries: LruCache::unbounded(),
                total_cost: 0,
                stats: CacheStats::default(),
            }),
            max_entries,
            max_total_cost,
        }
    }

    pub fn from_settings(settings: &CacheSettings) -> Self {
        Self::new(settings.memory_max_entries, settings.memory_max_cost_bytes)
    }

    fn lock(&self) -> MutexGuard<'_, VolatileInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get an entry, marking it most recently used.
    pub fn get(&self, key: &CacheKey) -> Option<Arc<CachedImageEntry>> {
        let mut inner = self.lock();
        match inner.entries.get(key).map(|slot| Arc::clone(&slot.entry)) {
            Some(entry) => {
                inner.stats.hits += 1;
                Some(entry)
            }
            None => {
                inner.stats.misses += 1;
                None
            }
        }
    }

    /// Insert or replace an entry.
    ///
    /// Evicts least recently used entries until both bounds hold with the new
    /// entry included. An entry whose cost alone exceeds the cost bound is not
    /// admitted.
    pub fn put(&self, key: CacheKey, entry: Arc<CachedImageEntry>, cost: CacheCost) {
        if cost > self.max_total_cost || self.max_entries == 0 {
            debug!(
                key = %key,
                cost,
                max_total_cost = self.max_total_cost,
                "Entry exceeds volatile tier budget, not admitted"
            );
            return;
        }

        let mut inner = self.lock();

        if let Some(previous) = inner.entries.pop(&key) {
            inner.total_cost -= previous.cost;
        }

        while inner.entries.len() >= self.max_entries
            || inner.total_cost + cost > self.max_total_cost
        {
            match inner.entries.pop_lru() {
                Some((evicted_key, evicted)) => {
                    inner.total_cost -= evicted.cost;
                    inner.stats.evictions += 1;
                    debug!(key = %evicted_key, cost = evicted.cost, "Evicted from volatile tier");
                }
                None => break,
            }
        }

        inner.entries.put(key, Slot { entry, cost });
        inner.total_cost += cost;
    }

    /// Drop every entry immediately, regardless of bounds.
    pub fn purge(&self) -> usize {
        let mut inner = self.lock();
        let purged = inner.entries.len();
        inner.entries.clear();
        inner.total_cost = 0;
        inner.stats.evictions += purged as u64;
        drop(inner);

        info!(purged, "Purged volatile tier");
        purged
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.lock().entries.contains(key)
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Summed cost of all resident entries.
    pub fn total_cost(&self) -> CacheCost {
        self.lock().total_cost
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub fn max_total_cost(&self) -> CacheCost {
        self.max_total_cost
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        CacheStats {
            entry_count: inner.entries.len() as u64,
            memory_bytes: inner.total_cost as u64,
            ..inner.stats.clone()
        }
    }
}

impl MemoryPressureListener for VolatileTierCache {
    fn on_memory_pressure(&self) {
        self.purge();
    }
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        /// Property: after any sequence of puts, both bounds hold.
        #[test]
        fn prop_bounds_hold(
            max_entries in 1usize..8,
            max_cost in 1usize..500,
            ops in proptest::collection::vec((0usize..16, 1usize..200), 0..64),
        ) {
            let cache = VolatileTierCache::new(max_entries, max_cost);
            for (k, cost) in ops {
                let key = CacheKey::image(&format!("k{k}"));
                cache.put(key, Arc::new(CachedImageEntry::new(1, 1, vec![0; 4], vec![])), cost);
                prop_assert!(cache.len() <= max_entries);
                prop_assert!(cache.total_cost() <= max_cost);
            }
        }

        /// Property: an in-bounds put is immediately readable.
        #[test]
        fn prop_put_within_bounds_is_readable(k in 0usize..100, cost in 1usize..100, seed in any::<u8>()) {
            let cache = VolatileTierCache::new(50, 100);
            let key = CacheKey::image(&format!("k{k}"));
            let value = Arc::new(CachedImageEntry::new(1, 1, vec![seed; 4], vec![]));
            cache.put(key.clone(), Arc::clone(&value), cost);
            prop_assert_eq!(cache.get(&key), Some(value));
        }
    }
}
