//! Tier and collaborator traits, plus cache statistics.
//!
//! This module defines the seams between the caches and the outside world:
//! durable byte storage, durable small-structure storage, and the network.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{de::DeserializeOwned, Serialize};
use stride_core::{CacheKey, FetchError, RawContent, StoreError};

/// Marker trait for values the persisted tiers can hold.
///
/// Anything serializable that can be shared across threads qualifies.
pub trait CachePayload: Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> CachePayload for T where T: Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Durable byte storage for image blobs.
///
/// No TTL and no eviction: a blob lives until it is overwritten, deleted,
/// or the store is cleared. Implementations must be safe to share across tasks.
#[async_trait]
pub trait PersistentBlobStore: Send + Sync {
    /// Get the blob stored under `key`, if any.
    async fn get(&self, key: &CacheKey) -> Result<Option<Bytes>, StoreError>;

    /// Store `bytes` under `key`, replacing any previous blob.
    async fn put(&self, key: &CacheKey, bytes: Bytes) -> Result<(), StoreError>;

    /// Remove the blob under `key`. Removing a missing blob is not an error.
    async fn delete(&self, key: &CacheKey) -> Result<(), StoreError>;

    /// Remove every blob, returning how many were removed.
    async fn clear(&self) -> Result<u64, StoreError>;
}

/// Durable storage for small serialized structures (envelopes, snapshots).
#[async_trait]
pub trait PersistentKvStore: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Result<Option<RawContent>, StoreError>;

    async fn put(&self, key: &CacheKey, value: RawContent) -> Result<(), StoreError>;

    /// Delete `key`, returning whether a value was present.
    async fn delete(&self, key: &CacheKey) -> Result<bool, StoreError>;
}

/// Network collaborator that resolves a locator (URL) to raw bytes.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch_bytes(&self, locator: &str) -> Result<Bytes, FetchError>;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of entries currently in cache.
    pub entry_count: u64,
    /// Approximate memory usage in bytes.
    pub memory_bytes: u64,
    /// Number of entries removed by the eviction policy or a purge.
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_stats_hit_rate() {
        let stats = CacheStats {
            hits: 80,
            misses: 20,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.8).abs() < 0.001);

        let empty_stats = CacheStats::default();
        assert!((empty_stats.hit_rate() - 0.0).abs() < 0.001);
    }
}
