//! Persisted collections guarded by one shared expiration clock.
//!
//! Every bucket written through a [`TtlExpiringCache`] shares a single clock:
//! a `set` on any bucket rewrites that bucket and moves the clock to
//! `now + ttl`, and once the clock passes every bucket reads as absent.
//! Expired values are left in the store; they are overwritten by the next
//! `set` rather than deleted eagerly.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use stride_core::{
    CacheKey, Clock, Exercise, ExerciseSummary, RawContent, StoreError, Timestamp, TtlEnvelope,
};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::traits::{CachePayload, PersistentKvStore};

/// Namespace of the exercise catalog clock.
pub const CATALOG_NAMESPACE: &str = "catalog";

/// A set of bucket writes committed under one clock reset.
#[derive(Debug, Default)]
pub struct TtlWrite {
    buckets: Vec<(CacheKey, RawContent)>,
}

impl TtlWrite {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a bucket to the write, replacing its whole payload on commit.
    pub fn bucket<T>(mut self, key: &CacheKey, value: &T) -> Result<Self, StoreError>
    where
        T: Serialize + ?Sized,
    {
        let raw = serde_json::to_vec(value).map_err(|e| StoreError::SerializationFailed {
            key: key.clone(),
            reason: e.to_string(),
        })?;
        self.buckets.push((key.clone(), raw));
        Ok(self)
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

/// Generic TTL cache over a [`PersistentKvStore`].
pub struct TtlExpiringCache<K: PersistentKvStore> {
    store: Arc<K>,
    clock: Arc<dyn Clock>,
    clock_key: CacheKey,
    ttl: Duration,
    /// Serializes reads against multi-key writes so a reader never pairs a
    /// new clock with an old payload.
    guard: Mutex<()>,
}

impl<K: PersistentKvStore> TtlExpiringCache<K> {
    pub fn new(store: Arc<K>, clock: Arc<dyn Clock>, namespace: &str, ttl: Duration) -> Self {
        Self {
            store,
            clock,
            clock_key: CacheKey::ttl_clock(namespace),
            ttl,
            guard: Mutex::new(()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Current value of the shared expiration clock, valid or not.
    pub async fn expires_at(&self) -> Option<Timestamp> {
        let _guard = self.guard.lock().await;
        self.read_clock().await
    }

    /// Payload of `bucket` if the shared clock has not passed.
    pub async fn get<T: CachePayload>(&self, bucket: &CacheKey) -> Option<T> {
        let now = self.clock.now();
        let envelope = self.get_envelope::<T>(bucket).await?;
        let expires_at = envelope.expires_at;
        let payload = envelope.into_valid_payload(now);
        if payload.is_none() {
            debug!(key = %bucket, %expires_at, "TTL bucket expired");
        }
        payload
    }

    /// Payload of `bucket` together with the shared clock, ignoring expiry.
    pub async fn get_envelope<T: CachePayload>(&self, bucket: &CacheKey) -> Option<TtlEnvelope<T>> {
        let _guard = self.guard.lock().await;

        let expires_at = self.read_clock().await?;
        let raw = match self.store.get(bucket).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(key = %bucket, error = %e, "TTL bucket read failed, treating as miss");
                return None;
            }
        };

        match serde_json::from_slice::<T>(&raw) {
            Ok(payload) => Some(TtlEnvelope::new(payload, expires_at)),
            Err(e) => {
                let err = StoreError::DeserializationFailed {
                    key: bucket.clone(),
                    reason: e.to_string(),
                };
                debug!(error = %err, "Corrupt TTL bucket, treating as miss");
                None
            }
        }
    }

    /// Replace the payload of one bucket and restart the shared clock.
    pub async fn set<T>(&self, bucket: &CacheKey, value: &T) -> Result<Timestamp, StoreError>
    where
        T: Serialize + ?Sized,
    {
        self.commit(TtlWrite::new().bucket(bucket, value)?).await
    }

    /// Write every bucket in `write`, then restart the shared clock.
    ///
    /// Returns the new expiration time. If any write fails the shared clock
    /// is dropped before the error is returned, so every bucket in the
    /// namespace reads as absent until the next successful commit.
    pub async fn commit(&self, write: TtlWrite) -> Result<Timestamp, StoreError> {
        let now = self.clock.now();
        let expires_at = chrono::Duration::from_std(self.ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .ok_or_else(|| StoreError::SerializationFailed {
                key: self.clock_key.clone(),
                reason: format!("TTL {:?} overflows the clock", self.ttl),
            })?;
        let clock_raw =
            serde_json::to_vec(&expires_at).map_err(|e| StoreError::SerializationFailed {
                key: self.clock_key.clone(),
                reason: e.to_string(),
            })?;

        let _guard = self.guard.lock().await;
        if let Err(e) = self.write_all(write, clock_raw).await {
            warn!(clock = %self.clock_key, error = %e, "TTL commit failed, expiring namespace");
            if let Err(delete_err) = self.store.delete(&self.clock_key).await {
                warn!(clock = %self.clock_key, error = %delete_err, "Failed to drop TTL clock");
            }
            return Err(e);
        }

        debug!(clock = %self.clock_key, %expires_at, "TTL clock reset");
        Ok(expires_at)
    }

    async fn write_all(&self, write: TtlWrite, clock_raw: RawContent) -> Result<(), StoreError> {
        for (key, raw) in write.buckets {
            self.store.put(&key, raw).await?;
        }
        self.store.put(&self.clock_key, clock_raw).await
    }

    /// Expire every bucket at once by dropping the shared clock.
    pub async fn invalidate(&self) -> Result<(), StoreError> {
        let _guard = self.guard.lock().await;
        self.store.delete(&self.clock_key).await?;
        debug!(clock = %self.clock_key, "TTL clock invalidated");
        Ok(())
    }

    async fn read_clock(&self) -> Option<Timestamp> {
        let raw = match self.store.get(&self.clock_key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(key = %self.clock_key, error = %e, "TTL clock read failed, treating as miss");
                return None;
            }
        };
        match serde_json::from_slice::<Timestamp>(&raw) {
            Ok(expires_at) => Some(expires_at),
            Err(e) => {
                debug!(key = %self.clock_key, error = %e, "Corrupt TTL clock, treating as miss");
                None
            }
        }
    }
}

// ============================================================================
// EXERCISE CATALOG
// ============================================================================

/// The exercise catalog in its full and lightweight forms.
///
/// Both buckets share the catalog clock and expire together.
pub struct ExerciseCatalogCache<K: PersistentKvStore> {
    ttl: TtlExpiringCache<K>,
}

impl<K: PersistentKvStore> ExerciseCatalogCache<K> {
    pub fn new(store: Arc<K>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            ttl: TtlExpiringCache::new(store, clock, CATALOG_NAMESPACE, ttl),
        }
    }

    pub fn ttl_cache(&self) -> &TtlExpiringCache<K> {
        &self.ttl
    }

    pub async fn catalog(&self) -> Option<Vec<Exercise>> {
        self.ttl.get(&CacheKey::exercise_catalog()).await
    }

    pub async fn set_catalog(&self, exercises: &[Exercise]) -> Result<Timestamp, StoreError> {
        self.ttl.set(&CacheKey::exercise_catalog(), exercises).await
    }

    pub async fn light_catalog(&self) -> Option<Vec<ExerciseSummary>> {
        self.ttl.get(&CacheKey::light_exercise_catalog()).await
    }

    pub async fn set_light_catalog(
        &self,
        summaries: &[ExerciseSummary],
    ) -> Result<Timestamp, StoreError> {
        self.ttl
            .set(&CacheKey::light_exercise_catalog(), summaries)
            .await
    }

    /// Store the full catalog and its summaries under one clock reset.
    pub async fn set_catalog_with_light(
        &self,
        exercises: &[Exercise],
    ) -> Result<Timestamp, StoreError> {
        let summaries: Vec<ExerciseSummary> = exercises.iter().map(ExerciseSummary::from).collect();
        let write = TtlWrite::new()
            .bucket(&CacheKey::exercise_catalog(), exercises)?
            .bucket(&CacheKey::light_exercise_catalog(), &summaries)?;
        self.ttl.commit(write).await
    }

    pub async fn expires_at(&self) -> Option<Timestamp> {
        self.ttl.expires_at().await
    }

    pub async fn invalidate(&self) -> Result<(), StoreError> {
        self.ttl.invalidate().await
    }
}
