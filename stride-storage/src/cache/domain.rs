//! Two-tier cache for domain snapshots and a companion reference bucket.
//!
//! Memory is authoritative for the life of the process. The persisted tier
//! only exists to survive a restart, so writes to it happen in the
//! background and their failures are logged, never returned.
//!
//! # Write generations
//!
//! Each bucket counts its memory mutations. A background write carries the
//! generation it was scheduled at and is dropped if the bucket has moved on
//! by the time it runs, which keeps an old write from landing after a newer
//! `set` or resurrecting a bucket that was invalidated.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use stride_core::{CacheKey, DomainSnapshot, ExerciseSummary, RawContent, StoreError};
use tokio::runtime::Handle;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use super::traits::{CachePayload, PersistentKvStore};

/// Domain cache specialised to the fitness client's payloads.
pub type FitnessDomainCache<K> = LayeredDomainCache<K, DomainSnapshot, Vec<ExerciseSummary>>;

struct Bucket<T> {
    key: CacheKey,
    memory: RwLock<Option<Arc<T>>>,
    generation: AtomicU64,
    /// Held by background writes and by deletes on this bucket's key.
    persist_lock: tokio::sync::Mutex<()>,
}

impl<T> Bucket<T> {
    fn new(key: CacheKey) -> Self {
        Self {
            key,
            memory: RwLock::new(None),
            generation: AtomicU64::new(0),
            persist_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn cached(&self) -> Option<Arc<T>> {
        self.memory
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the memory slot and return the new generation.
    fn replace(&self, value: Option<Arc<T>>) -> u64 {
        let mut slot = self.memory.write().unwrap_or_else(PoisonError::into_inner);
        *slot = value;
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}

/// Memory-first cache with background persistence.
///
/// # Type Parameters
///
/// - `K`: The persisted key-value store
/// - `S`: The snapshot payload, cleared by [`invalidate`](Self::invalidate)
/// - `R`: The reference payload, which has its own lifecycle
pub struct LayeredDomainCache<K, S, R>
where
    K: PersistentKvStore + 'static,
    S: CachePayload,
    R: CachePayload,
{
    store: Arc<K>,
    snapshot: Arc<Bucket<S>>,
    reference: Arc<Bucket<R>>,
    pending: Mutex<JoinSet<()>>,
}

impl<K, S, R> LayeredDomainCache<K, S, R>
where
    K: PersistentKvStore + 'static,
    S: CachePayload,
    R: CachePayload,
{
    /// Create a cache using the default snapshot and reference keys.
    pub fn new(store: Arc<K>) -> Self {
        Self::with_keys(store, CacheKey::domain_snapshot(), CacheKey::reference_data())
    }

    /// Create a cache over caller-chosen keys, e.g. one per user and week.
    pub fn with_keys(store: Arc<K>, snapshot_key: CacheKey, reference_key: CacheKey) -> Self {
        Self {
            store,
            snapshot: Arc::new(Bucket::new(snapshot_key)),
            reference: Arc::new(Bucket::new(reference_key)),
            pending: Mutex::new(JoinSet::new()),
        }
    }

    pub fn snapshot_key(&self) -> &CacheKey {
        &self.snapshot.key
    }

    pub fn reference_key(&self) -> &CacheKey {
        &self.reference.key
    }

    // ========================================================================
    // Snapshot bucket
    // ========================================================================

    /// Current snapshot, promoting it from the persisted tier on a memory miss.
    pub async fn get(&self) -> Option<Arc<S>> {
        self.get_bucket(&self.snapshot).await
    }

    /// Replace the snapshot. Memory is updated before this returns; the
    /// persisted copy is written in the background.
    pub fn set(&self, snapshot: S) -> Arc<S> {
        self.set_bucket(&self.snapshot, snapshot)
    }

    /// Clear the snapshot from both tiers. The reference bucket is untouched.
    pub async fn invalidate(&self) -> Result<(), StoreError> {
        self.invalidate_bucket(&self.snapshot).await
    }

    // ========================================================================
    // Reference bucket
    // ========================================================================

    pub async fn reference(&self) -> Option<Arc<R>> {
        self.get_bucket(&self.reference).await
    }

    pub fn set_reference(&self, reference: R) -> Arc<R> {
        self.set_bucket(&self.reference, reference)
    }

    pub async fn invalidate_reference(&self) -> Result<(), StoreError> {
        self.invalidate_bucket(&self.reference).await
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Clear both buckets from both tiers.
    pub async fn clear_all(&self) -> Result<(), StoreError> {
        let snapshot = self.invalidate_bucket(&self.snapshot).await;
        let reference = self.invalidate_bucket(&self.reference).await;
        snapshot.and(reference)
    }

    /// Drop the memory tier only, then wait for pending writes.
    ///
    /// Writes scheduled before the call have landed when this returns, so the
    /// next `get` promotes the latest value rather than an older persisted one.
    pub async fn discard_memory(&self) {
        *self
            .snapshot
            .memory
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
        *self
            .reference
            .memory
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
        self.flush().await;
        debug!(key = %self.snapshot.key, "Domain cache memory discarded");
    }

    /// Number of background writes not yet reaped.
    pub fn pending_writes(&self) -> usize {
        self.pending_lock().len()
    }

    /// Wait for every scheduled background write to finish.
    ///
    /// Dropping the cache aborts writes that are still pending, so call this
    /// before teardown.
    pub async fn flush(&self) {
        let mut pending = std::mem::take(&mut *self.pending_lock());
        while let Some(result) = pending.join_next().await {
            if let Err(e) = result {
                warn!(error = %e, "Background persist task did not complete");
            }
        }
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn pending_lock(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn get_bucket<T: CachePayload>(&self, bucket: &Bucket<T>) -> Option<Arc<T>> {
        if let Some(value) = bucket.cached() {
            debug!(key = %bucket.key, "Domain cache memory hit");
            return Some(value);
        }

        let generation = bucket.current_generation();
        let raw = match self.store.get(&bucket.key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!(key = %bucket.key, "Domain cache miss");
                return None;
            }
            Err(e) => {
                warn!(key = %bucket.key, error = %e, "Persisted read failed, treating as miss");
                return None;
            }
        };

        let value = match serde_json::from_slice::<T>(&raw) {
            Ok(value) => Arc::new(value),
            Err(e) => {
                let err = StoreError::DeserializationFailed {
                    key: bucket.key.clone(),
                    reason: e.to_string(),
                };
                warn!(error = %err, "Corrupt persisted value, treating as miss");
                return None;
            }
        };

        let mut slot = bucket
            .memory
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if bucket.current_generation() != generation {
            // A set or invalidate raced with the read; memory wins.
            return slot.clone();
        }
        if slot.is_none() {
            *slot = Some(value);
            debug!(key = %bucket.key, "Promoted persisted value into memory");
        }
        slot.clone()
    }

    fn set_bucket<T: CachePayload>(&self, bucket: &Arc<Bucket<T>>, value: T) -> Arc<T> {
        let value = Arc::new(value);
        let generation = bucket.replace(Some(Arc::clone(&value)));

        match serde_json::to_vec(&*value) {
            Ok(raw) => self.schedule_persist(bucket, generation, raw),
            Err(e) => {
                let err = StoreError::SerializationFailed {
                    key: bucket.key.clone(),
                    reason: e.to_string(),
                };
                warn!(error = %err, "Value kept in memory only");
            }
        }
        value
    }

    fn schedule_persist<T: CachePayload>(
        &self,
        bucket: &Arc<Bucket<T>>,
        generation: u64,
        raw: RawContent,
    ) {
        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!(key = %bucket.key, "No async runtime, value kept in memory only");
                return;
            }
        };

        let store = Arc::clone(&self.store);
        let bucket = Arc::clone(bucket);
        let write = async move {
            let _guard = bucket.persist_lock.lock().await;
            if bucket.current_generation() != generation {
                debug!(key = %bucket.key, generation, "Superseded background write skipped");
                return;
            }
            match store.put(&bucket.key, raw).await {
                Ok(()) => debug!(key = %bucket.key, generation, "Persisted in background"),
                Err(e) => warn!(key = %bucket.key, error = %e, "Background persist failed"),
            }
        };

        let mut pending = self.pending_lock();
        while pending.try_join_next().is_some() {}
        pending.spawn_on(write, &handle);
    }

    async fn invalidate_bucket<T: CachePayload>(&self, bucket: &Bucket<T>) -> Result<(), StoreError> {
        bucket.replace(None);
        let _guard = bucket.persist_lock.lock().await;
        self.store.delete(&bucket.key).await?;
        debug!(key = %bucket.key, "Domain cache bucket invalidated");
        Ok(())
    }
}
