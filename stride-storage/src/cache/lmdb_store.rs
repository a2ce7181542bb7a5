//! LMDB-backed key-value store.
//!
//! Uses the heed crate (Rust bindings for LMDB) to provide a memory-mapped
//! store for the small serialized structures the catalog and domain caches
//! persist: TTL clocks, catalog buckets and domain snapshots.
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions. The store uses:
//! - Read transactions for `get`
//! - Write transactions for `put`, `delete` and `clear`
//! - Statistics are tracked behind an `RwLock`

use std::path::Path;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use stride_core::{CacheKey, RawContent, StoreError};
use tracing::debug;

use super::traits::{CacheStats, PersistentKvStore};

/// Error type for LMDB store operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbKvError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbKvError> for StoreError {
    fn from(e: LmdbKvError) -> Self {
        StoreError::Backend {
            reason: e.to_string(),
        }
    }
}

/// LMDB-backed [`PersistentKvStore`].
///
/// # Example
///
/// ```ignore
/// use stride_storage::cache::{LmdbKvStore, PersistentKvStore};
/// use stride_core::CacheKey;
///
/// let store = LmdbKvStore::new("/tmp/stride-kv", 64)?;
/// store.put(&CacheKey::domain_snapshot(), bytes).await?;
/// let raw = store.get(&CacheKey::domain_snapshot()).await?;
/// ```
pub struct LmdbKvStore {
    env: Env,
    db: Database<Bytes, Bytes>,
    stats: RwLock<CacheStats>,
}

impl LmdbKvStore {
    /// Open (or create) an LMDB store.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be created
    /// - LMDB environment cannot be opened
    /// - Database cannot be created
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbKvError> {
        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment is opened once per directory by this process.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbKvError::EnvOpen(e.to_string()))?;

        let mut wtxn = env
            .write_txn()
            .map_err(|e| LmdbKvError::Transaction(e.to_string()))?;

        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbKvError::DbOpen(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbKvError::Transaction(e.to_string()))?;

        Ok(Self {
            env,
            db,
            stats: RwLock::new(CacheStats::default()),
        })
    }

    /// Remove every key, returning how many were removed.
    pub fn clear(&self) -> Result<u64, LmdbKvError> {
        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbKvError::Transaction(e.to_string()))?;

        let removed = self
            .db
            .len(&wtxn)
            .map_err(|e| LmdbKvError::Transaction(e.to_string()))?;
        self.db
            .clear(&mut wtxn)
            .map_err(|e| LmdbKvError::Transaction(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbKvError::Transaction(e.to_string()))?;

        self.stats_mut().entry_count = 0;
        debug!(removed, "LMDB store cleared");
        Ok(removed)
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn stats_mut(&self) -> std::sync::RwLockWriteGuard<'_, CacheStats> {
        self.stats.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl PersistentKvStore for LmdbKvStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<RawContent>, StoreError> {
        let read_failed = |e: heed::Error| StoreError::ReadFailed {
            key: key.clone(),
            reason: e.to_string(),
        };

        let rtxn = self.env.read_txn().map_err(read_failed)?;
        let value = self
            .db
            .get(&rtxn, key.as_str().as_bytes())
            .map_err(read_failed)?
            .map(<[u8]>::to_vec);

        let mut stats = self.stats_mut();
        if value.is_some() {
            stats.hits += 1;
        } else {
            stats.misses += 1;
        }
        Ok(value)
    }

    async fn put(&self, key: &CacheKey, value: RawContent) -> Result<(), StoreError> {
        let write_failed = |e: heed::Error| StoreError::PersistWriteFailed {
            key: key.clone(),
            reason: e.to_string(),
        };
        let encoded_key = key.as_str().as_bytes();

        let mut wtxn = self.env.write_txn().map_err(write_failed)?;
        let is_new = self
            .db
            .get(&wtxn, encoded_key)
            .map_err(write_failed)?
            .is_none();
        self.db
            .put(&mut wtxn, encoded_key, &value)
            .map_err(write_failed)?;
        wtxn.commit().map_err(write_failed)?;

        if is_new {
            self.stats_mut().entry_count += 1;
        }
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<bool, StoreError> {
        let write_failed = |e: heed::Error| StoreError::PersistWriteFailed {
            key: key.clone(),
            reason: e.to_string(),
        };

        let mut wtxn = self.env.write_txn().map_err(write_failed)?;
        let deleted = self
            .db
            .delete(&mut wtxn, key.as_str().as_bytes())
            .map_err(write_failed)?;
        wtxn.commit().map_err(write_failed)?;

        if deleted {
            let mut stats = self.stats_mut();
            stats.entry_count = stats.entry_count.saturating_sub(1);
        }
        Ok(deleted)
    }
}
