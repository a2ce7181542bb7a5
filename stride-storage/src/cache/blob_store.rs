//! Blob store adapters: one file per key on disk, or a map in memory.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use stride_core::{CacheKey, StoreError};
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

use super::traits::PersistentBlobStore;

const TEMP_SUFFIX: &str = ".tmp";

// ============================================================================
// FILESYSTEM
// ============================================================================

/// Blob store keeping one file per key under a root directory.
///
/// File names are the SHA-256 of the key, so any URL maps to a safe name.
/// Writes go to a temporary sibling first and are renamed into place, so a
/// reader never observes a half-written blob.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Create a store rooted at `root`. The directory is created lazily on
    /// the first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.blob_file_name())
    }
}

#[async_trait]
impl PersistentBlobStore for FsBlobStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<Bytes>, StoreError> {
        match fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(Some(Bytes::from(bytes))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::ReadFailed {
                key: key.clone(),
                reason: e.to_string(),
            }),
        }
    }

    async fn put(&self, key: &CacheKey, bytes: Bytes) -> Result<(), StoreError> {
        let write_failed = |e: std::io::Error| StoreError::PersistWriteFailed {
            key: key.clone(),
            reason: e.to_string(),
        };

        fs::create_dir_all(&self.root).await.map_err(write_failed)?;

        let target = self.path_for(key);
        let temp = self
            .root
            .join(format!("{}-{}{}", key.blob_file_name(), Uuid::now_v7(), TEMP_SUFFIX));

        fs::write(&temp, &bytes).await.map_err(write_failed)?;
        if let Err(e) = fs::rename(&temp, &target).await {
            let _ = fs::remove_file(&temp).await;
            return Err(write_failed(e));
        }

        debug!(key = %key, bytes = bytes.len(), "Blob written");
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<(), StoreError> {
        match fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::PersistWriteFailed {
                key: key.clone(),
                reason: e.to_string(),
            }),
        }
    }

    async fn clear(&self) -> Result<u64, StoreError> {
        let backend = |e: std::io::Error| StoreError::Backend {
            reason: e.to_string(),
        };

        let mut dir = match fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(backend(e)),
        };

        let mut removed = 0u64;
        while let Some(item) = dir.next_entry().await.map_err(backend)? {
            if !item.file_type().await.map_err(backend)?.is_file() {
                continue;
            }
            let is_temp = item.file_name().to_string_lossy().ends_with(TEMP_SUFFIX);
            fs::remove_file(item.path()).await.map_err(backend)?;
            if !is_temp {
                removed += 1;
            }
        }

        debug!(root = %self.root.display(), removed, "Blob store cleared");
        Ok(removed)
    }
}

// ============================================================================
// IN-MEMORY
// ============================================================================

/// Map-backed blob store for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct InMemoryBlobStore {
    blobs: RwLock<HashMap<CacheKey, Bytes>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.blobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }
}

#[async_trait]
impl PersistentBlobStore for InMemoryBlobStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<Bytes>, StoreError> {
        Ok(self
            .blobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned())
    }

    async fn put(&self, key: &CacheKey, bytes: Bytes) -> Result<(), StoreError> {
        self.blobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.clone(), bytes);
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<(), StoreError> {
        self.blobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<u64, StoreError> {
        let mut blobs = self.blobs.write().unwrap_or_else(PoisonError::into_inner);
        let removed = blobs.len() as u64;
        blobs.clear();
        Ok(removed)
    }
}
