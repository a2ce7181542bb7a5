//! In-memory key-value store.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use stride_core::{CacheKey, RawContent, StoreError};

use super::traits::PersistentKvStore;

/// Map-backed [`PersistentKvStore`] for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct InMemoryKvStore {
    values: RwLock<HashMap<CacheKey, RawContent>>,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.values.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Overwrite a stored value directly, bypassing any cache on top.
    pub fn insert_raw(&self, key: CacheKey, value: RawContent) {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, value);
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }
}

#[async_trait]
impl PersistentKvStore for InMemoryKvStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<RawContent>, StoreError> {
        Ok(self
            .values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned())
    }

    async fn put(&self, key: &CacheKey, value: RawContent) -> Result<(), StoreError> {
        self.insert_raw(key.clone(), value);
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<bool, StoreError> {
        Ok(self
            .values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
            .is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_delete() {
        let store = InMemoryKvStore::new();
        let key = CacheKey::domain_snapshot();

        assert!(store.get(&key).await.expect("get should succeed").is_none());
        store
            .put(&key, b"{}".to_vec())
            .await
            .expect("put should succeed");
        assert_eq!(
            store.get(&key).await.expect("get should succeed"),
            Some(b"{}".to_vec())
        );

        assert!(store.delete(&key).await.expect("delete should succeed"));
        assert!(!store.delete(&key).await.expect("delete should succeed"));
        assert!(store.is_empty());
    }
}
