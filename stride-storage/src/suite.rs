//! Composition root wiring every cache to shared stores and settings.

use std::sync::Arc;

use stride_core::{CacheSettings, Clock, ConfigError, StoreError, StrideResult, SystemClock};
use tracing::info;

use crate::cache::{
    CacheStats, ExerciseCatalogCache, FitnessDomainCache, FsBlobStore, HttpImageFetcher,
    ImageFetcher, LmdbKvStore, MemoryPressure, PersistentBlobStore, PersistentKvStore,
    ReadThroughImageLoader, VolatileTierCache,
};

/// The production suite: files on disk, LMDB, and HTTP.
pub type DefaultCacheSuite = CacheSuite<FsBlobStore, LmdbKvStore, HttpImageFetcher>;

/// One instance of each cache, built from a single [`CacheSettings`].
///
/// The suite owns the volatile tier and subscribes it to its
/// [`MemoryPressure`] handle; hosts clone [`pressure`](Self::pressure) and
/// call `notify()` when the platform reports low memory.
pub struct CacheSuite<B, K, F>
where
    B: PersistentBlobStore + 'static,
    K: PersistentKvStore + 'static,
    F: ImageFetcher + 'static,
{
    settings: CacheSettings,
    memory: Arc<VolatileTierCache>,
    pressure: MemoryPressure,
    blobs: Arc<B>,
    kv: Arc<K>,
    images: ReadThroughImageLoader<B, F>,
    catalog: ExerciseCatalogCache<K>,
    domain: FitnessDomainCache<K>,
}

impl<B, K, F> CacheSuite<B, K, F>
where
    B: PersistentBlobStore + 'static,
    K: PersistentKvStore + 'static,
    F: ImageFetcher + 'static,
{
    /// Build every cache over the given collaborators.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `settings` fail validation.
    pub fn new(
        settings: CacheSettings,
        blobs: Arc<B>,
        kv: Arc<K>,
        fetcher: Arc<F>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        settings.validate()?;

        let memory = Arc::new(VolatileTierCache::from_settings(&settings));
        let pressure = MemoryPressure::new();
        pressure.subscribe(&memory);

        let images = ReadThroughImageLoader::from_settings(
            &settings,
            Arc::clone(&memory),
            Arc::clone(&blobs),
            fetcher,
        );
        let catalog = ExerciseCatalogCache::new(Arc::clone(&kv), clock, settings.catalog_ttl());
        let domain = FitnessDomainCache::<K>::new(Arc::clone(&kv));

        Ok(Self {
            settings,
            memory,
            pressure,
            blobs,
            kv,
            images,
            catalog,
            domain,
        })
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    pub fn images(&self) -> &ReadThroughImageLoader<B, F> {
        &self.images
    }

    pub fn catalog(&self) -> &ExerciseCatalogCache<K> {
        &self.catalog
    }

    pub fn domain(&self) -> &FitnessDomainCache<K> {
        &self.domain
    }

    pub fn memory(&self) -> &VolatileTierCache {
        &self.memory
    }

    /// Handle to the low-memory signal the volatile tier listens on.
    pub fn pressure(&self) -> MemoryPressure {
        self.pressure.clone()
    }

    pub fn blobs(&self) -> &B {
        &self.blobs
    }

    pub fn kv(&self) -> &K {
        &self.kv
    }

    pub fn memory_stats(&self) -> CacheStats {
        self.memory.stats()
    }

    /// Forget everything: images in both tiers, the catalog clock and both
    /// domain buckets.
    pub async fn clear_all(&self) -> StrideResult<()> {
        let purged = self.memory.purge();
        let blobs = self.blobs.clear().await?;
        self.catalog.invalidate().await?;
        self.domain.clear_all().await?;

        info!(purged, blobs, "All caches cleared");
        Ok(())
    }

    /// Wait for background writes before the process exits.
    pub async fn shutdown(&self) {
        self.domain.flush().await;
        info!("Cache suite shut down");
    }
}

impl CacheSuite<FsBlobStore, LmdbKvStore, HttpImageFetcher> {
    /// Open the production suite at the directories named in `settings`.
    pub fn open(settings: CacheSettings) -> StrideResult<Self> {
        settings.validate()?;

        let blobs = Arc::new(FsBlobStore::new(&settings.blob_dir));
        let kv = Arc::new(
            LmdbKvStore::new(&settings.kv_dir, settings.kv_map_size_mb).map_err(StoreError::from)?,
        );
        let fetcher = Arc::new(HttpImageFetcher::new(settings.fetch_timeout())?);

        info!(
            blob_dir = %settings.blob_dir.display(),
            kv_dir = %settings.kv_dir.display(),
            "Opening cache suite"
        );
        Ok(Self::new(settings, blobs, kv, fetcher, Arc::new(SystemClock))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{InMemoryBlobStore, InMemoryKvStore};
    use async_trait::async_trait;
    use bytes::Bytes;
    use image::{Rgba, RgbaImage};
    use std::time::Duration;
    use stride_core::{CacheKey, FetchError, StrideError};
    use tempfile::TempDir;

    // Fetcher serving one fixed PNG for any locator
    struct FixedFetcher(Bytes);

    #[async_trait]
    impl ImageFetcher for FixedFetcher {
        async fn fetch_bytes(&self, _locator: &str) -> Result<Bytes, FetchError> {
            Ok(self.0.clone())
        }
    }

    fn fixed_fetcher() -> Arc<FixedFetcher> {
        let image = RgbaImage::from_pixel(32, 32, Rgba([120, 30, 200, 255]));
        let png = crate::cache::DerivedValuePipeline::new(32, 32, 2)
            .encode_png(&image)
            .expect("encode should succeed");
        Arc::new(FixedFetcher(Bytes::from(png)))
    }

    fn in_memory_suite(
        settings: CacheSettings,
    ) -> CacheSuite<InMemoryBlobStore, InMemoryKvStore, FixedFetcher> {
        CacheSuite::new(
            settings,
            Arc::new(InMemoryBlobStore::new()),
            Arc::new(InMemoryKvStore::new()),
            fixed_fetcher(),
            Arc::new(SystemClock),
        )
        .expect("suite should build")
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let result = CacheSuite::new(
            CacheSettings::new().with_memory_limits(0, 1024),
            Arc::new(InMemoryBlobStore::new()),
            Arc::new(InMemoryKvStore::new()),
            fixed_fetcher(),
            Arc::new(SystemClock),
        );
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[tokio::test]
    async fn test_pressure_purges_suite_memory() {
        let suite = in_memory_suite(CacheSettings::default());
        suite
            .images()
            .load_url("https://cdn.example.com/a.png")
            .await
            .expect("load should succeed");
        assert_eq!(suite.memory().len(), 1);

        assert_eq!(suite.pressure().notify(), 1);
        assert!(suite.memory().is_empty());
    }

    #[tokio::test]
    async fn test_clear_all_empties_every_tier() {
        let suite = in_memory_suite(CacheSettings::default());
        let url = "https://cdn.example.com/b.png";
        suite.images().load_url(url).await.expect("load should succeed");
        suite
            .catalog()
            .set_catalog(&[])
            .await
            .expect("set should succeed");

        suite.clear_all().await.expect("clear should succeed");

        assert!(suite.memory().is_empty());
        assert!(!suite.blobs().contains(&CacheKey::image(url)));
        assert!(suite.catalog().catalog().await.is_none());
    }

    #[tokio::test]
    async fn test_open_default_suite_in_temp_dir() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let settings = CacheSettings::new()
            .with_storage_root(temp_dir.path())
            .with_fetch_timeout(Duration::from_secs(2));

        let suite = DefaultCacheSuite::open(settings).expect("suite should open");
        suite
            .catalog()
            .set_light_catalog(&[])
            .await
            .expect("set should succeed");
        assert_eq!(suite.catalog().light_catalog().await, Some(vec![]));
        assert!(temp_dir.path().join("kv").is_dir());
        suite.shutdown().await;
    }

    #[test]
    fn test_open_rejects_invalid_settings() {
        let settings = CacheSettings::new().with_catalog_ttl(Duration::ZERO);
        let err = DefaultCacheSuite::open(settings)
            .err()
            .expect("open should fail");
        assert!(matches!(err, StrideError::Config(_)));
    }
}
