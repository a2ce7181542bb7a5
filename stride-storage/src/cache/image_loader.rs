//! Read-through image loader.
//!
//! Routes each load through the tiers in order: volatile memory, the durable
//! blob store, then the network. Whatever tier answers, the caller gets the
//! same decoded [`CachedImageEntry`] plus a note of where it came from.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use stride_core::{
    CacheKey, CacheSettings, CachedImageEntry, FetchError, PipelineError, StrideError,
    StrideResult,
};
use tokio::task;
use tracing::{debug, warn};

use super::pipeline::{DerivedImage, DerivedValuePipeline};
use super::traits::{ImageFetcher, PersistentBlobStore};
use super::volatile::VolatileTierCache;

/// Which tier answered a load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadSource {
    /// Served from the volatile tier without I/O.
    Memory,
    /// Rebuilt from the blob store.
    Disk,
    /// Fetched, derived and written to both tiers.
    Network,
}

/// A loaded image with its provenance.
#[derive(Debug, Clone)]
pub struct ImageLoad {
    pub entry: Arc<CachedImageEntry>,
    pub source: LoadSource,
}

impl ImageLoad {
    pub fn was_network_fetch(&self) -> bool {
        self.source == LoadSource::Network
    }

    pub fn into_entry(self) -> Arc<CachedImageEntry> {
        self.entry
    }
}

/// Three-tier read-through loader for remote images.
///
/// # Type Parameters
///
/// - `B`: The durable blob store (second tier)
/// - `F`: The network collaborator consulted on a full miss
///
/// Concurrent loads of the same missing key are not coalesced; each performs
/// its own fetch and the last write wins in both tiers.
pub struct ReadThroughImageLoader<B, F>
where
    B: PersistentBlobStore,
    F: ImageFetcher,
{
    memory: Arc<VolatileTierCache>,
    blobs: Arc<B>,
    fetcher: Arc<F>,
    pipeline: DerivedValuePipeline,
    fetch_timeout: Duration,
}

impl<B, F> ReadThroughImageLoader<B, F>
where
    B: PersistentBlobStore,
    F: ImageFetcher,
{
    pub fn new(
        memory: Arc<VolatileTierCache>,
        blobs: Arc<B>,
        fetcher: Arc<F>,
        pipeline: DerivedValuePipeline,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            memory,
            blobs,
            fetcher,
            pipeline,
            fetch_timeout,
        }
    }

    /// Build a loader whose pipeline and timeout come from `settings`.
    pub fn from_settings(
        settings: &CacheSettings,
        memory: Arc<VolatileTierCache>,
        blobs: Arc<B>,
        fetcher: Arc<F>,
    ) -> Self {
        Self::new(
            memory,
            blobs,
            fetcher,
            DerivedValuePipeline::from_settings(settings),
            settings.fetch_timeout(),
        )
    }

    pub fn memory(&self) -> &VolatileTierCache {
        &self.memory
    }

    pub fn blobs(&self) -> &B {
        &self.blobs
    }

    pub fn pipeline(&self) -> &DerivedValuePipeline {
        &self.pipeline
    }

    /// Load the image at `url` under its canonical image key.
    pub async fn load_url(&self, url: &str) -> StrideResult<ImageLoad> {
        self.load(&CacheKey::image(url), url).await
    }

    /// Resolve `key`, fetching from `locator` only when neither tier has it.
    ///
    /// # Errors
    ///
    /// Returns [`StrideError::LoadFailed`] when the fetch fails, times out or
    /// yields bytes that do not decode. No tier is populated in that case and
    /// nothing is retried. A failed write to the blob store does not fail the
    /// load.
    pub async fn load(&self, key: &CacheKey, locator: &str) -> StrideResult<ImageLoad> {
        // Tier 1
        if let Some(entry) = self.memory.get(key) {
            debug!(key = %key, "Image served from memory");
            return Ok(ImageLoad {
                entry,
                source: LoadSource::Memory,
            });
        }

        // Tier 2
        if let Some(entry) = self.load_from_blobs(key).await {
            let entry = Arc::new(entry);
            self.memory
                .put(key.clone(), Arc::clone(&entry), entry.byte_footprint());
            debug!(key = %key, "Image restored from blob store");
            return Ok(ImageLoad {
                entry,
                source: LoadSource::Disk,
            });
        }

        // Network
        let bytes = self.fetch(locator).await.map_err(|e| {
            warn!(key = %key, locator, error = %e, "Image fetch failed");
            StrideError::load_failed(key, e)
        })?;

        let pipeline = self.pipeline;
        let DerivedImage { entry, encoded } = run_blocking(move || pipeline.derive(&bytes))
            .await
            .map_err(|e| {
                warn!(key = %key, locator, error = %e, "Fetched image could not be derived");
                StrideError::load_failed(key, e)
            })?;

        let entry = Arc::new(entry);
        self.memory
            .put(key.clone(), Arc::clone(&entry), entry.byte_footprint());

        if let Err(e) = self.blobs.put(key, Bytes::from(encoded)).await {
            warn!(key = %key, error = %e, "Failed to persist image blob");
        }

        debug!(key = %key, "Image fetched from network");
        Ok(ImageLoad {
            entry,
            source: LoadSource::Network,
        })
    }

    /// Second-tier lookup. Read errors and undecodable blobs count as a miss.
    async fn load_from_blobs(&self, key: &CacheKey) -> Option<CachedImageEntry> {
        let bytes = match self.blobs.get(key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                warn!(key = %key, error = %e, "Blob store read failed, treating as miss");
                return None;
            }
        };

        let pipeline = self.pipeline;
        match run_blocking(move || pipeline.features_from_stored(&bytes)).await {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(key = %key, error = %e, "Stored blob no longer decodes, treating as miss");
                None
            }
        }
    }

    async fn fetch(&self, locator: &str) -> Result<Bytes, FetchError> {
        match tokio::time::timeout(self.fetch_timeout, self.fetcher.fetch_bytes(locator)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout {
                after: self.fetch_timeout,
            }),
        }
    }
}

/// Run CPU-bound pipeline work on the blocking pool.
async fn run_blocking<T, W>(work: W) -> Result<T, PipelineError>
where
    W: FnOnce() -> Result<T, PipelineError> + Send + 'static,
    T: Send + 'static,
{
    task::spawn_blocking(work)
        .await
        .map_err(|e| PipelineError::DecodeFailed {
            reason: format!("pipeline task failed: {}", e),
        })?
}

impl<B, F> Clone for ReadThroughImageLoader<B, F>
where
    B: PersistentBlobStore,
    F: ImageFetcher,
{
    fn clone(&self) -> Self {
        Self {
            memory: Arc::clone(&self.memory),
            blobs: Arc::clone(&self.blobs),
            fetcher: Arc::clone(&self.fetcher),
            pipeline: self.pipeline,
            fetch_timeout: self.fetch_timeout,
        }
    }
}
