//! Stride Storage - Cache Tiers and Orchestration
//!
//! Image, catalog and domain caches for the Stride fitness client, the
//! persisted stores they sit on, and the [`CacheSuite`] that wires them
//! together from one [`stride_core::CacheSettings`].

pub mod cache;
pub mod suite;
pub mod telemetry;

pub use cache::{
    CachePayload, CacheStats, DerivedImage, DerivedValuePipeline, ExerciseCatalogCache,
    FitnessDomainCache, FsBlobStore, HttpImageFetcher, ImageFetcher, ImageLoad, InMemoryBlobStore,
    InMemoryKvStore, LayeredDomainCache, LmdbKvError, LmdbKvStore, LoadSource, MemoryPressure,
    MemoryPressureListener, PersistentBlobStore, PersistentKvStore, ReadThroughImageLoader,
    TtlExpiringCache, TtlWrite, VolatileTierCache,
};
pub use suite::{CacheSuite, DefaultCacheSuite};
pub use telemetry::{init_tracing, TelemetryError};
