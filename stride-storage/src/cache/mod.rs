//! Cache tiers for the Stride fitness client.
//!
//! Three cache families share the persisted stores defined in [`traits`]:
//!
//! - **Images** flow through [`ReadThroughImageLoader`]: the bounded
//!   [`VolatileTierCache`] first, then a [`PersistentBlobStore`], then the
//!   network. Fetched bytes are turned into thumbnails and dominant colors by
//!   the [`DerivedValuePipeline`].
//! - **The exercise catalog** lives in a [`TtlExpiringCache`], where every
//!   bucket expires on one shared clock.
//! - **Domain snapshots** live in a [`LayeredDomainCache`]: memory first,
//!   persisted in the background, promoted back into memory after a restart.
//!
//! # Example
//!
//! ```ignore
//! let load = loader.load_url("https://cdn.example.com/squat.png").await?;
//! if load.was_network_fetch() {
//!     tracing::debug!("cold image");
//! }
//!
//! let exercises = catalog.catalog().await; // None once the hour is up
//!
//! domain.set(DomainSnapshot::capture(records, Utc::now()));
//! let snapshot = domain.get().await;
//! ```

pub mod blob_store;
pub mod domain;
pub mod http_fetcher;
pub mod image_loader;
pub mod kv_store;
pub mod lmdb_store;
pub mod pipeline;
pub mod pressure;
pub mod traits;
pub mod ttl;
pub mod volatile;

pub use blob_store::{FsBlobStore, InMemoryBlobStore};
pub use domain::{FitnessDomainCache, LayeredDomainCache};
pub use http_fetcher::HttpImageFetcher;
pub use image_loader::{ImageLoad, LoadSource, ReadThroughImageLoader};
pub use kv_store::InMemoryKvStore;
pub use lmdb_store::{LmdbKvError, LmdbKvStore};
pub use pipeline::{DerivedImage, DerivedValuePipeline, RawImage};
pub use pressure::{MemoryPressure, MemoryPressureListener};
pub use traits::{CachePayload, CacheStats, ImageFetcher, PersistentBlobStore, PersistentKvStore};
pub use ttl::{ExerciseCatalogCache, TtlExpiringCache, TtlWrite, CATALOG_NAMESPACE};
pub use volatile::VolatileTierCache;
