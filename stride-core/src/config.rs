//! Cache settings
//!
//! Settings are loaded from environment variables or a TOML document, with
//! defaults matching the observed client policy (50 images / 20 MiB in memory,
//! 200×200 thumbnails, two dominant colors, one-hour catalog TTL).

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{CacheCost, ConfigError};

const MIB: usize = 1024 * 1024;

/// Settings shared by every cache built by the storage crate's `CacheSuite`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    // ========================================================================
    // Volatile tier
    // ========================================================================
    /// Maximum number of decoded images held in memory.
    pub memory_max_entries: usize,

    /// Maximum total decoded byte size held in memory.
    pub memory_max_cost_bytes: CacheCost,

    // ========================================================================
    // Derived value pipeline
    // ========================================================================
    pub image_target_width: u32,
    pub image_target_height: u32,

    /// How many dominant colors to extract per image.
    pub dominant_color_count: usize,

    // ========================================================================
    // TTL & network
    // ========================================================================
    /// Lifetime of the exercise catalog, in milliseconds.
    pub catalog_ttl_ms: u64,

    /// Upper bound on a single image fetch, in milliseconds.
    pub fetch_timeout_ms: u64,

    // ========================================================================
    // Persisted tiers
    // ========================================================================
    /// Directory holding one file per cached image.
    pub blob_dir: PathBuf,

    /// Directory of the LMDB environment for small serialized structures.
    pub kv_dir: PathBuf,

    /// LMDB map size in megabytes.
    pub kv_map_size_mb: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            memory_max_entries: 50,
            memory_max_cost_bytes: 20 * MIB,
            image_target_width: 200,
            image_target_height: 200,
            dominant_color_count: 2,
            catalog_ttl_ms: 60 * 60 * 1000,
            fetch_timeout_ms: 30 * 1000,
            blob_dir: PathBuf::from("cache/images"),
            kv_dir: PathBuf::from("cache/kv"),
            kv_map_size_mb: 64,
        }
    }
}

impl CacheSettings {
    /// Create settings with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create CacheSettings from environment variables.
    ///
    /// Environment variables (unset or unparsable values keep the default):
    /// - `STRIDE_MEMORY_MAX_ENTRIES` (default: 50)
    /// - `STRIDE_MEMORY_MAX_COST_BYTES` (default: 20971520)
    /// - `STRIDE_IMAGE_TARGET_WIDTH` / `STRIDE_IMAGE_TARGET_HEIGHT` (default: 200)
    /// - `STRIDE_DOMINANT_COLOR_COUNT` (default: 2)
    /// - `STRIDE_CATALOG_TTL_MS` (default: 3600000)
    /// - `STRIDE_FETCH_TIMEOUT_MS` (default: 30000)
    /// - `STRIDE_BLOB_DIR` (default: cache/images)
    /// - `STRIDE_KV_DIR` (default: cache/kv)
    /// - `STRIDE_KV_MAP_SIZE_MB` (default: 64)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            memory_max_entries: env_parse("STRIDE_MEMORY_MAX_ENTRIES")
                .unwrap_or(defaults.memory_max_entries),
            memory_max_cost_bytes: env_parse("STRIDE_MEMORY_MAX_COST_BYTES")
                .unwrap_or(defaults.memory_max_cost_bytes),
            image_target_width: env_parse("STRIDE_IMAGE_TARGET_WIDTH")
                .unwrap_or(defaults.image_target_width),
            image_target_height: env_parse("STRIDE_IMAGE_TARGET_HEIGHT")
                .unwrap_or(defaults.image_target_height),
            dominant_color_count: env_parse("STRIDE_DOMINANT_COLOR_COUNT")
                .unwrap_or(defaults.dominant_color_count),
            catalog_ttl_ms: env_parse("STRIDE_CATALOG_TTL_MS")
                .unwrap_or(defaults.catalog_ttl_ms),
            fetch_timeout_ms: env_parse("STRIDE_FETCH_TIMEOUT_MS")
                .unwrap_or(defaults.fetch_timeout_ms),
            blob_dir: std::env::var("STRIDE_BLOB_DIR")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.blob_dir),
            kv_dir: std::env::var("STRIDE_KV_DIR")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.kv_dir),
            kv_map_size_mb: env_parse("STRIDE_KV_MAP_SIZE_MB")
                .unwrap_or(defaults.kv_map_size_mb),
        }
    }

    /// Parse settings from a TOML document. Missing keys take defaults.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let settings: Self = toml::from_str(input).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject settings that would make a cache unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_zero = [
            ("memory_max_entries", self.memory_max_entries as u64),
            ("memory_max_cost_bytes", self.memory_max_cost_bytes as u64),
            ("image_target_width", u64::from(self.image_target_width)),
            ("image_target_height", u64::from(self.image_target_height)),
            ("catalog_ttl_ms", self.catalog_ttl_ms),
            ("fetch_timeout_ms", self.fetch_timeout_ms),
            ("kv_map_size_mb", self.kv_map_size_mb as u64),
        ];

        for (field, value) in non_zero {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    value: value.to_string(),
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn catalog_ttl(&self) -> Duration {
        Duration::from_millis(self.catalog_ttl_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    /// Set the in-memory bounds.
    pub fn with_memory_limits(mut self, max_entries: usize, max_cost_bytes: CacheCost) -> Self {
        self.memory_max_entries = max_entries;
        self.memory_max_cost_bytes = max_cost_bytes;
        self
    }

    /// Set the thumbnail footprint images are resized to.
    pub fn with_image_target(mut self, width: u32, height: u32) -> Self {
        self.image_target_width = width;
        self.image_target_height = height;
        self
    }

    pub fn with_dominant_colors(mut self, count: usize) -> Self {
        self.dominant_color_count = count;
        self
    }

    /// Set the catalog TTL. Sub-millisecond precision is dropped.
    pub fn with_catalog_ttl(mut self, ttl: Duration) -> Self {
        self.catalog_ttl_ms = whole_millis(ttl);
        self
    }

    /// Set the fetch timeout. Sub-millisecond precision is dropped.
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout_ms = whole_millis(timeout);
        self
    }

    /// Point both persisted tiers below `root`.
    pub fn with_storage_root(mut self, root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        self.blob_dir = root.join("images");
        self.kv_dir = root.join("kv");
        self
    }
}

fn whole_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_client_policy() {
        let settings = CacheSettings::default();
        assert_eq!(settings.memory_max_entries, 50);
        assert_eq!(settings.memory_max_cost_bytes, 20 * 1024 * 1024);
        assert_eq!(
            (settings.image_target_width, settings.image_target_height),
            (200, 200)
        );
        assert_eq!(settings.dominant_color_count, 2);
        assert_eq!(settings.catalog_ttl(), Duration::from_secs(3600));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let settings = CacheSettings::new()
            .with_memory_limits(10, 4096)
            .with_image_target(64, 32)
            .with_dominant_colors(3)
            .with_catalog_ttl(Duration::from_secs(120))
            .with_fetch_timeout(Duration::from_secs(5))
            .with_storage_root("/tmp/stride");

        assert_eq!(settings.memory_max_entries, 10);
        assert_eq!(settings.memory_max_cost_bytes, 4096);
        assert_eq!(settings.image_target_width, 64);
        assert_eq!(settings.image_target_height, 32);
        assert_eq!(settings.dominant_color_count, 3);
        assert_eq!(settings.catalog_ttl_ms, 120_000);
        assert_eq!(settings.fetch_timeout(), Duration::from_secs(5));
        assert_eq!(settings.blob_dir, PathBuf::from("/tmp/stride/images"));
        assert_eq!(settings.kv_dir, PathBuf::from("/tmp/stride/kv"));
    }

    #[test]
    fn test_from_toml_partial_document() {
        let settings = CacheSettings::from_toml_str(
            r#"
            memory_max_entries = 12
            catalog_ttl_ms = 600000
            blob_dir = "/var/cache/stride/images"
            "#,
        )
        .expect("settings should parse");

        assert_eq!(settings.memory_max_entries, 12);
        assert_eq!(settings.catalog_ttl(), Duration::from_secs(600));
        assert_eq!(settings.blob_dir, PathBuf::from("/var/cache/stride/images"));
        assert_eq!(settings.dominant_color_count, 2);
    }

    #[test]
    fn test_from_toml_rejects_zero_bound() {
        let err = CacheSettings::from_toml_str("memory_max_cost_bytes = 0")
            .expect_err("zero cost bound should be rejected");
        assert!(matches!(
            err,
            ConfigError::InvalidValue { ref field, .. } if field == "memory_max_cost_bytes"
        ));
    }

    #[test]
    fn test_from_toml_rejects_garbage() {
        let err = CacheSettings::from_toml_str("memory_max_entries = \"lots\"")
            .expect_err("wrong type should be rejected");
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_sub_second_durations_survive_builders() {
        let settings = CacheSettings::new()
            .with_fetch_timeout(Duration::from_millis(500))
            .with_catalog_ttl(Duration::from_millis(1500));

        assert_eq!(settings.fetch_timeout(), Duration::from_millis(500));
        assert_eq!(settings.catalog_ttl(), Duration::from_millis(1500));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_sub_millisecond_timeout_is_rejected() {
        let settings = CacheSettings::new().with_fetch_timeout(Duration::from_micros(10));
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "fetch_timeout_ms"
        ));
    }
}
