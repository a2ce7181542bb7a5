//! Cache keys.
//!
//! Every cacheable resource is addressed by a [`CacheKey`]. Keys are grouped in
//! families (images, weekly weights, catalogs, domain buckets) and each family
//! carries its own prefix, so two keys from different families can never be equal.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Weight of a cache entry against a total-cost budget.
///
/// For images this is the decoded byte footprint.
pub type CacheCost = usize;

const IMAGE_PREFIX: &str = "img:";
const WEIGHTS_PREFIX: &str = "weights:";
const CATALOG_PREFIX: &str = "catalog:";
const TTL_PREFIX: &str = "ttl:";
const DOMAIN_PREFIX: &str = "domain:";

/// Opaque, stable identity of a cacheable resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Wrap an already-formed key.
    ///
    /// Prefer the family constructors; this exists for keys read back from storage.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Key for a remote image, identified by its URL.
    pub fn image(url: &str) -> Self {
        Self(format!("{IMAGE_PREFIX}{url}"))
    }

    /// Key for one user's weight entries in an ISO week.
    pub fn weekly_weights(user_id: Uuid, iso_year: i32, iso_week: u32) -> Self {
        Self(format!("{WEIGHTS_PREFIX}{user_id}:{iso_year}-W{iso_week:02}"))
    }

    /// Sentinel key for the full exercise catalog.
    pub fn exercise_catalog() -> Self {
        Self(format!("{CATALOG_PREFIX}exercises"))
    }

    /// Sentinel key for the lightweight exercise catalog.
    pub fn light_exercise_catalog() -> Self {
        Self(format!("{CATALOG_PREFIX}exercises-light"))
    }

    /// Key of the shared expiration clock for a TTL namespace.
    pub fn ttl_clock(namespace: &str) -> Self {
        Self(format!("{TTL_PREFIX}{namespace}:expires_at"))
    }

    /// Key of the domain snapshot bucket.
    pub fn domain_snapshot() -> Self {
        Self(format!("{DOMAIN_PREFIX}snapshot"))
    }

    /// Key of the reference-data bucket (exercise list used by record screens).
    pub fn reference_data() -> Self {
        Self(format!("{DOMAIN_PREFIX}reference"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Filesystem-safe name for storing this key's blob on disk.
    ///
    /// Lowercase hex SHA-256 of the key, so URLs with slashes, query strings
    /// or unicode map to a flat, fixed-length name.
    pub fn blob_file_name(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.0.as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(500))]

        /// Image keys and weight keys never collide, whatever the URL.
        #[test]
        fn prop_image_keys_never_collide_with_weights(
            url in ".{0,64}",
            id in any::<[u8; 16]>(),
            year in 2000i32..2100,
            week in 1u32..54,
        ) {
            let image = CacheKey::image(&url);
            let weights = CacheKey::weekly_weights(Uuid::from_bytes(id), year, week);
            prop_assert_ne!(image, weights);
        }

        /// Distinct URLs produce distinct image keys and blob names.
        #[test]
        fn prop_distinct_urls_distinct_keys(a in "[a-z0-9/:.]{1,40}", b in "[a-z0-9/:.]{1,40}") {
            prop_assume!(a != b);
            let ka = CacheKey::image(&a);
            let kb = CacheKey::image(&b);
            prop_assert_ne!(ka.blob_file_name(), kb.blob_file_name());
            prop_assert_ne!(ka, kb);
        }
    }
}
