//! Stride Core - Cache Data Types
//!
//! Pure data structures shared by every cache tier. All other crates depend on this.
//! This crate performs no I/O: keys, entries, envelopes, snapshots, the error
//! taxonomy, settings and the clock abstraction live here.

mod clock;
mod config;
mod error;
mod fitness;
mod image;
mod key;

pub use clock::{Clock, SystemClock};
pub use config::CacheSettings;
pub use error::{
    ConfigError, FetchError, LoadFailure, PipelineError, StoreError, StrideError, StrideResult,
};
pub use fitness::{DomainSnapshot, Exercise, ExerciseSummary, LiftRecord, TrainingStats};
pub use image::{CachedImageEntry, Rgb};
pub use key::{CacheCost, CacheKey};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Raw serialized bytes as handed to and from persisted tiers.
pub type RawContent = Vec<u8>;

// ============================================================================
// TTL ENVELOPE
// ============================================================================

/// A persisted payload guarded by a single absolute expiration time.
///
/// The envelope is valid iff `now < expires_at`. Once invalid, the whole
/// payload is treated as absent; members are never expired individually.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TtlEnvelope<T> {
    pub payload: T,
    pub expires_at: Timestamp,
}

impl<T> TtlEnvelope<T> {
    pub fn new(payload: T, expires_at: Timestamp) -> Self {
        Self {
            payload,
            expires_at,
        }
    }

    /// Whether the envelope is still valid at `now`.
    pub fn is_valid_at(&self, now: Timestamp) -> bool {
        now < self.expires_at
    }

    /// Consume the envelope, returning the payload only while still valid.
    pub fn into_valid_payload(self, now: Timestamp) -> Option<T> {
        if self.is_valid_at(now) {
            Some(self.payload)
        } else {
            None
        }
    }
}
