//! Error types for Stride cache operations

use std::time::Duration;

use thiserror::Error;

use crate::CacheKey;

/// Network collaborator errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("Transport error: {reason}")]
    Transport { reason: String },

    #[error("HTTP status error: {code}")]
    HttpStatus { code: u16 },

    #[error("Request timed out after {after:?}")]
    Timeout { after: Duration },
}

/// Image derivation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("Decode failed: {reason}")]
    DecodeFailed { reason: String },

    #[error("Encode failed: {reason}")]
    EncodeFailed { reason: String },
}

/// Persisted tier errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Read failed for {key}: {reason}")]
    ReadFailed { key: CacheKey, reason: String },

    #[error("Persist write failed for {key}: {reason}")]
    PersistWriteFailed { key: CacheKey, reason: String },

    #[error("Deserialization failed for {key}: {reason}")]
    DeserializationFailed { key: CacheKey, reason: String },

    #[error("Serialization failed for {key}: {reason}")]
    SerializationFailed { key: CacheKey, reason: String },

    #[error("Store backend error: {reason}")]
    Backend { reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to parse settings: {reason}")]
    Parse { reason: String },
}

/// Why an image load could not produce a value.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LoadFailure {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

/// Master error type for all Stride cache errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StrideError {
    #[error("Load failed for {key}: {cause}")]
    LoadFailed { key: CacheKey, cause: LoadFailure },

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl StrideError {
    pub fn load_failed(key: &CacheKey, cause: impl Into<LoadFailure>) -> Self {
        Self::LoadFailed {
            key: key.clone(),
            cause: cause.into(),
        }
    }

    /// True for failures the caller should answer with a fallback rendering.
    pub fn is_load_failed(&self) -> bool {
        matches!(self, Self::LoadFailed { .. })
    }
}

/// Result type alias for Stride operations.
pub type StrideResult<T> = Result<T, StrideError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_display_http_status() {
        let err = FetchError::HttpStatus { code: 503 };
        let msg = format!("{}", err);
        assert!(msg.contains("HTTP status"));
        assert!(msg.contains("503"));
    }

    #[test]
    fn test_load_failed_display_carries_key_and_cause() {
        let key = CacheKey::image("https://cdn.example.com/x.png");
        let err = StrideError::load_failed(
            &key,
            FetchError::Transport {
                reason: "connection reset".to_string(),
            },
        );
        let msg = format!("{}", err);
        assert!(msg.contains("Load failed"));
        assert!(msg.contains("img:https://cdn.example.com/x.png"));
        assert!(msg.contains("connection reset"));
        assert!(err.is_load_failed());
    }

    #[test]
    fn test_decode_failure_is_load_failure() {
        let key = CacheKey::image("u");
        let err = StrideError::load_failed(
            &key,
            PipelineError::DecodeFailed {
                reason: "bad magic".to_string(),
            },
        );
        assert!(matches!(
            err,
            StrideError::LoadFailed {
                cause: LoadFailure::Pipeline(PipelineError::DecodeFailed { .. }),
                ..
            }
        ));
    }

    #[test]
    fn test_store_error_display_persist_write_failed() {
        let err = StoreError::PersistWriteFailed {
            key: CacheKey::domain_snapshot(),
            reason: "disk full".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Persist write failed"));
        assert!(msg.contains("domain:snapshot"));
        assert!(msg.contains("disk full"));
    }

    #[test]
    fn test_stride_error_from_variants() {
        let fetch = StrideError::from(FetchError::HttpStatus { code: 404 });
        assert!(matches!(fetch, StrideError::Fetch(_)));
        assert!(!fetch.is_load_failed());

        let store = StrideError::from(StoreError::Backend {
            reason: "closed".to_string(),
        });
        assert!(matches!(store, StrideError::Store(_)));

        let config = StrideError::from(ConfigError::Parse {
            reason: "eof".to_string(),
        });
        assert!(matches!(config, StrideError::Config(_)));

        let pipeline = StrideError::from(PipelineError::EncodeFailed {
            reason: "zero size".to_string(),
        });
        assert!(matches!(pipeline, StrideError::Pipeline(_)));
    }
}
