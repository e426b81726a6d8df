//! Error kinds shared by every layer of the engine.
//!
//! Store-level operations return [`EngineError`] so callers can tell a
//! contract violation (dimension mismatch) apart from an unavailable
//! embedding backend. Higher layers decide whether to surface the error or
//! fold it into a best-effort empty result.

use std::time::Duration;

use thiserror::Error;

/// Result alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// Two vectors (or a vector and the configured dimension) disagree in length.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// No embedding provider has been injected into the store.
    #[error("embedding provider not set")]
    ProviderNotSet,

    /// The embedding provider did not answer within the caller's deadline.
    #[error("embedding provider timed out after {0:?}")]
    ProviderTimeout(Duration),

    /// The embedding provider returned an error.
    #[error("embedding provider failed: {0}")]
    ProviderFailure(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// The query shape cannot be satisfied (e.g. an inverted time range).
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// An operation needs an external generative/analysis model that was not injected.
    #[error("no model available for {0}")]
    ModelUnavailable(String),
}

impl EngineError {
    /// Short machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::DimensionMismatch { .. } => "dimension_mismatch",
            EngineError::ProviderNotSet => "provider_not_set",
            EngineError::ProviderTimeout(_) => "provider_timeout",
            EngineError::ProviderFailure(_) => "provider_failure",
            EngineError::NotFound(_) => "not_found",
            EngineError::InvalidQuery(_) => "invalid_query",
            EngineError::ModelUnavailable(_) => "model_unavailable",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_dimensions() {
        let err = EngineError::DimensionMismatch {
            expected: 384,
            actual: 3,
        };
        assert_eq!(err.to_string(), "dimension mismatch: expected 384, got 3");
        assert_eq!(err.kind(), "dimension_mismatch");
    }

    #[test]
    fn test_timeout_kind() {
        let err = EngineError::ProviderTimeout(Duration::from_millis(50));
        assert_eq!(err.kind(), "provider_timeout");
        assert!(err.to_string().contains("50ms"));
    }
}
