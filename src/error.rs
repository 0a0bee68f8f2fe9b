//! Error types for the wallet analysis core.
//!
//! A cache miss, expiry or eviction is never an error; those surface as
//! `Option::None` from the cache. Errors here are reserved for bad
//! configuration, structurally invalid snapshots, and upstream provider
//! failures reported back to the orchestration layer.

use thiserror::Error;

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, AnalyzerError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AnalyzerError {
    /// Non-positive capacity, zero TTL, or an out-of-range threshold.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Malformed wallet snapshot (bad address, negative balance, unordered timestamps).
    #[error("validation error: {0}")]
    Validation(String),

    /// The blockchain data provider failed.
    #[error("upstream service error: {0}")]
    Upstream(String),

    /// The blockchain data provider throttled us.
    #[error("upstream rate limit exceeded: {0}")]
    RateLimited(String),
}

impl AnalyzerError {
    /// Whether the error was caused by the caller's input rather than the system.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

impl From<reqwest::Error> for AnalyzerError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AnalyzerError::Upstream("request timed out".to_string())
        } else if err.is_connect() {
            AnalyzerError::Upstream("failed to connect to provider".to_string())
        } else {
            AnalyzerError::Upstream(err.to_string())
        }
    }
}
