//! Error types for path discovery

use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SearchError>;

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Invalid search request: {0}")]
    Validation(String),

    #[error("Graph cache unavailable: {0}")]
    CacheUnavailable(String),

    #[error("Upstream call failed: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Search worker unavailable")]
    WorkerUnavailable,
}

impl From<sled::Error> for SearchError {
    fn from(e: sled::Error) -> Self {
        SearchError::CacheUnavailable(e.to_string())
    }
}

impl SearchError {
    pub fn validation(msg: impl Into<String>) -> Self {
        SearchError::Validation(msg.into())
    }
}

/// Failure of a single call to the external data source.
///
/// These never abort a search: the expansion that hit one reports an empty
/// neighbor set instead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    #[error("rate limited, resets in {until_reset:?}")]
    RateLimited { until_reset: Duration },

    #[error("entity not found: {0}")]
    NotFound(String),

    #[error("transient failure: {0}")]
    Transient(String),
}

impl UpstreamError {
    /// Whether retrying the same call could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, UpstreamError::Timeout(_) | UpstreamError::Transient(_))
    }
}
