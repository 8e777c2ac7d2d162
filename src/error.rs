//! Error types for the quota store.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum QuotaError {
    /// Query by a TileSet or page id that was never registered.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed identifier, or lookup of an id that was never created.
    #[error("Illegal argument: {0}")]
    IllegalArgument(String),

    /// Accounting call while the store is not open.
    #[error("Quota store is closed")]
    Closed,

    /// Underlying persistence failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Store layout or configuration mismatch (e.g. schema version).
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl From<sled::Error> for QuotaError {
    fn from(e: sled::Error) -> Self {
        QuotaError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for QuotaError {
    fn from(e: serde_json::Error) -> Self {
        QuotaError::Storage(format!("codec: {e}"))
    }
}

impl From<std::io::Error> for QuotaError {
    fn from(e: std::io::Error) -> Self {
        QuotaError::Storage(format!("I/O: {e}"))
    }
}

impl From<prometheus::Error> for QuotaError {
    fn from(e: prometheus::Error) -> Self {
        QuotaError::Configuration(format!("metrics: {e}"))
    }
}

pub type Result<T> = std::result::Result<T, QuotaError>;
