//! # Core Error Types
//!
//! Errors raised by the storage seam and by generation-config loading.
//! Subsystems catch these locally; none of them cross a public guard contract.

use thiserror::Error;

/// Errors that can occur while reading or writing persisted state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Underlying I/O failed.
    #[error("storage i/o failed: {0}")]
    Io(String),

    /// A value could not be encoded or decoded.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// The backend refused the write because it is out of space.
    #[error("storage quota exceeded: {used} of {quota} bytes")]
    QuotaExceeded {
        /// Bytes that would be in use after the write.
        used: usize,
        /// Configured quota.
        quota: usize,
    },

    /// The backend is not reachable at all.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type for storage operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised while loading a generation config.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The TOML text could not be parsed.
    #[error("invalid generation config: {0}")]
    Parse(String),

    /// The file could not be read.
    #[error("could not read generation config: {0}")]
    Io(String),

    /// The config parsed but describes no slots.
    #[error("generation config {0} has no slots")]
    Empty(String),
}
