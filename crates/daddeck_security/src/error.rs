//! # Security Error Types
//!
//! Only configuration loading and explicit export/import calls return these.
//! The guard contracts themselves (validate, check, record, ban, log) never
//! fail for expected reasons: storage trouble degrades, malformed packs become
//! violations.

use daddeck_core::StoreError;
use thiserror::Error;

/// Errors surfaced by the security crate.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SecurityError {
    /// Invalid configuration file or value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Persisted state could not be read or written.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Export/import payload could not be encoded or decoded.
    #[error("serialization failed: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for SecurityError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type for security operations.
pub type SecurityResult<T> = Result<T, SecurityError>;
