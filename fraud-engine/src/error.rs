//! Error types for the fraud engine

use thiserror::Error;

/// Fraud engine error
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed transaction (non-positive amount, unknown user, ...).
    /// Raised before any scoring and never persisted.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Profile store unreachable
    #[error("Storage error: {0}")]
    Storage(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the caller may retry the same request
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Storage(_) | Error::Io(_))
    }
}

/// Result type
pub type Result<T> = std::result::Result<T, Error>;
