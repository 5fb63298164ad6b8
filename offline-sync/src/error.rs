//! Error types for the offline path and the engine facade

use thiserror::Error;
use uuid::Uuid;

use crate::types::QueueState;

/// Result type for offline-sync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Offline-sync errors
#[derive(Error, Debug)]
pub enum Error {
    /// Request rejected before any scoring. Never persisted.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Queue storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Stored entry failed its integrity check
    #[error("Integrity check failed for transaction {0}")]
    Integrity(Uuid),

    /// Illegal queue state change
    #[error("Invalid transition {from} -> {to}")]
    InvalidTransition {
        /// Current state
        from: QueueState,
        /// Requested state
        to: QueueState,
    },

    /// Unknown transaction id
    #[error("Transaction not found: {0}")]
    NotFound(Uuid),

    /// Fraud engine error
    #[error("Fraud engine error: {0}")]
    Fraud(fraud_engine::Error),

    /// Ledger error
    #[error("Ledger error: {0}")]
    Ledger(#[from] ledger_core::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Metrics registration error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether retrying the same call may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Storage(_) | Error::Io(_) => true,
            Error::Ledger(e) => e.is_retryable(),
            Error::Fraud(e) => e.is_retryable(),
            _ => false,
        }
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<fraud_engine::Error> for Error {
    fn from(err: fraud_engine::Error) -> Self {
        match err {
            fraud_engine::Error::Validation(msg) => Error::Validation(msg),
            other => Error::Fraud(other),
        }
    }
}
