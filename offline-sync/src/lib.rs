//! Offline sync
//!
//! Durable offline transaction queue and its reconciliation against the
//! authoritative ledger, plus the [`Engine`] facade that routes requests to
//! the online scoring path or the queue.
//!
//! # Lifecycle
//!
//! ```text
//! enqueue ─▶ PENDING ─▶ VALIDATED ─▶ SYNCED
//!               │           ├──────▶ REJECTED (replay BLOCK)
//!               ▼           └──────▶ FAILED ─▶ PENDING (retry)
//!           REJECTED (cap violated)
//! ```
//!
//! # Invariants
//!
//! - An entry is on disk before `enqueue` returns
//! - A transaction id lives on exactly one path, online or offline
//! - Replaying an id twice leaves the ledger and the profile as if it had
//!   been replayed once
//! - SYNCED and REJECTED entries are never replayed

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod auth;
pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod queue;
pub mod scoring;
pub mod service;
pub mod store;
pub mod sync;
pub mod types;
pub mod validator;
pub mod writer;

pub use auth::{Authenticator, NoChannelAuthenticator};
pub use config::{NodeConfig, QueueConfig, SyncConfig};
pub use engine::{Engine, EngineBuilder, EngineStatistics, Submission};
pub use error::{Error, Result};
pub use metrics::SyncMetrics;
pub use queue::OfflineQueue;
pub use scoring::Scorer;
pub use service::{SyncService, SyncServiceHandle};
pub use store::QueueStore;
pub use sync::Synchronizer;
pub use types::{
    ChallengeResolution, Connectivity, OnlineRecord, QueueEntry, QueueState, QueueStats,
    StateTransition, SyncReport, SyncStatus, Violation,
};
pub use validator::OfflineValidator;
pub use writer::{apply_with_retry, LedgerWriter};
