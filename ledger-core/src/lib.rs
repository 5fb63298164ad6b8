//! FieldPay Ledger Core
//!
//! Authoritative transfer ledger backed by RocksDB.
//!
//! # Architecture
//!
//! - **Single Writer**: one actor task owns every write, so the
//!   check-then-insert on a transaction id cannot race
//! - **Idempotent apply**: applying a transaction id twice leaves the ledger
//!   as if it had been applied once
//! - **Durable**: entry, per-user totals and index are committed in one
//!   synced `WriteBatch`
//!
//! # Invariants
//!
//! - At most one entry per transaction id
//! - `UserTotals` equals the sum over that user's entries
//! - Entries are never modified or deleted

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod actor;
pub mod config;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod storage;
pub mod types;

// Re-exports
pub use config::Config;
pub use error::{Error, Result};
pub use ledger::Ledger;
pub use metrics::Metrics;
pub use storage::Storage;
pub use types::{ApplyOutcome, EntrySource, LedgerEntry, UserTotals};
