//! Main ledger orchestration layer
//!
//! Ties storage, metrics and the writer actor into the API used by the fraud
//! node.
//!
//! # Example
//!
//! ```no_run
//! use ledger_core::{Config, EntrySource, Ledger, LedgerEntry};
//!
//! #[tokio::main]
//! async fn main() -> ledger_core::Result<()> {
//!     let ledger = Ledger::open(Config::default()).await?;
//!
//!     // let entry = LedgerEntry::from_transaction(&tx, assessment.score, EntrySource::Online);
//!     // let outcome = ledger.apply(entry).await?;
//!
//!     ledger.shutdown().await
//! }
//! ```

use crate::{
    actor::{spawn_ledger_actor, LedgerHandle},
    types::{ApplyOutcome, LedgerEntry, UserTotals},
    Config, Error, Metrics, Result, Storage,
};
use fraud_engine::UserId;
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

/// Main ledger interface
#[derive(Debug)]
pub struct Ledger {
    /// Actor handle for writes and read-your-writes lookups
    handle: LedgerHandle,

    /// Direct storage access (for scans)
    storage: Arc<Storage>,

    /// Metrics
    metrics: Metrics,

    /// Configuration
    config: Config,
}

impl Ledger {
    /// Open ledger with configuration
    pub async fn open(config: Config) -> Result<Self> {
        config.validate()?;

        let storage = Arc::new(Storage::open(&config)?);
        let metrics = Metrics::new()?;
        let handle = spawn_ledger_actor(storage.clone(), metrics.clone(), config.mailbox_capacity);

        tracing::info!(
            service = %config.service_name,
            data_dir = ?config.data_dir,
            "Ledger opened"
        );

        Ok(Self {
            handle,
            storage,
            metrics,
            config,
        })
    }

    /// Apply an approved entry.
    ///
    /// Idempotent by transaction id: a second apply of the same id returns
    /// [`ApplyOutcome::AlreadyApplied`] and writes nothing.
    pub async fn apply(&self, entry: LedgerEntry) -> Result<ApplyOutcome> {
        Self::validate_entry(&entry)?;
        self.handle.apply(entry).await
    }

    /// Whether the transaction has been applied
    pub async fn contains(&self, transaction_id: Uuid) -> Result<bool> {
        self.handle.contains(transaction_id).await
    }

    /// Entry for a transaction id
    pub async fn get_entry(&self, transaction_id: Uuid) -> Result<Option<LedgerEntry>> {
        self.handle.get_entry(transaction_id).await
    }

    /// Running totals for a user
    pub async fn user_totals(&self, user_id: &UserId) -> Result<UserTotals> {
        self.handle.get_user_totals(user_id.clone()).await
    }

    /// All entries for a user
    pub fn user_entries(&self, user_id: &UserId) -> Result<Vec<LedgerEntry>> {
        self.storage.user_entries(user_id)
    }

    /// Rebuild a user's totals from their entries and compare with the
    /// stored running totals
    pub async fn verify_user_totals(&self, user_id: &UserId) -> Result<bool> {
        let stored = self.user_totals(user_id).await?;
        let entries = self.user_entries(user_id)?;

        let count = entries.len() as u64;
        let sum: Decimal = entries.iter().map(|e| e.amount).sum();

        Ok(stored.entry_count == count && stored.total_amount == sum)
    }

    /// Metrics
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Shutdown ledger
    pub async fn shutdown(&self) -> Result<()> {
        self.handle.shutdown().await
    }

    fn validate_entry(entry: &LedgerEntry) -> Result<()> {
        if entry.amount <= Decimal::ZERO {
            return Err(Error::InvalidEntry(format!(
                "Amount must be positive, got {}",
                entry.amount
            )));
        }
        if entry.user_id.as_str().is_empty() {
            return Err(Error::InvalidEntry("Empty user id".to_string()));
        }
        Ok(())
    }
}
