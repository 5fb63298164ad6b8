//! Actor-based concurrency for the ledger
//!
//! Single-writer pattern using Tokio actors:
//! - One task owns every write, so check-then-insert on a transaction id is
//!   race-free without a database-level lock
//! - Async message passing with backpressure via a bounded mailbox
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │      Online evaluation / offline synchronizer        │
//! └─────────────────────┬────────────────────────────────┘
//!                       │
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │               LedgerHandle (Clone)                    │
//! └─────────────────────┬────────────────────────────────┘
//!                       │ mpsc::channel (bounded)
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │              LedgerActor (Single Task)                │
//! │   contains(id)? ──yes──▶ AlreadyApplied               │
//! │        │ no                                           │
//! │        ▼                                              │
//! │   Storage::apply_entry_atomic() (synced WriteBatch)   │
//! └───────────────────────────────────────────────────────┘
//! ```

use crate::types::{ApplyOutcome, LedgerEntry, UserTotals};
use crate::{Error, Metrics, Result, Storage};
use fraud_engine::UserId;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// Message sent to the ledger actor
#[derive(Debug)]
pub enum LedgerMessage {
    /// Apply an entry unless its transaction id is already present
    Apply {
        /// Entry to write
        entry: LedgerEntry,
        /// Reply channel
        response: oneshot::Sender<Result<ApplyOutcome>>,
    },

    /// Presence check
    Contains {
        /// Transaction id
        transaction_id: Uuid,
        /// Reply channel
        response: oneshot::Sender<Result<bool>>,
    },

    /// Get entry by transaction id
    GetEntry {
        /// Transaction id
        transaction_id: Uuid,
        /// Reply channel
        response: oneshot::Sender<Result<Option<LedgerEntry>>>,
    },

    /// Get per-user totals
    GetUserTotals {
        /// User
        user_id: UserId,
        /// Reply channel
        response: oneshot::Sender<Result<UserTotals>>,
    },

    /// Shutdown actor
    Shutdown,
}

/// Actor that processes ledger messages
#[derive(Debug)]
pub struct LedgerActor {
    /// Storage backend
    storage: Arc<Storage>,

    /// Mailbox for incoming messages
    mailbox: mpsc::Receiver<LedgerMessage>,

    /// Metrics sink
    metrics: Metrics,
}

impl LedgerActor {
    /// Create new actor
    pub fn new(storage: Arc<Storage>, mailbox: mpsc::Receiver<LedgerMessage>, metrics: Metrics) -> Self {
        Self {
            storage,
            mailbox,
            metrics,
        }
    }

    /// Run the actor event loop
    pub async fn run(mut self) {
        while let Some(msg) = self.mailbox.recv().await {
            match msg {
                LedgerMessage::Shutdown => {
                    tracing::info!("Ledger actor shutting down");
                    break;
                }
                msg => self.handle_message(msg),
            }
        }
    }

    /// Handle a single message
    fn handle_message(&mut self, msg: LedgerMessage) {
        match msg {
            LedgerMessage::Apply { entry, response } => {
                let result = self.apply(entry);
                if let Err(e) = &result {
                    tracing::error!(error = %e, "Ledger apply failed");
                }
                let _ = response.send(result);
            }

            LedgerMessage::Contains {
                transaction_id,
                response,
            } => {
                let _ = response.send(self.storage.contains(transaction_id));
            }

            LedgerMessage::GetEntry {
                transaction_id,
                response,
            } => {
                let _ = response.send(self.storage.get_entry(transaction_id));
            }

            LedgerMessage::GetUserTotals { user_id, response } => {
                let _ = response.send(self.storage.get_user_totals(&user_id));
            }

            LedgerMessage::Shutdown => {
                // Handled in main loop
            }
        }
    }

    fn apply(&self, entry: LedgerEntry) -> Result<ApplyOutcome> {
        let started = Instant::now();

        if self.storage.contains(entry.transaction_id)? {
            self.metrics.record_duplicate();
            tracing::info!(
                transaction_id = %entry.transaction_id,
                source = entry.source.as_str(),
                "Duplicate apply suppressed"
            );
            return Ok(ApplyOutcome::AlreadyApplied);
        }

        let totals = self.storage.get_user_totals(&entry.user_id)?.with_entry(&entry);
        self.storage.apply_entry_atomic(&entry, &totals)?;

        self.metrics.record_applied(entry.source);
        self.metrics
            .record_apply_duration(started.elapsed().as_secs_f64());

        tracing::info!(
            transaction_id = %entry.transaction_id,
            user_id = %entry.user_id,
            amount = %entry.amount,
            source = entry.source.as_str(),
            "Entry applied"
        );

        Ok(ApplyOutcome::Applied)
    }
}

/// Handle for sending messages to the actor
#[derive(Debug, Clone)]
pub struct LedgerHandle {
    sender: mpsc::Sender<LedgerMessage>,
}

impl LedgerHandle {
    /// Create new handle
    pub fn new(sender: mpsc::Sender<LedgerMessage>) -> Self {
        Self { sender }
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<Result<T>>) -> LedgerMessage) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))?
    }

    /// Apply an entry
    pub async fn apply(&self, entry: LedgerEntry) -> Result<ApplyOutcome> {
        self.request(|response| LedgerMessage::Apply { entry, response })
            .await
    }

    /// Presence check
    pub async fn contains(&self, transaction_id: Uuid) -> Result<bool> {
        self.request(|response| LedgerMessage::Contains {
            transaction_id,
            response,
        })
        .await
    }

    /// Get entry by transaction id
    pub async fn get_entry(&self, transaction_id: Uuid) -> Result<Option<LedgerEntry>> {
        self.request(|response| LedgerMessage::GetEntry {
            transaction_id,
            response,
        })
        .await
    }

    /// Get per-user totals
    pub async fn get_user_totals(&self, user_id: UserId) -> Result<UserTotals> {
        self.request(|response| LedgerMessage::GetUserTotals { user_id, response })
            .await
    }

    /// Shutdown actor
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(LedgerMessage::Shutdown)
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;
        Ok(())
    }
}

/// Spawn the ledger actor
pub fn spawn_ledger_actor(storage: Arc<Storage>, metrics: Metrics, mailbox_capacity: usize) -> LedgerHandle {
    let (tx, rx) = mpsc::channel(mailbox_capacity);
    let actor = LedgerActor::new(storage, rx, metrics);

    tokio::spawn(async move {
        actor.run().await;
    });

    LedgerHandle::new(tx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EntrySource;
    use crate::Config;
    use chrono::Utc;
    use fraud_engine::{RiskScore, Transaction};
    use rust_decimal::Decimal;

    fn spawn(dir: &tempfile::TempDir) -> (LedgerHandle, Metrics) {
        let config = Config::with_data_dir(dir.path());
        let storage = Arc::new(Storage::open(&config).unwrap());
        let metrics = Metrics::new().unwrap();
        (spawn_ledger_actor(storage, metrics.clone(), 16), metrics)
    }

    fn entry() -> LedgerEntry {
        let tx = Transaction::new(UserId::new("U1"), Decimal::new(10000, 2), Utc::now(), "DEV-1", "");
        LedgerEntry::from_transaction(&tx, RiskScore::ZERO, EntrySource::OfflineSync)
    }

    #[tokio::test]
    async fn test_actor_spawn_and_shutdown() {
        let temp_dir = tempfile::tempdir().unwrap();
        let (handle, _) = spawn(&temp_dir);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_actor_apply_is_idempotent() {
        let temp_dir = tempfile::tempdir().unwrap();
        let (handle, metrics) = spawn(&temp_dir);
        let e = entry();

        assert_eq!(handle.apply(e.clone()).await.unwrap(), ApplyOutcome::Applied);
        assert_eq!(handle.apply(e.clone()).await.unwrap(), ApplyOutcome::AlreadyApplied);

        assert!(handle.contains(e.transaction_id).await.unwrap());
        let totals = handle.get_user_totals(e.user_id.clone()).await.unwrap();
        assert_eq!(totals.entry_count, 1);
        assert_eq!(totals.total_amount, Decimal::new(10000, 2));
        assert_eq!(metrics.duplicates_total.get(), 1);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_duplicate_applies_write_once() {
        let temp_dir = tempfile::tempdir().unwrap();
        let (handle, _) = spawn(&temp_dir);
        let e = entry();

        let tasks: Vec<_> = (0..10)
            .map(|_| {
                let handle = handle.clone();
                let e = e.clone();
                tokio::spawn(async move { handle.apply(e).await.unwrap() })
            })
            .collect();

        let mut applied = 0;
        for t in tasks {
            if t.await.unwrap() == ApplyOutcome::Applied {
                applied += 1;
            }
        }
        assert_eq!(applied, 1);

        let totals = handle.get_user_totals(e.user_id.clone()).await.unwrap();
        assert_eq!(totals.entry_count, 1);
    }

    #[tokio::test]
    async fn test_requests_after_shutdown_fail() {
        let temp_dir = tempfile::tempdir().unwrap();
        let (handle, _) = spawn(&temp_dir);
        handle.shutdown().await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let err = handle.apply(entry()).await.unwrap_err();
        assert!(matches!(err, Error::Concurrency(_)));
    }
}
