//! Ledger write seam

use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use fraud_engine::UserId;
use ledger_core::{ApplyOutcome, Ledger, LedgerEntry};
use std::time::Duration;
use uuid::Uuid;

use crate::Result;

/// Authoritative ledger, deduplicating on transaction id
#[async_trait]
pub trait LedgerWriter: Send + Sync {
    /// Apply an entry. A second apply of the same id returns
    /// [`ApplyOutcome::AlreadyApplied`] and writes nothing.
    async fn apply(&self, entry: LedgerEntry) -> ledger_core::Result<ApplyOutcome>;

    /// Whether the transaction id has been applied
    async fn contains(&self, transaction_id: Uuid) -> ledger_core::Result<bool>;

    /// Every entry applied for a user
    async fn user_entries(&self, user_id: &UserId) -> ledger_core::Result<Vec<LedgerEntry>>;
}

#[async_trait]
impl LedgerWriter for Ledger {
    async fn apply(&self, entry: LedgerEntry) -> ledger_core::Result<ApplyOutcome> {
        Ledger::apply(self, entry).await
    }

    async fn contains(&self, transaction_id: Uuid) -> ledger_core::Result<bool> {
        Ledger::contains(self, transaction_id).await
    }

    async fn user_entries(&self, user_id: &UserId) -> ledger_core::Result<Vec<LedgerEntry>> {
        Ledger::user_entries(self, user_id)
    }
}

/// Apply with exponential backoff on retryable ledger errors
pub async fn apply_with_retry(
    ledger: &dyn LedgerWriter,
    entry: LedgerEntry,
    max_elapsed: Duration,
) -> Result<ApplyOutcome> {
    let policy = ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_millis(50))
        .with_max_interval(Duration::from_secs(1))
        .with_max_elapsed_time(Some(max_elapsed))
        .build();

    let entry = &entry;
    let outcome = backoff::future::retry(policy, || async move {
        ledger.apply(entry.clone()).await.map_err(|e| {
            if e.is_retryable() {
                tracing::warn!(
                    transaction_id = %entry.transaction_id,
                    error = %e,
                    "Ledger apply failed, retrying"
                );
                backoff::Error::transient(e)
            } else {
                backoff::Error::permanent(e)
            }
        })
    })
    .await?;

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use fraud_engine::{RiskScore, Transaction, UserId};
    use ledger_core::EntrySource;
    use rust_decimal::Decimal;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Flaky {
        failures_left: AtomicU32,
        calls: AtomicU32,
        error: fn() -> ledger_core::Error,
    }

    #[async_trait]
    impl LedgerWriter for Flaky {
        async fn apply(&self, _entry: LedgerEntry) -> ledger_core::Result<ApplyOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err((self.error)());
            }
            Ok(ApplyOutcome::Applied)
        }

        async fn contains(&self, _transaction_id: Uuid) -> ledger_core::Result<bool> {
            Ok(false)
        }

        async fn user_entries(&self, _user_id: &UserId) -> ledger_core::Result<Vec<LedgerEntry>> {
            Ok(Vec::new())
        }
    }

    fn entry() -> LedgerEntry {
        let tx = Transaction::new(UserId::new("U1"), Decimal::from(10), Utc::now(), "DEV-1", "");
        LedgerEntry::from_transaction(&tx, RiskScore::ZERO, EntrySource::OfflineSync)
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let ledger = Flaky {
            failures_left: AtomicU32::new(2),
            calls: AtomicU32::new(0),
            error: || ledger_core::Error::Storage("busy".into()),
        };

        let outcome = apply_with_retry(&ledger, entry(), Duration::from_secs(5)).await.unwrap();
        assert_eq!(outcome, ApplyOutcome::Applied);
        assert_eq!(ledger.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_errors_stop_immediately() {
        let ledger = Flaky {
            failures_left: AtomicU32::new(5),
            calls: AtomicU32::new(0),
            error: || ledger_core::Error::InvalidEntry("bad".into()),
        };

        let result = apply_with_retry(&ledger, entry(), Duration::from_secs(5)).await;
        assert!(matches!(result, Err(crate::Error::Ledger(ledger_core::Error::InvalidEntry(_)))));
        assert_eq!(ledger.calls.load(Ordering::SeqCst), 1);
    }
}
