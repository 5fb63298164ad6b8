//! Offline transaction queue
//!
//! Durable local log of transactions made without connectivity. Enqueue
//! validates against the device-side caps, decides VALIDATED or REJECTED
//! and persists the entry once, in that state, before returning.
//!
//! Callers serialize access per user (see [`fraud_engine::UserLocks`]);
//! the daily and hourly caps read the user's earlier entries.

use fraud_engine::{rule_score, BehavioralProfile, FraudThresholds, RuleEvaluator, Transaction, UserId};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::{
    config::QueueConfig,
    metrics::SyncMetrics,
    store::QueueStore,
    types::{OnlineRecord, QueueEntry, QueueState, QueueStats, SyncReport},
    validator::OfflineValidator,
    Error, Result,
};

/// Offline queue
pub struct OfflineQueue {
    store: QueueStore,
    validator: OfflineValidator,
    evaluator: RuleEvaluator,
    metrics: SyncMetrics,
}

impl OfflineQueue {
    /// Open the queue database
    pub fn open(config: &QueueConfig, thresholds: FraudThresholds, metrics: SyncMetrics) -> Result<Self> {
        let store = QueueStore::open(config)?;
        let queue = Self {
            store,
            validator: OfflineValidator::new(thresholds.clone()),
            evaluator: RuleEvaluator::new(thresholds),
            metrics,
        };
        queue.metrics.update_queue_depth(&queue.stats()?);
        Ok(queue)
    }

    /// Queue an offline transaction.
    ///
    /// Idempotent by transaction id: a second call returns the stored entry
    /// unchanged. Fails closed: if the entry cannot be persisted the
    /// transaction is not queued.
    pub fn enqueue(&self, tx: Transaction, device_trusted: bool) -> Result<QueueEntry> {
        if tx.amount <= Decimal::ZERO {
            return Err(Error::Validation(format!("amount must be positive, got {}", tx.amount)));
        }
        if tx.user_id.as_str().is_empty() {
            return Err(Error::Validation("user_id must not be empty".to_string()));
        }

        if let Some(existing) = self.store.get(tx.id)? {
            tracing::debug!(transaction_id = %tx.id, state = existing.state.as_str(), "Already queued");
            return Ok(existing);
        }

        let cached = self.cached_or_empty(&tx.user_id)?;
        let local_score = rule_score(&self.evaluator.evaluate_degraded(&tx, &cached));

        let mut entry = QueueEntry::new(tx, device_trusted, local_score)?;
        let prior = self.store.user_entries(&entry.transaction.user_id)?;
        self.decide(&mut entry, &prior)?;

        if let Err(e) = self.store.put(&entry) {
            tracing::error!(transaction_id = %entry.id(), error = %e, "Failed to persist offline entry");
            return Err(e);
        }
        self.metrics.record_enqueue(entry.state);

        tracing::info!(
            transaction_id = %entry.id(),
            user_id = %entry.transaction.user_id,
            amount = %entry.transaction.amount,
            state = entry.state.as_str(),
            local_risk_score = %entry.local_risk_score,
            violations = entry.violations.len(),
            "Offline transaction queued"
        );

        Ok(entry)
    }

    /// Bring a PENDING entry back to VALIDATED or REJECTED.
    ///
    /// Entries that passed validation before (re-armed retries) are promoted
    /// directly; entries that never finished validation are checked again.
    pub fn revalidate(&self, mut entry: QueueEntry) -> Result<QueueEntry> {
        if entry.state != QueueState::Pending {
            return Err(Error::InvalidTransition {
                from: entry.state,
                to: QueueState::Validated,
            });
        }

        if entry.validated_at.is_some() {
            entry.transition(QueueState::Validated, "re-armed for replay")?;
        } else {
            let prior = self.store.user_entries(&entry.transaction.user_id)?;
            self.decide(&mut entry, &prior)?;
        }

        self.store.put(&entry)?;
        Ok(entry)
    }

    fn decide(&self, entry: &mut QueueEntry, prior: &[QueueEntry]) -> Result<()> {
        let violations = self
            .validator
            .validate(&entry.transaction, entry.device_trusted, prior);

        if violations.is_empty() {
            entry.transition(QueueState::Validated, "local checks passed")
        } else {
            let reason = violations
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            for v in &violations {
                tracing::debug!(transaction_id = %entry.id(), violation = %v, "Offline cap violated");
            }
            entry.violations = violations;
            entry.last_error = Some(reason.clone());
            entry.transition(QueueState::Rejected, reason)
        }
    }

    fn cached_or_empty(&self, user_id: &UserId) -> Result<BehavioralProfile> {
        Ok(self
            .store
            .cached_profile(user_id)?
            .unwrap_or_else(|| BehavioralProfile::new(user_id.clone())))
    }

    /// Persist an updated entry
    pub fn update(&self, entry: &QueueEntry) -> Result<()> {
        self.store.put(entry)
    }

    /// Entry by transaction id
    pub fn get(&self, transaction_id: Uuid) -> Result<Option<QueueEntry>> {
        self.store.get(transaction_id)
    }

    /// Whether the transaction id was ever queued
    pub fn contains(&self, transaction_id: Uuid) -> Result<bool> {
        self.store.contains(transaction_id)
    }

    /// Entries in `state`, oldest transaction first
    pub fn entries_in_state(&self, state: QueueState) -> Result<Vec<QueueEntry>> {
        self.store.entries_in_state(state)
    }

    /// A user's entries
    pub fn user_entries(&self, user_id: &UserId) -> Result<Vec<QueueEntry>> {
        self.store.user_entries(user_id)
    }

    /// Counts per state
    pub fn stats(&self) -> Result<QueueStats> {
        self.store.stats()
    }

    /// Store the device-side profile snapshot used for local scoring
    pub fn cache_profile(&self, profile: &BehavioralProfile) -> Result<()> {
        self.store.put_cached_profile(profile)?;
        tracing::debug!(user_id = %profile.user_id, "Device profile cache refreshed");
        Ok(())
    }

    /// Device-side profile snapshot
    pub fn cached_profile(&self, user_id: &UserId) -> Result<Option<BehavioralProfile>> {
        self.store.cached_profile(user_id)
    }

    /// Append to the sync log
    pub fn record_sync(&self, report: &SyncReport, retention: usize) -> Result<()> {
        self.store.record_sync(report, retention)
    }

    /// Latest sync reports, newest first
    pub fn recent_syncs(&self, limit: usize) -> Result<Vec<SyncReport>> {
        self.store.recent_syncs(limit)
    }

    /// Persist an online evaluation record
    pub fn record_online(&self, record: &OnlineRecord) -> Result<()> {
        self.store.put_online(record)
    }

    /// Online evaluation record by transaction id
    pub fn online_record(&self, transaction_id: Uuid) -> Result<Option<OnlineRecord>> {
        self.store.get_online(transaction_id)
    }

    /// Online challenges waiting for a resolution
    pub fn open_challenges(&self) -> Result<usize> {
        self.store.open_challenges()
    }

    /// Metrics
    pub fn metrics(&self) -> &SyncMetrics {
        &self.metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Violation;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use tempfile::TempDir;

    fn open() -> (OfflineQueue, TempDir) {
        let dir = TempDir::new().unwrap();
        let config = QueueConfig {
            data_dir: dir.path().to_path_buf(),
            sync_writes: true,
        };
        let queue = OfflineQueue::open(&config, FraudThresholds::default(), SyncMetrics::new().unwrap()).unwrap();
        (queue, dir)
    }

    fn at(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, h, 0, 0).unwrap()
    }

    fn tx(user: &str, amount: i64, ts: DateTime<Utc>) -> Transaction {
        Transaction::new(UserId::new(user), Decimal::from(amount), ts, "DEV-1", "market").offline()
    }

    #[test]
    fn test_over_cap_rejected_immediately() {
        let (queue, _dir) = open();
        let entry = queue.enqueue(tx("U1", 15_000, at(10)), true).unwrap();

        assert_eq!(entry.state, QueueState::Rejected);
        assert!(matches!(entry.violations.as_slice(), [Violation::OverOfflineCap { .. }]));
        assert_eq!(queue.get(entry.id()).unwrap().unwrap().state, QueueState::Rejected);
    }

    #[test]
    fn test_enqueue_is_idempotent() {
        let (queue, _dir) = open();
        let t = tx("U1", 500, at(10));
        let first = queue.enqueue(t.clone(), true).unwrap();
        let second = queue.enqueue(t, false).unwrap();

        assert_eq!(first, second);
        assert_eq!(queue.stats().unwrap().total(), 1);
        assert_eq!(queue.metrics().enqueued_total.with_label_values(&["validated"]).get(), 1);
    }

    #[test]
    fn test_untrusted_device_rejected() {
        let (queue, _dir) = open();
        let entry = queue.enqueue(tx("U1", 500, at(10)), false).unwrap();
        assert_eq!(entry.state, QueueState::Rejected);
        assert!(entry.last_error.unwrap().contains("DEV-1"));
    }

    #[test]
    fn test_daily_cap_across_entries() {
        let (queue, _dir) = open();
        for h in 1..=5 {
            let e = queue.enqueue(tx("U1", 10_000, at(h * 2)), true).unwrap();
            assert_eq!(e.state, QueueState::Validated);
        }
        let over = queue.enqueue(tx("U1", 1, at(13)), true).unwrap();
        assert_eq!(over.state, QueueState::Rejected);

        // Another user has their own budget
        let other = queue.enqueue(tx("U2", 1, at(13)), true).unwrap();
        assert_eq!(other.state, QueueState::Validated);
    }

    #[test]
    fn test_non_positive_amount_is_not_queued() {
        let (queue, _dir) = open();
        let result = queue.enqueue(tx("U1", 0, at(10)), true);
        assert!(matches!(result, Err(Error::Validation(_))));
        assert_eq!(queue.stats().unwrap().total(), 0);
    }

    #[test]
    fn test_local_score_uses_cached_profile() {
        let (queue, _dir) = open();
        let mut cached = BehavioralProfile::new(UserId::new("U1"));
        cached.average_amount = Decimal::from(1_000);
        cached.transaction_count = 10;
        cached.last_transaction_times.push_back(at(10) - Duration::seconds(30));
        queue.cache_profile(&cached).unwrap();

        let entry = queue.enqueue(tx("U1", 6_000, at(10)), true).unwrap();
        assert!(entry.local_risk_score > fraud_engine::RiskScore::ZERO);
        // Informational only
        assert_eq!(entry.state, QueueState::Validated);
    }

    #[test]
    fn test_revalidate_promotes_previously_validated() {
        let (queue, _dir) = open();
        let mut entry = queue.enqueue(tx("U1", 500, at(10)), true).unwrap();
        entry.transition(QueueState::Failed, "auth timeout").unwrap();
        entry.transition(QueueState::Pending, "retry").unwrap();
        queue.update(&entry).unwrap();

        let entry = queue.revalidate(entry).unwrap();
        assert_eq!(entry.state, QueueState::Validated);
        assert_eq!(entry.history.last().unwrap().reason, "re-armed for replay");
    }
}
