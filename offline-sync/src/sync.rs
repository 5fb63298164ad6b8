//! Reconciliation of queued offline transactions
//!
//! A run has three phases:
//!
//! 1. FAILED entries whose retry time has come are re-armed to PENDING
//! 2. PENDING entries are promoted (or re-checked) to VALIDATED / REJECTED
//! 3. VALIDATED entries are replayed, oldest first, through the full scorer
//!    against the authoritative profile
//!
//! Replay outcomes:
//!
//! - Id already in the ledger: SYNCED, no scoring and no profile update
//! - APPROVE: ledger apply, then SYNCED with one profile update
//! - CHALLENGE: step-up authentication under a timeout; success is handled
//!   as APPROVE, failure or timeout moves the entry to FAILED
//! - BLOCK: REJECTED
//!
//! The ledger is asked for the id before the entry is scored, so a run that
//! stopped between ledger apply and the queue update finishes the entry on
//! the next run instead of scoring it against a profile that already holds
//! it. Each entry is replayed under its user's lock and re-read before use.
//! An error on one entry is logged and counted, and the run moves on.

use chrono::Utc;
use fraud_engine::{AuthTier, Decision, RiskAssessment, UserLocks};
use ledger_core::{ApplyOutcome, EntrySource, LedgerEntry};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{
    auth::Authenticator,
    config::SyncConfig,
    queue::OfflineQueue,
    scoring::Scorer,
    types::{QueueEntry, QueueState, SyncReport},
    writer::{apply_with_retry, LedgerWriter},
    Error, Result,
};

/// Queue-to-ledger synchronizer
pub struct Synchronizer {
    queue: Arc<OfflineQueue>,
    scorer: Arc<Scorer>,
    ledger: Arc<dyn LedgerWriter>,
    authenticator: Arc<dyn Authenticator>,
    locks: Arc<UserLocks>,
    config: SyncConfig,
    run_lock: Mutex<()>,
}

impl Synchronizer {
    /// Create new synchronizer
    pub fn new(
        queue: Arc<OfflineQueue>,
        scorer: Arc<Scorer>,
        ledger: Arc<dyn LedgerWriter>,
        authenticator: Arc<dyn Authenticator>,
        locks: Arc<UserLocks>,
        config: SyncConfig,
    ) -> Self {
        Self {
            queue,
            scorer,
            ledger,
            authenticator,
            locks,
            config,
            run_lock: Mutex::new(()),
        }
    }

    /// Run one reconciliation pass. Concurrent calls are serialized.
    pub async fn sync_pending(&self) -> Result<SyncReport> {
        let _run = self.run_lock.lock().await;
        let started_at = Utc::now();

        match self.run(started_at).await {
            Ok(report) => {
                self.queue.metrics().record_sync_run(true);
                tracing::info!(
                    run_id = %report.run_id,
                    rearmed = report.rearmed,
                    synced = report.count(QueueState::Synced),
                    rejected = report.count(QueueState::Rejected),
                    failed = report.count(QueueState::Failed),
                    "Sync run complete"
                );
                Ok(report)
            }
            Err(e) => {
                self.queue.metrics().record_sync_run(false);
                tracing::error!(error = %e, "Sync run aborted");
                Err(e)
            }
        }
    }

    async fn run(&self, started_at: chrono::DateTime<Utc>) -> Result<SyncReport> {
        let rearmed = self.rearm_failed().await?;
        let mut outcomes = self.promote_pending().await?;

        for candidate in self.queue.entries_in_state(QueueState::Validated)? {
            let id = candidate.id();
            let _guard = self.locks.acquire(&candidate.transaction.user_id).await;

            match self.replay_current(id).await {
                Ok(Some(state)) => {
                    self.queue.metrics().record_sync_outcome(state);
                    outcomes.push((id, state));
                }
                Ok(None) => {}
                Err(e) => self.skip_entry(id, "replay", &e),
            }
        }

        let report = SyncReport {
            run_id: Uuid::now_v7(),
            started_at,
            finished_at: Utc::now(),
            rearmed,
            outcomes,
        };
        self.queue.record_sync(&report, self.config.sync_log_retention)?;
        self.queue.metrics().update_queue_depth(&self.queue.stats()?);
        Ok(report)
    }

    fn skip_entry(&self, transaction_id: Uuid, phase: &'static str, error: &Error) {
        self.queue.metrics().record_entry_error();
        tracing::error!(
            transaction_id = %transaction_id,
            phase,
            error = %error,
            "Sync skipped entry"
        );
    }

    async fn rearm_failed(&self) -> Result<usize> {
        let mut rearmed = 0;
        for candidate in self.queue.entries_in_state(QueueState::Failed)? {
            if candidate.is_exhausted(self.config.max_attempts) {
                continue;
            }
            let id = candidate.id();
            let _guard = self.locks.acquire(&candidate.transaction.user_id).await;

            match self.rearm(id) {
                Ok(true) => rearmed += 1,
                Ok(false) => {}
                Err(e) => self.skip_entry(id, "rearm", &e),
            }
        }
        Ok(rearmed)
    }

    fn rearm(&self, transaction_id: Uuid) -> Result<bool> {
        let mut entry = match self.queue.get(transaction_id)? {
            Some(entry) if entry.state == QueueState::Failed => entry,
            _ => return Ok(false),
        };
        let due = entry.next_attempt_at.map_or(true, |at| at <= Utc::now());
        if !due {
            return Ok(false);
        }

        entry.transition(QueueState::Pending, format!("retry {}", entry.attempts + 1))?;
        entry.next_attempt_at = None;
        self.queue.update(&entry)?;
        Ok(true)
    }

    /// PENDING entries become VALIDATED, or REJECTED when they were never
    /// validated and now break a cap. Only rejections are reported here;
    /// validated entries are replayed in the same run.
    async fn promote_pending(&self) -> Result<Vec<(Uuid, QueueState)>> {
        let mut outcomes = Vec::new();
        for candidate in self.queue.entries_in_state(QueueState::Pending)? {
            let id = candidate.id();
            let _guard = self.locks.acquire(&candidate.transaction.user_id).await;

            match self.promote(id) {
                Ok(Some(QueueState::Rejected)) => {
                    self.queue.metrics().record_sync_outcome(QueueState::Rejected);
                    outcomes.push((id, QueueState::Rejected));
                }
                Ok(_) => {}
                Err(e) => self.skip_entry(id, "promote", &e),
            }
        }
        Ok(outcomes)
    }

    fn promote(&self, transaction_id: Uuid) -> Result<Option<QueueState>> {
        match self.queue.get(transaction_id)? {
            Some(entry) if entry.state == QueueState::Pending => {
                Ok(Some(self.queue.revalidate(entry)?.state))
            }
            _ => Ok(None),
        }
    }

    async fn replay_current(&self, transaction_id: Uuid) -> Result<Option<QueueState>> {
        match self.queue.get(transaction_id)? {
            Some(entry) if entry.state == QueueState::Validated => self.replay(entry).await.map(Some),
            _ => Ok(None),
        }
    }

    async fn replay(&self, mut entry: QueueEntry) -> Result<QueueState> {
        match self.ledger.contains(entry.id()).await {
            Ok(true) => {
                tracing::info!(transaction_id = %entry.id(), "Already in ledger, profile left unchanged");
                return self.mark_synced(entry, "already in ledger");
            }
            Ok(false) => {}
            Err(e) => return self.fail(entry, format!("ledger lookup failed: {}", e)),
        }

        let assessment = self.scorer.assess(&entry.transaction);

        match assessment.decision {
            Decision::Approve => self.settle(entry, &assessment).await,

            Decision::Challenge => {
                let tier = assessment.required_tier.unwrap_or(AuthTier::Medium);
                match self.challenge(&entry, tier).await {
                    Ok(()) => self.settle(entry, &assessment).await,
                    Err(reason) => self.fail(entry, reason),
                }
            }

            Decision::Block => {
                entry.last_error = Some("blocked on replay".to_string());
                entry.transition(QueueState::Rejected, "blocked on replay")?;
                self.queue.update(&entry)?;
                tracing::info!(transaction_id = %entry.id(), score = %assessment.score, "Offline transaction blocked on replay");
                Ok(QueueState::Rejected)
            }
        }
    }

    async fn challenge(&self, entry: &QueueEntry, tier: AuthTier) -> std::result::Result<(), String> {
        let user_id = &entry.transaction.user_id;
        let timeout = self.config.auth_timeout();

        match tokio::time::timeout(timeout, self.authenticator.reauthenticate(user_id, tier)).await {
            Ok(Ok(true)) => Ok(()),
            Ok(Ok(false)) => Err("re-authentication failed".to_string()),
            Ok(Err(e)) => Err(format!("re-authentication error: {}", e)),
            Err(_) => Err(format!("re-authentication timed out after {}s", timeout.as_secs())),
        }
    }

    async fn settle(&self, entry: QueueEntry, assessment: &RiskAssessment) -> Result<QueueState> {
        let tx = entry.transaction.clone();
        let ledger_entry = LedgerEntry::from_transaction(&tx, assessment.score, EntrySource::OfflineSync);
        let budget = Duration::from_millis(self.config.apply_max_elapsed_ms);

        match apply_with_retry(self.ledger.as_ref(), ledger_entry, budget).await {
            Ok(ApplyOutcome::Applied) => {
                match assessment.decision {
                    Decision::Challenge => {
                        self.scorer.commit_after_challenge(&tx, assessment)?;
                    }
                    _ => {
                        self.scorer.commit(&tx, assessment)?;
                    }
                }
            }
            Ok(ApplyOutcome::AlreadyApplied) => {
                tracing::info!(transaction_id = %tx.id, "Already in ledger, profile left unchanged");
            }
            Err(e) => return self.fail(entry, format!("ledger apply failed: {}", e)),
        }

        let reason = match assessment.decision {
            Decision::Challenge => "approved after re-authentication",
            _ => "approved on replay",
        };
        self.mark_synced(entry, reason)
    }

    fn mark_synced(&self, mut entry: QueueEntry, reason: &str) -> Result<QueueState> {
        entry.last_error = None;
        entry.transition(QueueState::Synced, reason)?;
        self.queue.update(&entry)?;

        tracing::info!(
            transaction_id = %entry.id(),
            user_id = %entry.transaction.user_id,
            reason,
            "Offline transaction synced"
        );
        Ok(QueueState::Synced)
    }

    fn fail(&self, mut entry: QueueEntry, reason: String) -> Result<QueueState> {
        entry.attempts += 1;
        entry.last_error = Some(reason.clone());
        entry.transition(QueueState::Failed, reason.clone())?;

        if entry.is_exhausted(self.config.max_attempts) {
            entry.next_attempt_at = None;
            tracing::warn!(
                transaction_id = %entry.id(),
                attempts = entry.attempts,
                reason = %reason,
                "Replay retries exhausted"
            );
        } else {
            entry.next_attempt_at = Some(Utc::now() + self.config.retry_delay(entry.attempts));
            tracing::warn!(
                transaction_id = %entry.id(),
                attempts = entry.attempts,
                reason = %reason,
                "Replay failed, will retry"
            );
        }

        self.queue.update(&entry)?;
        Ok(QueueState::Failed)
    }

    /// Sync configuration
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{auth::NoChannelAuthenticator, config::QueueConfig, metrics::SyncMetrics};
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone};
    use fraud_engine::{FraudThresholds, Metrics, ProfileStore, TieredAuthPolicy, Transaction, UserId};
    use rust_decimal::Decimal;
    use std::collections::HashSet;
    use std::sync::Mutex as SyncMutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct MemoryLedger {
        applied: SyncMutex<HashSet<Uuid>>,
    }

    #[async_trait]
    impl LedgerWriter for MemoryLedger {
        async fn apply(&self, entry: LedgerEntry) -> ledger_core::Result<ApplyOutcome> {
            if self.applied.lock().unwrap().insert(entry.transaction_id) {
                Ok(ApplyOutcome::Applied)
            } else {
                Ok(ApplyOutcome::AlreadyApplied)
            }
        }

        async fn contains(&self, transaction_id: Uuid) -> ledger_core::Result<bool> {
            Ok(self.applied.lock().unwrap().contains(&transaction_id))
        }

        async fn user_entries(&self, _user_id: &UserId) -> ledger_core::Result<Vec<LedgerEntry>> {
            Ok(Vec::new())
        }
    }

    struct Fixture {
        sync: Synchronizer,
        queue: Arc<OfflineQueue>,
        scorer: Arc<Scorer>,
        ledger: Arc<MemoryLedger>,
        _dir: TempDir,
    }

    fn fixture(config: SyncConfig) -> Fixture {
        let dir = TempDir::new().unwrap();
        let thresholds = FraudThresholds::default();
        let queue = Arc::new(
            OfflineQueue::open(
                &QueueConfig {
                    data_dir: dir.path().to_path_buf(),
                    sync_writes: true,
                },
                thresholds.clone(),
                SyncMetrics::new().unwrap(),
            )
            .unwrap(),
        );
        let scorer = Arc::new(Scorer::new(
            thresholds.clone(),
            Arc::new(ProfileStore::new(&thresholds)),
            Arc::new(TieredAuthPolicy),
            None,
            Metrics::new().unwrap(),
        ));
        let ledger = Arc::new(MemoryLedger::default());
        let sync = Synchronizer::new(
            queue.clone(),
            scorer.clone(),
            ledger.clone(),
            Arc::new(NoChannelAuthenticator),
            Arc::new(UserLocks::new()),
            config,
        );
        Fixture {
            sync,
            queue,
            scorer,
            ledger,
            _dir: dir,
        }
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 5, h, m, 0).unwrap()
    }

    fn tx(amount: i64, ts: DateTime<Utc>) -> Transaction {
        Transaction::new(UserId::new("U1"), Decimal::from(amount), ts, "DEV-1", "").offline()
    }

    #[tokio::test]
    async fn test_approve_replay_syncs_once() {
        let f = fixture(SyncConfig::default());
        let entry = f.queue.enqueue(tx(800, at(12, 0)), true).unwrap();

        let first = f.sync.sync_pending().await.unwrap();
        assert_eq!(first.outcomes, vec![(entry.id(), QueueState::Synced)]);

        let second = f.sync.sync_pending().await.unwrap();
        assert!(second.outcomes.is_empty());

        let profile = f.scorer.profiles().get_profile(&UserId::new("U1"));
        assert_eq!(profile.transaction_count, 1);
        assert_eq!(profile.average_amount, Decimal::from(800));
        assert_eq!(f.ledger.applied.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_already_applied_syncs_without_profile_update() {
        let f = fixture(SyncConfig::default());
        let entry = f.queue.enqueue(tx(800, at(12, 0)), true).unwrap();
        f.ledger.applied.lock().unwrap().insert(entry.id());

        let report = f.sync.sync_pending().await.unwrap();
        assert_eq!(report.outcomes, vec![(entry.id(), QueueState::Synced)]);
        assert!(f.scorer.profiles().peek(&UserId::new("U1")).map_or(true, |p| p.transaction_count == 0));
    }

    #[tokio::test]
    async fn test_rerun_after_commit_does_not_rescore() {
        let f = fixture(SyncConfig::default());
        let user = UserId::new("U1");
        let entry = f.queue.enqueue(tx(800, at(12, 0)), true).unwrap();

        // Earlier run applied and committed, then stopped before the queue update
        f.ledger.applied.lock().unwrap().insert(entry.id());
        f.scorer.profiles().record_approved(&user, Decimal::from(800), at(12, 0)).unwrap();

        for _ in 0..3 {
            f.sync.sync_pending().await.unwrap();
        }

        let stored = f.queue.get(entry.id()).unwrap().unwrap();
        assert_eq!(stored.state, QueueState::Synced);
        assert_eq!(stored.attempts, 0);
        assert_eq!(f.scorer.profiles().get_profile(&user).transaction_count, 1);
        assert_eq!(f.scorer.metrics().statistics().total_assessments, 0);
    }

    #[tokio::test]
    async fn test_applied_entry_is_synced_even_if_it_would_block() {
        let f = fixture(SyncConfig::default());
        let user = UserId::new("U1");
        f.scorer.profiles().record_approved(&user, Decimal::from(100), at(1, 58)).unwrap();
        // Would score 0.80 and BLOCK, but the ledger already holds it
        let entry = f.queue.enqueue(tx(9_000, at(2, 0)), true).unwrap();
        f.ledger.applied.lock().unwrap().insert(entry.id());

        let report = f.sync.sync_pending().await.unwrap();
        assert_eq!(report.outcomes, vec![(entry.id(), QueueState::Synced)]);

        let stored = f.queue.get(entry.id()).unwrap().unwrap();
        assert!(stored.last_error.is_none());
        assert_eq!(f.scorer.profiles().get_profile(&user).transaction_count, 1);
    }

    #[tokio::test]
    async fn test_corrupted_entry_does_not_stop_the_run() {
        let f = fixture(SyncConfig::default());
        let good = f.queue.enqueue(tx(300, at(12, 0)), true).unwrap();
        let other = Transaction::new(UserId::new("U2"), Decimal::from(400), at(12, 5), "DEV-2", "").offline();
        let mut bad = f.queue.enqueue(other, true).unwrap();
        bad.checksum = "00".repeat(32);
        f.queue.update(&bad).unwrap();

        let report = f.sync.sync_pending().await.unwrap();
        assert_eq!(report.outcomes, vec![(good.id(), QueueState::Synced)]);

        let stats = f.queue.stats().unwrap();
        assert_eq!(stats.synced, 1);
        assert_eq!(stats.unreadable, 1);
        assert_eq!(f.queue.metrics().unreadable_entries.get(), 1);
        assert!(f.sync.sync_pending().await.is_ok());
    }

    #[tokio::test]
    async fn test_entry_error_is_skipped_and_counted() {
        let f = fixture(SyncConfig::default());
        let a = f.queue.enqueue(tx(300, at(12, 0)), true).unwrap();
        let b = f.queue.enqueue(tx(400, at(12, 10)), true).unwrap();

        // Corrupt `a` after the candidate list is read: the re-read fails
        let mut broken = f.queue.get(a.id()).unwrap().unwrap();
        broken.checksum = "00".repeat(32);
        let candidates = f.queue.entries_in_state(QueueState::Validated).unwrap();
        f.queue.update(&broken).unwrap();

        for candidate in candidates {
            let id = candidate.id();
            if let Err(e) = f.sync.replay_current(id).await {
                f.sync.skip_entry(id, "replay", &e);
            }
        }

        assert_eq!(f.queue.get(b.id()).unwrap().unwrap().state, QueueState::Synced);
        assert_eq!(f.queue.metrics().entry_errors_total.get(), 1);
    }

    #[tokio::test]
    async fn test_failed_challenge_is_retried_then_exhausted() {
        let config = SyncConfig {
            retry_base_secs: 0,
            ..SyncConfig::default()
        };
        let f = fixture(config);
        let user = UserId::new("U1");
        f.scorer.profiles().record_approved(&user, Decimal::from(5_000), at(1, 58)).unwrap();
        // Unusual hour + rapid: 0.50, CHALLENGE
        let entry = f.queue.enqueue(tx(9_000, at(2, 0)), true).unwrap();
        let mut night = f.queue.get(entry.id()).unwrap().unwrap();
        assert_eq!(night.state, QueueState::Validated);

        for attempt in 1..=3 {
            let report = f.sync.sync_pending().await.unwrap();
            night = f.queue.get(entry.id()).unwrap().unwrap();
            assert_eq!(night.state, QueueState::Failed, "attempt {}", attempt);
            assert_eq!(night.attempts, attempt);
            assert_eq!(report.count(QueueState::Failed), 1);
        }

        let report = f.sync.sync_pending().await.unwrap();
        assert!(report.outcomes.is_empty());
        assert_eq!(report.rearmed, 0);
        assert!(night.is_exhausted(3));
        assert!(f.ledger.applied.lock().unwrap().is_empty());
        assert_eq!(f.scorer.profiles().get_profile(&user).transaction_count, 1);
    }

    #[tokio::test]
    async fn test_failed_entry_waits_for_next_attempt() {
        let f = fixture(SyncConfig::default());
        f.scorer
            .profiles()
            .record_approved(&UserId::new("U1"), Decimal::from(5_000), at(1, 58))
            .unwrap();
        let entry = f.queue.enqueue(tx(9_000, at(2, 0)), true).unwrap();

        f.sync.sync_pending().await.unwrap();
        let report = f.sync.sync_pending().await.unwrap();

        assert_eq!(report.rearmed, 0);
        let stored = f.queue.get(entry.id()).unwrap().unwrap();
        assert_eq!(stored.state, QueueState::Failed);
        assert_eq!(stored.attempts, 1);
        assert!(stored.next_attempt_at.unwrap() > Utc::now());
    }

    #[tokio::test]
    async fn test_block_on_replay_rejects() {
        let f = fixture(SyncConfig::default());
        let user = UserId::new("U1");
        f.scorer.profiles().record_approved(&user, Decimal::from(100), at(1, 58)).unwrap();
        // Unusual hour + rapid + spike: 0.80, BLOCK
        let entry = f.queue.enqueue(tx(9_000, at(2, 0)), true).unwrap();

        let report = f.sync.sync_pending().await.unwrap();
        assert_eq!(report.outcomes, vec![(entry.id(), QueueState::Rejected)]);

        let stored = f.queue.get(entry.id()).unwrap().unwrap();
        assert_eq!(stored.last_error.as_deref(), Some("blocked on replay"));
        assert_eq!(f.scorer.profiles().get_profile(&user).transaction_count, 1);
        assert!(f.ledger.applied.lock().unwrap().is_empty());

        // Final: never replayed again
        assert!(f.sync.sync_pending().await.unwrap().outcomes.is_empty());
    }

    #[tokio::test]
    async fn test_sync_log_records_runs() {
        let f = fixture(SyncConfig::default());
        f.queue.enqueue(tx(100, at(12, 0)), true).unwrap();
        let report = f.sync.sync_pending().await.unwrap();

        let recent = f.queue.recent_syncs(5).unwrap();
        assert_eq!(recent.first().map(|r| r.run_id), Some(report.run_id));
        assert_eq!(f.queue.metrics().sync_runs_total.with_label_values(&["ok"]).get(), 1);
    }
}
