//! Public engine facade
//!
//! Ties the online scoring path and the offline queue together and keeps
//! them apart: a transaction id handled on one path is refused on the other.
//! Online assessments are journaled in the queue database, so that rule and
//! any open challenge survive a restart.
//!
//! Every operation that reads or advances a user's state runs under that
//! user's lock.

use chrono::{DateTime, Utc};
use fraud_engine::{
    BehavioralProfile, Decision, FraudStatistics, FraudThresholds, InMemoryUserDirectory, Metrics,
    ProfileStore, RiskAssessment, RiskModel, TierPolicy, TieredAuthPolicy, Transaction,
    UserDirectory, UserId, UserLocks,
};
use ledger_core::{ApplyOutcome, EntrySource, LedgerEntry};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

use crate::{
    auth::{Authenticator, NoChannelAuthenticator},
    config::{NodeConfig, QueueConfig, SyncConfig},
    metrics::SyncMetrics,
    queue::OfflineQueue,
    scoring::Scorer,
    service::{SyncService, SyncServiceHandle},
    sync::Synchronizer,
    types::{ChallengeResolution, Connectivity, OnlineRecord, QueueEntry, QueueState, QueueStats},
    writer::{apply_with_retry, LedgerWriter},
    Error, Result,
};

/// Where a submitted transaction went
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    /// Scored online
    Assessed(RiskAssessment),
    /// Queued for later reconciliation
    Queued(QueueEntry),
}

/// Engine-wide counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineStatistics {
    /// Assessment counts and rates
    pub fraud: FraudStatistics,
    /// Offline queue counts per state
    pub queue: QueueStats,
    /// Users with a behavioral profile
    pub tracked_users: usize,
    /// Online challenges waiting for a resolution
    pub open_challenges: usize,
    /// End of the most recent sync run
    pub last_sync_at: Option<DateTime<Utc>>,
}

/// Hybrid fraud scoring and offline reconciliation engine
pub struct Engine {
    scorer: Arc<Scorer>,
    queue: Arc<OfflineQueue>,
    synchronizer: Arc<Synchronizer>,
    ledger: Arc<dyn LedgerWriter>,
    directory: Arc<dyn UserDirectory>,
    locks: Arc<UserLocks>,
    connectivity: watch::Sender<Connectivity>,
    sync_config: SyncConfig,
}

impl Engine {
    /// Start building an engine
    pub fn builder(thresholds: FraudThresholds) -> EngineBuilder {
        EngineBuilder::new(thresholds)
    }

    /// Score a transaction online.
    ///
    /// APPROVE applies the transfer to the ledger and advances the profile.
    /// CHALLENGE waits for [`Engine::resolve_challenge`]. BLOCK changes
    /// nothing. Calling again with the same id returns the first assessment.
    pub async fn evaluate(&self, tx: Transaction) -> Result<RiskAssessment> {
        self.validate(&tx)?;
        let _guard = self.locks.acquire(&tx.user_id).await;

        if let Some(record) = self.queue.online_record(tx.id)? {
            return Ok(record.assessment);
        }
        if self.queue.contains(tx.id)? {
            return Err(Error::Validation(format!(
                "transaction {} is already queued offline",
                tx.id
            )));
        }

        let assessment = self.scorer.assess(&tx);

        if assessment.decision == Decision::Approve {
            match self.apply_online(&tx, &assessment).await? {
                ApplyOutcome::Applied => {
                    self.scorer.commit(&tx, &assessment)?;
                }
                ApplyOutcome::AlreadyApplied => {
                    tracing::warn!(transaction_id = %tx.id, "Already in ledger, profile left unchanged");
                }
            }
        }

        self.queue.record_online(&OnlineRecord::new(tx, assessment.clone()))?;
        Ok(assessment)
    }

    /// Queue a transaction made without connectivity
    pub async fn enqueue_offline(&self, tx: Transaction, device_trusted: bool) -> Result<QueueEntry> {
        self.validate(&tx)?;
        let _guard = self.locks.acquire(&tx.user_id).await;

        if self.queue.online_record(tx.id)?.is_some() {
            return Err(Error::Validation(format!(
                "transaction {} was already evaluated online",
                tx.id
            )));
        }

        let tx = if tx.is_offline { tx } else { tx.offline() };
        self.queue.enqueue(tx, device_trusted)
    }

    /// Reconcile queued entries now
    pub async fn sync_pending(&self) -> Result<Vec<(Uuid, QueueState)>> {
        Ok(self.synchronizer.sync_pending().await?.outcomes)
    }

    /// Route by current connectivity
    pub async fn submit(&self, tx: Transaction, device_trusted: bool) -> Result<Submission> {
        match self.connectivity() {
            Connectivity::Online => self.evaluate(tx).await.map(Submission::Assessed),
            Connectivity::Offline => self
                .enqueue_offline(tx, device_trusted)
                .await
                .map(Submission::Queued),
        }
    }

    /// Finish an online CHALLENGE.
    ///
    /// On success the transfer is applied and the profile advanced once.
    /// Resolving the same challenge again returns the first resolution.
    pub async fn resolve_challenge(&self, transaction_id: Uuid, authenticated: bool) -> Result<ChallengeResolution> {
        let user_id = self
            .queue
            .online_record(transaction_id)?
            .map(|r| r.user_id)
            .ok_or(Error::NotFound(transaction_id))?;
        let _guard = self.locks.acquire(&user_id).await;

        let mut record = self
            .queue
            .online_record(transaction_id)?
            .ok_or(Error::NotFound(transaction_id))?;

        if record.assessment.decision != Decision::Challenge {
            return Err(Error::Validation(format!(
                "transaction {} has no open challenge",
                transaction_id
            )));
        }
        if let Some(resolution) = record.resolution {
            return Ok(resolution);
        }

        let resolution = if authenticated {
            let tx = record
                .transaction
                .as_ref()
                .ok_or_else(|| Error::Storage(format!("open challenge {} has no transaction", transaction_id)))?;
            match self.apply_online(tx, &record.assessment).await? {
                ApplyOutcome::Applied => {
                    self.scorer.commit_after_challenge(tx, &record.assessment)?;
                }
                ApplyOutcome::AlreadyApplied => {
                    tracing::warn!(transaction_id = %tx.id, "Already in ledger, profile left unchanged");
                }
            }
            ChallengeResolution::Approved
        } else {
            ChallengeResolution::Declined
        };

        record.resolve(resolution);
        self.queue.record_online(&record)?;

        tracing::info!(
            transaction_id = %transaction_id,
            user_id = %user_id,
            resolution = ?resolution,
            "Challenge resolved"
        );
        Ok(resolution)
    }

    /// Export the user's authoritative profile to the device cache used for
    /// offline scoring
    pub async fn refresh_device_cache(&self, user_id: &UserId) -> Result<BehavioralProfile> {
        if !self.directory.is_known(user_id) {
            return Err(Error::Validation(format!("unknown user {}", user_id)));
        }
        let _guard = self.locks.acquire(user_id).await;

        let snapshot = self.scorer.profiles().snapshot_for_cache(user_id);
        self.queue.cache_profile(&snapshot)?;
        Ok(snapshot)
    }

    /// Fraud and queue statistics
    pub fn statistics(&self) -> Result<EngineStatistics> {
        Ok(EngineStatistics {
            fraud: self.scorer.metrics().statistics(),
            queue: self.queue.stats()?,
            tracked_users: self.scorer.profiles().tracked_users(),
            open_challenges: self.queue.open_challenges()?,
            last_sync_at: self.queue.recent_syncs(1)?.first().map(|r| r.finished_at),
        })
    }

    /// Current authoritative profile, if any
    pub fn profile(&self, user_id: &UserId) -> Option<BehavioralProfile> {
        self.scorer.profiles().peek(user_id)
    }

    /// Queue entry by transaction id
    pub fn queue_entry(&self, transaction_id: Uuid) -> Result<Option<QueueEntry>> {
        self.queue.get(transaction_id)
    }

    /// Current connectivity
    pub fn connectivity(&self) -> Connectivity {
        *self.connectivity.borrow()
    }

    /// Report a connectivity change
    pub fn set_connectivity(&self, connectivity: Connectivity) {
        let previous = self.connectivity.send_replace(connectivity);
        if previous != connectivity {
            tracing::info!(?previous, current = ?connectivity, "Connectivity changed");
        }
    }

    /// Start the background synchronizer, driven by this engine's
    /// connectivity and the configured poll interval
    pub fn spawn_sync_service(&self) -> SyncServiceHandle {
        SyncService::spawn(
            self.synchronizer.clone(),
            self.connectivity.subscribe(),
            self.sync_config.poll_interval(),
        )
    }

    /// Fraud metrics
    pub fn fraud_metrics(&self) -> &Metrics {
        self.scorer.metrics()
    }

    /// Offline path metrics
    pub fn sync_metrics(&self) -> &SyncMetrics {
        self.queue.metrics()
    }

    fn validate(&self, tx: &Transaction) -> Result<()> {
        if tx.amount <= Decimal::ZERO {
            return Err(Error::Validation(format!("amount must be positive, got {}", tx.amount)));
        }
        if tx.user_id.as_str().is_empty() {
            return Err(Error::Validation("user_id must not be empty".to_string()));
        }
        if tx.device_id.is_empty() {
            return Err(Error::Validation("device_id must not be empty".to_string()));
        }
        if !self.directory.is_known(&tx.user_id) {
            return Err(Error::Validation(format!("unknown user {}", tx.user_id)));
        }
        Ok(())
    }

    async fn apply_online(&self, tx: &Transaction, assessment: &RiskAssessment) -> Result<ApplyOutcome> {
        let entry = LedgerEntry::from_transaction(tx, assessment.score, EntrySource::Online);
        let budget = Duration::from_millis(self.sync_config.apply_max_elapsed_ms);
        apply_with_retry(self.ledger.as_ref(), entry, budget).await
    }
}

/// Builder for [`Engine`]
pub struct EngineBuilder {
    thresholds: FraudThresholds,
    queue: QueueConfig,
    sync: SyncConfig,
    directory: Arc<dyn UserDirectory>,
    tier_policy: Arc<dyn TierPolicy>,
    model: Option<Arc<dyn RiskModel>>,
    authenticator: Arc<dyn Authenticator>,
    connectivity: Connectivity,
}

impl EngineBuilder {
    /// Defaults: empty directory, tiered policy, no advisory model, no
    /// authentication channel, offline
    pub fn new(thresholds: FraudThresholds) -> Self {
        Self {
            thresholds,
            queue: QueueConfig::default(),
            sync: SyncConfig::default(),
            directory: Arc::new(InMemoryUserDirectory::default()),
            tier_policy: Arc::new(TieredAuthPolicy),
            model: None,
            authenticator: Arc::new(NoChannelAuthenticator),
            connectivity: Connectivity::Offline,
        }
    }

    /// Builder seeded from a node configuration
    pub fn from_config(config: &NodeConfig) -> Self {
        let connectivity = if config.start_online {
            Connectivity::Online
        } else {
            Connectivity::Offline
        };
        Self::new(config.thresholds.clone())
            .with_queue_config(config.queue.clone())
            .with_sync_config(config.sync.clone())
            .with_directory(Arc::new(InMemoryUserDirectory::with_users(
                config.known_users.iter().cloned(),
            )))
            .with_connectivity(connectivity)
    }

    /// Queue storage
    pub fn with_queue_config(mut self, queue: QueueConfig) -> Self {
        self.queue = queue;
        self
    }

    /// Reconciliation settings
    pub fn with_sync_config(mut self, sync: SyncConfig) -> Self {
        self.sync = sync;
        self
    }

    /// Known-user directory
    pub fn with_directory(mut self, directory: Arc<dyn UserDirectory>) -> Self {
        self.directory = directory;
        self
    }

    /// Authentication tier policy
    pub fn with_tier_policy(mut self, tier_policy: Arc<dyn TierPolicy>) -> Self {
        self.tier_policy = tier_policy;
        self
    }

    /// Advisory risk model
    pub fn with_model(mut self, model: Arc<dyn RiskModel>) -> Self {
        self.model = Some(model);
        self
    }

    /// Step-up authenticator used on replay
    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = authenticator;
        self
    }

    /// Initial connectivity
    pub fn with_connectivity(mut self, connectivity: Connectivity) -> Self {
        self.connectivity = connectivity;
        self
    }

    /// Open the queue and assemble the engine over `ledger`. Profiles of
    /// known users are rebuilt from their ledger history.
    pub async fn build(self, ledger: Arc<dyn LedgerWriter>) -> Result<Engine> {
        self.thresholds.validate()?;
        self.sync.validate()?;

        let sync_metrics = SyncMetrics::new()?;
        let queue = Arc::new(OfflineQueue::open(&self.queue, self.thresholds.clone(), sync_metrics)?);

        let profiles = Arc::new(ProfileStore::new(&self.thresholds));
        let restored = restore_profiles(&profiles, ledger.as_ref(), self.directory.as_ref()).await?;
        let scorer = Arc::new(Scorer::new(
            self.thresholds,
            profiles,
            self.tier_policy,
            self.model,
            Metrics::new()?,
        ));

        let locks = Arc::new(UserLocks::new());
        let synchronizer = Arc::new(Synchronizer::new(
            queue.clone(),
            scorer.clone(),
            ledger.clone(),
            self.authenticator,
            locks.clone(),
            self.sync.clone(),
        ));
        let (connectivity, _) = watch::channel(self.connectivity);

        tracing::info!(connectivity = ?self.connectivity, restored_profiles = restored, "Fraud engine ready");

        Ok(Engine {
            scorer,
            queue,
            synchronizer,
            ledger,
            directory: self.directory,
            locks,
            connectivity,
            sync_config: self.sync,
        })
    }
}

async fn restore_profiles(
    profiles: &ProfileStore,
    ledger: &dyn LedgerWriter,
    directory: &dyn UserDirectory,
) -> Result<usize> {
    let mut restored = 0;
    for user_id in directory.users() {
        let history = ledger.user_entries(&user_id).await?;
        if history.is_empty() {
            continue;
        }
        let profile = profiles.rebuild(&user_id, history.iter().map(|e| (e.amount, e.timestamp)))?;
        tracing::debug!(
            user_id = %user_id,
            transaction_count = profile.transaction_count,
            "Profile restored from ledger"
        );
        restored += 1;
    }
    Ok(restored)
}
