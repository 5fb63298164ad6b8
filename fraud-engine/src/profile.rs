//! Behavioral profile store
//!
//! Keeps a rolling baseline per user: running mean of approved amounts and a
//! bounded, sorted window of recent approved timestamps.
//!
//! Each profile sits behind its own `RwLock`, so readers see either the
//! pre-update or the fully post-update profile, and users never contend with
//! each other.

use crate::{Error, FraudThresholds, Result, UserId};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;

/// Per-user behavioral baseline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BehavioralProfile {
    /// Owner
    pub user_id: UserId,

    /// Running mean of approved amounts
    pub average_amount: Decimal,

    /// Number of approved transactions
    pub transaction_count: u64,

    /// Largest approved amount
    pub max_amount: Decimal,

    /// Recent approved timestamps, ascending
    pub last_transaction_times: VecDeque<DateTime<Utc>>,

    /// Most recent approved timestamp, kept after window eviction
    pub last_transaction_at: Option<DateTime<Utc>>,

    /// Average captured when this profile was last exported to a device cache
    pub last_sync_amount_baseline: Decimal,
}

impl BehavioralProfile {
    /// Zero-initialized profile
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            average_amount: Decimal::ZERO,
            transaction_count: 0,
            max_amount: Decimal::ZERO,
            last_transaction_times: VecDeque::new(),
            last_transaction_at: None,
            last_sync_amount_baseline: Decimal::ZERO,
        }
    }

    /// Latest recorded transaction at or before `at`
    pub fn previous_transaction(&self, at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.last_transaction_times
            .iter()
            .rev()
            .find(|t| **t <= at)
            .copied()
            .or_else(|| self.last_transaction_at.filter(|t| *t <= at))
    }

    /// Recorded transactions in `(at - window, at]`
    pub fn transactions_in_window(&self, at: DateTime<Utc>, window: Duration) -> usize {
        let start = at - window;
        self.last_transaction_times
            .iter()
            .filter(|t| **t > start && **t <= at)
            .count()
    }

    fn apply_approved(&mut self, amount: Decimal, timestamp: DateTime<Utc>, horizon: Duration, max_len: usize) {
        self.transaction_count += 1;
        self.average_amount += (amount - self.average_amount) / Decimal::from(self.transaction_count);
        self.max_amount = self.max_amount.max(amount);

        // Offline replays can arrive out of order; keep the window sorted.
        let pos = self.last_transaction_times.partition_point(|t| *t <= timestamp);
        self.last_transaction_times.insert(pos, timestamp);

        self.last_transaction_at = Some(match self.last_transaction_at {
            Some(last) => last.max(timestamp),
            None => timestamp,
        });

        if let Some(newest) = self.last_transaction_times.back().copied() {
            let cutoff = newest - horizon;
            while self.last_transaction_times.front().map_or(false, |t| *t < cutoff) {
                self.last_transaction_times.pop_front();
            }
        }
        while self.last_transaction_times.len() > max_len {
            self.last_transaction_times.pop_front();
        }
    }
}

/// Concurrent profile store keyed by user
pub struct ProfileStore {
    profiles: DashMap<UserId, Arc<RwLock<BehavioralProfile>>>,
    horizon: Duration,
    max_len: usize,
}

impl ProfileStore {
    /// Create a store using the recency settings from `thresholds`
    pub fn new(thresholds: &FraudThresholds) -> Self {
        Self {
            profiles: DashMap::new(),
            horizon: Duration::seconds(thresholds.velocity_window_seconds),
            max_len: thresholds.max_recent_transactions,
        }
    }

    fn slot(&self, user_id: &UserId) -> Arc<RwLock<BehavioralProfile>> {
        // Clone the Arc out so the shard lock is released before the profile lock is taken.
        self.profiles
            .entry(user_id.clone())
            .or_insert_with(|| Arc::new(RwLock::new(BehavioralProfile::new(user_id.clone()))))
            .value()
            .clone()
    }

    /// Profile for `user_id`, created zero-initialized on first access
    pub fn get_profile(&self, user_id: &UserId) -> BehavioralProfile {
        self.slot(user_id).read().clone()
    }

    /// Profile for `user_id` if one exists
    pub fn peek(&self, user_id: &UserId) -> Option<BehavioralProfile> {
        self.profiles.get(user_id).map(|slot| slot.read().clone())
    }

    /// Advance the baseline with an approved transaction
    pub fn record_approved(
        &self,
        user_id: &UserId,
        amount: Decimal,
        timestamp: DateTime<Utc>,
    ) -> Result<BehavioralProfile> {
        if amount <= Decimal::ZERO {
            return Err(Error::Validation(format!("amount must be positive, got {}", amount)));
        }

        let slot = self.slot(user_id);
        let mut profile = slot.write();
        profile.apply_approved(amount, timestamp, self.horizon, self.max_len);

        tracing::debug!(
            user_id = %user_id,
            average_amount = %profile.average_amount,
            transaction_count = profile.transaction_count,
            "Profile advanced"
        );

        Ok(profile.clone())
    }

    /// Export a profile for device-side caching, stamping the sync baseline
    pub fn snapshot_for_cache(&self, user_id: &UserId) -> BehavioralProfile {
        let slot = self.slot(user_id);
        let mut profile = slot.write();
        profile.last_sync_amount_baseline = profile.average_amount;
        profile.clone()
    }

    /// Install a cached snapshot (device side)
    pub fn install(&self, profile: BehavioralProfile) {
        self.profiles
            .insert(profile.user_id.clone(), Arc::new(RwLock::new(profile)));
    }

    /// Replace a user's profile with one rebuilt from approved history,
    /// applied in timestamp order
    pub fn rebuild<I>(&self, user_id: &UserId, history: I) -> Result<BehavioralProfile>
    where
        I: IntoIterator<Item = (Decimal, DateTime<Utc>)>,
    {
        let mut history: Vec<_> = history.into_iter().collect();
        history.sort_by_key(|(_, timestamp)| *timestamp);

        let mut profile = BehavioralProfile::new(user_id.clone());
        for (amount, timestamp) in history {
            if amount <= Decimal::ZERO {
                return Err(Error::Validation(format!("amount must be positive, got {}", amount)));
            }
            profile.apply_approved(amount, timestamp, self.horizon, self.max_len);
        }

        self.install(profile.clone());
        Ok(profile)
    }

    /// Number of tracked users
    pub fn tracked_users(&self) -> usize {
        self.profiles.len()
    }
}
