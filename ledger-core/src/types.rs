//! Core types for the ledger

use chrono::{DateTime, Utc};
use fraud_engine::{RiskScore, Transaction, UserId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Path an entry reached the ledger through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntrySource {
    /// Approved at request time
    Online,
    /// Approved on replay of an offline queue entry
    OfflineSync,
}

impl EntrySource {
    /// Label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            EntrySource::Online => "online",
            EntrySource::OfflineSync => "offline_sync",
        }
    }
}

/// An applied transfer. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Transaction id (idempotency key)
    pub transaction_id: Uuid,

    /// Originating user
    pub user_id: UserId,

    /// Amount
    pub amount: Decimal,

    /// Declared transaction time
    pub timestamp: DateTime<Utc>,

    /// Originating device
    pub device_id: String,

    /// Description
    pub description: String,

    /// How the entry arrived
    pub source: EntrySource,

    /// Score of the assessment that approved it
    pub risk_score: RiskScore,

    /// Wall-clock time the entry was accepted by the writer
    pub applied_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Build an entry from an approved transaction
    pub fn from_transaction(tx: &Transaction, risk_score: RiskScore, source: EntrySource) -> Self {
        Self {
            transaction_id: tx.id,
            user_id: tx.user_id.clone(),
            amount: tx.amount,
            timestamp: tx.timestamp,
            device_id: tx.device_id.clone(),
            description: tx.description.clone(),
            source,
            risk_score,
            applied_at: Utc::now(),
        }
    }
}

/// Running per-user totals
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserTotals {
    /// Owner
    pub user_id: UserId,

    /// Number of entries
    pub entry_count: u64,

    /// Sum of entry amounts
    pub total_amount: Decimal,

    /// Latest declared timestamp applied
    pub last_timestamp: Option<DateTime<Utc>>,
}

impl UserTotals {
    /// Empty totals
    pub fn empty(user_id: UserId) -> Self {
        Self {
            user_id,
            entry_count: 0,
            total_amount: Decimal::ZERO,
            last_timestamp: None,
        }
    }

    /// Totals after adding `entry`
    pub fn with_entry(&self, entry: &LedgerEntry) -> Self {
        Self {
            user_id: self.user_id.clone(),
            entry_count: self.entry_count + 1,
            total_amount: self.total_amount + entry.amount,
            last_timestamp: Some(match self.last_timestamp {
                Some(t) => t.max(entry.timestamp),
                None => entry.timestamp,
            }),
        }
    }
}

/// Result of an apply call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApplyOutcome {
    /// Entry written
    Applied,
    /// Transaction id was already present; nothing written
    AlreadyApplied,
}

impl ApplyOutcome {
    /// Duplicate suppressed
    pub fn is_duplicate(&self) -> bool {
        matches!(self, ApplyOutcome::AlreadyApplied)
    }
}
