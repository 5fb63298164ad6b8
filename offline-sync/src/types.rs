//! Offline queue and online journal types

use chrono::{DateTime, Utc};
use fraud_engine::{Decision, RiskAssessment, RiskScore, Transaction, UserId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

use crate::{Error, Result};

/// Lifecycle state of a queued offline transaction.
///
/// ```text
/// PENDING ──▶ VALIDATED ──▶ SYNCED
///    │            │  ▲
///    │            │  └──── PENDING ◀── FAILED (retry)
///    ▼            ├──────────────────▶ FAILED
/// REJECTED ◀──────┘ (replay BLOCK)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueueState {
    /// Awaiting local validation
    Pending,
    /// Passed local validation, awaiting replay
    Validated,
    /// Replayed and applied to the ledger
    Synced,
    /// Failed local validation or blocked on replay
    Rejected,
    /// Replay failed; retried until attempts run out
    Failed,
}

impl QueueState {
    /// All states
    pub const ALL: [QueueState; 5] = [
        QueueState::Pending,
        QueueState::Validated,
        QueueState::Synced,
        QueueState::Rejected,
        QueueState::Failed,
    ];

    /// Label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueState::Pending => "pending",
            QueueState::Validated => "validated",
            QueueState::Synced => "synced",
            QueueState::Rejected => "rejected",
            QueueState::Failed => "failed",
        }
    }

    /// Allowed forward moves
    pub fn can_transition_to(&self, next: QueueState) -> bool {
        use QueueState::*;
        matches!(
            (self, next),
            (Pending, Validated)
                | (Pending, Rejected)
                | (Validated, Synced)
                | (Validated, Rejected)
                | (Validated, Failed)
                | (Failed, Pending)
        )
    }

    /// SYNCED and REJECTED never change again
    pub fn is_final(&self) -> bool {
        matches!(self, QueueState::Synced | QueueState::Rejected)
    }
}

impl fmt::Display for QueueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A local cap the offline transaction broke
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Violation {
    /// Single amount above the offline cap
    OverOfflineCap {
        /// Requested amount
        amount: Decimal,
        /// Cap
        cap: Decimal,
    },
    /// Cumulative offline amount for the local day above the daily cap
    DailyCapExceeded {
        /// Cumulative amount including this one
        total: Decimal,
        /// Cap
        cap: Decimal,
    },
    /// Too many offline transactions in the trailing hour
    FrequencyCapExceeded {
        /// Count including this one
        count: u32,
        /// Cap
        cap: u32,
    },
    /// Device has not been recognized before
    UntrustedDevice {
        /// Device id
        device_id: String,
    },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::OverOfflineCap { amount, cap } => {
                write!(f, "amount {} exceeds offline cap {}", amount, cap)
            }
            Violation::DailyCapExceeded { total, cap } => {
                write!(f, "daily offline total {} exceeds cap {}", total, cap)
            }
            Violation::FrequencyCapExceeded { count, cap } => {
                write!(f, "{} offline transactions in the last hour exceeds cap {}", count, cap)
            }
            Violation::UntrustedDevice { device_id } => {
                write!(f, "device {} is not recognized", device_id)
            }
        }
    }
}

/// One recorded state change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    /// Previous state (`None` on creation)
    pub from: Option<QueueState>,
    /// New state
    pub to: QueueState,
    /// When
    pub at: DateTime<Utc>,
    /// Why
    pub reason: String,
}

/// Durable record of an offline transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    /// The transaction
    pub transaction: Transaction,

    /// Lifecycle state
    pub state: QueueState,

    /// When queued
    pub created_at: DateTime<Utc>,

    /// Failed replay attempts
    pub attempts: u32,

    /// Most recent failure or rejection reason
    pub last_error: Option<String>,

    /// Device flagged as recognized at enqueue
    pub device_trusted: bool,

    /// Degraded-rule score against the cached profile (informational)
    pub local_risk_score: RiskScore,

    /// Local cap violations found at validation
    pub violations: Vec<Violation>,

    /// When local validation passed
    pub validated_at: Option<DateTime<Utc>>,

    /// Earliest time a FAILED entry may be retried
    pub next_attempt_at: Option<DateTime<Utc>>,

    /// When the entry reached SYNCED
    pub synced_at: Option<DateTime<Utc>>,

    /// Audit trail of state changes
    pub history: Vec<StateTransition>,

    /// SHA-256 of the serialized transaction, hex
    pub checksum: String,
}

impl QueueEntry {
    /// New PENDING entry
    pub fn new(transaction: Transaction, device_trusted: bool, local_risk_score: RiskScore) -> Result<Self> {
        let now = Utc::now();
        let checksum = Self::compute_checksum(&transaction)?;
        Ok(Self {
            transaction,
            state: QueueState::Pending,
            created_at: now,
            attempts: 0,
            last_error: None,
            device_trusted,
            local_risk_score,
            violations: Vec::new(),
            validated_at: None,
            next_attempt_at: None,
            synced_at: None,
            history: vec![StateTransition {
                from: None,
                to: QueueState::Pending,
                at: now,
                reason: "queued offline".to_string(),
            }],
            checksum,
        })
    }

    /// Transaction id
    pub fn id(&self) -> Uuid {
        self.transaction.id
    }

    /// Move to `to`, recording the change
    pub fn transition(&mut self, to: QueueState, reason: impl Into<String>) -> Result<()> {
        if !self.state.can_transition_to(to) {
            return Err(Error::InvalidTransition {
                from: self.state,
                to,
            });
        }

        let now = Utc::now();
        match to {
            QueueState::Validated if self.validated_at.is_none() => self.validated_at = Some(now),
            QueueState::Synced => self.synced_at = Some(now),
            _ => {}
        }

        self.history.push(StateTransition {
            from: Some(self.state),
            to,
            at: now,
            reason: reason.into(),
        });
        self.state = to;
        Ok(())
    }

    /// Retry budget used up
    pub fn is_exhausted(&self, max_attempts: u32) -> bool {
        self.state == QueueState::Failed && self.attempts >= max_attempts
    }

    /// Hex SHA-256 of the bincode encoding of `tx`
    pub fn compute_checksum(tx: &Transaction) -> Result<String> {
        let bytes = bincode::serialize(tx)?;
        let digest = Sha256::digest(&bytes);
        Ok(digest.iter().map(|b| format!("{:02x}", b)).collect())
    }

    /// Recompute the checksum and compare
    pub fn verify_checksum(&self) -> Result<()> {
        if Self::compute_checksum(&self.transaction)? != self.checksum {
            return Err(Error::Integrity(self.transaction.id));
        }
        Ok(())
    }
}

/// Node connectivity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Connectivity {
    /// Authoritative services reachable
    Online,
    /// No connectivity
    Offline,
}

/// Background synchronizer status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncStatus {
    /// Waiting for connectivity
    Offline,
    /// A sync run is in progress
    Syncing,
    /// Connected and idle
    Online,
    /// The last run failed
    Error,
}

/// Result of one sync run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncReport {
    /// Run id (UUID v7, sorts by start time)
    pub run_id: Uuid,

    /// Run start
    pub started_at: DateTime<Utc>,

    /// Run end
    pub finished_at: DateTime<Utc>,

    /// FAILED entries re-armed to PENDING
    pub rearmed: usize,

    /// Resulting state per replayed or revalidated entry
    pub outcomes: Vec<(Uuid, QueueState)>,
}

impl SyncReport {
    /// Number of outcomes in `state`
    pub fn count(&self, state: QueueState) -> usize {
        self.outcomes.iter().filter(|(_, s)| *s == state).count()
    }
}

/// Final outcome of an online challenge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChallengeResolution {
    /// Caller authenticated; transfer applied
    Approved,
    /// Caller failed authentication; nothing applied
    Declined,
}

/// Persisted result of an online evaluation.
///
/// Kept for every id scored online so re-evaluation returns the first
/// assessment and the offline path can refuse the id. The transaction body
/// is only held while a challenge is open; closed records are compacted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnlineRecord {
    /// Owner
    pub user_id: UserId,

    /// First assessment
    pub assessment: RiskAssessment,

    /// Transaction, present while the challenge is open
    pub transaction: Option<Transaction>,

    /// Challenge outcome, once resolved
    pub resolution: Option<ChallengeResolution>,
}

impl OnlineRecord {
    /// Record a fresh assessment
    pub fn new(transaction: Transaction, assessment: RiskAssessment) -> Self {
        let open = assessment.decision == Decision::Challenge;
        Self {
            user_id: transaction.user_id.clone(),
            assessment,
            transaction: open.then_some(transaction),
            resolution: None,
        }
    }

    /// Transaction id
    pub fn id(&self) -> Uuid {
        self.assessment.transaction_id
    }

    /// CHALLENGE still waiting for a resolution
    pub fn is_open(&self) -> bool {
        self.assessment.decision == Decision::Challenge && self.resolution.is_none()
    }

    /// Close the challenge and drop the transaction body
    pub fn resolve(&mut self, resolution: ChallengeResolution) {
        self.resolution = Some(resolution);
        self.transaction = None;
    }
}

/// Queue counts per state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// PENDING
    pub pending: usize,
    /// VALIDATED
    pub validated: usize,
    /// SYNCED
    pub synced: usize,
    /// REJECTED
    pub rejected: usize,
    /// FAILED
    pub failed: usize,
    /// Stored entries that failed to decode or verify, not in any count above
    #[serde(default)]
    pub unreadable: usize,
}

impl QueueStats {
    /// Count one entry
    pub fn add(&mut self, state: QueueState) {
        match state {
            QueueState::Pending => self.pending += 1,
            QueueState::Validated => self.validated += 1,
            QueueState::Synced => self.synced += 1,
            QueueState::Rejected => self.rejected += 1,
            QueueState::Failed => self.failed += 1,
        }
    }

    /// Count for one state
    pub fn get(&self, state: QueueState) -> usize {
        match state {
            QueueState::Pending => self.pending,
            QueueState::Validated => self.validated,
            QueueState::Synced => self.synced,
            QueueState::Rejected => self.rejected,
            QueueState::Failed => self.failed,
        }
    }

    /// All entries
    pub fn total(&self) -> usize {
        self.pending + self.validated + self.synced + self.rejected + self.failed
    }
}
