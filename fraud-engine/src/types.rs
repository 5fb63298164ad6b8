//! Core types for the fraud engine

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::auth::AuthTier;

/// User identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    /// Create a user id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow as str
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A money-transfer request.
///
/// Immutable once created. The id is a UUID v7 so ids sort by creation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Unique transaction id
    pub id: Uuid,

    /// Originating user
    pub user_id: UserId,

    /// Amount in currency units
    pub amount: Decimal,

    /// Declared creation time (second granularity)
    pub timestamp: DateTime<Utc>,

    /// Device the request was made from
    pub device_id: String,

    /// Created without connectivity
    pub is_offline: bool,

    /// Free-form description
    pub description: String,
}

impl Transaction {
    /// Create a new online transaction with a fresh id
    pub fn new(
        user_id: UserId,
        amount: Decimal,
        timestamp: DateTime<Utc>,
        device_id: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            user_id,
            amount,
            timestamp,
            device_id: device_id.into(),
            is_offline: false,
            description: description.into(),
        }
    }

    /// Mark as created offline
    pub fn offline(mut self) -> Self {
        self.is_offline = true;
        self
    }
}

/// Risk score, an exact decimal in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RiskScore(Decimal);

impl RiskScore {
    /// Zero score
    pub const ZERO: RiskScore = RiskScore(Decimal::ZERO);

    /// Create a score, clamped to [0, 1]
    pub fn new(score: Decimal) -> Self {
        Self(score.max(Decimal::ZERO).min(Decimal::ONE))
    }

    /// Score from basis points (4000 = 0.40)
    pub fn from_basis_points(bps: u32) -> Self {
        Self::new(Decimal::new(i64::from(bps), 4))
    }

    /// Raw decimal value
    pub fn value(&self) -> Decimal {
        self.0
    }

    /// Lossy float view, for metrics
    pub fn as_f64(&self) -> f64 {
        use rust_decimal::prelude::ToPrimitive;
        self.0.to_f64().unwrap_or(0.0)
    }

    /// Band this score
    pub fn level(&self) -> RiskLevel {
        RiskLevel::from(*self)
    }
}

impl fmt::Display for RiskScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.normalize())
    }
}

/// Risk level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RiskLevel {
    /// score < 0.3
    Low,
    /// 0.3 <= score < 0.6
    Medium,
    /// 0.6 <= score < 0.8
    High,
    /// score >= 0.8
    Critical,
}

impl RiskLevel {
    /// Decision taken for this level
    pub fn decision(&self) -> Decision {
        match self {
            RiskLevel::Low => Decision::Approve,
            RiskLevel::Medium | RiskLevel::High => Decision::Challenge,
            RiskLevel::Critical => Decision::Block,
        }
    }

    /// Label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

impl From<RiskScore> for RiskLevel {
    // Inclusive lower bounds: 0.3 is MEDIUM, 0.6 is HIGH, 0.8 is CRITICAL.
    fn from(score: RiskScore) -> Self {
        let value = score.value();
        if value >= Decimal::new(8, 1) {
            RiskLevel::Critical
        } else if value >= Decimal::new(6, 1) {
            RiskLevel::High
        } else if value >= Decimal::new(3, 1) {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}

/// Outcome of an assessment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Decision {
    /// Accept
    Approve,
    /// Hold until the caller passes a stronger authentication tier
    Challenge,
    /// Terminal rejection
    Block,
}

impl Decision {
    /// Label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Approve => "approve",
            Decision::Challenge => "challenge",
            Decision::Block => "block",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fraud rules, in evaluation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RuleName {
    /// Amount above the high-amount threshold
    HighAmount,
    /// Local hour in [23:00, 06:00)
    UnusualHour,
    /// Previous transaction inside the rapid window
    RapidTransaction,
    /// Amount far above the user's running average
    AmountSpike,
    /// Large amount on a weekend
    WeekendLarge,
    /// Too many transactions in the trailing hour
    HighVelocity,
}

impl RuleName {
    /// All rules in evaluation order
    pub const ALL: [RuleName; 6] = [
        RuleName::HighAmount,
        RuleName::UnusualHour,
        RuleName::RapidTransaction,
        RuleName::AmountSpike,
        RuleName::WeekendLarge,
        RuleName::HighVelocity,
    ];

    /// Canonical weight
    pub fn weight(&self) -> RiskScore {
        let bps = match self {
            RuleName::HighAmount => 4000,
            RuleName::UnusualHour => 2000,
            RuleName::RapidTransaction => 3000,
            RuleName::AmountSpike => 3000,
            RuleName::WeekendLarge => 1000,
            RuleName::HighVelocity => 4000,
        };
        RiskScore::from_basis_points(bps)
    }

    /// Stable label
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleName::HighAmount => "high_amount",
            RuleName::UnusualHour => "unusual_hour",
            RuleName::RapidTransaction => "rapid_transaction",
            RuleName::AmountSpike => "amount_spike",
            RuleName::WeekendLarge => "weekend_large",
            RuleName::HighVelocity => "high_velocity",
        }
    }
}

impl fmt::Display for RuleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of evaluating one rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleResult {
    /// Rule evaluated
    pub rule_name: RuleName,

    /// Whether the trigger condition held
    pub triggered: bool,

    /// Weight contributed when triggered
    pub weight: RiskScore,

    /// Human-readable evidence, for audit only
    pub evidence: String,
}

impl RuleResult {
    /// Result carrying the rule's canonical weight
    pub fn new(rule_name: RuleName, triggered: bool, evidence: String) -> Self {
        Self {
            rule_name,
            triggered,
            weight: rule_name.weight(),
            evidence,
        }
    }
}

/// Risk assessment result. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// Transaction assessed
    pub transaction_id: Uuid,

    /// Final score (rules + capped advisory)
    pub score: RiskScore,

    /// Rule-only score
    pub rule_score: RiskScore,

    /// Advisory score used, if one was available
    pub advisory_score: Option<f64>,

    /// Risk level
    pub risk_level: RiskLevel,

    /// Rules that triggered
    pub triggered_rules: Vec<RuleName>,

    /// Decision
    pub decision: Decision,

    /// Tier the caller must satisfy (CHALLENGE only)
    pub required_tier: Option<AuthTier>,

    /// Assessment timestamp
    pub assessed_at: DateTime<Utc>,
}

impl RiskAssessment {
    /// Approved
    pub fn is_approved(&self) -> bool {
        self.decision == Decision::Approve
    }

    /// What the end user is told. Never names the triggered rules.
    pub fn customer_notice(&self) -> CustomerNotice {
        match self.decision {
            Decision::Approve => CustomerNotice::Approved,
            Decision::Challenge => CustomerNotice::VerificationRequired {
                tier: self.required_tier.unwrap_or(AuthTier::Medium),
            },
            Decision::Block => CustomerNotice::Declined,
        }
    }
}

/// User-visible outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CustomerNotice {
    /// Transfer accepted
    Approved,
    /// Extra verification needed
    VerificationRequired {
        /// Tier to satisfy
        tier: AuthTier,
    },
    /// Generic decline
    Declined,
}

impl fmt::Display for CustomerNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CustomerNotice::Approved => f.write_str("Transfer approved"),
            CustomerNotice::VerificationRequired { tier } => {
                write!(f, "Additional verification required ({})", tier.factors())
            }
            CustomerNotice::Declined => f.write_str("Transfer could not be completed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn score(s: &str) -> RiskScore {
        RiskScore::new(s.parse().unwrap())
    }

    #[test]
    fn test_band_boundaries_are_inclusive() {
        assert_eq!(score("0.2999").level(), RiskLevel::Low);
        assert_eq!(score("0.3").level(), RiskLevel::Medium);
        assert_eq!(score("0.6").level(), RiskLevel::High);
        assert_eq!(score("0.8").level(), RiskLevel::Critical);
        assert_eq!(score("1").level(), RiskLevel::Critical);
    }

    #[test]
    fn test_score_is_clamped() {
        assert_eq!(score("1.7").value(), Decimal::ONE);
        assert_eq!(score("-0.5").value(), Decimal::ZERO);
    }

    #[test]
    fn test_decision_mapping() {
        assert_eq!(RiskLevel::Low.decision(), Decision::Approve);
        assert_eq!(RiskLevel::Medium.decision(), Decision::Challenge);
        assert_eq!(RiskLevel::High.decision(), Decision::Challenge);
        assert_eq!(RiskLevel::Critical.decision(), Decision::Block);
    }

    #[test]
    fn test_weights_add_exactly() {
        let sum = RuleName::UnusualHour.weight().value() + RuleName::HighAmount.weight().value();
        assert_eq!(RiskScore::new(sum).level(), RiskLevel::High);
    }

    #[test]
    fn test_declined_notice_is_generic() {
        let text = CustomerNotice::Declined.to_string();
        for rule in RuleName::ALL {
            assert!(!text.contains(rule.as_str()));
        }
    }
}
