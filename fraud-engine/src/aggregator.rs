//! Risk aggregation
//!
//! `score = min(1, Σ triggered weights + min(advisory, 0.3))`, banded into a
//! [`RiskLevel`] and mapped to a [`Decision`]. Approval is the only way a
//! behavioral profile advances, and it goes through [`RiskAggregator::commit`].

use crate::audit::AuditRecord;
use crate::rules::rule_score;
use crate::{
    BehavioralProfile, Decision, Error, ProfileStore, Result, RiskAssessment, RiskScore, RuleResult,
    TierPolicy, Transaction,
};
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;

/// Combines rule results and an optional advisory score
pub struct RiskAggregator {
    profiles: Arc<ProfileStore>,
    tier_policy: Arc<dyn TierPolicy>,
}

impl RiskAggregator {
    /// Create an aggregator committing approvals into `profiles`
    pub fn new(profiles: Arc<ProfileStore>, tier_policy: Arc<dyn TierPolicy>) -> Self {
        Self { profiles, tier_policy }
    }

    /// Maximum contribution of the advisory score
    pub fn advisory_cap() -> Decimal {
        Decimal::new(3, 1)
    }

    /// Assess a transaction. Pure apart from the audit line.
    pub fn assess(
        &self,
        tx: &Transaction,
        rule_results: &[RuleResult],
        advisory_score: Option<f64>,
    ) -> RiskAssessment {
        let rules = rule_score(rule_results);
        let advisory = advisory_score.and_then(|raw| match usable_advisory(raw) {
            Some(value) => Some((raw, value)),
            None => {
                tracing::warn!(
                    transaction_id = %tx.id,
                    advisory_score = raw,
                    "Ignoring out-of-range advisory score"
                );
                None
            }
        });

        let contribution = advisory
            .map(|(_, value)| value.min(Self::advisory_cap()))
            .unwrap_or(Decimal::ZERO);
        let score = RiskScore::new(rules.value() + contribution);
        let risk_level = score.level();
        let decision = risk_level.decision();
        let required_tier = match decision {
            Decision::Challenge => Some(self.tier_policy.required_tier(risk_level, tx.amount)),
            _ => None,
        };

        let assessment = RiskAssessment {
            transaction_id: tx.id,
            score,
            rule_score: rules,
            advisory_score: advisory.map(|(raw, _)| raw),
            risk_level,
            triggered_rules: rule_results
                .iter()
                .filter(|r| r.triggered)
                .map(|r| r.rule_name)
                .collect(),
            decision,
            required_tier,
            assessed_at: Utc::now(),
        };

        AuditRecord::new(tx, rule_results, &assessment).emit();
        assessment
    }

    /// Advance the user's profile if the assessment approved the transaction.
    ///
    /// Returns the updated profile, or `None` when nothing was recorded.
    pub fn commit(&self, tx: &Transaction, assessment: &RiskAssessment) -> Result<Option<BehavioralProfile>> {
        if assessment.transaction_id != tx.id {
            return Err(Error::Validation(format!(
                "assessment {} does not belong to transaction {}",
                assessment.transaction_id, tx.id
            )));
        }
        match assessment.decision {
            Decision::Approve => self.advance(tx).map(Some),
            Decision::Challenge | Decision::Block => Ok(None),
        }
    }

    /// Advance the profile of a challenged transaction whose caller passed
    /// the required authentication tier
    pub fn commit_after_challenge(&self, tx: &Transaction, assessment: &RiskAssessment) -> Result<BehavioralProfile> {
        if assessment.transaction_id != tx.id || assessment.decision != Decision::Challenge {
            return Err(Error::Validation(format!(
                "transaction {} has no open challenge",
                tx.id
            )));
        }
        self.advance(tx)
    }

    fn advance(&self, tx: &Transaction) -> Result<BehavioralProfile> {
        self.profiles.record_approved(&tx.user_id, tx.amount, tx.timestamp)
    }
}

fn usable_advisory(raw: f64) -> Option<Decimal> {
    if !raw.is_finite() || !(0.0..=1.0).contains(&raw) {
        return None;
    }
    Decimal::from_f64_retain(raw).map(|d| d.round_dp(4))
}
