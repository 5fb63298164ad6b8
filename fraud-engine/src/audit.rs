//! Audit trail for assessments
//!
//! Triggered-rule detail never reaches the end user; it is written here, on
//! the `audit` tracing target, for dashboards and investigators.

use crate::{Decision, RiskAssessment, RuleName, RuleResult, Transaction};
use serde::Serialize;
use uuid::Uuid;

/// One audit line per assessment
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord<'a> {
    /// Assessed transaction
    pub transaction_id: Uuid,
    /// Originating user
    pub user_id: &'a str,
    /// Amount, rendered exactly
    pub amount: String,
    /// Made without connectivity
    pub is_offline: bool,
    /// Final score, rendered exactly
    pub score: String,
    /// Decision returned to the caller
    pub decision: Decision,
    /// Rules that fired
    pub triggered: Vec<RuleEvidence<'a>>,
    /// Advisory model output, when the model was consulted
    pub advisory_score: Option<f64>,
}

/// Evidence for one triggered rule
#[derive(Debug, Clone, Serialize)]
pub struct RuleEvidence<'a> {
    /// Rule that fired
    pub rule: RuleName,
    /// What made it fire
    pub evidence: &'a str,
}

impl<'a> AuditRecord<'a> {
    /// Build a record
    pub fn new(tx: &'a Transaction, results: &'a [RuleResult], assessment: &RiskAssessment) -> Self {
        Self {
            transaction_id: tx.id,
            user_id: tx.user_id.as_str(),
            amount: tx.amount.to_string(),
            is_offline: tx.is_offline,
            score: assessment.score.to_string(),
            decision: assessment.decision,
            triggered: results
                .iter()
                .filter(|r| r.triggered)
                .map(|r| RuleEvidence {
                    rule: r.rule_name,
                    evidence: &r.evidence,
                })
                .collect(),
            advisory_score: assessment.advisory_score,
        }
    }

    /// Write to the audit target
    pub fn emit(&self) {
        match serde_json::to_string(self) {
            Ok(json) => tracing::info!(
                target: "audit",
                transaction_id = %self.transaction_id,
                decision = %self.decision,
                record = %json,
                "Risk assessment"
            ),
            Err(e) => tracing::error!(
                target: "audit",
                transaction_id = %self.transaction_id,
                "Failed to serialize audit record: {}",
                e
            ),
        }
    }
}
