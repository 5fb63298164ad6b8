//! Metrics collection for observability
//!
//! # Metrics
//!
//! - `fraud_assessments_total{decision}` - Assessments by decision
//! - `fraud_rules_triggered_total{rule}` - Rule trigger counts
//! - `fraud_advisory_unavailable_total` - Evaluations scored without an advisory signal
//! - `fraud_risk_score` - Histogram of final scores

use crate::{Decision, RiskAssessment};
use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Assessments by decision
    pub assessments_total: IntCounterVec,

    /// Rule trigger counts
    pub rules_triggered_total: IntCounterVec,

    /// Advisory unavailable count
    pub advisory_unavailable_total: IntCounter,

    /// Score histogram
    pub risk_score: Histogram,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector on its own registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let assessments_total = IntCounterVec::new(
            Opts::new("fraud_assessments_total", "Assessments by decision"),
            &["decision"],
        )?;
        registry.register(Box::new(assessments_total.clone()))?;

        let rules_triggered_total = IntCounterVec::new(
            Opts::new("fraud_rules_triggered_total", "Rule trigger counts"),
            &["rule"],
        )?;
        registry.register(Box::new(rules_triggered_total.clone()))?;

        let advisory_unavailable_total = IntCounter::new(
            "fraud_advisory_unavailable_total",
            "Evaluations scored without an advisory signal",
        )?;
        registry.register(Box::new(advisory_unavailable_total.clone()))?;

        let risk_score = Histogram::with_opts(
            HistogramOpts::new("fraud_risk_score", "Histogram of final risk scores")
                .buckets(vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9, 1.0]),
        )?;
        registry.register(Box::new(risk_score.clone()))?;

        Ok(Self {
            assessments_total,
            rules_triggered_total,
            advisory_unavailable_total,
            risk_score,
            registry,
        })
    }

    /// Record a finished assessment
    pub fn record_assessment(&self, assessment: &RiskAssessment) {
        self.assessments_total
            .with_label_values(&[assessment.decision.as_str()])
            .inc();
        for rule in &assessment.triggered_rules {
            self.rules_triggered_total.with_label_values(&[rule.as_str()]).inc();
        }
        self.risk_score.observe(assessment.score.as_f64());
    }

    /// Record an evaluation that went ahead without the advisory model
    pub fn record_advisory_unavailable(&self) {
        self.advisory_unavailable_total.inc();
    }

    /// Summary counts
    pub fn statistics(&self) -> FraudStatistics {
        let count = |d: Decision| self.assessments_total.with_label_values(&[d.as_str()]).get();
        let approved = count(Decision::Approve);
        let challenged = count(Decision::Challenge);
        let blocked = count(Decision::Block);
        let total = approved + challenged + blocked;
        let rate = |n: u64| if total == 0 { 0.0 } else { n as f64 / total as f64 };

        FraudStatistics {
            total_assessments: total,
            approved,
            challenged,
            blocked,
            challenge_rate: rate(challenged),
            block_rate: rate(blocked),
        }
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

/// Fraud statistics for dashboards
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FraudStatistics {
    /// Assessments recorded
    pub total_assessments: u64,
    /// APPROVE decisions
    pub approved: u64,
    /// CHALLENGE decisions
    pub challenged: u64,
    /// BLOCK decisions
    pub blocked: u64,
    /// challenged / total
    pub challenge_rate: f64,
    /// blocked / total
    pub block_rate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{RiskLevel, RiskScore, RuleName};
    use chrono::Utc;
    use uuid::Uuid;

    fn assessment(decision: Decision) -> RiskAssessment {
        RiskAssessment {
            transaction_id: Uuid::now_v7(),
            score: RiskScore::from_basis_points(4000),
            rule_score: RiskScore::from_basis_points(4000),
            advisory_score: None,
            risk_level: RiskLevel::Medium,
            triggered_rules: vec![RuleName::HighAmount],
            decision,
            required_tier: None,
            assessed_at: Utc::now(),
        }
    }

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        assert_eq!(metrics.advisory_unavailable_total.get(), 0);
        assert_eq!(metrics.statistics().total_assessments, 0);
    }

    #[test]
    fn test_two_instances_do_not_collide() {
        assert!(Metrics::new().is_ok());
        assert!(Metrics::new().is_ok());
    }

    #[test]
    fn test_statistics() {
        let metrics = Metrics::new().unwrap();
        metrics.record_assessment(&assessment(Decision::Approve));
        metrics.record_assessment(&assessment(Decision::Challenge));
        metrics.record_assessment(&assessment(Decision::Block));
        metrics.record_assessment(&assessment(Decision::Block));

        let stats = metrics.statistics();
        assert_eq!(stats.total_assessments, 4);
        assert_eq!(stats.blocked, 2);
        assert_eq!(stats.block_rate, 0.5);
        assert_eq!(
            metrics.rules_triggered_total.with_label_values(&["high_amount"]).get(),
            4
        );
    }
}
