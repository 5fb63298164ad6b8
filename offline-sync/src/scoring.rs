//! Full scoring path shared by online evaluation and offline replay

use fraud_engine::{
    BehavioralProfile, FraudThresholds, Metrics, ProfileStore, RiskAggregator, RiskAssessment,
    RiskModel, RuleEvaluator, TierPolicy, Transaction, TransactionFeatures,
};
use std::sync::Arc;

use crate::Result;

/// Evaluator + advisory model + aggregator over the authoritative profiles
pub struct Scorer {
    evaluator: RuleEvaluator,
    aggregator: RiskAggregator,
    profiles: Arc<ProfileStore>,
    model: Option<Arc<dyn RiskModel>>,
    metrics: Metrics,
}

impl Scorer {
    /// Create a scorer
    pub fn new(
        thresholds: FraudThresholds,
        profiles: Arc<ProfileStore>,
        tier_policy: Arc<dyn TierPolicy>,
        model: Option<Arc<dyn RiskModel>>,
        metrics: Metrics,
    ) -> Self {
        Self {
            evaluator: RuleEvaluator::new(thresholds),
            aggregator: RiskAggregator::new(profiles.clone(), tier_policy),
            profiles,
            model,
            metrics,
        }
    }

    /// Assess against the user's current authoritative profile.
    /// The caller holds the user's lock.
    pub fn assess(&self, tx: &Transaction) -> RiskAssessment {
        let profile = self.profiles.get_profile(&tx.user_id);
        let results = self.evaluator.evaluate(tx, &profile);
        let advisory = self.advisory(tx, &profile);

        let assessment = self.aggregator.assess(tx, &results, advisory);
        self.metrics.record_assessment(&assessment);

        tracing::info!(
            transaction_id = %tx.id,
            user_id = %tx.user_id,
            score = %assessment.score,
            level = assessment.risk_level.as_str(),
            decision = assessment.decision.as_str(),
            "Transaction assessed"
        );
        assessment
    }

    fn advisory(&self, tx: &Transaction, profile: &BehavioralProfile) -> Option<f64> {
        let model = self.model.as_ref()?;
        let features = TransactionFeatures::extract(tx, profile, self.evaluator.thresholds());
        match model.predict(&features) {
            Ok(score) => Some(score),
            Err(e) => {
                tracing::warn!(
                    transaction_id = %tx.id,
                    model = model.name(),
                    error = %e,
                    "Advisory model unavailable, scoring on rules only"
                );
                self.metrics.record_advisory_unavailable();
                None
            }
        }
    }

    /// Advance the profile for an approved assessment
    pub fn commit(&self, tx: &Transaction, assessment: &RiskAssessment) -> Result<Option<BehavioralProfile>> {
        Ok(self.aggregator.commit(tx, assessment)?)
    }

    /// Advance the profile after a passed challenge
    pub fn commit_after_challenge(&self, tx: &Transaction, assessment: &RiskAssessment) -> Result<BehavioralProfile> {
        Ok(self.aggregator.commit_after_challenge(tx, assessment)?)
    }

    /// Authoritative profiles
    pub fn profiles(&self) -> &Arc<ProfileStore> {
        &self.profiles
    }

    /// Fraud metrics
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Thresholds in force
    pub fn thresholds(&self) -> &FraudThresholds {
        self.evaluator.thresholds()
    }
}
