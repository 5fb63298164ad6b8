//! Weighted fraud rules
//!
//! Every rule is evaluated for every transaction; none short-circuits another.
//! "Now" is always the transaction's declared timestamp, so evaluation is
//! deterministic.

use crate::{BehavioralProfile, FraudThresholds, RiskScore, RuleName, RuleResult, Transaction};
use chrono::{Datelike, Duration, Timelike, Weekday};
use rust_decimal::Decimal;

/// Stateless rule evaluator
#[derive(Debug, Clone)]
pub struct RuleEvaluator {
    thresholds: FraudThresholds,
}

impl RuleEvaluator {
    /// Create an evaluator
    pub fn new(thresholds: FraudThresholds) -> Self {
        Self { thresholds }
    }

    /// Thresholds in use
    pub fn thresholds(&self) -> &FraudThresholds {
        &self.thresholds
    }

    /// Evaluate the full rule set, in [`RuleName::ALL`] order
    pub fn evaluate(&self, tx: &Transaction, profile: &BehavioralProfile) -> Vec<RuleResult> {
        RuleName::ALL
            .iter()
            .map(|rule| self.evaluate_rule(*rule, tx, profile))
            .collect()
    }

    /// Evaluate the rules that can run against a device-cached profile.
    ///
    /// High velocity is left out: a cached window misses everything approved
    /// elsewhere since the snapshot was taken.
    pub fn evaluate_degraded(&self, tx: &Transaction, cached: &BehavioralProfile) -> Vec<RuleResult> {
        RuleName::ALL
            .iter()
            .filter(|rule| **rule != RuleName::HighVelocity)
            .map(|rule| self.evaluate_rule(*rule, tx, cached))
            .collect()
    }

    fn evaluate_rule(&self, rule: RuleName, tx: &Transaction, profile: &BehavioralProfile) -> RuleResult {
        let t = &self.thresholds;
        let local = tx.timestamp.with_timezone(&t.local_offset());

        match rule {
            RuleName::HighAmount => RuleResult::new(
                rule,
                tx.amount > t.high_amount_threshold,
                format!("amount {} vs threshold {}", tx.amount, t.high_amount_threshold),
            ),

            RuleName::UnusualHour => {
                let hour = local.hour();
                RuleResult::new(rule, hour >= 23 || hour < 6, format!("local hour {:02}:00", hour))
            }

            RuleName::RapidTransaction => match profile.previous_transaction(tx.timestamp) {
                Some(previous) => {
                    let gap = (tx.timestamp - previous).num_seconds();
                    RuleResult::new(
                        rule,
                        gap < t.rapid_window_seconds,
                        format!("{}s since previous transaction", gap),
                    )
                }
                None => RuleResult::new(rule, false, "no previous transaction".to_string()),
            },

            RuleName::AmountSpike => {
                let average = profile.average_amount;
                // New users have no baseline and cannot spike.
                let triggered = average > Decimal::ZERO && tx.amount > t.spike_multiplier * average;
                RuleResult::new(
                    rule,
                    triggered,
                    format!("amount {} vs average {} x{}", tx.amount, average, t.spike_multiplier),
                )
            }

            RuleName::WeekendLarge => {
                let weekend = matches!(local.weekday(), Weekday::Sat | Weekday::Sun);
                RuleResult::new(
                    rule,
                    weekend && tx.amount > t.weekend_threshold,
                    format!("{} amount {}", local.weekday(), tx.amount),
                )
            }

            RuleName::HighVelocity => {
                let count = profile
                    .transactions_in_window(tx.timestamp, Duration::seconds(t.velocity_window_seconds));
                RuleResult::new(
                    rule,
                    count > t.velocity_limit as usize,
                    format!("{} transactions in trailing window (limit {})", count, t.velocity_limit),
                )
            }
        }
    }
}

/// Sum of triggered weights, capped at 1
pub fn rule_score(results: &[RuleResult]) -> RiskScore {
    let sum = results
        .iter()
        .filter(|r| r.triggered)
        .map(|r| r.weight.value())
        .sum::<Decimal>();
    RiskScore::new(sum)
}
