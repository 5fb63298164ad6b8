//! Property-based tests for scoring invariants
//!
//! - Monotonicity: adding a triggering condition never lowers the score
//! - Banding: inclusive lower bounds at 0.3 / 0.6 / 0.8
//! - Running mean: exact incremental formula
//! - Rejected amounts never touch a profile

use chrono::{DateTime, Duration, TimeZone, Utc};
use fraud_engine::{
    Decision, FraudThresholds, ProfileStore, RiskAggregator, RiskLevel, RiskScore, RuleEvaluator,
    RuleName, RuleResult, TieredAuthPolicy, Transaction, UserId,
};
use proptest::prelude::*;
use rust_decimal::Decimal;
use std::sync::Arc;

fn aggregator() -> RiskAggregator {
    let profiles = Arc::new(ProfileStore::new(&FraudThresholds::default()));
    RiskAggregator::new(profiles, Arc::new(TieredAuthPolicy))
}

fn results_for(mask: u8) -> Vec<RuleResult> {
    RuleName::ALL
        .iter()
        .enumerate()
        .map(|(i, rule)| RuleResult::new(*rule, mask & (1 << i) != 0, String::new()))
        .collect()
}

fn wednesday_noon() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 10, 12, 0, 0).unwrap()
}

/// Strategy for positive amounts with two decimal places
fn amount_strategy() -> impl Strategy<Value = Decimal> {
    (1i64..10_000_000i64).prop_map(|cents| Decimal::new(cents, 2))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Property: turning on one more rule never decreases the score
    #[test]
    fn prop_adding_rule_never_lowers_score(mask in 0u8..64, extra in 0usize..6, advisory in proptest::option::of(0.0f64..=1.0)) {
        let aggregator = aggregator();
        let tx = Transaction::new(UserId::new("U1"), Decimal::from(100), wednesday_noon(), "DEV", "");

        let before = aggregator.assess(&tx, &results_for(mask), advisory);
        let after = aggregator.assess(&tx, &results_for(mask | (1 << extra)), advisory);

        prop_assert!(after.score >= before.score);
        prop_assert!(after.risk_level >= before.risk_level);
    }

    /// Property: banding uses inclusive lower bounds
    #[test]
    fn prop_banding_matches_thresholds(bps in 0u32..=10_000) {
        let level = RiskScore::from_basis_points(bps).level();
        let expected = match bps {
            0..=2_999 => RiskLevel::Low,
            3_000..=5_999 => RiskLevel::Medium,
            6_000..=7_999 => RiskLevel::High,
            _ => RiskLevel::Critical,
        };
        prop_assert_eq!(level, expected);
    }

    /// Property: score stays in [0, 1] and absent advisory equals rule-only score
    #[test]
    fn prop_score_bounded(mask in 0u8..64) {
        let aggregator = aggregator();
        let tx = Transaction::new(UserId::new("U1"), Decimal::from(100), wednesday_noon(), "DEV", "");
        let assessment = aggregator.assess(&tx, &results_for(mask), None);

        prop_assert!(assessment.score.value() >= Decimal::ZERO);
        prop_assert!(assessment.score.value() <= Decimal::ONE);
        prop_assert_eq!(assessment.score, assessment.rule_score);
    }

    /// Property: average follows avg' = avg + (amount - avg) / count'
    #[test]
    fn prop_running_mean_formula(amounts in proptest::collection::vec(amount_strategy(), 1..40)) {
        let store = ProfileStore::new(&FraudThresholds::default());
        let user = UserId::new("U1");
        let mut expected = Decimal::ZERO;

        for (i, amount) in amounts.iter().enumerate() {
            let count = Decimal::from(i as u64 + 1);
            expected += (*amount - expected) / count;
            let profile = store
                .record_approved(&user, *amount, wednesday_noon() + Duration::seconds(i as i64 * 600))
                .unwrap();
            prop_assert_eq!(profile.average_amount, expected);
            prop_assert_eq!(profile.transaction_count, i as u64 + 1);
        }
    }

    /// Property: non-positive amounts never mutate a profile
    #[test]
    fn prop_non_positive_amount_rejected(cents in -1_000_000i64..=0) {
        let store = ProfileStore::new(&FraudThresholds::default());
        let user = UserId::new("U1");
        let before = store.get_profile(&user);

        prop_assert!(store.record_approved(&user, Decimal::new(cents, 2), wednesday_noon()).is_err());
        prop_assert_eq!(store.get_profile(&user), before);
    }

    /// Property: an otherwise clean weekday-daytime transaction above the
    /// high-amount threshold scores at least as much as one below it
    #[test]
    fn prop_high_amount_monotone(low in 1i64..=100_000, high in 100_001i64..10_000_000) {
        let evaluator = RuleEvaluator::new(FraudThresholds::default());
        let aggregator = aggregator();
        let profile = fraud_engine::BehavioralProfile::new(UserId::new("U1"));

        let a = Transaction::new(UserId::new("U1"), Decimal::from(low), wednesday_noon(), "DEV", "");
        let b = Transaction::new(UserId::new("U1"), Decimal::from(high), wednesday_noon(), "DEV", "");
        let sa = aggregator.assess(&a, &evaluator.evaluate(&a, &profile), None);
        let sb = aggregator.assess(&b, &evaluator.evaluate(&b, &profile), None);

        prop_assert!(sb.score >= sa.score);
        prop_assert_eq!(sb.decision, Decision::Challenge);
    }
}
