//! Optional advisory scoring
//!
//! Any scorer (rule-only, statistical or learned) plugs in behind
//! [`RiskModel`]. The aggregator treats its output as an additive, capped
//! signal; an unavailable model contributes nothing.

use crate::{BehavioralProfile, FraudThresholds, Transaction};
use chrono::{Datelike, Duration, Timelike, Weekday};
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The advisory capability could not produce a score.
/// This is not an error for the engine, only the absence of a signal.
#[derive(Debug, Clone, Error)]
#[error("Advisory score unavailable: {0}")]
pub struct AdvisoryUnavailable(pub String);

/// Features handed to an advisory model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionFeatures {
    /// Transaction amount
    pub amount: f64,
    /// Local hour of day
    pub hour: u32,
    /// Local day of week, Monday = 0
    pub day_of_week: u32,
    /// Saturday or Sunday
    pub is_weekend: bool,
    /// Running average of the user's approved amounts
    pub average_amount: f64,
    /// amount / average_amount, 0 for new users
    pub amount_ratio: f64,
    /// Seconds since previous approved transaction
    pub seconds_since_last: Option<i64>,
    /// Approved transactions in the trailing window
    pub recent_count: u32,
    /// Lifetime approved transactions
    pub transaction_count: u64,
}

impl TransactionFeatures {
    /// Extract features
    pub fn extract(tx: &Transaction, profile: &BehavioralProfile, thresholds: &FraudThresholds) -> Self {
        let local = tx.timestamp.with_timezone(&thresholds.local_offset());
        let amount = tx.amount.to_f64().unwrap_or(f64::MAX);
        let average_amount = profile.average_amount.to_f64().unwrap_or(0.0);
        let amount_ratio = if average_amount > 0.0 { amount / average_amount } else { 0.0 };

        Self {
            amount,
            hour: local.hour(),
            day_of_week: local.weekday().num_days_from_monday(),
            is_weekend: matches!(local.weekday(), Weekday::Sat | Weekday::Sun),
            average_amount,
            amount_ratio,
            seconds_since_last: profile
                .previous_transaction(tx.timestamp)
                .map(|prev| (tx.timestamp - prev).num_seconds()),
            recent_count: profile
                .transactions_in_window(tx.timestamp, Duration::seconds(thresholds.velocity_window_seconds))
                as u32,
            transaction_count: profile.transaction_count,
        }
    }
}

/// Swappable advisory scorer
pub trait RiskModel: Send + Sync {
    /// Model name, for logs
    fn name(&self) -> &str;

    /// Fraud probability in [0, 1]
    fn predict(&self, features: &TransactionFeatures) -> Result<f64, AdvisoryUnavailable>;
}

/// Fixed-coefficient logistic scorer.
///
/// Coefficients are supplied, never learned here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticRiskModel {
    /// Intercept
    pub bias: f64,
    /// Weight on log10(amount)
    pub log_amount: f64,
    /// Weight on the night-hour indicator
    pub night: f64,
    /// Weight on the weekend indicator
    pub weekend: f64,
    /// Weight on ln(1 + amount_ratio)
    pub amount_ratio: f64,
    /// Weight on the "under five minutes since last" indicator
    pub burst: f64,
    /// Weight on recent_count
    pub recent_count: f64,
    /// Weight on the "no history" indicator
    pub new_user: f64,
}

impl Default for LogisticRiskModel {
    fn default() -> Self {
        Self {
            bias: -6.0,
            log_amount: 0.6,
            night: 0.8,
            weekend: 0.3,
            amount_ratio: 0.9,
            burst: 0.7,
            recent_count: 0.15,
            new_user: 0.4,
        }
    }
}

impl RiskModel for LogisticRiskModel {
    fn name(&self) -> &str {
        "logistic"
    }

    fn predict(&self, f: &TransactionFeatures) -> Result<f64, AdvisoryUnavailable> {
        if !f.amount.is_finite() || f.amount <= 0.0 {
            return Err(AdvisoryUnavailable(format!("unusable amount feature {}", f.amount)));
        }

        let indicator = |b: bool| if b { 1.0 } else { 0.0 };
        let z = self.bias
            + self.log_amount * f.amount.log10()
            + self.night * indicator(f.hour >= 23 || f.hour < 6)
            + self.weekend * indicator(f.is_weekend)
            + self.amount_ratio * f.amount_ratio.ln_1p()
            + self.burst * indicator(f.seconds_since_last.map_or(false, |s| s < 300))
            + self.recent_count * f64::from(f.recent_count)
            + self.new_user * indicator(f.transaction_count == 0);

        Ok(1.0 / (1.0 + (-z).exp()))
    }
}
