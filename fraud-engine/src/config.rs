//! Fraud thresholds
//!
//! Passed explicitly into the evaluator, the offline validator and the engine
//! at construction. There is no process-wide threshold state.

use crate::{Error, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Thresholds for the online rules and the offline caps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FraudThresholds {
    /// High-amount rule threshold
    pub high_amount_threshold: Decimal,

    /// Rapid-transaction window (seconds)
    pub rapid_window_seconds: i64,

    /// Amount-spike multiplier over the running average
    pub spike_multiplier: Decimal,

    /// Weekend-large rule threshold
    pub weekend_threshold: Decimal,

    /// Transactions allowed in the trailing velocity window
    pub velocity_limit: u32,

    /// Velocity / recency window (seconds)
    pub velocity_window_seconds: i64,

    /// Maximum single offline transaction
    pub offline_cap: Decimal,

    /// Maximum cumulative offline amount per local day
    pub daily_offline_cap: Decimal,

    /// Maximum offline transactions per trailing hour
    pub offline_freq_cap: u32,

    /// Offset from UTC used for "local" hour and day (seconds east)
    pub local_utc_offset_secs: i32,

    /// Maximum timestamps kept in a profile's recency window
    pub max_recent_transactions: usize,
}

impl Default for FraudThresholds {
    fn default() -> Self {
        Self {
            high_amount_threshold: Decimal::from(100_000),
            rapid_window_seconds: 300,
            spike_multiplier: Decimal::from(5),
            weekend_threshold: Decimal::from(50_000),
            velocity_limit: 10,
            velocity_window_seconds: 3_600,
            offline_cap: Decimal::from(10_000),
            daily_offline_cap: Decimal::from(50_000),
            offline_freq_cap: 5,
            local_utc_offset_secs: 0,
            max_recent_transactions: 100,
        }
    }
}

impl FraudThresholds {
    /// Reject inconsistent settings
    pub fn validate(&self) -> Result<()> {
        if self.high_amount_threshold <= Decimal::ZERO
            || self.weekend_threshold <= Decimal::ZERO
            || self.offline_cap <= Decimal::ZERO
            || self.daily_offline_cap <= Decimal::ZERO
        {
            return Err(Error::InvalidConfig("amount thresholds must be positive".to_string()));
        }
        if self.spike_multiplier <= Decimal::ONE {
            return Err(Error::InvalidConfig(format!(
                "spike_multiplier must exceed 1, got {}",
                self.spike_multiplier
            )));
        }
        if self.rapid_window_seconds <= 0 || self.velocity_window_seconds <= 0 {
            return Err(Error::InvalidConfig("windows must be positive".to_string()));
        }
        // The rapid rule reads the previous timestamp from the recency window.
        if self.rapid_window_seconds > self.velocity_window_seconds {
            return Err(Error::InvalidConfig(format!(
                "rapid_window_seconds ({}) exceeds velocity_window_seconds ({})",
                self.rapid_window_seconds, self.velocity_window_seconds
            )));
        }
        if self.max_recent_transactions <= self.velocity_limit as usize {
            return Err(Error::InvalidConfig(format!(
                "max_recent_transactions ({}) must exceed velocity_limit ({})",
                self.max_recent_transactions, self.velocity_limit
            )));
        }
        if self.local_utc_offset_secs.abs() >= 86_400 {
            return Err(Error::InvalidConfig("local_utc_offset_secs out of range".to_string()));
        }
        Ok(())
    }

    /// Load from a TOML file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let thresholds: FraudThresholds = toml::from_str(&content)
            .map_err(|e| Error::InvalidConfig(format!("Failed to parse thresholds: {}", e)))?;
        thresholds.validate()?;
        Ok(thresholds)
    }

    /// Apply `FRAUD_*` environment overrides
    pub fn apply_env(&mut self) -> Result<()> {
        fn read<T: FromStr>(name: &str) -> Result<Option<T>>
        where
            T::Err: std::fmt::Display,
        {
            match std::env::var(name) {
                Ok(raw) => raw
                    .parse::<T>()
                    .map(Some)
                    .map_err(|e| Error::InvalidConfig(format!("{}: {}", name, e))),
                Err(_) => Ok(None),
            }
        }

        if let Some(v) = read("FRAUD_HIGH_AMOUNT_THRESHOLD")? {
            self.high_amount_threshold = v;
        }
        if let Some(v) = read("FRAUD_RAPID_WINDOW_SECONDS")? {
            self.rapid_window_seconds = v;
        }
        if let Some(v) = read("FRAUD_SPIKE_MULTIPLIER")? {
            self.spike_multiplier = v;
        }
        if let Some(v) = read("FRAUD_WEEKEND_THRESHOLD")? {
            self.weekend_threshold = v;
        }
        if let Some(v) = read("FRAUD_VELOCITY_LIMIT")? {
            self.velocity_limit = v;
        }
        if let Some(v) = read("FRAUD_OFFLINE_CAP")? {
            self.offline_cap = v;
        }
        if let Some(v) = read("FRAUD_DAILY_OFFLINE_CAP")? {
            self.daily_offline_cap = v;
        }
        if let Some(v) = read("FRAUD_OFFLINE_FREQ_CAP")? {
            self.offline_freq_cap = v;
        }
        if let Some(v) = read("FRAUD_LOCAL_UTC_OFFSET_SECS")? {
            self.local_utc_offset_secs = v;
        }

        self.validate()
    }

    /// Local timezone as a chrono offset
    pub fn local_offset(&self) -> chrono::FixedOffset {
        use chrono::Offset;
        chrono::FixedOffset::east_opt(self.local_utc_offset_secs).unwrap_or_else(|| chrono::Utc.fix())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_thresholds() {
        let t = FraudThresholds::default();
        assert_eq!(t.high_amount_threshold, Decimal::from(100_000));
        assert_eq!(t.rapid_window_seconds, 300);
        assert_eq!(t.offline_freq_cap, 5);
        assert!(t.validate().is_ok());
    }

    #[test]
    fn test_rapid_window_must_fit_recency_window() {
        let t = FraudThresholds {
            rapid_window_seconds: 7_200,
            ..Default::default()
        };
        assert!(matches!(t.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let t: FraudThresholds = toml::from_str("offline_cap = \"2500\"\nvelocity_limit = 4").unwrap();
        assert_eq!(t.offline_cap, Decimal::from(2_500));
        assert_eq!(t.velocity_limit, 4);
        assert_eq!(t.daily_offline_cap, Decimal::from(50_000));
    }
}
