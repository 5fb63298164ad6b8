//! Offline limit checking
//!
//! Runs on the device with no authoritative data, so it only uses the
//! transaction, the device trust flag and the user's own queued entries.
//! Every cap is checked and every violation recorded; any one rejects.

use chrono::{Duration, NaiveDate};
use fraud_engine::{FraudThresholds, Transaction};
use rust_decimal::Decimal;

use crate::types::{QueueEntry, QueueState, Violation};

/// Offline cap checker
#[derive(Debug, Clone)]
pub struct OfflineValidator {
    thresholds: FraudThresholds,
}

impl OfflineValidator {
    /// Create new validator
    pub fn new(thresholds: FraudThresholds) -> Self {
        Self { thresholds }
    }

    /// All violations for `tx`, given the user's earlier queue entries.
    ///
    /// Entries that are REJECTED, or that are `tx` itself, do not count
    /// towards the daily or hourly caps.
    pub fn validate(&self, tx: &Transaction, device_trusted: bool, prior: &[QueueEntry]) -> Vec<Violation> {
        let counted: Vec<&Transaction> = prior
            .iter()
            .filter(|e| e.state != QueueState::Rejected && e.id() != tx.id)
            .map(|e| &e.transaction)
            .collect();

        [
            self.check_single_transaction(tx.amount),
            self.check_daily_limit(tx, &counted),
            self.check_frequency(tx, &counted),
            self.check_device(tx, device_trusted),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    /// Single offline transaction cap
    pub fn check_single_transaction(&self, amount: Decimal) -> Option<Violation> {
        (amount > self.thresholds.offline_cap).then(|| Violation::OverOfflineCap {
            amount,
            cap: self.thresholds.offline_cap,
        })
    }

    /// Cumulative cap for the transaction's local day
    pub fn check_daily_limit(&self, tx: &Transaction, prior: &[&Transaction]) -> Option<Violation> {
        let day = self.local_day(tx);
        let total: Decimal = prior
            .iter()
            .filter(|p| p.user_id == tx.user_id && self.local_day(p) == day)
            .map(|p| p.amount)
            .sum::<Decimal>()
            + tx.amount;

        (total > self.thresholds.daily_offline_cap).then(|| Violation::DailyCapExceeded {
            total,
            cap: self.thresholds.daily_offline_cap,
        })
    }

    /// Offline transactions in the trailing hour, the new one included
    pub fn check_frequency(&self, tx: &Transaction, prior: &[&Transaction]) -> Option<Violation> {
        let start = tx.timestamp - Duration::hours(1);
        let count = prior
            .iter()
            .filter(|p| p.user_id == tx.user_id && p.timestamp > start && p.timestamp <= tx.timestamp)
            .count() as u32
            + 1;

        (count > self.thresholds.offline_freq_cap).then(|| Violation::FrequencyCapExceeded {
            count,
            cap: self.thresholds.offline_freq_cap,
        })
    }

    /// Device must have been recognized before
    pub fn check_device(&self, tx: &Transaction, device_trusted: bool) -> Option<Violation> {
        (!device_trusted).then(|| Violation::UntrustedDevice {
            device_id: tx.device_id.clone(),
        })
    }

    fn local_day(&self, tx: &Transaction) -> NaiveDate {
        tx.timestamp
            .with_timezone(&self.thresholds.local_offset())
            .date_naive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use fraud_engine::{RiskScore, UserId};

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 6, h, m, 0).unwrap()
    }

    fn tx(amount: i64, ts: DateTime<Utc>) -> Transaction {
        Transaction::new(UserId::new("U1"), Decimal::from(amount), ts, "DEV-1", "").offline()
    }

    fn queued(amount: i64, ts: DateTime<Utc>, state: QueueState) -> QueueEntry {
        let mut e = QueueEntry::new(tx(amount, ts), true, RiskScore::ZERO).unwrap();
        e.state = state;
        e
    }

    #[test]
    fn test_single_cap() {
        let v = OfflineValidator::new(FraudThresholds::default());
        assert!(v.validate(&tx(10_000, at(12, 0)), true, &[]).is_empty());

        let violations = v.validate(&tx(15_000, at(12, 0)), true, &[]);
        assert_eq!(
            violations,
            vec![Violation::OverOfflineCap {
                amount: Decimal::from(15_000),
                cap: Decimal::from(10_000)
            }]
        );
    }

    #[test]
    fn test_daily_cap_counts_same_local_day_only() {
        let v = OfflineValidator::new(FraudThresholds::default());
        let prior: Vec<_> = (0..5)
            .map(|i| queued(9_000, at(1 + i, 0), QueueState::Validated))
            .chain(std::iter::once(queued(9_000, at(0, 0) - Duration::hours(2), QueueState::Validated)))
            .collect();

        // 45,000 today + 5,000 = 50,000: allowed
        assert!(v.check_daily_limit(&tx(5_000, at(20, 0)), &prior.iter().map(|e| &e.transaction).collect::<Vec<_>>()).is_none());
        // 45,000 + 5,001: over
        let violations = v.validate(&tx(5_001, at(20, 0)), true, &prior);
        assert!(matches!(violations.as_slice(), [Violation::DailyCapExceeded { .. }]));
    }

    #[test]
    fn test_rejected_entries_do_not_count() {
        let v = OfflineValidator::new(FraudThresholds::default());
        let prior: Vec<_> = (0..6)
            .map(|i| queued(9_000, at(10, i * 5), QueueState::Rejected))
            .collect();
        assert!(v.validate(&tx(9_000, at(10, 40)), true, &prior).is_empty());
    }

    #[test]
    fn test_frequency_cap_includes_new_transaction() {
        let v = OfflineValidator::new(FraudThresholds::default());
        let four: Vec<_> = (0..4)
            .map(|i| queued(10, at(10, i * 10), QueueState::Validated))
            .collect();
        assert!(v.validate(&tx(10, at(10, 50)), true, &four).is_empty());

        let five: Vec<_> = (0..5)
            .map(|i| queued(10, at(10, i * 10), QueueState::Synced))
            .collect();
        let violations = v.validate(&tx(10, at(10, 55)), true, &five);
        assert_eq!(violations, vec![Violation::FrequencyCapExceeded { count: 6, cap: 5 }]);

        // Window is the trailing hour: entries at exactly ts - 1h drop out
        assert!(v.validate(&tx(10, at(11, 0)), true, &five).is_empty());
    }

    #[test]
    fn test_all_violations_recorded() {
        let v = OfflineValidator::new(FraudThresholds::default());
        let prior: Vec<_> = (0..5)
            .map(|i| queued(9_500, at(9, i * 10), QueueState::Validated))
            .collect();

        let violations = v.validate(&tx(12_000, at(9, 55)), false, &prior);
        assert_eq!(violations.len(), 4);
    }
}
