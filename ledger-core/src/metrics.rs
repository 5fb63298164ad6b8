//! Metrics collection for observability
//!
//! # Metrics
//!
//! - `ledger_entries_applied_total{source}` - Entries written, by source
//! - `ledger_duplicates_suppressed_total` - Applies skipped because the id existed
//! - `ledger_apply_duration_seconds` - Histogram of apply latencies

use crate::types::EntrySource;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Entries written
    pub entries_applied: IntCounterVec,

    /// Duplicate applies suppressed
    pub duplicates_total: IntCounter,

    /// Apply duration histogram
    pub apply_duration: Histogram,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("duplicates_total", &self.duplicates_total.get())
            .finish_non_exhaustive()
    }
}

impl Metrics {
    /// Create new metrics collector on its own registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let entries_applied = IntCounterVec::new(
            Opts::new("ledger_entries_applied_total", "Entries written to the ledger"),
            &["source"],
        )?;
        registry.register(Box::new(entries_applied.clone()))?;

        let duplicates_total = IntCounter::new(
            "ledger_duplicates_suppressed_total",
            "Applies skipped because the transaction id was already present",
        )?;
        registry.register(Box::new(duplicates_total.clone()))?;

        let apply_duration = Histogram::with_opts(
            HistogramOpts::new("ledger_apply_duration_seconds", "Histogram of apply latencies")
                .buckets(vec![0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 1.0]),
        )?;
        registry.register(Box::new(apply_duration.clone()))?;

        Ok(Self {
            entries_applied,
            duplicates_total,
            apply_duration,
            registry,
        })
    }

    /// Record a written entry
    pub fn record_applied(&self, source: EntrySource) {
        self.entries_applied.with_label_values(&[source.as_str()]).inc();
    }

    /// Record a suppressed duplicate
    pub fn record_duplicate(&self) {
        self.duplicates_total.inc();
    }

    /// Record apply duration
    pub fn record_apply_duration(&self, duration_seconds: f64) {
        self.apply_duration.observe(duration_seconds);
    }

    /// Total entries written across sources
    pub fn applied_total(&self) -> u64 {
        [EntrySource::Online, EntrySource::OfflineSync]
            .iter()
            .map(|s| self.entries_applied.with_label_values(&[s.as_str()]).get())
            .sum()
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        assert_eq!(metrics.applied_total(), 0);
        assert_eq!(metrics.duplicates_total.get(), 0);
    }

    #[test]
    fn test_instances_do_not_share_state() {
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();
        a.record_applied(EntrySource::Online);
        a.record_applied(EntrySource::OfflineSync);
        a.record_duplicate();

        assert_eq!(a.applied_total(), 2);
        assert_eq!(b.applied_total(), 0);
        assert_eq!(b.duplicates_total.get(), 0);
    }

    #[test]
    fn test_registry_gathers_families() {
        let metrics = Metrics::new().unwrap();
        metrics.record_applied(EntrySource::Online);
        metrics.record_apply_duration(0.002);

        let names: Vec<_> = metrics
            .registry()
            .gather()
            .iter()
            .map(|f| f.get_name().to_string())
            .collect();
        assert!(names.contains(&"ledger_entries_applied_total".to_string()));
        assert!(names.contains(&"ledger_apply_duration_seconds".to_string()));
    }
}
