//! Offline path metrics
//!
//! - `offline_enqueued_total{state}` - Enqueue results (validated / rejected)
//! - `offline_sync_outcomes_total{state}` - Per-entry sync results
//! - `offline_sync_runs_total{result}` - Sync runs (ok / error)
//! - `offline_queue_depth{state}` - Entries per state after the last run
//! - `offline_queue_unreadable` - Stored entries that fail decode or checksum
//! - `offline_sync_entry_errors_total` - Entries skipped by a run after an error

use crate::types::{QueueState, QueueStats};
use prometheus::{IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct SyncMetrics {
    /// Enqueue results
    pub enqueued_total: IntCounterVec,

    /// Per-entry sync results
    pub sync_outcomes_total: IntCounterVec,

    /// Sync runs
    pub sync_runs_total: IntCounterVec,

    /// Queue depth per state
    pub queue_depth: IntGaugeVec,

    /// Unreadable stored entries
    pub unreadable_entries: IntGauge,

    /// Entries a sync run skipped after an error
    pub entry_errors_total: IntCounter,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl SyncMetrics {
    /// Create new metrics collector on its own registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let enqueued_total = IntCounterVec::new(
            Opts::new("offline_enqueued_total", "Offline enqueue results by state"),
            &["state"],
        )?;
        registry.register(Box::new(enqueued_total.clone()))?;

        let sync_outcomes_total = IntCounterVec::new(
            Opts::new("offline_sync_outcomes_total", "Per-entry sync results by state"),
            &["state"],
        )?;
        registry.register(Box::new(sync_outcomes_total.clone()))?;

        let sync_runs_total = IntCounterVec::new(
            Opts::new("offline_sync_runs_total", "Sync runs by result"),
            &["result"],
        )?;
        registry.register(Box::new(sync_runs_total.clone()))?;

        let queue_depth = IntGaugeVec::new(
            Opts::new("offline_queue_depth", "Queue entries per state"),
            &["state"],
        )?;
        registry.register(Box::new(queue_depth.clone()))?;

        let unreadable_entries = IntGauge::new(
            "offline_queue_unreadable",
            "Stored queue entries that fail decode or checksum",
        )?;
        registry.register(Box::new(unreadable_entries.clone()))?;

        let entry_errors_total = IntCounter::new(
            "offline_sync_entry_errors_total",
            "Entries skipped by a sync run after an error",
        )?;
        registry.register(Box::new(entry_errors_total.clone()))?;

        Ok(Self {
            enqueued_total,
            sync_outcomes_total,
            sync_runs_total,
            queue_depth,
            unreadable_entries,
            entry_errors_total,
            registry,
        })
    }

    /// Record an enqueue
    pub fn record_enqueue(&self, state: QueueState) {
        self.enqueued_total.with_label_values(&[state.as_str()]).inc();
    }

    /// Record one entry's sync result
    pub fn record_sync_outcome(&self, state: QueueState) {
        self.sync_outcomes_total.with_label_values(&[state.as_str()]).inc();
    }

    /// Record a finished sync run
    pub fn record_sync_run(&self, ok: bool) {
        let result = if ok { "ok" } else { "error" };
        self.sync_runs_total.with_label_values(&[result]).inc();
    }

    /// Publish queue depth
    pub fn update_queue_depth(&self, stats: &QueueStats) {
        for state in QueueState::ALL {
            self.queue_depth
                .with_label_values(&[state.as_str()])
                .set(stats.get(state) as i64);
        }
        self.unreadable_entries.set(stats.unreadable as i64);
    }

    /// Record an entry skipped by a sync run
    pub fn record_entry_error(&self) {
        self.entry_errors_total.inc();
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
