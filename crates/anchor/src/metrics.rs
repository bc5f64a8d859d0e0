//! Anchor store metrics.

use metrics::{Counter, Gauge};

/// Persistent store metrics.
#[derive(Clone, Debug)]
pub(crate) struct StoreMetrics {
    pub(crate) puts_total: Counter,
    pub(crate) filtered_total: Counter,
    pub(crate) gets_total: Counter,
    pub(crate) errors_total: Counter,
    pub(crate) republished_total: Counter,
    pub(crate) republish_failures_total: Counter,
    pub(crate) cleanup_removed_total: Counter,
    pub(crate) migrated_rows_total: Counter,
    /// 1 while a restore pass is running.
    pub(crate) restore_in_progress: Gauge,
}

impl Default for StoreMetrics {
    fn default() -> Self {
        Self {
            puts_total: metrics::counter!("anchor.store.puts_total"),
            filtered_total: metrics::counter!("anchor.store.filtered_total"),
            gets_total: metrics::counter!("anchor.store.gets_total"),
            errors_total: metrics::counter!("anchor.store.errors_total"),
            republished_total: metrics::counter!("anchor.restore.republished_total"),
            republish_failures_total: metrics::counter!("anchor.restore.failures_total"),
            cleanup_removed_total: metrics::counter!("anchor.cleanup.removed_total"),
            migrated_rows_total: metrics::counter!("anchor.migration.rows_total"),
            restore_in_progress: metrics::gauge!("anchor.restore.in_progress"),
        }
    }
}
