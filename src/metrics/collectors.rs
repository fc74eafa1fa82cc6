//! High-level recording interface over the raw Prometheus metrics.
//!
//! Every method is a no-op for metrics that were never initialized, so
//! library users who skip `init_metrics()` pay nothing.

use super::prometheus::{
    ACTIVE_WORKERS, ADMISSIONS_TOTAL, BATCHES_TOTAL, BATCH_DURATION, JOBS_DROPPED, JOBS_TIMED_OUT,
    ROWS_PROCESSED,
};

/// Metrics collector for engine operations.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    /// Record the end of a batch.
    ///
    /// # Arguments
    ///
    /// * `status` - `"completed"` or `"failed"`
    /// * `duration_secs` - Wall-clock batch duration
    /// * `rows` - Rows in the batch; only counted for completed batches
    pub fn record_batch(&self, status: &str, duration_secs: f64, rows: usize) {
        if let Some(batches) = BATCHES_TOTAL.get() {
            batches.with_label_values(&[status]).inc();
        }

        if let Some(duration) = BATCH_DURATION.get() {
            duration.observe(duration_secs);
        }

        if status == "completed" {
            if let Some(processed) = ROWS_PROCESSED.get() {
                processed.inc_by(rows as f64);
            }
        }

        tracing::trace!(status, duration_secs, rows, "Recorded batch metric");
    }

    /// Adjust the active worker gauge by `delta`.
    pub fn add_active_workers(&self, delta: i64) {
        if let Some(active) = ACTIVE_WORKERS.get() {
            active.add(delta as f64);
        }
    }

    /// Record an admission decision.
    pub fn record_admission(&self, status: &str) {
        if let Some(admissions) = ADMISSIONS_TOTAL.get() {
            admissions.with_label_values(&[status]).inc();
        }
    }

    /// Record the outcome of a garbage-collection sweep.
    pub fn record_sweep(&self, dropped: u64, timed_out: u64) {
        if dropped > 0 {
            if let Some(counter) = JOBS_DROPPED.get() {
                counter.inc_by(dropped as f64);
            }
        }
        if timed_out > 0 {
            if let Some(counter) = JOBS_TIMED_OUT.get() {
                counter.inc_by(timed_out as f64);
            }
        }
    }
}
