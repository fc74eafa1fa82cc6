//! Metrics module for Prometheus-based monitoring.
//!
//! # Example
//!
//! ```ignore
//! use parallel_analysis::metrics::{init_metrics, export_metrics, MetricsCollector};
//!
//! init_metrics().expect("Failed to initialize metrics");
//!
//! let collector = MetricsCollector::new();
//! collector.record_batch("completed", 2.5, 10_000);
//!
//! let metrics_text = export_metrics();
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::MetricsCollector;
pub use self::prometheus::{export_metrics, init_metrics};

pub use self::prometheus::{
    ACTIVE_WORKERS, ADMISSIONS_TOTAL, BATCHES_TOTAL, BATCH_DURATION, JOBS_DROPPED, JOBS_TIMED_OUT,
    REGISTRY, ROWS_PROCESSED,
};
