//! Prometheus metrics registration and export.
//!
//! This module defines all Prometheus metrics used by the engine and provides
//! functions for initializing, registering, and exporting them.

use prometheus::{
    Counter, CounterVec, Encoder, Gauge, Histogram, HistogramOpts, Opts, Registry, TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all engine metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Total number of batches executed, labeled by status.
pub static BATCHES_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Batch execution duration in seconds.
pub static BATCH_DURATION: OnceLock<Histogram> = OnceLock::new();

/// Total rows processed by successful batches.
pub static ROWS_PROCESSED: OnceLock<Counter> = OnceLock::new();

/// Number of worker threads currently running an analysis.
pub static ACTIVE_WORKERS: OnceLock<Gauge> = OnceLock::new();

/// Admission decisions, labeled by the returned status.
pub static ADMISSIONS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Job records swept to `timed_out`.
pub static JOBS_TIMED_OUT: OnceLock<Counter> = OnceLock::new();

/// Job records deleted by the sweep.
pub static JOBS_DROPPED: OnceLock<Counter> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Call once at startup. Later calls register into a fresh registry that is
/// then discarded, so the first initialization wins.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric registration fails.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let registry = Registry::new();

    let batches_total = CounterVec::new(
        Opts::new("parallel_analysis_batches_total", "Total number of batches executed"),
        &["status"],
    )?;

    let batch_duration = Histogram::with_opts(
        HistogramOpts::new(
            "parallel_analysis_batch_duration_seconds",
            "Batch execution duration in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0, 1800.0]),
    )?;

    let rows_processed = Counter::new(
        "parallel_analysis_rows_processed_total",
        "Total rows processed by successful batches",
    )?;

    let active_workers = Gauge::new(
        "parallel_analysis_active_workers",
        "Number of worker threads currently running an analysis",
    )?;

    let admissions_total = CounterVec::new(
        Opts::new("parallel_analysis_admissions_total", "Admission decisions by status"),
        &["status"],
    )?;

    let jobs_timed_out = Counter::new(
        "parallel_analysis_jobs_timed_out_total",
        "Job records marked timed_out by the sweep",
    )?;

    let jobs_dropped = Counter::new(
        "parallel_analysis_jobs_dropped_total",
        "Job records deleted by the sweep",
    )?;

    registry.register(Box::new(batches_total.clone()))?;
    registry.register(Box::new(batch_duration.clone()))?;
    registry.register(Box::new(rows_processed.clone()))?;
    registry.register(Box::new(active_workers.clone()))?;
    registry.register(Box::new(admissions_total.clone()))?;
    registry.register(Box::new(jobs_timed_out.clone()))?;
    registry.register(Box::new(jobs_dropped.clone()))?;

    // If any of these fail, metrics were already initialized (idempotent)
    let _ = REGISTRY.set(registry);
    let _ = BATCHES_TOTAL.set(batches_total);
    let _ = BATCH_DURATION.set(batch_duration);
    let _ = ROWS_PROCESSED.set(rows_processed);
    let _ = ACTIVE_WORKERS.set(active_workers);
    let _ = ADMISSIONS_TOTAL.set(admissions_total);
    let _ = JOBS_TIMED_OUT.set(jobs_timed_out);
    let _ = JOBS_DROPPED.set(jobs_dropped);

    tracing::info!("Prometheus metrics initialized");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// Returns an explanatory comment line when metrics were never initialized or
/// encoding fails.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}
