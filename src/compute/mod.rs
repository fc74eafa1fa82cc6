//! Parallel batch computation.
//!
//! A batch of `N` rows is split into `W` contiguous slices
//! ([`partition`]), each slice is handed to its own worker thread, and the
//! per-slice results are concatenated back in slice order. While the batch
//! runs, a progress notifier periodically asks the executor for the summed
//! progress of all workers and forwards it to a
//! [`NotificationSink`](crate::notify::NotificationSink).
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use parallel_analysis::compute::{ExecutorConfig, ParallelExecutor, RowStatistics};
//! use parallel_analysis::notify::TracingSink;
//!
//! let rows: Arc<[Vec<f64>]> = vec![vec![1.0, 2.0], vec![3.0, 4.0]].into();
//! let executor = ParallelExecutor::new(ExecutorConfig::default());
//! let stats = executor
//!     .run(Arc::new(RowStatistics), rows, (), Arc::new(TracingSink::new()))
//!     .await?;
//! ```

pub mod analysis;
pub mod builtin;
pub mod executor;
mod notifier;
pub mod partition;
mod worker;

pub use analysis::{analysis_fn, Analysis, FnAnalysis, ResultSeries, RowSequence, DEFAULT_SERIES};
pub use builtin::{load_rows, RowStatistics, RowStatisticsError, RowStatisticsJob, ROW_STATISTICS_JOB};
pub use executor::{ExecutorConfig, ParallelExecutor, DEFAULT_NOTIFICATIONS_PER_SECOND, DEFAULT_WORKERS};
pub use partition::{partition, progress_step, Slice};
