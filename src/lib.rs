//! parallel-analysis: parallel batch analysis engine.
//!
//! Runs a CPU-bound analysis over a large ordered batch of rows split across
//! worker threads, streams coarse progress to a notification sink, and
//! reassembles per-row results in original order. A persisted admission
//! controller limits how many such jobs may run at once across processes.

// Core modules
pub mod cli;
pub mod compute;
pub mod config;
pub mod error;
pub mod metrics;
pub mod notify;
pub mod scheduler;
pub mod storage;

// Re-export commonly used types
pub use compute::{
    analysis_fn, Analysis, ExecutorConfig, ParallelExecutor, ResultSeries, RowSequence,
};
pub use config::EngineConfig;
pub use error::{AdmissionError, ConfigError, ExecutorError, MigrationError, StoreError};
pub use notify::{Notification, NotificationSink, NotificationStatus, Progress};
pub use scheduler::{AdmissionConfig, AdmissionController, JobFunction, JobRegistry, JobStatus};
pub use storage::JobStore;
