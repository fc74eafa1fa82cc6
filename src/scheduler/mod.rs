//! Job admission.
//!
//! Limits how many named, parameterized batch computations may be active at
//! once across every process that shares a job store:
//!
//! - **JobKey**: `(job_type, canonical params)` identity of a job
//! - **JobStatus**: `unknown`, `waiting`, `running`, `failed`, `completed`, `timed_out`
//! - **JobRegistry**: job type name to [`JobFunction`]
//! - **AdmissionController**: sweep, count, admit, launch
//!
//! # Architecture
//!
//! ```text
//!   submit(job_type, params)
//!            │
//!   ┌────────▼─────────────────── one SQLite transaction ─┐
//!   │ sweep: drop old records, time out stale `running`   │
//!   │ find (job_type, params) ── settled? ──► that status │
//!   │ count `running` ────────── >= max?  ──► waiting     │
//!   │ insert `running`                                    │
//!   └────────┬────────────────────────────────────────────┘
//!            │ spawn
//!   ┌────────▼────────┐   completed / failed   ┌──────────┐
//!   │   JobFunction   │ ─────────────────────► │ JobStore │
//!   └─────────────────┘                        └──────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use parallel_analysis::compute::ExecutorConfig;
//! use parallel_analysis::scheduler::{AdmissionConfig, AdmissionController, JobRegistry, JobStatus};
//! use parallel_analysis::storage::JobStore;
//!
//! let store = JobStore::open("sqlite://jobs.db").await?;
//! let registry = JobRegistry::with_builtins(ExecutorConfig::default());
//! let controller = Arc::new(AdmissionController::new(store, registry, AdmissionConfig::default()));
//!
//! let params = serde_json::json!({"input": "rows.json"});
//! match controller.submit("row_statistics", &params).await? {
//!     JobStatus::Waiting => { /* try again later */ }
//!     status => println!("job is {status}"),
//! }
//! ```

pub mod admission;
pub mod job;

pub use admission::{
    AdmissionConfig, AdmissionController, JobFunction, JobRegistry, DEFAULT_JOB_DROP_AGE,
    DEFAULT_JOB_TIMEOUT, DEFAULT_MAX_CONCURRENT_JOBS,
};
pub use job::{JobKey, JobRecord, JobStatus, ParseJobStatusError};
