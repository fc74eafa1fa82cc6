//! SQLite persistent storage for job records.
//!
//! # Overview
//!
//! - **JobStore**: SQLite client for the `jobs` table (WAL journal, busy timeout)
//! - **JobTransaction**: the atomic sweep → lookup → count → insert unit used by admission
//! - **Migrations**: schema management and versioning
//!
//! # Usage
//!
//! ```rust,ignore
//! use parallel_analysis::storage::JobStore;
//! use parallel_analysis::scheduler::{JobKey, JobStatus};
//!
//! let store = JobStore::open("sqlite://jobs.db").await?;
//! let key = JobKey::new("row_statistics", &serde_json::json!({"input": "rows.json"}));
//! store.record_outcome(&key, JobStatus::Completed, chrono::Utc::now()).await?;
//! ```

pub mod database;
pub mod migrations;
pub mod schema;

pub use database::{JobStore, JobTransaction, StoreError, SweepOutcome};
pub use migrations::{MigrationError, MigrationRunner};
