//! Database schema constants.
//!
//! All timestamps are stored as INTEGER unix milliseconds (UTC). `params`
//! holds the canonical JSON form of the job parameters, so
//! `(job_type, params)` is the identity of a job.

/// SQL schema for creating the jobs table.
pub const CREATE_JOBS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    job_type    TEXT    NOT NULL,
    params      TEXT    NOT NULL,
    status      TEXT    NOT NULL DEFAULT 'unknown',
    start_time  INTEGER NOT NULL,
    updated_at  INTEGER NOT NULL,
    UNIQUE (job_type, params)
)
"#;

/// Index used by the running-count and the timeout sweep.
pub const CREATE_JOBS_STATUS_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status)";

/// Index used by the drop sweep.
pub const CREATE_JOBS_START_TIME_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_jobs_start_time ON jobs(start_time)";

/// Returns all schema creation statements in the correct order.
pub fn all_schema_statements() -> Vec<&'static str> {
    vec![
        CREATE_JOBS_TABLE,
        CREATE_JOBS_STATUS_INDEX,
        CREATE_JOBS_START_TIME_INDEX,
    ]
}

/// Table names in the schema.
pub mod tables {
    /// Job records table name.
    pub const JOBS: &str = "jobs";
    /// Applied migrations table name.
    pub const MIGRATIONS: &str = "_migrations";
}
