//! SQLite job store.
//!
//! The `jobs` table is the only state shared between concurrent admissions,
//! possibly across processes. Admission works inside a [`JobTransaction`]
//! whose first statement is the sweep `DELETE`: that write takes SQLite's
//! write lock up front, so sweep, lookup, count and insert run as one
//! serialised unit.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use thiserror::Error;

use crate::scheduler::{JobKey, JobRecord, JobStatus};

use super::migrations::{MigrationError, MigrationRunner};

/// How long a connection waits for another writer before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

const SELECT_JOB_COLUMNS: &str = "SELECT id, job_type, params, status, start_time, updated_at FROM jobs";

/// Errors that can occur during job store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] MigrationError),

    /// A row could not be turned into a [`JobRecord`].
    #[error("Corrupt job record {id}: {reason}")]
    CorruptRecord { id: i64, reason: String },
}

/// Rows touched by one garbage-collection sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    /// Records deleted for being older than the drop age.
    pub dropped: u64,
    /// Records moved from `running` to `timed_out`.
    pub timed_out: u64,
}

/// SQLite-backed store of [`JobRecord`]s.
#[derive(Clone)]
pub struct JobStore {
    pool: SqlitePool,
}

impl JobStore {
    /// Opens (creating if needed) the database at `database_url` and applies
    /// the schema.
    ///
    /// Accepts `sqlite://path`, `sqlite:path` and bare file paths.
    pub async fn open(database_url: &str) -> Result<Self, StoreError> {
        let url = if database_url.starts_with("sqlite:") {
            database_url.to_string()
        } else {
            format!("sqlite://{}", database_url)
        };

        let opts = SqliteConnectOptions::from_str(&url)
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;
        let store = Self::connect_with(opts).await?;

        tracing::info!(database_url = %url, "Job store opened");
        Ok(store)
    }

    /// Opens (creating if needed) the database file at `path`.
    pub async fn open_path(path: &Path) -> Result<Self, StoreError> {
        let opts = SqliteConnectOptions::new().filename(path);
        let store = Self::connect_with(opts).await?;

        tracing::info!(path = %path.display(), "Job store opened");
        Ok(store)
    }

    async fn connect_with(opts: SqliteConnectOptions) -> Result<Self, StoreError> {
        let opts = opts
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(opts)
            .await
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Wraps an existing pool. The schema is not applied.
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        MigrationRunner::new(self.pool.clone()).run_migrations().await?;
        Ok(())
    }

    /// Starts an admission transaction. Dropping it without
    /// [`JobTransaction::commit`] rolls everything back.
    pub async fn begin(&self) -> Result<JobTransaction, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(JobTransaction { tx })
    }

    /// Reads the record for `key`, if any.
    pub async fn get(&self, key: &JobKey) -> Result<Option<JobRecord>, StoreError> {
        let row = sqlx::query(&format!("{SELECT_JOB_COLUMNS} WHERE job_type = ?1 AND params = ?2"))
            .bind(key.job_type())
            .bind(key.params())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    /// Stores the final status of a launched job.
    ///
    /// If the sweep dropped the record while the job ran, it is created again
    /// with `start_time = now`.
    pub async fn record_outcome(
        &self,
        key: &JobKey,
        status: JobStatus,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "INSERT INTO jobs (job_type, params, status, start_time, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(job_type, params) DO UPDATE SET
                status = excluded.status,
                updated_at = excluded.updated_at",
        )
        .bind(key.job_type())
        .bind(key.params())
        .bind(status.as_str())
        .bind(now.timestamp_millis())
        .execute(&self.pool)
        .await?;

        tracing::debug!(
            job_type = key.job_type(),
            status = %status,
            rows = result.rows_affected(),
            "Recorded job outcome"
        );
        Ok(())
    }

    /// Number of records currently `running`.
    pub async fn count_running(&self) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE status = 'running'")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    /// Most recently started records first.
    pub async fn list(&self, limit: u32) -> Result<Vec<JobRecord>, StoreError> {
        let rows = sqlx::query(&format!(
            "{SELECT_JOB_COLUMNS} ORDER BY start_time DESC, id DESC LIMIT ?1"
        ))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }
}

/// One admission decision's worth of store operations, committed atomically.
pub struct JobTransaction {
    tx: Transaction<'static, Sqlite>,
}

impl JobTransaction {
    /// Deletes every record started before `drop_before` and marks `running`
    /// records started before `timeout_before` as `timed_out`.
    pub async fn sweep(
        &mut self,
        now: DateTime<Utc>,
        drop_before: DateTime<Utc>,
        timeout_before: DateTime<Utc>,
    ) -> Result<SweepOutcome, StoreError> {
        let dropped = sqlx::query("DELETE FROM jobs WHERE start_time < ?1")
            .bind(drop_before.timestamp_millis())
            .execute(&mut *self.tx)
            .await?
            .rows_affected();

        let timed_out = sqlx::query(
            "UPDATE jobs SET status = 'timed_out', updated_at = ?2
             WHERE status = 'running' AND start_time < ?1",
        )
        .bind(timeout_before.timestamp_millis())
        .bind(now.timestamp_millis())
        .execute(&mut *self.tx)
        .await?
        .rows_affected();

        Ok(SweepOutcome { dropped, timed_out })
    }

    pub async fn find(&mut self, key: &JobKey) -> Result<Option<JobRecord>, StoreError> {
        let row = sqlx::query(&format!("{SELECT_JOB_COLUMNS} WHERE job_type = ?1 AND params = ?2"))
            .bind(key.job_type())
            .bind(key.params())
            .fetch_optional(&mut *self.tx)
            .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    pub async fn count_running(&mut self) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE status = 'running'")
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(count as u64)
    }

    /// Creates the record for `key` as `running`, or moves an existing
    /// unsettled record to `running`. Returns the record id.
    pub async fn insert_running(&mut self, key: &JobKey, now: DateTime<Utc>) -> Result<i64, StoreError> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO jobs (job_type, params, status, start_time, updated_at)
             VALUES (?1, ?2, 'running', ?3, ?3)
             ON CONFLICT(job_type, params) DO UPDATE SET
                status = 'running',
                start_time = excluded.start_time,
                updated_at = excluded.updated_at
             RETURNING id",
        )
        .bind(key.job_type())
        .bind(key.params())
        .bind(now.timestamp_millis())
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(id)
    }

    pub async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }
}

fn record_from_row(row: &SqliteRow) -> Result<JobRecord, StoreError> {
    let id: i64 = row.try_get("id")?;
    let status: String = row.try_get("status")?;
    let status = status
        .parse::<JobStatus>()
        .map_err(|e| StoreError::CorruptRecord {
            id,
            reason: e.to_string(),
        })?;

    Ok(JobRecord {
        id,
        job_type: row.try_get("job_type")?,
        params: row.try_get("params")?,
        status,
        start_time: millis_to_datetime(id, row.try_get("start_time")?)?,
        updated_at: millis_to_datetime(id, row.try_get("updated_at")?)?,
    })
}

fn millis_to_datetime(id: i64, millis: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(millis).ok_or_else(|| StoreError::CorruptRecord {
        id,
        reason: format!("timestamp {} out of range", millis),
    })
}
