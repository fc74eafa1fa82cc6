//! Admission controller.
//!
//! Gates how many named, parameterized jobs may run at once across every
//! process sharing the same job store. Over the limit, a submission is
//! answered with `waiting` and nothing is queued: the caller resubmits.
//!
//! Every submission first sweeps the store: records older than the drop age
//! are deleted, `running` records older than the job timeout become
//! `timed_out`. Timing out is bookkeeping only; the computation itself is
//! never interrupted.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::compute::{ExecutorConfig, RowStatisticsJob, ROW_STATISTICS_JOB};
use crate::error::AdmissionError;
use crate::metrics::MetricsCollector;
use crate::storage::{JobStore, SweepOutcome};

use super::job::{JobKey, JobStatus};

/// Default maximum number of jobs `running` at once.
pub const DEFAULT_MAX_CONCURRENT_JOBS: usize = 2;

/// Default age after which a `running` job is marked `timed_out`.
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Default age after which any job record is deleted.
pub const DEFAULT_JOB_DROP_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// A computation launched by the admission controller.
#[async_trait]
pub trait JobFunction: Send + Sync {
    /// Runs the job to completion. An error marks the job `failed`.
    async fn run(&self, params: Value) -> anyhow::Result<()>;
}

/// Job type name to job function.
#[derive(Clone, Default)]
pub struct JobRegistry {
    functions: HashMap<String, Arc<dyn JobFunction>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in job types.
    pub fn with_builtins(executor: ExecutorConfig) -> Self {
        Self::new().with_job(ROW_STATISTICS_JOB, RowStatisticsJob::new(executor))
    }

    /// Registers `function` under `job_type`, replacing any previous entry.
    pub fn register(&mut self, job_type: impl Into<String>, function: impl JobFunction + 'static) {
        self.functions.insert(job_type.into(), Arc::new(function));
    }

    pub fn with_job(mut self, job_type: impl Into<String>, function: impl JobFunction + 'static) -> Self {
        self.register(job_type, function);
        self
    }

    pub fn get(&self, job_type: &str) -> Option<Arc<dyn JobFunction>> {
        self.functions.get(job_type).cloned()
    }

    pub fn contains(&self, job_type: &str) -> bool {
        self.functions.contains_key(job_type)
    }

    /// Registered job types, sorted.
    pub fn job_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

impl std::fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRegistry")
            .field("job_types", &self.job_types())
            .finish()
    }
}

/// Configuration for the admission controller.
#[derive(Debug, Clone)]
pub struct AdmissionConfig {
    /// Maximum number of jobs `running` at once.
    pub max_concurrent_jobs: NonZeroUsize,
    /// Age after which a `running` job is marked `timed_out`.
    pub job_timeout: Duration,
    /// Age after which any job record is deleted.
    pub job_drop_age: Duration,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: NonZeroUsize::new(DEFAULT_MAX_CONCURRENT_JOBS)
                .unwrap_or(NonZeroUsize::MIN),
            job_timeout: DEFAULT_JOB_TIMEOUT,
            job_drop_age: DEFAULT_JOB_DROP_AGE,
        }
    }
}

impl AdmissionConfig {
    pub fn with_max_concurrent_jobs(mut self, max: NonZeroUsize) -> Self {
        self.max_concurrent_jobs = max;
        self
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    pub fn with_job_drop_age(mut self, age: Duration) -> Self {
        self.job_drop_age = age;
        self
    }
}

/// Decides whether a job may start now, and launches it if so.
///
/// Construct one per process and share it by reference. Launched jobs are
/// detached tokio tasks: dropping the controller does not cancel them, and
/// each still records its outcome when it finishes.
pub struct AdmissionController {
    store: JobStore,
    registry: JobRegistry,
    config: AdmissionConfig,
    /// Handles of launched jobs, kept only so [`Self::drain`] can wait on
    /// them. Finished handles are pruned on every launch.
    launched: Mutex<Vec<JoinHandle<()>>>,
    metrics: MetricsCollector,
}

impl AdmissionController {
    pub fn new(store: JobStore, registry: JobRegistry, config: AdmissionConfig) -> Self {
        Self {
            store,
            registry,
            config,
            launched: Mutex::new(Vec::new()),
            metrics: MetricsCollector::new(),
        }
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub fn config(&self) -> &AdmissionConfig {
        &self.config
    }

    /// Submits a job. See [`Self::submit_at`].
    pub async fn submit(&self, job_type: &str, params: &Value) -> Result<JobStatus, AdmissionError> {
        self.submit_at(job_type, params, Utc::now()).await
    }

    /// Submits a job with params given as JSON text.
    pub async fn submit_json(&self, job_type: &str, params: &str) -> Result<JobStatus, AdmissionError> {
        let params: Value = serde_json::from_str(params)?;
        self.submit(job_type, &params).await
    }

    /// Submits a job as of `now`.
    ///
    /// Returns:
    /// - the existing status, unchanged, if a record for `(job_type, params)`
    ///   is `running`, `completed` or `failed`;
    /// - `waiting` if the concurrency limit is reached (nothing is stored);
    /// - `running` after storing the record and launching the job. A
    ///   `timed_out` record is reset to `running` and the job relaunched.
    ///
    /// # Errors
    ///
    /// Unknown job types are rejected before the store is touched. Store
    /// failures are returned as errors, never as `waiting`.
    pub async fn submit_at(
        &self,
        job_type: &str,
        params: &Value,
        now: DateTime<Utc>,
    ) -> Result<JobStatus, AdmissionError> {
        let function = self
            .registry
            .get(job_type)
            .ok_or_else(|| AdmissionError::UnknownJobType(job_type.to_string()))?;
        let key = JobKey::new(job_type, params);

        let mut tx = self.store.begin().await?;

        let sweep = tx
            .sweep(
                now,
                cutoff(now, self.config.job_drop_age),
                cutoff(now, self.config.job_timeout),
            )
            .await?;
        if sweep != SweepOutcome::default() {
            info!(
                dropped = sweep.dropped,
                timed_out = sweep.timed_out,
                "Swept stale job records"
            );
            self.metrics.record_sweep(sweep.dropped, sweep.timed_out);
        }

        if let Some(existing) = tx.find(&key).await? {
            if existing.status.is_settled() {
                tx.commit().await?;
                debug!(job_type, job_id = existing.id, status = %existing.status, "Job already submitted");
                self.metrics.record_admission(existing.status.as_str());
                return Ok(existing.status);
            }
        }

        let running = tx.count_running().await?;
        if running >= self.config.max_concurrent_jobs.get() as u64 {
            // Commit so the sweep sticks.
            tx.commit().await?;
            debug!(job_type, running, "Concurrency limit reached");
            self.metrics.record_admission(JobStatus::Waiting.as_str());
            return Ok(JobStatus::Waiting);
        }

        let job_id = tx.insert_running(&key, now).await?;
        tx.commit().await?;

        info!(job_type, job_id, params = key.params(), "Job admitted");
        self.metrics.record_admission(JobStatus::Running.as_str());
        self.launch(key, params.clone(), function).await;

        Ok(JobStatus::Running)
    }

    /// Persisted status of a job; `unknown` if there is no record.
    pub async fn status(&self, job_type: &str, params: &Value) -> Result<JobStatus, AdmissionError> {
        let key = JobKey::new(job_type, params);
        let record = self.store.get(&key).await?;
        Ok(record.map_or(JobStatus::Unknown, |r| r.status))
    }

    /// Waits for every job launched so far to finish and store its outcome.
    /// Returns how many were still being tracked, finished or not, when
    /// called.
    pub async fn drain(&self) -> usize {
        let launched = std::mem::take(&mut *self.launched.lock().await);
        let mut finished = 0;

        for handle in launched {
            if let Err(e) = handle.await {
                warn!(error = %e, "Launched job task did not finish");
            }
            finished += 1;
        }

        finished
    }

    async fn launch(&self, key: JobKey, params: Value, function: Arc<dyn JobFunction>) {
        let store = self.store.clone();

        let handle = tokio::spawn(async move {
            let outcome = AssertUnwindSafe(function.run(params)).catch_unwind().await;

            let status = match outcome {
                Ok(Ok(())) => {
                    info!(job_type = key.job_type(), params = key.params(), "Job completed");
                    JobStatus::Completed
                }
                Ok(Err(e)) => {
                    warn!(job_type = key.job_type(), params = key.params(), error = %e, "Job failed");
                    JobStatus::Failed
                }
                Err(_) => {
                    error!(job_type = key.job_type(), params = key.params(), "Job panicked");
                    JobStatus::Failed
                }
            };

            if let Err(e) = store.record_outcome(&key, status, Utc::now()).await {
                error!(job_type = key.job_type(), error = %e, "Failed to record job outcome");
            }
        });

        let mut launched = self.launched.lock().await;
        launched.retain(|h| !h.is_finished());
        launched.push(handle);
    }
}

/// `now - age`, saturating at the earliest representable time.
fn cutoff(now: DateTime<Utc>, age: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(age)
        .ok()
        .and_then(|age| now.checked_sub_signed(age))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl JobFunction for Noop {
        async fn run(&self, _params: Value) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_registry_lookup() {
        let registry = JobRegistry::with_builtins(ExecutorConfig::default()).with_job("noop", Noop);
        assert!(registry.contains("noop"));
        assert!(registry.contains(ROW_STATISTICS_JOB));
        assert!(registry.get("pca").is_none());
        assert_eq!(registry.job_types(), vec!["noop", "row_statistics"]);
    }

    #[test]
    fn test_admission_config_defaults() {
        let config = AdmissionConfig::default();
        assert_eq!(config.max_concurrent_jobs.get(), 2);
        assert_eq!(config.job_timeout, Duration::from_secs(1800));
        assert_eq!(config.job_drop_age, Duration::from_secs(86400));
    }

    #[test]
    fn test_cutoff_saturates() {
        let now = Utc::now();
        assert_eq!(
            cutoff(now, Duration::from_secs(60)),
            now - chrono::Duration::seconds(60)
        );
        assert_eq!(cutoff(now, Duration::MAX), DateTime::<Utc>::MIN_UTC);
    }

    #[tokio::test]
    async fn test_unknown_job_type_is_rejected() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = JobStore::open_path(&dir.path().join("jobs.db"))
            .await
            .expect("open store");
        let controller = AdmissionController::new(store, JobRegistry::new(), AdmissionConfig::default());

        let err = controller
            .submit("pca", &serde_json::json!({}))
            .await
            .expect_err("unknown type");
        assert!(matches!(err, AdmissionError::UnknownJobType(t) if t == "pca"));
        assert_eq!(controller.store().list(10).await.expect("list").len(), 0);
    }

    #[tokio::test]
    async fn test_submit_json_rejects_bad_params() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = JobStore::open_path(&dir.path().join("jobs.db"))
            .await
            .expect("open store");
        let registry = JobRegistry::new().with_job("noop", Noop);
        let controller = AdmissionController::new(store, registry, AdmissionConfig::default());

        let err = controller
            .submit_json("noop", "{not json")
            .await
            .expect_err("bad params");
        assert!(matches!(err, AdmissionError::Params(_)));

        let status = controller.submit_json("noop", r#"{"a": 1}"#).await.expect("submit");
        assert_eq!(status, JobStatus::Running);
        assert_eq!(controller.drain().await, 1);
        assert_eq!(
            controller.status("noop", &serde_json::json!({"a": 1})).await.expect("status"),
            JobStatus::Completed
        );
    }
}
