//! Job definitions for the admission controller.
//!
//! - `JobStatus`: lifecycle state of a persisted job
//! - `JobKey`: the `(job_type, params)` identity of a job
//! - `JobRecord`: one persisted job row

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Status of a job.
///
/// `Waiting` is only ever returned by admission; it is never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Not yet determined; also reported for jobs with no record.
    Unknown,
    /// Rejected because too many jobs are running; must be resubmitted.
    Waiting,
    /// Admitted and launched.
    Running,
    /// The job function returned an error.
    Failed,
    /// The job function finished successfully.
    Completed,
    /// Was still `running` past the job timeout.
    TimedOut,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Unknown => "unknown",
            JobStatus::Waiting => "waiting",
            JobStatus::Running => "running",
            JobStatus::Failed => "failed",
            JobStatus::Completed => "completed",
            JobStatus::TimedOut => "timed_out",
        }
    }

    /// Whether a submission finding a record in this state returns it as-is
    /// instead of launching the job again. A `timed_out` record is not
    /// settled: resubmitting it retries the job.
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            JobStatus::Running | JobStatus::Completed | JobStatus::Failed
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq)]
#[error("Unknown job status '{0}'")]
pub struct ParseJobStatusError(pub String);

impl FromStr for JobStatus {
    type Err = ParseJobStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unknown" => Ok(JobStatus::Unknown),
            "waiting" => Ok(JobStatus::Waiting),
            "running" => Ok(JobStatus::Running),
            "failed" => Ok(JobStatus::Failed),
            "completed" => Ok(JobStatus::Completed),
            "timed_out" => Ok(JobStatus::TimedOut),
            other => Err(ParseJobStatusError(other.to_string())),
        }
    }
}

/// Identity of a job: its type plus the canonical JSON form of its params.
///
/// Object keys are sorted recursively, so `{"a":1,"b":2}` and `{"b":2,"a":1}`
/// name the same job.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobKey {
    job_type: String,
    params: String,
}

impl JobKey {
    pub fn new(job_type: impl Into<String>, params: &Value) -> Self {
        Self {
            job_type: job_type.into(),
            params: canonical(params).to_string(),
        }
    }

    pub fn job_type(&self) -> &str {
        &self.job_type
    }

    /// Canonical JSON text of the params.
    pub fn params(&self) -> &str {
        &self.params
    }

    /// Parses the params back into a JSON value.
    pub fn params_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::from_str(&self.params)
    }
}

impl std::fmt::Display for JobKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.job_type, self.params)
    }
}

fn canonical(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.clone(), canonical(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(canonical).collect()),
        other => other.clone(),
    }
}

/// A persisted job row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: i64,
    pub job_type: String,
    /// Canonical JSON text of the params.
    pub params: String,
    pub status: JobStatus,
    pub start_time: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn key(&self) -> JobKey {
        JobKey {
            job_type: self.job_type.clone(),
            params: self.params.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_job_status_round_trips_through_str() {
        for status in [
            JobStatus::Unknown,
            JobStatus::Waiting,
            JobStatus::Running,
            JobStatus::Failed,
            JobStatus::Completed,
            JobStatus::TimedOut,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>(), Ok(status));
        }
        assert_eq!(
            "queued".parse::<JobStatus>(),
            Err(ParseJobStatusError("queued".to_string()))
        );
    }

    #[test]
    fn test_job_status_serde_matches_display() {
        let json = serde_json::to_string(&JobStatus::TimedOut).expect("serialize");
        assert_eq!(json, "\"timed_out\"");
        assert_eq!(JobStatus::TimedOut.to_string(), "timed_out");
    }

    #[test]
    fn test_settled_statuses() {
        assert!(JobStatus::Running.is_settled());
        assert!(JobStatus::Completed.is_settled());
        assert!(JobStatus::Failed.is_settled());
        assert!(!JobStatus::TimedOut.is_settled());
        assert!(!JobStatus::Unknown.is_settled());
        assert!(!JobStatus::Waiting.is_settled());
    }

    #[test]
    fn test_job_key_is_order_independent() {
        let a = JobKey::new("jtk", &json!({"user": 1, "sheet": {"id": 7, "version": 2}}));
        let b = JobKey::new("jtk", &json!({"sheet": {"version": 2, "id": 7}, "user": 1}));
        assert_eq!(a, b);
        assert_eq!(a.params(), r#"{"sheet":{"id":7,"version":2},"user":1}"#);
        assert_eq!(a.params_value().expect("valid json")["user"], json!(1));

        let c = JobKey::new("cosinor", &json!({"user": 1, "sheet": {"id": 7, "version": 2}}));
        assert_ne!(a, c);
    }

    #[test]
    fn test_job_key_keeps_array_order() {
        let a = JobKey::new("jtk", &json!([1, 2, 3]));
        let b = JobKey::new("jtk", &json!([3, 2, 1]));
        assert_ne!(a, b);
    }
}
