//! Error types for batch execution and job admission.
//!
//! Defines the error taxonomy for the two public entry points:
//! - Parallel execution of an analysis over a batch of rows
//! - Admission of named, parameterized jobs
//!
//! Storage, migration and configuration errors live next to their modules and
//! are re-exported here.

use thiserror::Error;

pub use crate::config::ConfigError;
pub use crate::storage::{MigrationError, StoreError};

/// Errors that end a parallel batch. Any of them fails the whole batch; no
/// partial results are returned.
#[derive(Debug, Error)]
pub enum ExecutorError<E>
where
    E: std::error::Error + 'static,
{
    /// The analysis function returned an error inside a worker. The value is
    /// the analysis's own error, untouched.
    #[error(transparent)]
    Analysis(E),

    #[error("Worker {index} panicked: {message}")]
    WorkerPanicked { index: usize, message: String },

    #[error("Worker {index} exited without reporting a result")]
    WorkerLost { index: usize },

    #[error("Worker {index} returned series {actual:?}, expected {expected:?}")]
    SeriesMismatch {
        index: usize,
        expected: Vec<String>,
        actual: Vec<String>,
    },

    #[error("Worker {index} returned {actual} values in series '{series}' for a slice of {expected} rows")]
    SeriesLength {
        index: usize,
        series: String,
        expected: usize,
        actual: usize,
    },

    #[error("Failed to spawn worker {index}: {source}")]
    Spawn {
        index: usize,
        #[source]
        source: std::io::Error,
    },
}

impl<E> ExecutorError<E>
where
    E: std::error::Error + 'static,
{
    /// Returns the analysis error if this failure came from the analysis.
    pub fn into_analysis_error(self) -> Option<E> {
        match self {
            ExecutorError::Analysis(e) => Some(e),
            _ => None,
        }
    }

    /// Whether the failure was raised by the analysis function itself.
    pub fn is_analysis(&self) -> bool {
        matches!(self, ExecutorError::Analysis(_))
    }
}

/// Errors that can occur while admitting a job.
#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("Unknown job type '{0}'")]
    UnknownJobType(String),

    /// The job store could not be read or written. Never reported as `waiting`.
    #[error("Job store unavailable: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid job parameters: {0}")]
    Params(#[from] serde_json::Error),
}
