//! Built-in analysis and job.
//!
//! [`RowStatistics`] computes the mean and population standard deviation of
//! every row. It is what the CLI `compute` command runs, and what the
//! `row_statistics` job type launches through the admission controller.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use crate::notify::TracingSink;
use crate::scheduler::JobFunction;

use super::analysis::{Analysis, ResultSeries, RowSequence};
use super::executor::{ExecutorConfig, ParallelExecutor};

/// Job type name of [`RowStatisticsJob`].
pub const ROW_STATISTICS_JOB: &str = "row_statistics";

/// Series name holding per-row means.
pub const MEAN_SERIES: &str = "mean";

/// Series name holding per-row standard deviations.
pub const STD_DEV_SERIES: &str = "std_dev";

#[derive(Debug, Error, PartialEq)]
pub enum RowStatisticsError {
    #[error("Row {row} is empty")]
    EmptyRow { row: usize },

    #[error("Row {row} contains a non-finite value at column {column}")]
    NonFinite { row: usize, column: usize },
}

/// Per-row mean and standard deviation.
#[derive(Debug, Clone, Copy, Default)]
pub struct RowStatistics;

impl Analysis for RowStatistics {
    type Row = Vec<f64>;
    type Params = ();
    type Output = f64;
    type Error = RowStatisticsError;

    fn analyze(
        &self,
        rows: RowSequence<'_, Vec<f64>>,
        _params: &(),
    ) -> Result<ResultSeries<f64>, RowStatisticsError> {
        let (lower, _) = rows.size_hint();
        let mut means = Vec::with_capacity(lower);
        let mut std_devs = Vec::with_capacity(lower);

        // Row numbers are local to the slice.
        for (row, values) in rows.enumerate() {
            if values.is_empty() {
                return Err(RowStatisticsError::EmptyRow { row });
            }
            if let Some(column) = values.iter().position(|v| !v.is_finite()) {
                return Err(RowStatisticsError::NonFinite { row, column });
            }

            let n = values.len() as f64;
            let mean = values.iter().sum::<f64>() / n;
            let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;

            means.push(mean);
            std_devs.push(variance.sqrt());
        }

        Ok(ResultSeries::new()
            .with_series(MEAN_SERIES, means)
            .with_series(STD_DEV_SERIES, std_devs))
    }
}

/// Reads a JSON array of numeric rows.
pub async fn load_rows(path: &Path) -> anyhow::Result<Vec<Vec<f64>>> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read rows from {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Invalid rows file {}", path.display()))
}

#[derive(Debug, Deserialize)]
struct RowStatisticsParams {
    input: PathBuf,
    #[serde(default)]
    workers: Option<NonZeroUsize>,
}

/// Job function running [`RowStatistics`] over a rows file.
///
/// Params: `{"input": "<path>", "workers": <optional count>}`.
#[derive(Debug, Clone, Default)]
pub struct RowStatisticsJob {
    executor: ExecutorConfig,
}

impl RowStatisticsJob {
    pub fn new(executor: ExecutorConfig) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl JobFunction for RowStatisticsJob {
    async fn run(&self, params: serde_json::Value) -> anyhow::Result<()> {
        let params: RowStatisticsParams =
            serde_json::from_value(params).context("Invalid row_statistics params")?;

        let mut config = self.executor.clone();
        if let Some(workers) = params.workers {
            config.workers = workers;
        }

        let rows: Arc<[Vec<f64>]> = load_rows(&params.input).await?.into();
        let total = rows.len();
        let sink = Arc::new(TracingSink::with_label(ROW_STATISTICS_JOB));

        let result = ParallelExecutor::new(config)
            .run_reported(Arc::new(RowStatistics), rows, (), sink)
            .await?;

        info!(
            job_type = ROW_STATISTICS_JOB,
            input = %params.input.display(),
            rows = total,
            series = result.series_count(),
            "Row statistics finished"
        );
        Ok(())
    }
}
