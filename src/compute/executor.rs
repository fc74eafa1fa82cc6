//! Parallel executor.
//!
//! Runs an [`Analysis`] over a batch of rows split across a fixed number of
//! worker threads. The executor is the only place that waits on several
//! sources at once: one `select!` over every worker channel plus the progress
//! notifier's request channel. Results are concatenated in slice order, never
//! in arrival order.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::{StreamExt, StreamMap};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::ExecutorError;
use crate::metrics::MetricsCollector;
use crate::notify::{Notification, NotificationSink, Progress};

use super::analysis::{Analysis, ResultSeries};
use super::notifier::{ProgressNotifier, ProgressRequest};
use super::partition::partition;
use super::worker::{WorkerHandle, WorkerMessage, WorkerTask};

/// Default number of worker threads per batch.
pub const DEFAULT_WORKERS: usize = 6;

/// Default progress notifications per second.
pub const DEFAULT_NOTIFICATIONS_PER_SECOND: u32 = 2;

type WorkerStreams<O, E> = StreamMap<usize, UnboundedReceiverStream<WorkerMessage<O, E>>>;

/// Configuration for the parallel executor.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Number of worker threads (and slices) per batch.
    pub workers: NonZeroUsize,
    /// Time between two progress notifications.
    pub notify_interval: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            workers: NonZeroUsize::new(DEFAULT_WORKERS).unwrap_or(NonZeroUsize::MIN),
            notify_interval: Duration::from_secs(1) / DEFAULT_NOTIFICATIONS_PER_SECOND,
        }
    }
}

impl ExecutorConfig {
    /// Creates a configuration with the given worker count.
    pub fn new(workers: NonZeroUsize) -> Self {
        Self {
            workers,
            ..Default::default()
        }
    }

    /// Sets the progress notification interval.
    pub fn with_notify_interval(mut self, interval: Duration) -> Self {
        self.notify_interval = interval;
        self
    }
}

/// Splits a batch across worker threads and reassembles the results.
#[derive(Debug, Clone, Default)]
pub struct ParallelExecutor {
    config: ExecutorConfig,
    metrics: MetricsCollector,
}

impl ParallelExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self {
            config,
            metrics: MetricsCollector::new(),
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Runs `analysis` over `rows` and returns the concatenated result series.
    ///
    /// `RUNNING` progress events reach `sink` while the batch runs, followed
    /// by one `FINALIZING` event once every worker has completed and the
    /// notifier has stopped.
    ///
    /// # Errors
    ///
    /// The first worker failure ends the batch immediately. An analysis error
    /// is returned as [`ExecutorError::Analysis`] holding the original value;
    /// remaining workers are abandoned and never affect another batch.
    pub async fn run<A: Analysis>(
        &self,
        analysis: Arc<A>,
        rows: Arc<[A::Row]>,
        params: A::Params,
        sink: Arc<dyn NotificationSink>,
    ) -> Result<ResultSeries<A::Output>, ExecutorError<A::Error>> {
        let batch_id = Uuid::new_v4();
        let started = Instant::now();
        let total = rows.len();
        let slices = partition(total, self.config.workers);
        let worker_count = slices.len();

        info!(%batch_id, rows = total, workers = worker_count, "Starting parallel batch");

        let (notifier, mut requests) =
            ProgressNotifier::start(self.config.notify_interval, Arc::clone(&sink));

        let params = Arc::new(params);
        let short_id = batch_id.simple().to_string();
        let mut handles = Vec::with_capacity(worker_count);
        let mut streams: WorkerStreams<A::Output, A::Error> = StreamMap::with_capacity(worker_count);

        for slice in &slices {
            let (tx, rx) = mpsc::unbounded_channel();
            let task = WorkerTask {
                analysis: Arc::clone(&analysis),
                rows: Arc::clone(&rows),
                params: Arc::clone(&params),
                slice: *slice,
                tx,
            };

            if let Err(source) = task.spawn(format!("analysis-worker-{}-{}", &short_id[..8], slice.index)) {
                warn!(%batch_id, worker = slice.index, error = %source, "Failed to spawn worker");
                drop(streams);
                notifier.stop().await;
                self.metrics
                    .record_batch("failed", started.elapsed().as_secs_f64(), total);
                return Err(ExecutorError::Spawn {
                    index: slice.index,
                    source,
                });
            }

            handles.push(WorkerHandle::new(*slice));
            streams.insert(slice.index, UnboundedReceiverStream::new(rx));
        }

        self.metrics.add_active_workers(worker_count as i64);
        let outcome = multiplex(&mut handles, &mut streams, &mut requests, total, batch_id).await;
        self.metrics.add_active_workers(-(worker_count as i64));

        // Closing the worker channels tells any still-running worker to stop.
        drop(streams);
        drop(requests);
        notifier.stop().await;

        let result = outcome.and_then(|()| assemble(handles));
        let elapsed = started.elapsed();

        match &result {
            Ok(series) => {
                sink.notify(Notification::finalizing());
                self.metrics
                    .record_batch("completed", elapsed.as_secs_f64(), total);
                info!(
                    %batch_id,
                    rows = total,
                    series = series.series_count(),
                    duration_ms = elapsed.as_millis() as u64,
                    "Parallel batch completed"
                );
            }
            Err(e) => {
                self.metrics.record_batch("failed", elapsed.as_secs_f64(), total);
                warn!(%batch_id, error = %e, duration_ms = elapsed.as_millis() as u64, "Parallel batch failed");
            }
        }

        result
    }

    /// Like [`Self::run`], then reports the terminal state to `sink`:
    /// `COMPLETED` on success, `FAILED` otherwise.
    pub async fn run_reported<A: Analysis>(
        &self,
        analysis: Arc<A>,
        rows: Arc<[A::Row]>,
        params: A::Params,
        sink: Arc<dyn NotificationSink>,
    ) -> Result<ResultSeries<A::Output>, ExecutorError<A::Error>> {
        let result = self.run(analysis, rows, params, Arc::clone(&sink)).await;
        match &result {
            Ok(_) => sink.notify(Notification::completed()),
            Err(_) => sink.notify(Notification::failed()),
        }
        result
    }
}

/// Waits on every worker channel and the notifier until all workers have
/// completed or one has failed.
async fn multiplex<O, E>(
    handles: &mut [WorkerHandle<O>],
    streams: &mut WorkerStreams<O, E>,
    requests: &mut mpsc::Receiver<ProgressRequest>,
    total: usize,
    batch_id: Uuid,
) -> Result<(), ExecutorError<E>>
where
    E: std::error::Error + 'static,
{
    loop {
        tokio::select! {
            next = streams.next() => {
                // Every channel closed: all workers have exited.
                let Some((index, message)) = next else {
                    break;
                };

                match message {
                    WorkerMessage::Progress { processed } => {
                        handles[index].record_progress(processed);
                    }
                    WorkerMessage::Completed(series) => {
                        debug!(%batch_id, worker = index, "Worker completed");
                        handles[index].complete(series);
                    }
                    WorkerMessage::Failed(error) => {
                        warn!(%batch_id, worker = index, error = %error, "Analysis failed in worker");
                        return Err(ExecutorError::Analysis(error));
                    }
                    WorkerMessage::Panicked(message) => {
                        warn!(%batch_id, worker = index, panic = %message, "Worker panicked");
                        return Err(ExecutorError::WorkerPanicked { index, message });
                    }
                }
            }

            Some(request) = requests.recv() => {
                let value = handles.iter().map(|h| h.processed).sum();
                // Notifier may have exited between asking and now.
                let _ = request.reply.send(Progress { value, max: total });
            }
        }
    }

    match handles.iter().find(|h| !h.is_complete()) {
        Some(lost) => Err(ExecutorError::WorkerLost {
            index: lost.slice.index,
        }),
        None => Ok(()),
    }
}

/// Concatenates worker results in slice order.
fn assemble<O, E>(handles: Vec<WorkerHandle<O>>) -> Result<ResultSeries<O>, ExecutorError<E>>
where
    E: std::error::Error + 'static,
{
    let mut merged: Option<ResultSeries<O>> = None;

    for handle in handles {
        let index = handle.slice.index;
        let expected = handle.slice.len();
        let Some(series) = handle.result else {
            return Err(ExecutorError::WorkerLost { index });
        };

        if let Some((name, actual)) = series.length_mismatch(expected) {
            return Err(ExecutorError::SeriesLength {
                index,
                series: name.to_string(),
                expected,
                actual,
            });
        }

        if let Some(acc) = merged.as_mut() {
            if !acc.same_layout(&series) {
                return Err(ExecutorError::SeriesMismatch {
                    index,
                    expected: acc.names().into_iter().map(String::from).collect(),
                    actual: series.names().into_iter().map(String::from).collect(),
                });
            }
            acc.append(series);
        } else {
            merged = Some(series);
        }
    }

    Ok(merged.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::analysis::{analysis_fn, RowSequence};
    use crate::compute::partition::Slice;
    use crate::notify::{ChannelSink, NotificationStatus, NullSink};

    #[derive(Debug, thiserror::Error, PartialEq)]
    #[error("bad row {0}")]
    struct BadRow(u64);

    fn executor(workers: usize) -> ParallelExecutor {
        let workers = NonZeroUsize::new(workers).expect("non-zero workers");
        ParallelExecutor::new(ExecutorConfig::new(workers).with_notify_interval(Duration::from_millis(5)))
    }

    #[test]
    fn test_executor_config_default() {
        let config = ExecutorConfig::default();
        assert_eq!(config.workers.get(), 6);
        assert_eq!(config.notify_interval, Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_run_concatenates_in_slice_order() {
        let square = Arc::new(analysis_fn(|rows: RowSequence<'_, u64>, _: &()| {
            Ok::<_, BadRow>(ResultSeries::single(rows.map(|r| r * r).collect()))
        }));
        let rows: Arc<[u64]> = (0..17).collect::<Vec<_>>().into();

        let result = executor(6)
            .run(square, rows, (), Arc::new(NullSink))
            .await
            .expect("batch succeeds");

        let expected: Vec<u64> = (0..17).map(|r| r * r).collect();
        assert_eq!(result.into_single(), Some(expected));
    }

    #[tokio::test]
    async fn test_run_propagates_analysis_error_unchanged() {
        let picky = Arc::new(analysis_fn(|rows: RowSequence<'_, u64>, _: &()| {
            let mut out = Vec::new();
            for r in rows {
                if *r == 11 {
                    return Err(BadRow(*r));
                }
                out.push(*r);
            }
            Ok(ResultSeries::single(out))
        }));
        let rows: Arc<[u64]> = (0..20).collect::<Vec<_>>().into();
        let (sink, mut events) = ChannelSink::new();

        let err = executor(4)
            .run_reported(picky, rows, (), Arc::new(sink))
            .await
            .expect_err("batch fails");

        assert_eq!(err.into_analysis_error(), Some(BadRow(11)));

        let mut statuses = Vec::new();
        while let Ok(event) = events.try_recv() {
            statuses.push(event.status);
        }
        assert_eq!(statuses.last(), Some(&NotificationStatus::Failed));
        assert!(!statuses.contains(&NotificationStatus::Completed));
        assert!(!statuses.contains(&NotificationStatus::Finalizing));
    }

    #[tokio::test]
    async fn test_run_reports_worker_panic() {
        let explode = Arc::new(analysis_fn(|rows: RowSequence<'_, u64>, _: &()| {
            let values: Vec<u64> = rows.copied().collect();
            if values.contains(&0) {
                panic!("singular matrix");
            }
            Ok::<_, BadRow>(ResultSeries::single(values))
        }));
        let rows: Arc<[u64]> = (0..8).collect::<Vec<_>>().into();

        let err = executor(2)
            .run(explode, rows, (), Arc::new(NullSink))
            .await
            .expect_err("batch fails");

        match err {
            ExecutorError::WorkerPanicked { index, message } => {
                assert_eq!(index, 0);
                assert!(message.contains("singular matrix"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_run_rejects_short_series() {
        let lossy = Arc::new(analysis_fn(|rows: RowSequence<'_, u64>, _: &()| {
            Ok::<_, BadRow>(ResultSeries::single(rows.skip(1).copied().collect()))
        }));
        let rows: Arc<[u64]> = (0..9).collect::<Vec<_>>().into();

        let err = executor(3)
            .run(lossy, rows, (), Arc::new(NullSink))
            .await
            .expect_err("batch fails");

        assert!(matches!(
            err,
            ExecutorError::SeriesLength { index: 0, expected: 3, actual: 2, .. }
        ));
    }

    #[tokio::test]
    async fn test_run_sends_finalizing_last() {
        let identity = Arc::new(analysis_fn(|rows: RowSequence<'_, u64>, _: &()| {
            Ok::<_, BadRow>(ResultSeries::single(rows.copied().collect()))
        }));
        let rows: Arc<[u64]> = (0..100).collect::<Vec<_>>().into();
        let (sink, mut events) = ChannelSink::new();

        executor(3)
            .run_reported(identity, rows, (), Arc::new(sink))
            .await
            .expect("batch succeeds");

        let mut statuses = Vec::new();
        while let Ok(event) = events.try_recv() {
            statuses.push(event.status);
        }
        let n = statuses.len();
        assert!(n >= 2);
        assert_eq!(statuses[n - 2], NotificationStatus::Finalizing);
        assert_eq!(statuses[n - 1], NotificationStatus::Completed);
        assert!(statuses[..n - 2]
            .iter()
            .all(|s| *s == NotificationStatus::Running));
    }

    #[test]
    fn test_assemble_detects_layout_mismatch() {
        let mut first = WorkerHandle::new(Slice { index: 0, start: 0, end: 1 });
        first.complete(ResultSeries::new().with_series("p", vec![1]));
        let mut second = WorkerHandle::new(Slice { index: 1, start: 1, end: 2 });
        second.complete(ResultSeries::new().with_series("q", vec![2]));

        let err = assemble::<u32, BadRow>(vec![first, second]).expect_err("layouts differ");
        assert!(matches!(err, ExecutorError::SeriesMismatch { index: 1, .. }));
    }

    #[test]
    fn test_assemble_multiple_series() {
        let mut first = WorkerHandle::new(Slice { index: 0, start: 0, end: 2 });
        first.complete(
            ResultSeries::new()
                .with_series("period", vec![24, 24])
                .with_series("lag", vec![1, 2]),
        );
        let mut second = WorkerHandle::new(Slice { index: 1, start: 2, end: 3 });
        second.complete(
            ResultSeries::new()
                .with_series("period", vec![12])
                .with_series("lag", vec![3]),
        );

        let merged = assemble::<u32, BadRow>(vec![first, second]).expect("layouts match");
        assert_eq!(merged.get("period"), Some(&[24, 24, 12][..]));
        assert_eq!(merged.get("lag"), Some(&[1, 2, 3][..]));
    }
}
