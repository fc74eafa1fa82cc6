//! Worker harness.
//!
//! Each worker runs on its own named OS thread, owns exactly one [`Slice`],
//! and talks to the executor only through its private channel. It sends a
//! progress message every [`Slice::progress_step`] rows and exactly one
//! terminal message before its channel closes.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::analysis::{Analysis, ResultSeries, RowSequence};
use super::partition::Slice;

/// Message sent from a worker to the executor.
#[derive(Debug)]
pub(crate) enum WorkerMessage<O, E> {
    /// Rows of the slice yielded to the analysis so far.
    Progress { processed: usize },
    /// Terminal: the analysis returned normally.
    Completed(ResultSeries<O>),
    /// Terminal: the analysis returned an error.
    Failed(E),
    /// Terminal: the analysis panicked.
    Panicked(String),
}

impl<O, E> WorkerMessage<O, E> {
    fn kind(&self) -> &'static str {
        match self {
            WorkerMessage::Progress { .. } => "progress",
            WorkerMessage::Completed(_) => "completed",
            WorkerMessage::Failed(_) => "failed",
            WorkerMessage::Panicked(_) => "panicked",
        }
    }
}

pub(crate) type WorkerSender<A> =
    mpsc::UnboundedSender<WorkerMessage<<A as Analysis>::Output, <A as Analysis>::Error>>;

/// Everything a worker thread owns for the lifetime of its slice.
pub(crate) struct WorkerTask<A: Analysis> {
    pub analysis: Arc<A>,
    pub rows: Arc<[A::Row]>,
    pub params: Arc<A::Params>,
    pub slice: Slice,
    pub tx: WorkerSender<A>,
}

impl<A: Analysis> WorkerTask<A> {
    /// Spawns the worker on a dedicated thread named `name`.
    pub(crate) fn spawn(self, name: String) -> std::io::Result<thread::JoinHandle<()>> {
        thread::Builder::new().name(name).spawn(move || self.run())
    }

    fn run(self) {
        let WorkerTask {
            analysis,
            rows,
            params,
            slice,
            tx,
        } = self;

        let rows = &rows[slice.range()];
        let report = |processed: usize| {
            tx.send(WorkerMessage::Progress { processed }).is_ok()
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let sequence = RowSequence::reporting(rows, slice.progress_step(), &report);
            analysis.analyze(sequence, &params)
        }));

        let message = match outcome {
            Ok(Ok(series)) => WorkerMessage::Completed(series),
            Ok(Err(error)) => WorkerMessage::Failed(error),
            Err(payload) => WorkerMessage::Panicked(panic_message(payload.as_ref())),
        };

        let kind = message.kind();
        if tx.send(message).is_err() {
            debug!(worker = slice.index, outcome = kind, "Executor gone, dropping terminal message");
        } else if kind == "panicked" {
            warn!(worker = slice.index, "Analysis panicked inside worker");
        }
        // Dropping `tx` here closes the channel.
    }
}

/// Executor-side bookkeeping for one worker.
#[derive(Debug)]
pub(crate) struct WorkerHandle<O> {
    pub slice: Slice,
    pub processed: usize,
    pub result: Option<ResultSeries<O>>,
}

impl<O> WorkerHandle<O> {
    pub(crate) fn new(slice: Slice) -> Self {
        Self {
            slice,
            processed: 0,
            result: None,
        }
    }

    /// Records a progress report. Counts never move backwards or past the slice.
    pub(crate) fn record_progress(&mut self, processed: usize) {
        self.processed = self.processed.max(processed.min(self.slice.len()));
    }

    pub(crate) fn complete(&mut self, result: ResultSeries<O>) {
        self.processed = self.slice.len();
        self.result = Some(result);
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.result.is_some()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::analysis::analysis_fn;
    use crate::compute::partition::partition;
    use std::num::NonZeroUsize;

    #[derive(Debug, thiserror::Error)]
    #[error("row {0} rejected")]
    struct Rejected(u32);

    fn drain<O, E>(rx: &mut mpsc::UnboundedReceiver<WorkerMessage<O, E>>) -> Vec<WorkerMessage<O, E>> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    #[test]
    fn test_worker_reports_progress_then_result() {
        let analysis = Arc::new(analysis_fn(|rows: RowSequence<'_, u32>, _: &()| {
            Ok::<_, Rejected>(ResultSeries::single(rows.copied().collect()))
        }));
        let rows: Arc<[u32]> = (0..200).collect::<Vec<_>>().into();
        let slice = partition(200, NonZeroUsize::new(2).expect("two workers"))[1];
        let (tx, mut rx) = mpsc::unbounded_channel();

        let handle = WorkerTask {
            analysis,
            rows,
            params: Arc::new(()),
            slice,
            tx,
        }
        .spawn("test-worker".to_string())
        .expect("spawn worker");
        handle.join().expect("worker thread");

        let messages = drain(&mut rx);
        let progress: Vec<usize> = messages
            .iter()
            .filter_map(|m| match m {
                WorkerMessage::Progress { processed } => Some(*processed),
                _ => None,
            })
            .collect();
        // 100 rows, step ceil(100 / 50) = 2.
        assert_eq!(progress.len(), 50);
        assert_eq!(progress.first(), Some(&2));
        assert_eq!(progress.last(), Some(&100));

        match messages.last() {
            Some(WorkerMessage::Completed(series)) => {
                let expected: Vec<u32> = (100..200).collect();
                assert_eq!(series.get("value"), Some(expected.as_slice()));
            }
            other => panic!("expected completion, got {:?}", other.map(WorkerMessage::kind)),
        }
        assert!(rx.try_recv().is_err(), "channel must be closed after terminal message");
    }

    #[test]
    fn test_worker_sends_failure() {
        let analysis = Arc::new(analysis_fn(|mut rows: RowSequence<'_, u32>, _: &()| {
            match rows.find(|r| **r == 7) {
                Some(r) => Err(Rejected(*r)),
                None => Ok(ResultSeries::single(Vec::<u32>::new())),
            }
        }));
        let rows: Arc<[u32]> = (0..10).collect::<Vec<_>>().into();
        let (tx, mut rx) = mpsc::unbounded_channel();

        WorkerTask {
            analysis,
            rows,
            params: Arc::new(()),
            slice: Slice { index: 0, start: 0, end: 10 },
            tx,
        }
        .spawn("test-worker".to_string())
        .expect("spawn worker")
        .join()
        .expect("worker thread");

        match drain(&mut rx).pop() {
            Some(WorkerMessage::Failed(err)) => assert_eq!(err.to_string(), "row 7 rejected"),
            other => panic!("expected failure, got {:?}", other.map(|m| m.kind())),
        }
    }

    #[test]
    fn test_worker_catches_panic() {
        let analysis = Arc::new(analysis_fn(|_: RowSequence<'_, u32>, _: &()| -> Result<ResultSeries<u32>, Rejected> {
            panic!("numerical blow-up")
        }));
        let rows: Arc<[u32]> = vec![1, 2, 3].into();
        let (tx, mut rx) = mpsc::unbounded_channel();

        WorkerTask {
            analysis,
            rows,
            params: Arc::new(()),
            slice: Slice { index: 0, start: 0, end: 3 },
            tx,
        }
        .spawn("test-worker".to_string())
        .expect("spawn worker")
        .join()
        .expect("panic is caught inside the worker");

        match drain(&mut rx).pop() {
            Some(WorkerMessage::Panicked(msg)) => assert!(msg.contains("numerical blow-up")),
            other => panic!("expected panic report, got {:?}", other.map(|m| m.kind())),
        }
    }

    #[test]
    fn test_worker_stops_when_receiver_dropped() {
        let analysis = Arc::new(analysis_fn(|rows: RowSequence<'_, u32>, _: &()| {
            Ok::<_, Rejected>(ResultSeries::single(rows.copied().collect()))
        }));
        let rows: Arc<[u32]> = (0..1_000).collect::<Vec<_>>().into();
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);

        // Must terminate promptly without a listener.
        WorkerTask {
            analysis,
            rows,
            params: Arc::new(()),
            slice: Slice { index: 0, start: 0, end: 1_000 },
            tx,
        }
        .spawn("test-worker".to_string())
        .expect("spawn worker")
        .join()
        .expect("worker thread");
    }

    #[test]
    fn test_handle_progress_is_monotonic_and_bounded() {
        let mut handle: WorkerHandle<u32> = WorkerHandle::new(Slice { index: 0, start: 0, end: 10 });
        handle.record_progress(4);
        handle.record_progress(2);
        assert_eq!(handle.processed, 4);
        handle.record_progress(99);
        assert_eq!(handle.processed, 10);

        handle.complete(ResultSeries::single(vec![]));
        assert!(handle.is_complete());
        assert_eq!(handle.processed, 10);
    }
}
