//! Progress notifier.
//!
//! A dedicated tokio task that, on a fixed cadence, asks the executor for the
//! summed progress of all workers and forwards one `RUNNING` event to the
//! sink. It runs until the executor sends the exit signal.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::notify::{Notification, NotificationSink, Progress};

/// A progress-update request from the notifier to the executor.
#[derive(Debug)]
pub(crate) struct ProgressRequest {
    pub reply: oneshot::Sender<Progress>,
}

/// Handle to a running notifier task.
pub(crate) struct ProgressNotifier {
    exit_tx: broadcast::Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl ProgressNotifier {
    /// Starts the notifier. The executor answers requests arriving on the
    /// returned receiver.
    pub(crate) fn start(
        interval: Duration,
        sink: Arc<dyn NotificationSink>,
    ) -> (Self, mpsc::Receiver<ProgressRequest>) {
        let (request_tx, request_rx) = mpsc::channel(1);
        // Buffer size of 1 is enough, the exit signal is sent once.
        let (exit_tx, exit_rx) = broadcast::channel(1);

        let handle = tokio::spawn(notifier_loop(interval, sink, request_tx, exit_rx));

        (
            Self {
                exit_tx,
                handle: Some(handle),
            },
            request_rx,
        )
    }

    /// Sends the exit signal and waits for the task to close its channel.
    pub(crate) async fn stop(mut self) {
        // Ignore send error - the task may already have stopped
        let _ = self.exit_tx.send(());
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "Progress notifier task panicked");
            }
        }
    }
}

impl Drop for ProgressNotifier {
    fn drop(&mut self) {
        // Ignore send error - the task may already have stopped
        let _ = self.exit_tx.send(());
    }
}

async fn notifier_loop(
    interval: Duration,
    sink: Arc<dyn NotificationSink>,
    requests: mpsc::Sender<ProgressRequest>,
    mut exit_rx: broadcast::Receiver<()>,
) {
    let mut tick = tokio::time::interval(interval);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tick.tick().await; // skip the immediate first tick

    loop {
        tokio::select! {
            biased;

            _ = exit_rx.recv() => break,

            _ = tick.tick() => {
                let (reply_tx, reply_rx) = oneshot::channel();
                if requests.send(ProgressRequest { reply: reply_tx }).await.is_err() {
                    break;
                }

                let progress = tokio::select! {
                    biased;

                    _ = exit_rx.recv() => break,
                    reply = reply_rx => match reply {
                        Ok(progress) => progress,
                        Err(_) => break,
                    },
                };

                sink.notify(Notification::running(progress));
            }
        }
    }

    debug!("Progress notifier stopped");
    // `requests` drops here, closing the channel to the executor.
}
