//! Notification events and sinks.
//!
//! The executor reports coarse progress to an external observer through a
//! [`NotificationSink`]. Delivery is best-effort: sinks must not block the
//! caller, and nothing in the engine waits on, retries or verifies delivery.
//!
//! Events serialise as
//! `{"status": "RUNNING" | "FINALIZING" | "COMPLETED" | "FAILED", "progress": {"value": .., "max": ..}}`
//! with `progress` omitted when absent.

mod webhook;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

pub use webhook::WebhookSink;

/// Summed progress across all workers of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    /// Rows processed so far.
    pub value: usize,
    /// Total rows in the batch.
    pub max: usize,
}

/// Lifecycle stage carried by a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationStatus {
    Running,
    Finalizing,
    Completed,
    Failed,
}

impl std::fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotificationStatus::Running => write!(f, "RUNNING"),
            NotificationStatus::Finalizing => write!(f, "FINALIZING"),
            NotificationStatus::Completed => write!(f, "COMPLETED"),
            NotificationStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// A single event delivered to a sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub status: NotificationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<Progress>,
}

impl Notification {
    /// A `RUNNING` event carrying progress.
    pub fn running(progress: Progress) -> Self {
        Self {
            status: NotificationStatus::Running,
            progress: Some(progress),
        }
    }

    pub fn finalizing() -> Self {
        Self {
            status: NotificationStatus::Finalizing,
            progress: None,
        }
    }

    pub fn completed() -> Self {
        Self {
            status: NotificationStatus::Completed,
            progress: None,
        }
    }

    pub fn failed() -> Self {
        Self {
            status: NotificationStatus::Failed,
            progress: None,
        }
    }
}

/// Receives notifications. Implementations must return quickly.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Discards every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl NotificationSink for NullSink {
    fn notify(&self, _notification: Notification) {}
}

/// Logs every notification through `tracing`.
#[derive(Debug, Clone, Default)]
pub struct TracingSink {
    label: Option<String>,
}

impl TracingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tags every log line with `label` (e.g. an analysis id).
    pub fn with_label(label: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
        }
    }
}

impl NotificationSink for TracingSink {
    fn notify(&self, notification: Notification) {
        let label = self.label.as_deref().unwrap_or("-");
        match notification.progress {
            Some(progress) => {
                let pct = if progress.max > 0 {
                    progress.value as f64 / progress.max as f64 * 100.0
                } else {
                    100.0
                };
                tracing::info!(
                    label,
                    status = %notification.status,
                    value = progress.value,
                    max = progress.max,
                    progress_pct = format!("{:.1}%", pct),
                    "Analysis progress"
                );
            }
            None => tracing::info!(label, status = %notification.status, "Analysis status"),
        }
    }
}

/// Forwards notifications into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Notification>,
}

impl ChannelSink {
    /// Creates a sink and the receiver that observes its events.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl NotificationSink for ChannelSink {
    fn notify(&self, notification: Notification) {
        // Receiver gone means nobody is watching; that's fine.
        let _ = self.tx.send(notification);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_wire_shape() {
        let running = Notification::running(Progress { value: 3, max: 10 });
        let json = serde_json::to_value(&running).expect("serialize");
        assert_eq!(
            json,
            serde_json::json!({"status": "RUNNING", "progress": {"value": 3, "max": 10}})
        );

        let finalizing = serde_json::to_value(Notification::finalizing()).expect("serialize");
        assert_eq!(finalizing, serde_json::json!({"status": "FINALIZING"}));
    }

    #[test]
    fn test_notification_deserializes_without_progress() {
        let parsed: Notification =
            serde_json::from_str(r#"{"status":"COMPLETED"}"#).expect("deserialize");
        assert_eq!(parsed, Notification::completed());
    }

    #[test]
    fn test_status_display() {
        assert_eq!(NotificationStatus::Running.to_string(), "RUNNING");
        assert_eq!(NotificationStatus::Failed.to_string(), "FAILED");
    }

    #[test]
    fn test_channel_sink_forwards() {
        let (sink, mut rx) = ChannelSink::new();
        sink.notify(Notification::failed());
        assert_eq!(rx.try_recv().ok(), Some(Notification::failed()));
    }

    #[test]
    fn test_channel_sink_survives_dropped_receiver() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        sink.notify(Notification::completed());
    }

    #[test]
    fn test_tracing_and_null_sinks_accept_events() {
        TracingSink::with_label("analysis-1").notify(Notification::running(Progress { value: 0, max: 0 }));
        NullSink.notify(Notification::finalizing());
    }
}
