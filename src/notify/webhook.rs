//! HTTP webhook sink.
//!
//! Pushes each notification to an HTTP endpoint as JSON, tagged with the
//! analysis it belongs to. Every POST runs on its own tokio task so the
//! executor never waits on the network.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use super::{Notification, NotificationSink};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Envelope<'a> {
    analysis_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_id: Option<&'a str>,
    #[serde(flatten)]
    notification: &'a Notification,
}

/// Posts notifications to a webhook endpoint.
#[derive(Debug, Clone)]
pub struct WebhookSink {
    client: reqwest::Client,
    endpoint: Arc<str>,
    analysis_id: Arc<str>,
    user_id: Option<Arc<str>>,
}

impl WebhookSink {
    /// Creates a sink posting to `endpoint` for the given analysis.
    pub fn new(endpoint: impl Into<String>, analysis_id: impl Into<String>) -> Self {
        let client = build_client(reqwest::Client::builder().timeout(DEFAULT_TIMEOUT));

        Self {
            client,
            endpoint: Arc::from(endpoint.into()),
            analysis_id: Arc::from(analysis_id.into()),
            user_id: None,
        }
    }

    /// Tags every event with the owning user.
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(Arc::from(user_id.into()));
        self
    }

    /// JSON body posted for `notification`.
    pub fn payload(&self, notification: &Notification) -> serde_json::Value {
        let envelope = Envelope {
            analysis_id: &*self.analysis_id,
            user_id: self.user_id.as_deref(),
            notification,
        };
        serde_json::to_value(envelope).unwrap_or(serde_json::Value::Null)
    }
}

/// Builds the HTTP client, falling back to reqwest defaults (no timeout) when
/// the configured builder is rejected.
fn build_client(builder: reqwest::ClientBuilder) -> reqwest::Client {
    match builder.build() {
        Ok(client) => client,
        Err(e) => {
            warn!(error = %e, "Failed to build webhook client, using defaults without a timeout");
            reqwest::Client::new()
        }
    }
}

impl NotificationSink for WebhookSink {
    fn notify(&self, notification: Notification) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(analysis_id = %self.analysis_id, "No tokio runtime, dropping webhook notification");
            return;
        };

        let body = self.payload(&notification);
        let client = self.client.clone();
        let endpoint = Arc::clone(&self.endpoint);
        let analysis_id = Arc::clone(&self.analysis_id);

        runtime.spawn(async move {
            match client.post(&*endpoint).json(&body).send().await {
                Ok(response) if response.status().is_success() => {
                    debug!(analysis_id = %analysis_id, "Webhook notification delivered");
                }
                Ok(response) => {
                    warn!(
                        analysis_id = %analysis_id,
                        status = %response.status(),
                        "Webhook rejected notification"
                    );
                }
                Err(e) => {
                    warn!(analysis_id = %analysis_id, error = %e, "Webhook delivery failed");
                }
            }
        });
    }
}
