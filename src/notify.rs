//! Outbound collaborators: user notifications and error telemetry
//!
//! Both follow the same pattern: a trait the engine calls, a no-op
//! implementation used by default, and (for notifications) a webhook
//! implementation driven by [`NotificationConfig`].

use crate::config::{NotificationConfig, WebhookConfig};
use crate::error::{Error, Result};
use crate::types::NotificationKind;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

/// Details attached to a notification
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct NotificationParams {
    /// Title of the group or item concerned
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Number of items concerned
    pub count: usize,
    /// Extra text (e.g. the failure message)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Receives queue milestones
pub trait NotificationDispatcher: Send + Sync {
    /// Deliver a notification
    ///
    /// `force` requests delivery even when the host would normally suppress
    /// it (e.g. while its window is focused).
    fn notify(&self, kind: NotificationKind, params: NotificationParams, force: bool);
}

/// Dispatcher that drops every notification
#[derive(Clone, Copy, Debug, Default)]
pub struct NoOpNotifier;

impl NotificationDispatcher for NoOpNotifier {
    fn notify(&self, kind: NotificationKind, _params: NotificationParams, _force: bool) {
        tracing::trace!(kind = ?kind, "Notification dropped");
    }
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    event: NotificationKind,
    #[serde(flatten)]
    params: &'a NotificationParams,
    force: bool,
    timestamp: i64,
}

/// Dispatcher posting JSON to configured webhooks
#[derive(Clone, Debug)]
pub struct WebhookNotifier {
    webhooks: Arc<Vec<WebhookConfig>>,
    client: reqwest::Client,
}

impl WebhookNotifier {
    /// Create a notifier for the webhooks in `config`
    pub fn new(config: &NotificationConfig) -> Self {
        Self {
            webhooks: Arc::new(config.webhooks.clone()),
            client: reqwest::Client::new(),
        }
    }
}

impl NotificationDispatcher for WebhookNotifier {
    /// Posts to every webhook subscribed to `kind`
    ///
    /// Requests are sent from a spawned task (fire and forget); failures are logged.
    fn notify(&self, kind: NotificationKind, params: NotificationParams, force: bool) {
        let matching: Vec<WebhookConfig> = self
            .webhooks
            .iter()
            .filter(|w| w.events.contains(&kind))
            .cloned()
            .collect();
        if matching.is_empty() {
            return;
        }

        let client = self.client.clone();
        tokio::spawn(async move {
            let payload = WebhookPayload {
                event: kind,
                params: &params,
                force,
                timestamp: chrono::Utc::now().timestamp(),
            };

            for webhook in matching {
                let mut request = client
                    .post(&webhook.url)
                    .json(&payload)
                    .timeout(webhook.timeout);
                if let Some(auth) = &webhook.auth_header {
                    request = request.header("Authorization", auth);
                }

                match tokio::time::timeout(webhook.timeout, request.send()).await {
                    Ok(Ok(response)) if response.status().is_success() => {
                        tracing::debug!(url = %webhook.url, "webhook sent successfully");
                    }
                    Ok(Ok(response)) => {
                        tracing::warn!(
                            url = %webhook.url,
                            status = %response.status(),
                            "webhook failed"
                        );
                    }
                    Ok(Err(e)) => {
                        tracing::warn!(url = %webhook.url, error = %e, "webhook failed");
                    }
                    Err(_) => {
                        tracing::warn!(
                            url = %webhook.url,
                            timeout = ?webhook.timeout,
                            "webhook timeout"
                        );
                    }
                }
            }
        });
    }
}

/// Receives unexpected errors for diagnosis
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    /// Record an unhandled error with its context
    fn report(&self, code: &str, message: &str, context: serde_json::Value);

    /// Submit the report identified by `report_id`
    async fn send_report(&self, report_id: &str) -> Result<()>;
}

/// Telemetry sink that records nothing
#[derive(Clone, Copy, Debug, Default)]
pub struct NoOpTelemetry;

#[async_trait]
impl TelemetrySink for NoOpTelemetry {
    fn report(&self, code: &str, _message: &str, _context: serde_json::Value) {
        tracing::trace!(code, "Telemetry disabled, report dropped");
    }

    async fn send_report(&self, _report_id: &str) -> Result<()> {
        Err(Error::NotSupported("no telemetry backend configured".into()))
    }
}
