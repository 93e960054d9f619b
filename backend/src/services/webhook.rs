use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Body posted to workflow webhooks
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEnvelope {
    pub event_type: String,
    pub user_id: Option<Uuid>,
    pub event_data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

const BODY_EXCERPT_CHARS: usize = 200;

/// Single-shot HTTP delivery with a bounded timeout. Failures are returned, never retried.
#[derive(Clone)]
pub struct WebhookClient {
    http: reqwest::Client,
    timeout: Duration,
}

impl WebhookClient {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("sigflow-lifecycle/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { http, timeout })
    }

    pub async fn deliver(&self, url: &str, envelope: &WebhookEnvelope) -> Result<(), String> {
        let response = self
            .http
            .post(url)
            .header("X-Sigflow-Event", envelope.event_type.as_str())
            .json(envelope)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    format!("webhook timed out after {}s", self.timeout.as_secs())
                } else {
                    format!("webhook request failed: {}", e)
                }
            })?;

        let status = response.status();
        if status.is_success() {
            info!("Webhook delivered to {} ({})", url, status.as_u16());
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        let excerpt: String = body.trim().chars().take(BODY_EXCERPT_CHARS).collect();
        warn!("Webhook to {} answered {}", url, status.as_u16());

        if excerpt.is_empty() {
            Err(format!("HTTP {}", status.as_u16()))
        } else {
            Err(format!("HTTP {}: {}", status.as_u16(), excerpt))
        }
    }
}
