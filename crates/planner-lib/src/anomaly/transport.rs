//! Alert delivery
//!
//! Transports never return errors: every failure is folded into an
//! [`AlertOutcome`] with `sent: false` so alerting stays best-effort. An
//! outcome that is `skipped` never attempted delivery at all.

use super::AlertPayload;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};

/// Webhook request timeout
pub const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(5);

/// Result of a send attempt
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertOutcome {
    pub sent: bool,
    /// No delivery was attempted, e.g. no channel configured
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub skipped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AlertOutcome {
    pub fn delivered(status_code: Option<u16>) -> Self {
        Self {
            sent: true,
            skipped: false,
            status_code,
            reason: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            sent: false,
            skipped: false,
            status_code: None,
            reason: Some(reason.into()),
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            skipped: true,
            ..Self::failed(reason)
        }
    }
}

/// Outbound alert channel
#[async_trait]
pub trait AlertTransport: Send + Sync {
    async fn send(&self, payload: &AlertPayload) -> AlertOutcome;

    /// Short name for logs and health reporting
    fn name(&self) -> &'static str;
}

/// Posts embed payloads to a chat webhook
pub struct WebhookTransport {
    client: Client,
    url: String,
}

impl WebhookTransport {
    pub fn new(url: impl Into<String>) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl AlertTransport for WebhookTransport {
    async fn send(&self, payload: &AlertPayload) -> AlertOutcome {
        let response = match self.client.post(&self.url).json(payload).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Webhook request failed");
                return AlertOutcome::failed(e.to_string());
            }
        };

        let status = response.status();
        if status.is_success() {
            return AlertOutcome::delivered(Some(status.as_u16()));
        }

        let body = response.text().await.unwrap_or_default();
        warn!(status = status.as_u16(), body = %body, "Webhook rejected alert");
        AlertOutcome {
            status_code: Some(status.as_u16()),
            ..AlertOutcome::failed(format!("webhook returned {}: {}", status, body))
        }
    }

    fn name(&self) -> &'static str {
        "webhook"
    }
}

/// Logs alerts instead of sending them
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTransport;

#[async_trait]
impl AlertTransport for LogTransport {
    async fn send(&self, payload: &AlertPayload) -> AlertOutcome {
        info!(
            title = payload.title().unwrap_or_default(),
            fields = payload.embeds.first().map(|e| e.fields.len()).unwrap_or(0),
            "No webhook configured, alert logged only"
        );
        AlertOutcome::skipped("no webhook configured")
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anomaly::{Embed, EmbedFooter};

    fn payload() -> AlertPayload {
        AlertPayload {
            username: Some("bot".into()),
            avatar_url: None,
            embeds: vec![Embed {
                title: "Forecast anomaly".into(),
                description: "test".into(),
                fields: vec![],
                footer: Some(EmbedFooter { text: "k".into() }),
            }],
        }
    }

    #[tokio::test]
    async fn test_webhook_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hook")
            .match_header("content-type", "application/json")
            .match_body(mockito::Matcher::PartialJsonString(
                r#"{"username": "bot", "embeds": [{"title": "Forecast anomaly"}]}"#.into(),
            ))
            .with_status(204)
            .create_async()
            .await;

        let transport = WebhookTransport::new(format!("{}/hook", server.url())).unwrap();
        let outcome = transport.send(&payload()).await;

        mock.assert_async().await;
        assert!(outcome.sent);
        assert_eq!(outcome.status_code, Some(204));
    }

    #[tokio::test]
    async fn test_webhook_rejection_is_not_sent() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/hook")
            .with_status(429)
            .with_body("slow down")
            .create_async()
            .await;

        let transport = WebhookTransport::new(format!("{}/hook", server.url())).unwrap();
        let outcome = transport.send(&payload()).await;

        assert!(!outcome.sent);
        assert!(!outcome.skipped);
        assert_eq!(outcome.status_code, Some(429));
        assert!(outcome.reason.unwrap().contains("slow down"));
    }

    #[tokio::test]
    async fn test_webhook_unreachable() {
        let transport = WebhookTransport::new("http://127.0.0.1:1/hook").unwrap();
        let outcome = transport.send(&payload()).await;
        assert!(!outcome.sent);
        assert!(outcome.status_code.is_none());
    }

    #[tokio::test]
    async fn test_log_transport_never_sends() {
        let outcome = LogTransport.send(&payload()).await;
        assert!(!outcome.sent);
        assert!(outcome.skipped);
        assert_eq!(LogTransport.name(), "log");
    }
}
