//! Notification delivery transports
//!
//! The engine never renders or sends messages itself. A sink receives the
//! outbox row and hands it to whatever does (mailer, chat hook, log).

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use super::types::OutboxEntry;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Receiver rejected notification: {status} {body}")]
    Rejected { status: u16, body: String },
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, entry: &OutboxEntry) -> Result<(), SinkError>;
}

/// Writes each notification to the application log
#[derive(Debug, Default, Clone)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn deliver(&self, entry: &OutboxEntry) -> Result<(), SinkError> {
        tracing::info!(
            sequence = entry.sequence,
            kind = ?entry.request.kind,
            recipient = ?entry.request.recipient,
            order_id = %entry.request.order_id,
            refund_id = ?entry.request.refund_id,
            "Notification dispatched"
        );
        Ok(())
    }
}

/// POSTs the outbox row as JSON to an external dispatcher
///
/// The row's sequence is sent as `X-Notification-Id` so the receiver can
/// drop duplicates.
#[derive(Debug, Clone)]
pub struct HttpSink {
    client: reqwest::Client,
    url: String,
}

impl HttpSink {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SinkError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl NotificationSink for HttpSink {
    async fn deliver(&self, entry: &OutboxEntry) -> Result<(), SinkError> {
        let resp = self
            .client
            .post(&self.url)
            .header("X-Notification-Id", entry.sequence.to_string())
            .json(entry)
            .send()
            .await
            .map_err(|e| SinkError::Transport(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(SinkError::Rejected { status, body });
        }
        Ok(())
    }
}
