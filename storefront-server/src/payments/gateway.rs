//! Payment gateway seam
//!
//! The engine talks to the processor through [`PaymentGateway`] only. The
//! production implementation is [`StripeGateway`](super::StripeGateway);
//! tests substitute a fake.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shared::order::Money;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayErrorKind {
    /// Connection refused/reset, DNS
    Network,
    Timeout,
    /// HTTP 429
    RateLimited,
    /// HTTP 5xx
    Server,
    /// Card declined or other `card_error`
    CardDeclined,
    /// Any other 4xx
    InvalidRequest,
    /// Unreadable response body
    Decode,
}

#[derive(Debug, Clone, Error)]
#[error("{message} (kind={kind:?}, correlation_id={correlation_id})")]
pub struct GatewayError {
    pub kind: GatewayErrorKind,
    pub message: String,
    /// Logged with every attempt; lets operators find the call in the logs
    pub correlation_id: String,
    pub status: Option<u16>,
}

impl GatewayError {
    pub fn new(
        kind: GatewayErrorKind,
        message: impl Into<String>,
        correlation_id: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            correlation_id: correlation_id.into(),
            status: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Whether the caller may try the same request again later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            GatewayErrorKind::Network
                | GatewayErrorKind::Timeout
                | GatewayErrorKind::RateLimited
                | GatewayErrorKind::Server
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    RequiresPaymentMethod,
    RequiresConfirmation,
    RequiresAction,
    Processing,
    RequiresCapture,
    Succeeded,
    Canceled,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    /// Handed to the browser to complete payment
    pub client_secret: Option<String>,
    pub status: IntentStatus,
    pub amount: Money,
    /// `metadata.order_id`
    pub order_id: Option<String>,
    /// Decline message of the last failed attempt
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateIntentRequest {
    pub order_id: String,
    pub amount: Money,
    pub currency: String,
    pub idempotency_key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayRefundStatus {
    Pending,
    RequiresAction,
    Succeeded,
    Failed,
    Canceled,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayRefund {
    pub id: String,
    pub status: GatewayRefundStatus,
    pub failure_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateRefundRequest {
    pub refund_id: String,
    pub payment_intent_id: String,
    pub amount: Money,
    pub idempotency_key: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_payment_intent(
        &self,
        request: &CreateIntentRequest,
    ) -> Result<PaymentIntent, GatewayError>;

    async fn retrieve_payment_intent(&self, intent_id: &str)
    -> Result<PaymentIntent, GatewayError>;

    async fn create_refund(
        &self,
        request: &CreateRefundRequest,
    ) -> Result<GatewayRefund, GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        for kind in [
            GatewayErrorKind::Network,
            GatewayErrorKind::Timeout,
            GatewayErrorKind::RateLimited,
            GatewayErrorKind::Server,
        ] {
            assert!(GatewayError::new(kind, "x", "c").is_retryable());
        }
        assert!(!GatewayError::new(GatewayErrorKind::CardDeclined, "x", "c").is_retryable());
        assert!(!GatewayError::new(GatewayErrorKind::InvalidRequest, "x", "c").is_retryable());
    }

    #[test]
    fn test_unknown_status_does_not_fail_parsing() {
        let status: IntentStatus = serde_json::from_str("\"something_new\"").unwrap();
        assert_eq!(status, IntentStatus::Unknown);
        let status: GatewayRefundStatus = serde_json::from_str("\"succeeded\"").unwrap();
        assert_eq!(status, GatewayRefundStatus::Succeeded);
    }
}
