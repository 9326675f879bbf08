//! Notification request types

use serde::{Deserialize, Serialize};

/// What happened, from the recipient's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    OrderCreated,
    PaymentSucceeded,
    PaymentFailed,
    OrderStatusChanged,
    OrderCancelled,
    DisputeOpened,
    RefundRequested,
    RefundApproved,
    RefundRejected,
    RefundCompleted,
    RefundFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recipient {
    Customer,
    Admin,
}

/// "Notify `recipient` of `kind` for `order_id`"
///
/// Rendering and transport belong to the sink. The request only carries
/// identifiers plus a small structured payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRequest {
    pub kind: NotificationKind,
    pub recipient: Recipient,
    pub order_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refund_id: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub payload: serde_json::Value,
}

impl NotificationRequest {
    pub fn customer(kind: NotificationKind, order_id: impl Into<String>) -> Self {
        Self {
            kind,
            recipient: Recipient::Customer,
            order_id: order_id.into(),
            refund_id: None,
            payload: serde_json::Value::Null,
        }
    }

    pub fn admin(kind: NotificationKind, order_id: impl Into<String>) -> Self {
        Self {
            kind,
            recipient: Recipient::Admin,
            order_id: order_id.into(),
            refund_id: None,
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_refund(mut self, refund_id: impl Into<String>) -> Self {
        self.refund_id = Some(refund_id.into());
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

/// Durable outbox row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub sequence: u64,
    pub request: NotificationRequest,
    pub attempts: u32,
    /// Unix millis before which the worker leaves the row alone
    pub next_attempt_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub created_at: i64,
}
