//! Gateway event envelope and typed payloads

use serde::Deserialize;
use std::collections::HashMap;

use crate::payments::GatewayRefundStatus;

/// Raw event as delivered by the gateway
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub created: Option<i64>,
    pub data: EventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventData {
    pub object: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LastPaymentError {
    pub message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IntentObject {
    pub id: String,
    /// Pence
    #[serde(default)]
    pub amount: i64,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub last_payment_error: Option<LastPaymentError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefundObject {
    pub id: String,
    pub status: GatewayRefundStatus,
    #[serde(default)]
    pub failure_reason: Option<String>,
    #[serde(default)]
    pub payment_intent: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DisputeObject {
    pub id: String,
    #[serde(default)]
    pub payment_intent: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub amount: i64,
}

/// Event kinds the engine acts on
#[derive(Debug, Clone)]
pub enum EventPayload {
    /// `payment_intent.succeeded`
    PaymentSucceeded(IntentObject),
    /// `payment_intent.payment_failed`
    PaymentFailed(IntentObject),
    /// `refund.created`, `refund.updated`
    RefundUpdated(RefundObject),
    /// `charge.dispute.created`
    DisputeCreated(DisputeObject),
    /// Anything else; acknowledged and recorded
    Unhandled(String),
}

impl WebhookEvent {
    /// Decode `data.object` according to the event type
    pub fn payload(&self) -> Result<EventPayload, serde_json::Error> {
        let object = || self.data.object.clone();
        Ok(match self.event_type.as_str() {
            "payment_intent.succeeded" => {
                EventPayload::PaymentSucceeded(serde_json::from_value(object())?)
            }
            "payment_intent.payment_failed" => {
                EventPayload::PaymentFailed(serde_json::from_value(object())?)
            }
            "refund.created" | "refund.updated" => {
                EventPayload::RefundUpdated(serde_json::from_value(object())?)
            }
            "charge.dispute.created" => {
                EventPayload::DisputeCreated(serde_json::from_value(object())?)
            }
            other => EventPayload::Unhandled(other.to_string()),
        })
    }
}
