//! Webhook reconciliation
//!
//! Protocol per delivery:
//!
//! 1. verify the signature over the raw body
//! 2. skip events already recorded as processed
//! 3. dispatch on [`EventPayload`] to the order or refund engine
//! 4. record the event id, only after step 3 has committed
//!
//! A crash between 3 and 4 means the gateway redelivers and the transition
//! is re-applied against the committed state, which is a no-op. Business
//! rejections (an edge the state machine refuses) are recorded and
//! acknowledged so the gateway stops retrying; storage faults and exhausted
//! version conflicts are returned so that it retries.

use serde::Serialize;
use shared::order::{Actor, Money};
use shared::util::now_millis;
use std::sync::Arc;

use super::event::{DisputeObject, EventPayload, IntentObject, RefundObject, WebhookEvent};
use super::storage::{ProcessedEvent, WebhookStore};
use crate::orders::{OrderError, OrderResult, OrderService};
use crate::payments::{GatewayRefund, SignatureError, verify_signature};

/// What a delivery did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WebhookOutcome {
    /// Event id seen before; nothing reapplied
    Duplicate { event_id: String },
    /// A state change was committed
    Applied { event_id: String, target_id: String },
    /// Target already in the reported state
    NoChange { event_id: String, target_id: String },
    /// Nothing to act on (unhandled type, unknown order)
    Ignored { event_id: String, reason: String },
    /// The state machine refused the change
    Rejected { event_id: String, reason: String },
}

impl WebhookOutcome {
    fn label(&self) -> &'static str {
        match self {
            Self::Duplicate { .. } => "duplicate",
            Self::Applied { .. } => "applied",
            Self::NoChange { .. } => "no_change",
            Self::Ignored { .. } => "ignored",
            Self::Rejected { .. } => "rejected",
        }
    }
}

pub struct WebhookReconciler {
    store: WebhookStore,
    orders: Arc<OrderService>,
    secret: String,
    tolerance_secs: i64,
}

impl WebhookReconciler {
    pub fn new(
        store: WebhookStore,
        orders: Arc<OrderService>,
        secret: impl Into<String>,
        tolerance_secs: i64,
    ) -> Self {
        Self {
            store,
            orders,
            secret: secret.into(),
            tolerance_secs,
        }
    }

    pub fn store(&self) -> &WebhookStore {
        &self.store
    }

    /// Handle one delivery of `payload` with its signature header
    pub fn handle(&self, payload: &[u8], signature: Option<&str>) -> OrderResult<WebhookOutcome> {
        let header = signature.ok_or(SignatureError::MissingHeader);
        let verified = header.and_then(|header| {
            verify_signature(
                payload,
                header,
                &self.secret,
                self.tolerance_secs,
                now_millis() / 1000,
            )
        });
        if let Err(e) = verified {
            tracing::warn!(target: "payment", error = %e, "Webhook signature rejected");
            return Err(e.into());
        }

        let event: WebhookEvent = serde_json::from_slice(payload)
            .map_err(|e| OrderError::validation(format!("malformed webhook event: {}", e)))?;

        if let Some(previous) = self.store.get(&event.id)? {
            tracing::info!(
                target: "payment",
                event_id = %event.id,
                event_type = %event.event_type,
                original_outcome = %previous.outcome,
                order_id = ?previous.order_id,
                "Duplicate webhook event skipped"
            );
            return Ok(WebhookOutcome::Duplicate { event_id: event.id });
        }

        let payload = event
            .payload()
            .map_err(|e| OrderError::validation(format!("malformed {} object: {}", event.event_type, e)))?;

        let outcome = match self.dispatch(&event, payload) {
            Ok(outcome) => outcome,
            Err(e) if is_business_rejection(&e) => {
                tracing::error!(
                    target: "payment",
                    event_id = %event.id,
                    event_type = %event.event_type,
                    error = %e,
                    "Webhook transition rejected"
                );
                WebhookOutcome::Rejected {
                    event_id: event.id.clone(),
                    reason: e.to_string(),
                }
            }
            Err(e) => {
                tracing::error!(
                    target: "payment",
                    event_id = %event.id,
                    event_type = %event.event_type,
                    error = %e,
                    "Webhook processing failed, awaiting redelivery"
                );
                return Err(e);
            }
        };

        let (target_id, detail) = match &outcome {
            WebhookOutcome::Applied { target_id, .. }
            | WebhookOutcome::NoChange { target_id, .. } => (Some(target_id.clone()), None),
            WebhookOutcome::Ignored { reason, .. } | WebhookOutcome::Rejected { reason, .. } => {
                (None, Some(reason.clone()))
            }
            WebhookOutcome::Duplicate { .. } => (None, None),
        };
        self.store.record(&ProcessedEvent {
            event_id: event.id.clone(),
            event_type: event.event_type.clone(),
            processed_at: now_millis(),
            outcome: outcome.label().to_string(),
            order_id: target_id,
            detail,
        })?;

        tracing::info!(
            target: "payment",
            event_id = %event.id,
            event_type = %event.event_type,
            outcome = outcome.label(),
            "Webhook processed"
        );
        Ok(outcome)
    }

    fn dispatch(&self, event: &WebhookEvent, payload: EventPayload) -> OrderResult<WebhookOutcome> {
        match payload {
            EventPayload::PaymentSucceeded(intent) => self.on_payment_succeeded(event, &intent),
            EventPayload::PaymentFailed(intent) => self.on_payment_failed(event, &intent),
            EventPayload::RefundUpdated(refund) => self.on_refund_updated(event, &refund),
            EventPayload::DisputeCreated(dispute) => self.on_dispute_created(event, &dispute),
            EventPayload::Unhandled(event_type) => {
                tracing::debug!(target: "payment", event_id = %event.id, event_type = %event_type, "Unhandled webhook event type");
                Ok(WebhookOutcome::Ignored {
                    event_id: event.id.clone(),
                    reason: format!("unhandled event type {}", event_type),
                })
            }
        }
    }

    /// Order for an intent: the intent index first, then `metadata.order_id`
    fn order_for_intent(
        &self,
        intent_id: &str,
        metadata_order_id: Option<&String>,
    ) -> OrderResult<Option<String>> {
        if let Some(order_id) = self.orders.find_by_intent(intent_id)? {
            return Ok(Some(order_id));
        }
        Ok(metadata_order_id.cloned())
    }

    fn unknown_order(event: &WebhookEvent, intent_id: &str) -> WebhookOutcome {
        tracing::warn!(target: "payment", event_id = %event.id, intent_id, "No order for payment intent");
        WebhookOutcome::Ignored {
            event_id: event.id.clone(),
            reason: format!("no order for payment intent {}", intent_id),
        }
    }

    fn on_payment_succeeded(
        &self,
        event: &WebhookEvent,
        intent: &IntentObject,
    ) -> OrderResult<WebhookOutcome> {
        let Some(order_id) = self.order_for_intent(&intent.id, intent.metadata.get("order_id"))?
        else {
            return Ok(Self::unknown_order(event, &intent.id));
        };

        let actor = Actor::system();
        let order = match self.orders.get_order(&actor, &order_id) {
            Ok(order) => order,
            Err(OrderError::NotFound { .. }) => return Ok(Self::unknown_order(event, &intent.id)),
            Err(e) => return Err(e),
        };
        let paid = Money::from_pence(intent.amount);
        if paid != order.amounts.final_amount {
            tracing::error!(
                target: "payment",
                event_id = %event.id,
                order_id = %order_id,
                paid = %paid,
                final_amount = %order.amounts.final_amount,
                "Payment amount does not match order total"
            );
            return Ok(WebhookOutcome::Rejected {
                event_id: event.id.clone(),
                reason: format!("paid {} but order total is {}", paid, order.amounts.final_amount),
            });
        }

        let applied =
            self.orders
                .confirm_payment(&order_id, Some(&intent.id), &actor, "payment_intent.succeeded")?;
        Ok(if applied.changed {
            WebhookOutcome::Applied {
                event_id: event.id.clone(),
                target_id: order_id,
            }
        } else {
            WebhookOutcome::NoChange {
                event_id: event.id.clone(),
                target_id: order_id,
            }
        })
    }

    fn on_payment_failed(
        &self,
        event: &WebhookEvent,
        intent: &IntentObject,
    ) -> OrderResult<WebhookOutcome> {
        let Some(order_id) = self.order_for_intent(&intent.id, intent.metadata.get("order_id"))?
        else {
            return Ok(Self::unknown_order(event, &intent.id));
        };
        let reason = intent
            .last_payment_error
            .as_ref()
            .and_then(|e| e.message.as_deref());

        let outcome = match self
            .orders
            .mark_payment_failed(&order_id, &Actor::system(), reason)
        {
            Ok(outcome) => outcome,
            Err(OrderError::NotFound { .. }) => return Ok(Self::unknown_order(event, &intent.id)),
            Err(e) => return Err(e),
        };
        tracing::warn!(target: "payment", event_id = %event.id, order_id = %order_id, reason = ?reason, "Payment failed");

        Ok(if outcome.changed {
            WebhookOutcome::Applied {
                event_id: event.id.clone(),
                target_id: order_id,
            }
        } else {
            WebhookOutcome::NoChange {
                event_id: event.id.clone(),
                target_id: order_id,
            }
        })
    }

    fn on_refund_updated(
        &self,
        event: &WebhookEvent,
        refund: &RefundObject,
    ) -> OrderResult<WebhookOutcome> {
        let update = GatewayRefund {
            id: refund.id.clone(),
            status: refund.status,
            failure_reason: refund.failure_reason.clone(),
        };
        let hint = refund.metadata.get("refund_id").map(String::as_str);

        match self.orders.refunds().on_gateway_refund_update(&update, hint)? {
            Some(updated) => Ok(WebhookOutcome::Applied {
                event_id: event.id.clone(),
                target_id: updated.refund_id,
            }),
            None => {
                tracing::warn!(
                    target: "payment",
                    event_id = %event.id,
                    gateway_refund_id = %refund.id,
                    payment_intent = ?refund.payment_intent,
                    "No refund for gateway refund"
                );
                Ok(WebhookOutcome::Ignored {
                    event_id: event.id.clone(),
                    reason: format!("no refund for gateway refund {}", refund.id),
                })
            }
        }
    }

    fn on_dispute_created(
        &self,
        event: &WebhookEvent,
        dispute: &DisputeObject,
    ) -> OrderResult<WebhookOutcome> {
        let Some(intent_id) = dispute.payment_intent.as_deref() else {
            return Ok(WebhookOutcome::Ignored {
                event_id: event.id.clone(),
                reason: format!("dispute {} has no payment intent", dispute.id),
            });
        };
        let Some(order_id) = self.orders.find_by_intent(intent_id)? else {
            return Ok(Self::unknown_order(event, intent_id));
        };

        tracing::warn!(
            target: "payment",
            event_id = %event.id,
            dispute_id = %dispute.id,
            order_id = %order_id,
            amount = %Money::from_pence(dispute.amount),
            reason = ?dispute.reason,
            "Dispute opened"
        );
        let outcome = self
            .orders
            .flag_dispute(&order_id, &dispute.id, dispute.reason.as_deref())?;
        Ok(if outcome.changed {
            WebhookOutcome::Applied {
                event_id: event.id.clone(),
                target_id: order_id,
            }
        } else {
            WebhookOutcome::NoChange {
                event_id: event.id.clone(),
                target_id: order_id,
            }
        })
    }
}

/// Errors that redelivery cannot fix
fn is_business_rejection(err: &OrderError) -> bool {
    matches!(
        err,
        OrderError::InvalidTransition { .. }
            | OrderError::InvalidPaymentTransition { .. }
            | OrderError::Conflict { .. }
            | OrderError::Validation(_)
            | OrderError::NotFound { .. }
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::order::OrderStatus;

    #[test]
    fn test_business_rejections_are_acknowledged() {
        assert!(is_business_rejection(&OrderError::InvalidTransition {
            order_id: "ORD-00001".into(),
            from: OrderStatus::Delivered,
            to: OrderStatus::Confirmed,
        }));
        assert!(!is_business_rejection(&OrderError::VersionConflict {
            resource: "Order",
            id: "ORD-00001".into(),
        }));
    }

    #[test]
    fn test_outcome_serializes_with_tag() {
        let outcome = WebhookOutcome::Applied {
            event_id: "evt_1".into(),
            target_id: "ORD-00001".into(),
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["outcome"], "applied");
        assert_eq!(json["target_id"], "ORD-00001");
    }
}
