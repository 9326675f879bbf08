//! Order transition rules
//!
//! Two parallel axes:
//!
//! ```text
//! order:   pending → confirmed → processing → out_for_delivery → delivered
//!                                      └──────── (pickup) ──────────┘
//!          any non-terminal ──→ cancelled
//!
//! payment: pending → completed | failed,  failed → completed,  completed → refunded
//! ```
//!
//! `pending → confirmed` additionally requires the payment axis to be
//! `completed` once the change is applied. [`apply`] validates both axes,
//! appends exactly one history entry and bumps the version.

use shared::order::{
    Actor, FulfillmentType, Order, OrderStatus, PaymentStatus, RecordState, StatusHistoryEntry,
};
use shared::error::ErrorCode;

use super::{OrderError, OrderResult};

/// Requested change on one or both axes
#[derive(Debug, Clone)]
pub struct StatusChange {
    pub status: Option<OrderStatus>,
    pub payment_status: Option<PaymentStatus>,
    pub actor: Actor,
    pub note: Option<String>,
}

impl StatusChange {
    pub fn order(status: OrderStatus, actor: Actor) -> Self {
        Self {
            status: Some(status),
            payment_status: None,
            actor,
            note: None,
        }
    }

    pub fn payment(payment_status: PaymentStatus, actor: Actor) -> Self {
        Self {
            status: None,
            payment_status: Some(payment_status),
            actor,
            note: None,
        }
    }

    pub fn with_payment(mut self, payment_status: PaymentStatus) -> Self {
        self.payment_status = Some(payment_status);
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// Whether `from → to` is an edge of the order axis
pub fn can_transition(from: OrderStatus, to: OrderStatus, fulfillment: FulfillmentType) -> bool {
    use OrderStatus::*;

    match (from, to) {
        (Delivered | Cancelled, _) => false,
        (_, Cancelled) => true,
        (Pending, Confirmed) => true,
        (Confirmed, Processing) => true,
        (Processing, OutForDelivery) => fulfillment == FulfillmentType::Delivery,
        (Processing, Delivered) => fulfillment == FulfillmentType::Pickup,
        (OutForDelivery, Delivered) => true,
        _ => false,
    }
}

/// Whether `from → to` is an edge of the payment axis
pub fn can_transition_payment(from: PaymentStatus, to: PaymentStatus) -> bool {
    use PaymentStatus::*;

    matches!(
        (from, to),
        (Pending, Completed) | (Pending, Failed) | (Failed, Completed) | (Completed, Refunded)
    )
}

/// Validate and apply `change` to `order`
///
/// On error the order is left untouched.
pub fn apply(order: &mut Order, change: StatusChange, now: i64) -> OrderResult<()> {
    if order.record_state == RecordState::Archived {
        return Err(OrderError::conflict(
            ErrorCode::OrderArchived,
            format!("Order {} is archived", order.order_id),
        ));
    }

    let next_status = change.status.unwrap_or(order.status);
    let next_payment = change.payment_status.unwrap_or(order.payment_status);

    if next_status == order.status && next_payment == order.payment_status {
        return Err(OrderError::InvalidTransition {
            order_id: order.order_id.clone(),
            from: order.status,
            to: next_status,
        });
    }

    if next_status != order.status
        && !can_transition(order.status, next_status, order.fulfillment)
    {
        return Err(OrderError::InvalidTransition {
            order_id: order.order_id.clone(),
            from: order.status,
            to: next_status,
        });
    }

    if next_payment != order.payment_status
        && !can_transition_payment(order.payment_status, next_payment)
    {
        return Err(OrderError::InvalidPaymentTransition {
            order_id: order.order_id.clone(),
            from: order.payment_status,
            to: next_payment,
        });
    }

    if order.status == OrderStatus::Pending
        && next_status == OrderStatus::Confirmed
        && next_payment != PaymentStatus::Completed
    {
        return Err(OrderError::conflict(
            ErrorCode::PaymentNotCompleted,
            format!(
                "Order {} cannot be confirmed before payment completes",
                order.order_id
            ),
        ));
    }

    if next_payment == PaymentStatus::Completed && order.payment_status != PaymentStatus::Completed
    {
        order.paid_at = Some(now);
    }
    match next_status {
        s if s == order.status => {}
        OrderStatus::Confirmed => order.confirmed_at = Some(now),
        OrderStatus::Delivered => order.delivered_at = Some(now),
        OrderStatus::Cancelled => order.cancelled_at = Some(now),
        _ => {}
    }

    order.status = next_status;
    order.payment_status = next_payment;
    order.status_history.push(StatusHistoryEntry {
        status: next_status,
        payment_status: next_payment,
        timestamp: now,
        actor: change.actor,
        note: change.note,
    });
    order.version += 1;
    order.updated_at = now;

    Ok(())
}
