//! Order service
//!
//! Entry point for every order operation, from HTTP handlers and from the
//! webhook reconciler alike. Authorization is checked here; transition rules
//! live in [`state_machine`](super::state_machine), persistence in
//! [`OrderManager`]. Audit entries are written after the change commits.

use serde_json::json;
use shared::error::ErrorCode;
use shared::order::{
    Actor, ManualReview, Order, OrderStatus, PaymentMethod, PaymentStatus, RecordState,
    StatusHistoryEntry, StockState,
};
use shared::refund::RefundReason;
use std::sync::Arc;

use super::manager::{Decision, Effects, MutationOutcome, OrderManager};
use super::pricing::PricingPolicy;
use super::state_machine::{StatusChange, apply};
use super::storage::OrderFilter;
use super::validation::{CreateOrderRequest, normalize};
use super::{OrderError, OrderResult};
use crate::audit::{AuditAction, AuditService};
use crate::inventory::InventoryLedger;
use crate::notifications::{NotificationKind, NotificationRequest};
use crate::payments::{CreateIntentRequest, IntentStatus, PaymentGateway, PaymentIntent};
use crate::refunds::RefundWorkflow;

pub struct OrderService {
    manager: OrderManager,
    ledger: InventoryLedger,
    gateway: Arc<dyn PaymentGateway>,
    audit: Arc<AuditService>,
    refunds: Arc<RefundWorkflow>,
    pricing: PricingPolicy,
    currency: String,
}

/// Outcome of confirming a payment
#[derive(Debug, Clone)]
pub struct PaymentApplied {
    pub order: Order,
    pub changed: bool,
    /// Payment arrived after the order was cancelled
    pub late: bool,
}

fn both(kind: NotificationKind, order_id: &str, payload: serde_json::Value) -> Vec<NotificationRequest> {
    vec![
        NotificationRequest::customer(kind, order_id).with_payload(payload.clone()),
        NotificationRequest::admin(kind, order_id).with_payload(payload),
    ]
}

impl OrderService {
    pub fn new(
        manager: OrderManager,
        ledger: InventoryLedger,
        gateway: Arc<dyn PaymentGateway>,
        audit: Arc<AuditService>,
        refunds: Arc<RefundWorkflow>,
        pricing: PricingPolicy,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            manager,
            ledger,
            gateway,
            audit,
            refunds,
            pricing,
            currency: currency.into(),
        }
    }

    pub fn refunds(&self) -> &Arc<RefundWorkflow> {
        &self.refunds
    }

    pub fn audit(&self) -> &Arc<AuditService> {
        &self.audit
    }

    fn authorized(&self, actor: &Actor, order_id: &str) -> OrderResult<Order> {
        let order = self.manager.get(order_id)?;
        if actor.is_admin() || actor.is_system() || order.is_owned_by(actor) {
            Ok(order)
        } else {
            Err(OrderError::Forbidden("not your order".to_string()))
        }
    }

    // ========================================================================
    // Checkout and reads
    // ========================================================================

    /// Price, reserve and persist a new `pending` order
    pub fn create_order(&self, actor: &Actor, request: CreateOrderRequest) -> OrderResult<Order> {
        let input = normalize(request, actor)?;
        let amounts = self
            .pricing
            .compute(&input.items, input.fulfillment, input.discount)?;

        let order = self.manager.create(|order_id, now| {
            let payload = json!({ "final_amount": amounts.final_amount });
            let notifications = both(NotificationKind::OrderCreated, &order_id, payload);
            let order = Order {
                order_id,
                customer_id: input.customer_id,
                customer: input.customer,
                items: input.items,
                fulfillment: input.fulfillment,
                delivery_address: input.delivery_address,
                amounts,
                status: OrderStatus::Pending,
                payment_status: PaymentStatus::Pending,
                payment_method: input.payment_method,
                payment_intent_id: None,
                stock_state: StockState::Reserved,
                record_state: RecordState::Active,
                manual_review: None,
                priority: input.priority,
                source: input.source,
                order_notes: input.order_notes,
                cancel_reason: None,
                status_history: vec![StatusHistoryEntry {
                    status: OrderStatus::Pending,
                    payment_status: PaymentStatus::Pending,
                    timestamp: now,
                    actor: actor.clone(),
                    note: Some("Order placed".to_string()),
                }],
                version: 1,
                created_at: now,
                updated_at: now,
                paid_at: None,
                confirmed_at: None,
                delivered_at: None,
                cancelled_at: None,
            };
            (order, notifications)
        })?;

        self.audit.record_snapshot(
            actor,
            AuditAction::OrderCreated,
            "order",
            &order.order_id,
            &order,
        );
        Ok(order)
    }

    pub fn get_order(&self, actor: &Actor, order_id: &str) -> OrderResult<Order> {
        self.authorized(actor, order_id)
    }

    /// Admins see every order, customers their own
    pub fn list_orders(
        &self,
        actor: &Actor,
        status: Option<OrderStatus>,
        include_archived: bool,
    ) -> OrderResult<Vec<Order>> {
        let filter = if actor.is_admin() {
            OrderFilter {
                customer_id: None,
                status,
                include_archived,
            }
        } else {
            OrderFilter {
                customer_id: Some(actor.id.clone()),
                status,
                include_archived: false,
            }
        };
        self.manager.list(&filter)
    }

    pub fn find_by_intent(&self, intent_id: &str) -> OrderResult<Option<String>> {
        self.manager.find_by_intent(intent_id)
    }

    // ========================================================================
    // Payment
    // ========================================================================

    /// Create (or reuse) the gateway payment intent for an unpaid order
    pub async fn create_payment_intent(
        &self,
        actor: &Actor,
        order_id: &str,
    ) -> OrderResult<PaymentIntent> {
        let order = self.authorized(actor, order_id)?;
        if order.is_paid() {
            return Err(OrderError::conflict(
                ErrorCode::OrderAlreadyPaid,
                format!("Order {} has already been paid", order_id),
            ));
        }
        if order.status == OrderStatus::Cancelled || order.is_archived() {
            return Err(OrderError::conflict(
                ErrorCode::InvalidTransition,
                format!("Order {} is no longer payable", order_id),
            ));
        }
        if order.payment_method == PaymentMethod::Cash {
            return Err(OrderError::validation("cash orders are paid in store"));
        }

        if let Some(intent_id) = &order.payment_intent_id {
            let existing = self.gateway.retrieve_payment_intent(intent_id).await?;
            if existing.status != IntentStatus::Canceled {
                tracing::debug!(target: "payment", order_id, intent_id = %intent_id, "Reusing payment intent");
                return Ok(existing);
            }
        }

        let request = CreateIntentRequest {
            order_id: order_id.to_string(),
            amount: order.amounts.final_amount,
            currency: self.currency.clone(),
            // A cancelled intent is replaced under a fresh key
            idempotency_key: match order.payment_intent_id {
                None => format!("{}:intent", order_id),
                Some(_) => format!("{}:intent:v{}", order_id, order.version),
            },
        };
        let intent = self.gateway.create_payment_intent(&request).await?;
        tracing::info!(
            target: "payment",
            order_id,
            intent_id = %intent.id,
            amount = %intent.amount,
            "Payment intent created"
        );

        self.manager.mutate(order_id, |order, _| {
            if order.payment_intent_id.as_deref() == Some(intent.id.as_str()) {
                return Ok(Decision::Unchanged);
            }
            order.payment_intent_id = Some(intent.id.clone());
            Ok(Decision::Write(Effects {
                notifications: vec![],
                index_intent: Some(intent.id.clone()),
            }))
        })?;
        Ok(intent)
    }

    /// Client-confirmed payment callback
    ///
    /// Card orders are checked against the gateway; cash orders are marked
    /// paid by an admin. An already paid order is returned unchanged.
    pub async fn pay(&self, actor: &Actor, order_id: &str) -> OrderResult<Order> {
        let order = self.authorized(actor, order_id)?;
        if order.is_paid() {
            return Ok(order);
        }

        if order.payment_method == PaymentMethod::Cash {
            if !actor.is_admin() {
                return Err(OrderError::admin_required("Marking a cash order paid"));
            }
            return self
                .confirm_payment(order_id, None, actor, "Cash payment received")
                .map(|applied| applied.order);
        }

        let intent_id = order
            .payment_intent_id
            .clone()
            .ok_or_else(|| OrderError::validation("order has no payment intent"))?;
        let intent = self.gateway.retrieve_payment_intent(&intent_id).await?;

        if intent.status != IntentStatus::Succeeded {
            tracing::info!(
                target: "payment",
                order_id,
                intent_id = %intent_id,
                status = ?intent.status,
                "Pay callback before payment succeeded"
            );
            return Err(OrderError::conflict(
                ErrorCode::PaymentNotCompleted,
                format!("Payment for order {} has not completed", order_id),
            ));
        }
        if intent.amount != order.amounts.final_amount {
            tracing::error!(
                target: "payment",
                order_id,
                intent_id = %intent_id,
                intent_amount = %intent.amount,
                final_amount = %order.amounts.final_amount,
                "Payment amount mismatch"
            );
            return Err(OrderError::conflict(
                ErrorCode::PaymentFailed,
                "Paid amount does not match the order total",
            ));
        }

        self.confirm_payment(order_id, Some(&intent.id), actor, "Payment confirmed by client")
            .map(|applied| applied.order)
    }

    /// Record a successful payment
    ///
    /// `pending` orders move to `confirmed`. A payment for a cancelled order
    /// is recorded without touching the order status and opens a full
    /// refund for admin approval. Already paid orders are left unchanged.
    pub fn confirm_payment(
        &self,
        order_id: &str,
        intent_id: Option<&str>,
        actor: &Actor,
        note: &str,
    ) -> OrderResult<PaymentApplied> {
        let outcome = self.manager.mutate(order_id, |order, now| {
            if order.is_paid() {
                return Ok(Decision::Unchanged);
            }
            let change = match order.status {
                OrderStatus::Pending => StatusChange::order(OrderStatus::Confirmed, actor.clone())
                    .with_payment(PaymentStatus::Completed),
                _ => StatusChange::payment(PaymentStatus::Completed, actor.clone()),
            };
            apply(order, change.with_note(note), now)?;

            let mut effects = Effects::notify(vec![
                NotificationRequest::customer(NotificationKind::PaymentSucceeded, &order.order_id)
                    .with_payload(json!({ "amount": order.amounts.final_amount })),
            ]);
            if let Some(intent_id) = intent_id {
                if order.payment_intent_id.is_none() {
                    order.payment_intent_id = Some(intent_id.to_string());
                    effects.index_intent = Some(intent_id.to_string());
                }
            }
            Ok(Decision::Write(effects))
        })?;

        // Checked on every call so a retry after a failed refund open completes it
        let late = outcome.order.status == OrderStatus::Cancelled
            && outcome.order.payment_status == PaymentStatus::Completed;
        if outcome.changed {
            tracing::info!(
                target: "payment",
                order_id,
                late,
                amount = %outcome.order.amounts.final_amount,
                "Payment recorded"
            );
            self.audit_change(actor, AuditAction::OrderPaymentConfirmed, &outcome);
        }
        if late {
            if outcome.changed {
                tracing::warn!(target: "payment", order_id, "Payment received for cancelled order");
            }
            self.refunds.open_full_refund_for(
                &outcome.order,
                RefundReason::Other,
                "Payment received after the order was cancelled",
            )?;
        }

        Ok(PaymentApplied {
            order: outcome.order,
            changed: outcome.changed,
            late,
        })
    }

    /// Record a failed payment attempt; the order stays `pending`
    pub fn mark_payment_failed(
        &self,
        order_id: &str,
        actor: &Actor,
        reason: Option<&str>,
    ) -> OrderResult<MutationOutcome> {
        let outcome = self.manager.mutate(order_id, |order, now| {
            if order.payment_status != PaymentStatus::Pending {
                return Ok(Decision::Unchanged);
            }
            let mut change = StatusChange::payment(PaymentStatus::Failed, actor.clone());
            if let Some(reason) = reason {
                change = change.with_note(reason);
            }
            apply(order, change, now)?;
            Ok(Decision::Write(Effects::notify(vec![
                NotificationRequest::customer(NotificationKind::PaymentFailed, &order.order_id)
                    .with_payload(json!({ "reason": reason })),
            ])))
        })?;
        if outcome.changed {
            self.audit_change(actor, AuditAction::OrderPaymentFailed, &outcome);
        }
        Ok(outcome)
    }

    // ========================================================================
    // Fulfillment
    // ========================================================================

    /// Cancel an order, releasing its stock once
    ///
    /// Repeating the call on a cancelled order returns it unchanged. A paid
    /// order gets a pending full refund.
    pub fn cancel(
        &self,
        actor: &Actor,
        order_id: &str,
        reason: Option<String>,
    ) -> OrderResult<Order> {
        self.authorized(actor, order_id)?;
        let reason = reason.map(|r| r.trim().to_string()).filter(|r| !r.is_empty());

        let outcome = self.manager.mutate(order_id, |order, now| {
            if order.status == OrderStatus::Cancelled {
                return Ok(Decision::Unchanged);
            }
            let mut change = StatusChange::order(OrderStatus::Cancelled, actor.clone());
            if let Some(reason) = &reason {
                change = change.with_note(reason.clone());
            }
            apply(order, change, now)?;
            order.cancel_reason = reason.clone();
            Ok(Decision::Write(Effects::notify(both(
                NotificationKind::OrderCancelled,
                &order.order_id,
                json!({ "reason": reason }),
            ))))
        })?;

        if outcome.changed {
            self.audit_change(actor, AuditAction::OrderCancelled, &outcome);
        }
        if outcome.order.payment_status == PaymentStatus::Completed {
            self.refunds.open_full_refund_for(
                &outcome.order,
                RefundReason::Other,
                "Order cancelled after payment",
            )?;
        }
        Ok(outcome.order)
    }

    /// Admin status change along the state machine edges
    pub fn update_status(
        &self,
        actor: &Actor,
        order_id: &str,
        status: OrderStatus,
        note: Option<String>,
    ) -> OrderResult<Order> {
        if !actor.is_admin() {
            return Err(OrderError::admin_required("Order status update"));
        }
        if status == OrderStatus::Cancelled {
            return self.cancel(actor, order_id, note);
        }

        let outcome = self.manager.mutate(order_id, |order, now| {
            let from = order.status;
            let mut change = StatusChange::order(status, actor.clone());
            if let Some(note) = &note {
                change = change.with_note(note.clone());
            }
            apply(order, change, now)?;
            Ok(Decision::Write(Effects::notify(vec![
                NotificationRequest::customer(NotificationKind::OrderStatusChanged, &order.order_id)
                    .with_payload(json!({ "from": from, "to": status })),
            ])))
        })?;

        self.audit_change(actor, AuditAction::OrderStatusChanged, &outcome);
        Ok(outcome.order)
    }

    /// Tombstone a delivered or cancelled order
    pub fn archive(&self, actor: &Actor, order_id: &str) -> OrderResult<Order> {
        if !actor.is_admin() {
            return Err(OrderError::admin_required("Archiving an order"));
        }
        let outcome = self.manager.mutate(order_id, |order, _| {
            if order.is_archived() {
                return Ok(Decision::Unchanged);
            }
            if !order.status.is_terminal() {
                return Err(OrderError::conflict(
                    ErrorCode::InvalidTransition,
                    format!(
                        "Order {} is {}; only delivered or cancelled orders can be archived",
                        order.order_id, order.status
                    ),
                ));
            }
            order.record_state = RecordState::Archived;
            Ok(Decision::Write(Effects::default()))
        })?;
        if outcome.changed {
            self.audit_change(actor, AuditAction::OrderArchived, &outcome);
        }
        Ok(outcome.order)
    }

    // ========================================================================
    // Manual review
    // ========================================================================

    /// Flag an order after a dispute; no status changes
    pub fn flag_dispute(
        &self,
        order_id: &str,
        dispute_id: &str,
        reason: Option<&str>,
    ) -> OrderResult<MutationOutcome> {
        let actor = Actor::system();
        let outcome = self.manager.mutate(order_id, |order, now| {
            if order
                .manual_review
                .as_ref()
                .is_some_and(|review| review.dispute_id == dispute_id)
            {
                return Ok(Decision::Unchanged);
            }
            order.manual_review = Some(ManualReview {
                dispute_id: dispute_id.to_string(),
                reason: reason.map(str::to_string),
                flagged_at: now,
            });
            Ok(Decision::Write(Effects::notify(vec![
                NotificationRequest::admin(NotificationKind::DisputeOpened, &order.order_id)
                    .with_payload(json!({ "dispute_id": dispute_id, "reason": reason })),
            ])))
        })?;
        if outcome.changed {
            tracing::warn!(target: "payment", order_id, dispute_id, "Order flagged for manual review");
            self.audit_change(&actor, AuditAction::ManualReviewFlagged, &outcome);
        }
        Ok(outcome)
    }

    pub fn resolve_review(
        &self,
        actor: &Actor,
        order_id: &str,
        note: Option<String>,
    ) -> OrderResult<Order> {
        if !actor.is_admin() {
            return Err(OrderError::admin_required("Resolving a manual review"));
        }
        let outcome = self.manager.mutate(order_id, |order, _| {
            if order.manual_review.take().is_none() {
                return Err(OrderError::conflict(
                    ErrorCode::InvalidRequest,
                    format!("Order {} is not under manual review", order.order_id),
                ));
            }
            Ok(Decision::Write(Effects::default()))
        })?;

        let details = json!({
            "dispute": outcome.before.manual_review,
            "note": note,
        });
        self.audit.record(
            actor,
            AuditAction::ManualReviewResolved,
            "order",
            order_id,
            details,
        );
        Ok(outcome.order)
    }

    // ========================================================================
    // Inventory
    // ========================================================================

    pub fn stock(&self, product_id: &str) -> OrderResult<u64> {
        self.ledger.stock(product_id)?.ok_or_else(|| OrderError::NotFound {
            resource: "Product",
            id: product_id.to_string(),
        })
    }

    /// Admin stock take: overwrite the counter
    pub fn set_stock(&self, actor: &Actor, product_id: &str, quantity: u64) -> OrderResult<u64> {
        if !actor.is_admin() {
            return Err(OrderError::admin_required("Stock adjustment"));
        }
        let previous = self.ledger.set_stock(product_id, quantity)?;
        self.audit.record(
            actor,
            AuditAction::StockAdjusted,
            "product",
            product_id,
            json!({ "from": previous, "to": quantity }),
        );
        Ok(quantity)
    }

    fn audit_change(&self, actor: &Actor, action: AuditAction, outcome: &MutationOutcome) {
        self.audit.record_change(
            actor,
            action,
            "order",
            &outcome.order.order_id,
            &outcome.before,
            &outcome.order,
        );
    }
}
