//! Refund workflow
//!
//! ```text
//! pending → approved → processing → completed
//!    └──→ rejected           └──→ failed
//! ```
//!
//! The refundable balance of an order is `final_amount` minus every refund
//! that is completed or still in flight. It is computed inside the write
//! transaction that inserts the new refund, so two concurrent requests can
//! never together exceed the amount paid.
//!
//! `processing` is committed before the gateway is called. The refund id is
//! the gateway idempotency key, so a refund whose gateway call ended in a
//! retryable error stays in `processing` and may be processed again without
//! paying out twice. Once the gateway has acknowledged the refund, a second
//! `process` fails on the state edge.
//!
//! A gateway `succeeded` report is authoritative: it completes a refund
//! even after it was marked `failed`.

use redb::WriteTransaction;
use serde::Deserialize;
use shared::error::ErrorCode;
use shared::order::{Actor, Money, Order, PaymentStatus, StockState};
use shared::refund::{
    Refund, RefundHistoryEntry, RefundReason, RefundStatus, RefundType, RestockLine, RestockState,
};
use shared::util::now_millis;
use std::sync::Arc;

use super::storage::RefundStore;
use crate::audit::{AuditAction, AuditService};
use crate::db::Storage;
use crate::inventory::{IdempotencyKey, InventoryLedger, LedgerOp};
use crate::notifications::{NotificationKind, NotificationRequest, Outbox};
use crate::orders::state_machine::{StatusChange, apply};
use crate::orders::{Decision, Effects, OrderError, OrderManager, OrderResult};
use crate::payments::{CreateRefundRequest, GatewayRefund, GatewayRefundStatus, PaymentGateway};

/// `POST /orders/{id}/refunds` body
#[derive(Debug, Clone, Deserialize)]
pub struct RefundRequest {
    /// Omitted: refund the whole outstanding balance
    pub amount: Option<Money>,
    pub reason: RefundReason,
    pub description: Option<String>,
    #[serde(default)]
    pub restock: Vec<RestockLine>,
}

/// Whether `from → to` is an edge of the refund state machine
pub fn can_transition_refund(from: RefundStatus, to: RefundStatus) -> bool {
    use RefundStatus::*;

    matches!(
        (from, to),
        (Pending, Approved)
            | (Pending, Rejected)
            | (Approved, Processing)
            | (Processing, Completed)
            | (Processing, Failed)
            | (Failed, Completed)
    )
}

fn advance(
    refund: &mut Refund,
    to: RefundStatus,
    actor: &Actor,
    note: Option<String>,
    now: i64,
) -> OrderResult<()> {
    if !can_transition_refund(refund.status, to) {
        return Err(OrderError::conflict(
            ErrorCode::InvalidTransition,
            format!(
                "Refund {} cannot move from {} to {}",
                refund.refund_id, refund.status, to
            ),
        ));
    }
    refund.status = to;
    refund.status_history.push(RefundHistoryEntry {
        status: to,
        timestamp: now,
        actor: actor.clone(),
        note,
    });
    refund.version += 1;
    refund.updated_at = now;
    Ok(())
}

/// `final_amount − Σ(completed + in-flight refunds)`
pub fn refundable_balance(order: &Order, refunds: &[Refund]) -> Money {
    let held: Money = refunds
        .iter()
        .filter(|r| r.status == RefundStatus::Completed || r.status.is_in_flight())
        .map(|r| r.amount)
        .sum();
    order.amounts.final_amount.saturating_sub(held)
}

fn notify(kind: NotificationKind, refund: &Refund) -> Vec<NotificationRequest> {
    let payload = serde_json::json!({ "amount": refund.amount, "status": refund.status });
    vec![
        NotificationRequest::customer(kind, &refund.order_id)
            .with_refund(&refund.refund_id)
            .with_payload(payload.clone()),
        NotificationRequest::admin(kind, &refund.order_id)
            .with_refund(&refund.refund_id)
            .with_payload(payload),
    ]
}

pub struct RefundWorkflow {
    store: RefundStore,
    orders: OrderManager,
    gateway: Arc<dyn PaymentGateway>,
    audit: Arc<AuditService>,
}

impl RefundWorkflow {
    pub fn new(
        storage: Storage,
        orders: OrderManager,
        gateway: Arc<dyn PaymentGateway>,
        audit: Arc<AuditService>,
    ) -> Self {
        Self {
            store: RefundStore::new(storage),
            orders,
            gateway,
            audit,
        }
    }

    pub fn get(&self, actor: &Actor, refund_id: &str) -> OrderResult<Refund> {
        let refund = self
            .store
            .get(refund_id)?
            .ok_or_else(|| OrderError::refund_not_found(refund_id))?;
        if !actor.is_admin() && !actor.is_system() {
            let order = self.orders.get(&refund.order_id)?;
            if !order.is_owned_by(actor) {
                return Err(OrderError::Forbidden("not your refund".to_string()));
            }
        }
        Ok(refund)
    }

    pub fn list_for_order(&self, actor: &Actor, order_id: &str) -> OrderResult<Vec<Refund>> {
        let order = self.orders.get(order_id)?;
        if !actor.is_admin() && !actor.is_system() && !order.is_owned_by(actor) {
            return Err(OrderError::Forbidden("not your order".to_string()));
        }
        Ok(self.store.list_for_order(order_id)?)
    }

    /// Open a refund against a paid order
    pub fn request(
        &self,
        actor: &Actor,
        order_id: &str,
        request: RefundRequest,
    ) -> OrderResult<Refund> {
        self.open(actor, order_id, request, false)?
            .ok_or_else(|| OrderError::validation("refund amount must be positive"))
    }

    /// With `skip_if_covered`, returns `None` instead of an error when the
    /// balance is already zero or a system refund is in flight or completed.
    /// Both checks read inside the write transaction that inserts the refund.
    fn open(
        &self,
        actor: &Actor,
        order_id: &str,
        request: RefundRequest,
        skip_if_covered: bool,
    ) -> OrderResult<Option<Refund>> {
        let order = self.orders.get(order_id)?;
        if !actor.is_admin() && !actor.is_system() && !order.is_owned_by(actor) {
            return Err(OrderError::Forbidden("not your order".to_string()));
        }
        match order.payment_status {
            PaymentStatus::Completed => {}
            PaymentStatus::Refunded => {
                return Err(OrderError::conflict(
                    ErrorCode::PaymentAlreadyRefunded,
                    format!("Order {} has already been refunded", order_id),
                ));
            }
            _ => {
                return Err(OrderError::conflict(
                    ErrorCode::PaymentNotCompleted,
                    format!("Order {} has not been paid", order_id),
                ));
            }
        }

        let description = request
            .description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
        if request.reason == RefundReason::Other && description.is_none() {
            return Err(OrderError::validation("a description is required for reason 'other'"));
        }
        self.check_restock(&order, &request.restock)?;

        let now = now_millis();
        let txn = self.store.storage().begin_write()?;
        let existing = RefundStore::list_for_order_in(&txn, order_id)?;
        let refundable = refundable_balance(&order, &existing);
        if skip_if_covered {
            let covered = existing.iter().any(|r| {
                r.requested_by.is_system()
                    && (r.status.is_in_flight() || r.status == RefundStatus::Completed)
            });
            if covered || refundable.is_zero() {
                tracing::debug!(order_id, "Automatic refund already open");
                return Ok(None);
            }
        }
        let amount = request.amount.unwrap_or(refundable);

        if amount.is_negative() || amount.is_zero() {
            return Err(OrderError::validation("refund amount must be positive"));
        }
        if amount > refundable {
            tracing::warn!(
                target: "payment",
                order_id,
                requested = %amount,
                refundable = %refundable,
                "Refund request exceeds refundable balance"
            );
            return Err(OrderError::conflict(
                ErrorCode::PaymentRefundExceedsAmount,
                format!(
                    "Refund of {} exceeds refundable balance of {}",
                    amount, refundable
                ),
            ));
        }

        let refund = Refund {
            refund_id: RefundStore::next_refund_id(&txn)?,
            order_id: order_id.to_string(),
            amount,
            refund_type: if amount == refundable {
                RefundType::Full
            } else {
                RefundType::Partial
            },
            reason: request.reason,
            description,
            status: RefundStatus::Pending,
            requested_by: actor.clone(),
            approved_by: None,
            approved_at: None,
            rejected_by: None,
            rejected_at: None,
            rejection_reason: None,
            processed_by: None,
            processed_at: None,
            completed_at: None,
            gateway_refund_id: None,
            failure_reason: None,
            admin_notes: None,
            restock_state: if request.restock.is_empty() {
                RestockState::NotRequested
            } else {
                RestockState::Pending
            },
            restock: request.restock,
            status_history: vec![RefundHistoryEntry {
                status: RefundStatus::Pending,
                timestamp: now,
                actor: actor.clone(),
                note: None,
            }],
            version: 1,
            created_at: now,
            updated_at: now,
        };

        RefundStore::insert_in(&txn, &refund)?;
        Outbox::enqueue_in(&txn, &notify(NotificationKind::RefundRequested, &refund), now)?;
        txn.commit()?;

        tracing::info!(
            target: "payment",
            refund_id = %refund.refund_id,
            order_id,
            amount = %refund.amount,
            refund_type = ?refund.refund_type,
            actor = %actor,
            "Refund requested"
        );
        self.audit.record_snapshot(
            actor,
            AuditAction::RefundRequested,
            "refund",
            &refund.refund_id,
            &refund,
        );
        Ok(Some(refund))
    }

    fn check_restock(&self, order: &Order, lines: &[RestockLine]) -> OrderResult<()> {
        if lines.is_empty() {
            return Ok(());
        }
        if order.stock_state == StockState::Released {
            return Err(OrderError::validation(
                "stock for this order has already been released",
            ));
        }
        for line in lines {
            let ordered = order.quantity_of(&line.product_id);
            if line.quantity == 0 || line.quantity > ordered {
                return Err(OrderError::validation(format!(
                    "restock quantity for {} must be between 1 and {}",
                    line.product_id, ordered
                )));
            }
        }
        Ok(())
    }

    /// Open a system-requested full refund unless one is already open or done
    ///
    /// Used for late payments on cancelled orders and for cancelling paid
    /// orders. Returns `None` when nothing was opened.
    pub fn open_full_refund_for(
        &self,
        order: &Order,
        reason: RefundReason,
        description: &str,
    ) -> OrderResult<Option<Refund>> {
        let request = RefundRequest {
            amount: None,
            reason,
            description: Some(description.to_string()),
            restock: vec![],
        };
        self.open(&Actor::system(), &order.order_id, request, true)
    }

    pub fn approve(
        &self,
        actor: &Actor,
        refund_id: &str,
        notes: Option<String>,
    ) -> OrderResult<Refund> {
        require_admin(actor, "Refund approval")?;
        let (before, after) = self.transition(refund_id, |_, refund, now| {
            advance(refund, RefundStatus::Approved, actor, notes.clone(), now)?;
            refund.approved_by = Some(actor.clone());
            refund.approved_at = Some(now);
            if notes.is_some() {
                refund.admin_notes = notes.clone();
            }
            Ok(Some(notify(NotificationKind::RefundApproved, refund)))
        })?;
        self.audit.record_change(
            actor,
            AuditAction::RefundApproved,
            "refund",
            refund_id,
            &before,
            &after,
        );
        Ok(after)
    }

    pub fn reject(&self, actor: &Actor, refund_id: &str, reason: String) -> OrderResult<Refund> {
        require_admin(actor, "Refund rejection")?;
        let reason = reason.trim().to_string();
        if reason.is_empty() {
            return Err(OrderError::validation("a rejection reason is required"));
        }
        let (before, after) = self.transition(refund_id, |_, refund, now| {
            advance(refund, RefundStatus::Rejected, actor, Some(reason.clone()), now)?;
            refund.rejected_by = Some(actor.clone());
            refund.rejected_at = Some(now);
            refund.rejection_reason = Some(reason.clone());
            Ok(Some(notify(NotificationKind::RefundRejected, refund)))
        })?;
        self.audit.record_change(
            actor,
            AuditAction::RefundRejected,
            "refund",
            refund_id,
            &before,
            &after,
        );
        Ok(after)
    }

    /// Move an approved refund to `processing` and ask the gateway to pay it out
    pub async fn process(&self, actor: &Actor, refund_id: &str) -> OrderResult<Refund> {
        require_admin(actor, "Refund processing")?;
        let refund = self
            .store
            .get(refund_id)?
            .ok_or_else(|| OrderError::refund_not_found(refund_id))?;
        let order = self.orders.get(&refund.order_id)?;
        let payment_intent_id = order.payment_intent_id.clone().ok_or_else(|| {
            OrderError::conflict(
                ErrorCode::PaymentFailed,
                format!(
                    "Order {} has no gateway payment to refund; settle it in store",
                    order.order_id
                ),
            )
        })?;

        let (before, processing) = self.transition(refund_id, |_, refund, now| {
            // Unacknowledged by the gateway: resend under the same key
            if refund.status == RefundStatus::Processing && refund.gateway_refund_id.is_none() {
                return Ok(None);
            }
            advance(refund, RefundStatus::Processing, actor, None, now)?;
            refund.processed_by = Some(actor.clone());
            refund.processed_at = Some(now);
            Ok(Some(vec![]))
        })?;
        if before.status == RefundStatus::Processing {
            tracing::info!(target: "payment", refund_id, "Resending unacknowledged gateway refund");
        } else {
            self.audit.record_change(
                actor,
                AuditAction::RefundProcessed,
                "refund",
                refund_id,
                &before,
                &processing,
            );
        }

        let request = CreateRefundRequest {
            refund_id: refund_id.to_string(),
            payment_intent_id,
            amount: processing.amount,
            idempotency_key: refund_id.to_string(),
        };
        match self.gateway.create_refund(&request).await {
            Ok(gateway_refund) => {
                tracing::info!(
                    target: "payment",
                    refund_id,
                    gateway_refund_id = %gateway_refund.id,
                    status = ?gateway_refund.status,
                    "Gateway refund created"
                );
                self.apply_gateway_refund(refund_id, &gateway_refund, actor)
            }
            Err(e) if e.is_retryable() => {
                // The gateway may have paid out; only its report can settle this
                tracing::warn!(
                    target: "payment",
                    refund_id,
                    correlation_id = %e.correlation_id,
                    error = %e,
                    "Gateway refund outcome unknown, refund left processing"
                );
                Err(e.into())
            }
            Err(e) => {
                tracing::error!(
                    target: "payment",
                    refund_id,
                    correlation_id = %e.correlation_id,
                    error = %e,
                    "Gateway refund failed"
                );
                self.fail(refund_id, &e.message, actor)?;
                Err(e.into())
            }
        }
    }

    /// Apply a gateway refund state reported by a webhook
    ///
    /// `refund_hint` is the `metadata.refund_id` of the event, used when the
    /// gateway id was never stored. Unknown refunds return `None`.
    pub fn on_gateway_refund_update(
        &self,
        gateway_refund: &GatewayRefund,
        refund_hint: Option<&str>,
    ) -> OrderResult<Option<Refund>> {
        let refund_id = match self.store.find_by_gateway(&gateway_refund.id)? {
            Some(id) => id,
            None => match refund_hint {
                Some(id) => id.to_string(),
                None => return Ok(None),
            },
        };
        if self.store.get(&refund_id)?.is_none() {
            return Ok(None);
        }
        self.apply_gateway_refund(&refund_id, gateway_refund, &Actor::system())
            .map(Some)
    }

    fn apply_gateway_refund(
        &self,
        refund_id: &str,
        gateway_refund: &GatewayRefund,
        actor: &Actor,
    ) -> OrderResult<Refund> {
        match gateway_refund.status {
            GatewayRefundStatus::Succeeded => self.complete(refund_id, &gateway_refund.id, actor),
            GatewayRefundStatus::Failed | GatewayRefundStatus::Canceled => {
                let reason = gateway_refund
                    .failure_reason
                    .as_deref()
                    .unwrap_or("refund declined by payment provider");
                self.record_gateway_id(refund_id, &gateway_refund.id)?;
                self.fail(refund_id, reason, actor)
            }
            GatewayRefundStatus::Pending
            | GatewayRefundStatus::RequiresAction
            | GatewayRefundStatus::Unknown => self.record_gateway_id(refund_id, &gateway_refund.id),
        }
    }

    fn record_gateway_id(&self, refund_id: &str, gateway_refund_id: &str) -> OrderResult<Refund> {
        let (_, after) = self.transition(refund_id, |txn, refund, now| {
            if refund.gateway_refund_id.as_deref() == Some(gateway_refund_id) {
                return Ok(None);
            }
            refund.gateway_refund_id = Some(gateway_refund_id.to_string());
            refund.version += 1;
            refund.updated_at = now;
            RefundStore::index_gateway_in(txn, gateway_refund_id, refund_id)?;
            Ok(Some(vec![]))
        })?;
        Ok(after)
    }

    /// `processing | failed → completed`, releasing restock lines once
    fn complete(
        &self,
        refund_id: &str,
        gateway_refund_id: &str,
        actor: &Actor,
    ) -> OrderResult<Refund> {
        let (before, after) = self.transition(refund_id, |txn, refund, now| {
            if refund.status == RefundStatus::Completed {
                return Ok(None);
            }
            advance(refund, RefundStatus::Completed, actor, None, now)?;
            refund.completed_at = Some(now);
            refund.gateway_refund_id = Some(gateway_refund_id.to_string());
            RefundStore::index_gateway_in(txn, gateway_refund_id, refund_id)?;

            if refund.restock_state == RestockState::Pending {
                for line in &refund.restock {
                    let key =
                        IdempotencyKey::new(&refund.refund_id, LedgerOp::Release, &line.product_id);
                    InventoryLedger::release_in(
                        txn,
                        &key,
                        &line.product_id,
                        u64::from(line.quantity),
                    )?;
                }
                refund.restock_state = RestockState::Released;
            }
            Ok(Some(notify(NotificationKind::RefundCompleted, refund)))
        })?;

        if before.status == RefundStatus::Completed {
            return Ok(after);
        }
        if before.status == RefundStatus::Failed {
            tracing::warn!(
                target: "payment",
                refund_id,
                gateway_refund_id,
                "Gateway reports a failed refund as paid out"
            );
        }

        tracing::info!(
            target: "payment",
            refund_id,
            order_id = %after.order_id,
            amount = %after.amount,
            gateway_refund_id,
            "Refund completed"
        );
        self.audit.record_change(
            actor,
            AuditAction::RefundCompleted,
            "refund",
            refund_id,
            &before,
            &after,
        );
        self.settle_order(&after.order_id, actor)?;
        Ok(after)
    }

    fn fail(&self, refund_id: &str, reason: &str, actor: &Actor) -> OrderResult<Refund> {
        let (before, after) = self.transition(refund_id, |_, refund, now| {
            if refund.status == RefundStatus::Failed {
                return Ok(None);
            }
            advance(refund, RefundStatus::Failed, actor, Some(reason.to_string()), now)?;
            refund.failure_reason = Some(reason.to_string());
            Ok(Some(notify(NotificationKind::RefundFailed, refund)))
        })?;
        if before.status != RefundStatus::Failed {
            tracing::warn!(target: "payment", refund_id, reason, "Refund failed");
            self.audit.record_change(
                actor,
                AuditAction::RefundFailed,
                "refund",
                refund_id,
                &before,
                &after,
            );
        }
        Ok(after)
    }

    /// Move the order's payment to `refunded` once completed refunds cover it
    fn settle_order(&self, order_id: &str, actor: &Actor) -> OrderResult<()> {
        let completed: Money = self
            .store
            .list_for_order(order_id)?
            .iter()
            .filter(|r| r.status == RefundStatus::Completed)
            .map(|r| r.amount)
            .sum();

        let result = self.orders.mutate(order_id, |order, now| {
            if order.payment_status != PaymentStatus::Completed
                || completed < order.amounts.final_amount
            {
                return Ok(Decision::Unchanged);
            }
            apply(
                order,
                StatusChange::payment(PaymentStatus::Refunded, actor.clone())
                    .with_note("Fully refunded"),
                now,
            )?;
            Ok(Decision::Write(Effects::default()))
        });

        match result {
            Ok(outcome) if outcome.changed => {
                self.audit.record_change(
                    actor,
                    AuditAction::OrderStatusChanged,
                    "order",
                    order_id,
                    &outcome.before,
                    &outcome.order,
                );
                Ok(())
            }
            Ok(_) => Ok(()),
            Err(OrderError::Conflict {
                code: ErrorCode::OrderArchived,
                ..
            }) => {
                tracing::warn!(order_id, "Order archived, payment status left as completed");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Read-modify-write one refund inside a single write transaction
    ///
    /// `decide` returns `None` to leave the refund unchanged.
    fn transition<F>(&self, refund_id: &str, decide: F) -> OrderResult<(Refund, Refund)>
    where
        F: FnOnce(&WriteTransaction, &mut Refund, i64) -> OrderResult<Option<Vec<NotificationRequest>>>,
    {
        let now = now_millis();
        let txn = self.store.storage().begin_write()?;
        let before = RefundStore::get_in(&txn, refund_id)?
            .ok_or_else(|| OrderError::refund_not_found(refund_id))?;
        let mut after = before.clone();

        let notifications = match decide(&txn, &mut after, now) {
            Ok(Some(notifications)) => notifications,
            Ok(None) => return Ok((before, after)),
            Err(e) => {
                tracing::warn!(
                    refund_id,
                    status = %before.status,
                    error = %e,
                    "Refund change rejected"
                );
                return Err(e);
            }
        };

        RefundStore::update_in(&txn, &after, before.version)?;
        Outbox::enqueue_in(&txn, &notifications, now)?;
        txn.commit()?;

        tracing::info!(
            refund_id,
            from = %before.status,
            to = %after.status,
            version = after.version,
            "Refund updated"
        );
        Ok((before, after))
    }
}

fn require_admin(actor: &Actor, action: &str) -> OrderResult<()> {
    if actor.is_admin() {
        Ok(())
    } else {
        Err(OrderError::admin_required(action))
    }
}
