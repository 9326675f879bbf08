//! Order engine
//!
//! [`OrderManager`] is the only writer of order snapshots. Every change goes
//! through [`OrderManager::mutate`]:
//!
//! 1. read the current snapshot
//! 2. run the caller's `decide` closure on a copy
//! 3. in one write transaction: release stock if the order just became
//!    cancelled, write the copy with the read version as precondition,
//!    index the payment intent, enqueue notifications
//!
//! A version mismatch re-runs the whole cycle once against the fresh
//! snapshot, so the loser of a race re-decides instead of replaying its
//! original intent. A second mismatch is returned to the caller.

use shared::order::{Order, OrderStatus, StockState};
use shared::util::now_millis;

use super::storage::{OrderFilter, OrderStore};
use super::{OrderError, OrderResult};
use crate::db::Storage;
use crate::inventory::{IdempotencyKey, InventoryLedger, LedgerOp};
use crate::notifications::{NotificationRequest, Outbox};

/// Re-reads allowed after a version conflict
const MAX_CONFLICT_RETRIES: u32 = 1;

/// What a `decide` closure wants written
#[derive(Debug, Default)]
pub struct Effects {
    pub notifications: Vec<NotificationRequest>,
    /// Gateway intent id to index for webhook lookup
    pub index_intent: Option<String>,
}

impl Effects {
    pub fn notify(notifications: Vec<NotificationRequest>) -> Self {
        Self {
            notifications,
            index_intent: None,
        }
    }
}

#[derive(Debug)]
pub enum Decision {
    /// Already in the requested state; nothing is written
    Unchanged,
    Write(Effects),
}

/// Result of [`OrderManager::mutate`]
#[derive(Debug, Clone)]
pub struct MutationOutcome {
    pub before: Order,
    pub order: Order,
    pub changed: bool,
}

#[derive(Clone)]
pub struct OrderManager {
    store: OrderStore,
}

impl OrderManager {
    pub fn new(storage: Storage) -> Self {
        Self {
            store: OrderStore::new(storage),
        }
    }

    pub fn get(&self, order_id: &str) -> OrderResult<Order> {
        self.store
            .get(order_id)?
            .ok_or_else(|| OrderError::order_not_found(order_id))
    }

    pub fn list(&self, filter: &OrderFilter) -> OrderResult<Vec<Order>> {
        Ok(self.store.list(filter)?)
    }

    pub fn find_by_intent(&self, intent_id: &str) -> OrderResult<Option<String>> {
        Ok(self.store.find_by_intent(intent_id)?)
    }

    /// Insert a new order, reserving stock for every line in the same transaction
    ///
    /// `build` receives the allocated id and the creation time. If any line
    /// cannot be reserved nothing is written and no id is consumed.
    pub fn create<F>(&self, build: F) -> OrderResult<Order>
    where
        F: FnOnce(String, i64) -> (Order, Vec<NotificationRequest>),
    {
        let now = now_millis();
        let txn = self.store.storage().begin_write()?;
        let order_id = OrderStore::next_order_id(&txn)?;
        let (order, notifications) = build(order_id, now);

        for item in &order.items {
            let key = IdempotencyKey::new(&order.order_id, LedgerOp::Reserve, &item.product_id);
            let movement = InventoryLedger::reserve_in(
                &txn,
                &key,
                &item.product_id,
                u64::from(item.quantity),
            )?;
            tracing::debug!(
                order_id = %order.order_id,
                product_id = %movement.product_id,
                quantity = movement.quantity,
                remaining = movement.remaining,
                "Stock reserved"
            );
        }

        OrderStore::insert_in(&txn, &order)?;
        Outbox::enqueue_in(&txn, &notifications, now)?;
        txn.commit()?;

        tracing::info!(
            order_id = %order.order_id,
            customer_id = %order.customer_id,
            final_amount = %order.amounts.final_amount,
            items = order.items.len(),
            "Order created"
        );
        Ok(order)
    }

    /// Read-decide-write with optimistic concurrency
    pub fn mutate<F>(&self, order_id: &str, mut decide: F) -> OrderResult<MutationOutcome>
    where
        F: FnMut(&mut Order, i64) -> OrderResult<Decision>,
    {
        let mut attempt = 0;
        loop {
            let before = self.get(order_id)?;
            let mut after = before.clone();
            let now = now_millis();

            let effects = match decide(&mut after, now) {
                Ok(Decision::Unchanged) => {
                    tracing::debug!(order_id, status = %before.status, "Order already in requested state");
                    return Ok(MutationOutcome {
                        order: before.clone(),
                        before,
                        changed: false,
                    });
                }
                Ok(Decision::Write(effects)) => effects,
                Err(e) => {
                    tracing::warn!(
                        order_id,
                        status = %before.status,
                        payment_status = %before.payment_status,
                        version = before.version,
                        error = %e,
                        "Order change rejected"
                    );
                    return Err(e);
                }
            };

            if after.version == before.version {
                after.version += 1;
                after.updated_at = now;
            }

            match self.commit(&before, &mut after, &effects, now) {
                Ok(()) => {
                    tracing::info!(
                        order_id,
                        from = %before.status,
                        to = %after.status,
                        payment_from = %before.payment_status,
                        payment_to = %after.payment_status,
                        version = after.version,
                        "Order updated"
                    );
                    return Ok(MutationOutcome {
                        before,
                        order: after,
                        changed: true,
                    });
                }
                Err(e) if e.is_version_conflict() && attempt < MAX_CONFLICT_RETRIES => {
                    attempt += 1;
                    tracing::warn!(order_id, version = before.version, attempt, "Order version conflict, re-reading");
                }
                Err(e) if e.is_version_conflict() => {
                    tracing::error!(order_id, version = before.version, "Order version conflict persisted after retry");
                    return Err(OrderError::VersionConflict {
                        resource: "Order",
                        id: order_id.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn commit(
        &self,
        before: &Order,
        after: &mut Order,
        effects: &Effects,
        now: i64,
    ) -> OrderResult<()> {
        let txn = self.store.storage().begin_write()?;

        if after.status == OrderStatus::Cancelled && after.stock_state == StockState::Reserved {
            for item in &after.items {
                let key =
                    IdempotencyKey::new(&after.order_id, LedgerOp::Release, &item.product_id);
                let movement = InventoryLedger::release_in(
                    &txn,
                    &key,
                    &item.product_id,
                    u64::from(item.quantity),
                )?;
                tracing::debug!(
                    order_id = %after.order_id,
                    product_id = %movement.product_id,
                    quantity = movement.quantity,
                    replayed = movement.replayed,
                    "Stock released"
                );
            }
            after.stock_state = StockState::Released;
        }

        OrderStore::update_in(&txn, after, before.version)?;
        if let Some(intent_id) = &effects.index_intent {
            OrderStore::index_intent_in(&txn, intent_id, &after.order_id)?;
        }
        Outbox::enqueue_in(&txn, &effects.notifications, now)?;
        txn.commit()?;
        Ok(())
    }
}
