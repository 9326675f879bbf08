//! Durable order snapshots with optimistic versioning
//!
//! Orders are stored as JSON snapshots keyed by order id. Every write goes
//! through [`OrderStore::update_in`], which checks the caller's expected
//! version against the stored one inside the same write transaction, so a
//! writer that read a stale snapshot always loses with
//! [`StorageError::VersionConflict`] instead of overwriting.

use redb::{ReadableTable, TableDefinition, WriteTransaction};
use shared::order::{Order, OrderStatus, RecordState};
use shared::util::format_order_id;

use crate::db::{Storage, StorageError, StorageResult};

/// Order snapshots: key = order_id, value = JSON-serialized Order
const ORDERS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("orders");

/// Per-customer index: key = (customer_id, order_id), value = empty
const CUSTOMER_ORDERS_TABLE: TableDefinition<(&str, &str), ()> =
    TableDefinition::new("customer_orders");

/// Gateway intent lookup: key = intent_id, value = order_id
const PAYMENT_INTENTS_TABLE: TableDefinition<&str, &str> = TableDefinition::new("payment_intents");

const ORDER_SEQUENCE: &str = "order";

/// Filter for [`OrderStore::list`]
#[derive(Debug, Clone, Default)]
pub struct OrderFilter {
    pub customer_id: Option<String>,
    pub status: Option<OrderStatus>,
    pub include_archived: bool,
}

#[derive(Clone)]
pub struct OrderStore {
    storage: Storage,
}

impl OrderStore {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    pub(crate) fn init_tables(txn: &WriteTransaction) -> StorageResult<()> {
        let _ = txn.open_table(ORDERS_TABLE)?;
        let _ = txn.open_table(CUSTOMER_ORDERS_TABLE)?;
        let _ = txn.open_table(PAYMENT_INTENTS_TABLE)?;
        Ok(())
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Allocate the next `ORD-xxxxx` id inside `txn`
    ///
    /// The counter only advances if the transaction commits.
    pub fn next_order_id(txn: &WriteTransaction) -> StorageResult<String> {
        Storage::next_sequence(txn, ORDER_SEQUENCE).map(format_order_id)
    }

    /// Insert a freshly created order
    pub fn insert_in(txn: &WriteTransaction, order: &Order) -> StorageResult<()> {
        let mut orders = txn.open_table(ORDERS_TABLE)?;
        if orders.get(order.order_id.as_str())?.is_some() {
            return Err(StorageError::VersionConflict {
                id: order.order_id.clone(),
                expected: 0,
                actual: order.version,
            });
        }
        let value = serde_json::to_vec(order)?;
        orders.insert(order.order_id.as_str(), value.as_slice())?;

        let mut by_customer = txn.open_table(CUSTOMER_ORDERS_TABLE)?;
        by_customer.insert((order.customer_id.as_str(), order.order_id.as_str()), ())?;
        Ok(())
    }

    pub fn get(&self, order_id: &str) -> StorageResult<Option<Order>> {
        let txn = self.storage.begin_read()?;
        let table = txn.open_table(ORDERS_TABLE)?;
        match table.get(order_id)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    /// Read an order inside an open write transaction
    pub fn get_in(txn: &WriteTransaction, order_id: &str) -> StorageResult<Option<Order>> {
        let table = txn.open_table(ORDERS_TABLE)?;
        match table.get(order_id)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    /// Write `order` if the stored version still equals `expected_version`
    pub fn update_in(
        txn: &WriteTransaction,
        order: &Order,
        expected_version: u64,
    ) -> StorageResult<()> {
        let mut table = txn.open_table(ORDERS_TABLE)?;
        let stored: Order = match table.get(order.order_id.as_str())? {
            Some(value) => serde_json::from_slice(value.value())?,
            None => return Err(StorageError::NotFound(order.order_id.clone())),
        };

        if stored.version != expected_version {
            return Err(StorageError::VersionConflict {
                id: order.order_id.clone(),
                expected: expected_version,
                actual: stored.version,
            });
        }

        let value = serde_json::to_vec(order)?;
        table.insert(order.order_id.as_str(), value.as_slice())?;
        Ok(())
    }

    /// Orders matching `filter`, newest first
    pub fn list(&self, filter: &OrderFilter) -> StorageResult<Vec<Order>> {
        let txn = self.storage.begin_read()?;
        let orders = txn.open_table(ORDERS_TABLE)?;

        let mut result = Vec::new();
        match filter.customer_id.as_deref() {
            Some(customer_id) => {
                let index = txn.open_table(CUSTOMER_ORDERS_TABLE)?;
                for entry in index.range((customer_id, "")..)? {
                    let (key, _) = entry?;
                    let (owner, order_id) = key.value();
                    if owner != customer_id {
                        break;
                    }
                    if let Some(value) = orders.get(order_id)? {
                        result.push(serde_json::from_slice::<Order>(value.value())?);
                    }
                }
            }
            None => {
                for entry in orders.iter()? {
                    let (_, value) = entry?;
                    result.push(serde_json::from_slice::<Order>(value.value())?);
                }
            }
        }

        result.retain(|order| {
            filter.status.is_none_or(|status| order.status == status)
                && (filter.include_archived || order.record_state == RecordState::Active)
        });
        result.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.order_id.cmp(&a.order_id))
        });
        Ok(result)
    }

    /// Map a gateway intent id to its order
    pub fn index_intent_in(
        txn: &WriteTransaction,
        intent_id: &str,
        order_id: &str,
    ) -> StorageResult<()> {
        let mut table = txn.open_table(PAYMENT_INTENTS_TABLE)?;
        table.insert(intent_id, order_id)?;
        Ok(())
    }

    pub fn find_by_intent(&self, intent_id: &str) -> StorageResult<Option<String>> {
        let txn = self.storage.begin_read()?;
        let table = txn.open_table(PAYMENT_INTENTS_TABLE)?;
        Ok(table.get(intent_id)?.map(|guard| guard.value().to_string()))
    }
}
