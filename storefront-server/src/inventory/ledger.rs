//! Per-product stock counters with idempotent reserve/release
//!
//! A reservation is a compare-and-swap on the stock counter executed inside a
//! redb write transaction: the check `stock >= qty` and the decrement happen
//! in the same serialized transaction, so two concurrent reservations for the
//! last unit can never both succeed.
//!
//! Every operation carries an [`IdempotencyKey`]. The key is recorded in the
//! same transaction as the counter change; replaying a key returns the
//! original result without touching stock again.

use redb::{ReadableTable, TableDefinition, WriteTransaction};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::db::{Storage, StorageError, StorageResult};

/// Stock counters: key = product_id, value = units on hand
const STOCK_TABLE: TableDefinition<&str, u64> = TableDefinition::new("stock");

/// Applied operations: key = idempotency key, value = quantity applied
const OPERATIONS_TABLE: TableDefinition<&str, u64> = TableDefinition::new("ledger_operations");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerOp {
    Reserve,
    Release,
}

impl LedgerOp {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Reserve => "reserve",
            Self::Release => "release",
        }
    }
}

/// `owner:operation:product`, e.g. `ORD-00001:reserve:rose-bouquet`
///
/// The owner is the order id for checkout and cancellation, or the refund id
/// for a refund restock.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub fn new(owner_id: &str, op: LedgerOp, product_id: &str) -> Self {
        Self(format!("{}:{}:{}", owner_id, op.as_str(), product_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outcome of a reserve or release
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockMovement {
    pub product_id: String,
    pub quantity: u64,
    /// Stock on hand after the movement
    pub remaining: u64,
    /// The key had already been applied; nothing changed
    pub replayed: bool,
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Insufficient stock for {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: String,
        requested: u64,
        available: u64,
    },

    #[error("Quantity must be positive")]
    ZeroQuantity,

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<redb::StorageError> for LedgerError {
    fn from(e: redb::StorageError) -> Self {
        Self::Storage(e.into())
    }
}

impl From<redb::TableError> for LedgerError {
    fn from(e: redb::TableError) -> Self {
        Self::Storage(e.into())
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Inventory ledger over the shared engine database
#[derive(Clone)]
pub struct InventoryLedger {
    storage: Storage,
}

impl InventoryLedger {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    pub(crate) fn init_tables(txn: &WriteTransaction) -> StorageResult<()> {
        let _ = txn.open_table(STOCK_TABLE)?;
        let _ = txn.open_table(OPERATIONS_TABLE)?;
        Ok(())
    }

    /// Current stock, `None` if the product has never been stocked
    pub fn stock(&self, product_id: &str) -> StorageResult<Option<u64>> {
        let txn = self.storage.begin_read()?;
        let table = txn.open_table(STOCK_TABLE)?;
        Ok(table.get(product_id)?.map(|guard| guard.value()))
    }

    /// Overwrite the stock counter (admin stock take), returns the previous value
    pub fn set_stock(&self, product_id: &str, quantity: u64) -> StorageResult<Option<u64>> {
        let txn = self.storage.begin_write()?;
        let previous = {
            let mut table = txn.open_table(STOCK_TABLE)?;
            let previous = table.get(product_id)?.map(|guard| guard.value());
            table.insert(product_id, quantity)?;
            previous
        };
        txn.commit()?;
        tracing::info!(product_id, quantity, ?previous, "Stock level set");
        Ok(previous)
    }

    /// Reserve `quantity` units in its own transaction
    pub fn reserve(
        &self,
        key: &IdempotencyKey,
        product_id: &str,
        quantity: u64,
    ) -> LedgerResult<StockMovement> {
        let txn = self.storage.begin_write()?;
        let movement = Self::reserve_in(&txn, key, product_id, quantity)?;
        txn.commit().map_err(StorageError::from)?;
        Ok(movement)
    }

    /// Release `quantity` units in its own transaction
    pub fn release(
        &self,
        key: &IdempotencyKey,
        product_id: &str,
        quantity: u64,
    ) -> LedgerResult<StockMovement> {
        let txn = self.storage.begin_write()?;
        let movement = Self::release_in(&txn, key, product_id, quantity)?;
        txn.commit().map_err(StorageError::from)?;
        Ok(movement)
    }

    /// Conditional decrement inside an open write transaction
    ///
    /// On `InsufficientStock` the caller must drop the transaction so that
    /// earlier movements in the same batch are rolled back.
    pub fn reserve_in(
        txn: &WriteTransaction,
        key: &IdempotencyKey,
        product_id: &str,
        quantity: u64,
    ) -> LedgerResult<StockMovement> {
        if quantity == 0 {
            return Err(LedgerError::ZeroQuantity);
        }

        let mut operations = txn.open_table(OPERATIONS_TABLE)?;
        let mut stock = txn.open_table(STOCK_TABLE)?;
        let available = stock.get(product_id)?.map(|guard| guard.value()).unwrap_or(0);

        if let Some(applied) = operations.get(key.as_str())?.map(|guard| guard.value()) {
            tracing::debug!(key = %key, "Reservation replayed");
            return Ok(StockMovement {
                product_id: product_id.to_string(),
                quantity: applied,
                remaining: available,
                replayed: true,
            });
        }

        if available < quantity {
            return Err(LedgerError::InsufficientStock {
                product_id: product_id.to_string(),
                requested: quantity,
                available,
            });
        }

        let remaining = available - quantity;
        stock.insert(product_id, remaining)?;
        operations.insert(key.as_str(), quantity)?;

        Ok(StockMovement {
            product_id: product_id.to_string(),
            quantity,
            remaining,
            replayed: false,
        })
    }

    /// Increment inside an open write transaction
    pub fn release_in(
        txn: &WriteTransaction,
        key: &IdempotencyKey,
        product_id: &str,
        quantity: u64,
    ) -> LedgerResult<StockMovement> {
        if quantity == 0 {
            return Err(LedgerError::ZeroQuantity);
        }

        let mut operations = txn.open_table(OPERATIONS_TABLE)?;
        let mut stock = txn.open_table(STOCK_TABLE)?;
        let available = stock.get(product_id)?.map(|guard| guard.value()).unwrap_or(0);

        if let Some(applied) = operations.get(key.as_str())?.map(|guard| guard.value()) {
            tracing::debug!(key = %key, "Release replayed");
            return Ok(StockMovement {
                product_id: product_id.to_string(),
                quantity: applied,
                remaining: available,
                replayed: true,
            });
        }

        let remaining = available.saturating_add(quantity);
        stock.insert(product_id, remaining)?;
        operations.insert(key.as_str(), quantity)?;

        Ok(StockMovement {
            product_id: product_id.to_string(),
            quantity,
            remaining,
            replayed: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ledger() -> InventoryLedger {
        InventoryLedger::new(Storage::open_in_memory().unwrap())
    }

    #[test]
    fn test_reserve_decrements_stock() {
        let ledger = ledger();
        ledger.set_stock("rose", 5).unwrap();

        let key = IdempotencyKey::new("ORD-00001", LedgerOp::Reserve, "rose");
        let movement = ledger.reserve(&key, "rose", 2).unwrap();

        assert_eq!(movement.remaining, 3);
        assert!(!movement.replayed);
        assert_eq!(ledger.stock("rose").unwrap(), Some(3));
    }

    #[test]
    fn test_reserve_rejects_when_short() {
        let ledger = ledger();
        ledger.set_stock("rose", 1).unwrap();

        let key = IdempotencyKey::new("ORD-00001", LedgerOp::Reserve, "rose");
        let err = ledger.reserve(&key, "rose", 2).unwrap_err();

        match err {
            LedgerError::InsufficientStock {
                requested,
                available,
                ..
            } => {
                assert_eq!(requested, 2);
                assert_eq!(available, 1);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(ledger.stock("rose").unwrap(), Some(1));
    }

    #[test]
    fn test_unknown_product_has_no_stock() {
        let ledger = ledger();
        let key = IdempotencyKey::new("ORD-00001", LedgerOp::Reserve, "ghost");
        assert!(matches!(
            ledger.reserve(&key, "ghost", 1),
            Err(LedgerError::InsufficientStock { available: 0, .. })
        ));
        assert_eq!(ledger.stock("ghost").unwrap(), None);
    }

    #[test]
    fn test_replayed_key_applies_once() {
        let ledger = ledger();
        ledger.set_stock("tulip", 10).unwrap();

        let reserve = IdempotencyKey::new("ORD-00007", LedgerOp::Reserve, "tulip");
        ledger.reserve(&reserve, "tulip", 4).unwrap();
        let again = ledger.reserve(&reserve, "tulip", 4).unwrap();
        assert!(again.replayed);
        assert_eq!(ledger.stock("tulip").unwrap(), Some(6));

        let release = IdempotencyKey::new("ORD-00007", LedgerOp::Release, "tulip");
        ledger.release(&release, "tulip", 4).unwrap();
        ledger.release(&release, "tulip", 4).unwrap();
        assert_eq!(ledger.stock("tulip").unwrap(), Some(10));
    }

    #[test]
    fn test_failed_batch_rolls_back() {
        let ledger = ledger();
        ledger.set_stock("rose", 3).unwrap();
        ledger.set_stock("lily", 0).unwrap();

        {
            let txn = ledger.storage.begin_write().unwrap();
            let k1 = IdempotencyKey::new("ORD-00002", LedgerOp::Reserve, "rose");
            InventoryLedger::reserve_in(&txn, &k1, "rose", 2).unwrap();
            let k2 = IdempotencyKey::new("ORD-00002", LedgerOp::Reserve, "lily");
            assert!(InventoryLedger::reserve_in(&txn, &k2, "lily", 1).is_err());
            // transaction dropped
        }

        assert_eq!(ledger.stock("rose").unwrap(), Some(3));
    }

    #[test]
    fn test_concurrent_reservations_never_oversell() {
        let ledger = ledger();
        ledger.set_stock("peony", 5).unwrap();
        let successes = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..10)
            .map(|i| {
                let ledger = ledger.clone();
                let successes = successes.clone();
                std::thread::spawn(move || {
                    let owner = format!("ORD-{:05}", i + 1);
                    let key = IdempotencyKey::new(&owner, LedgerOp::Reserve, "peony");
                    if ledger.reserve(&key, "peony", 1).is_ok() {
                        successes.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(successes.load(Ordering::SeqCst), 5);
        assert_eq!(ledger.stock("peony").unwrap(), Some(0));
    }
}
