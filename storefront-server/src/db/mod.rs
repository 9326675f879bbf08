//! redb-backed storage shared by every engine component
//!
//! One embedded database holds all tables. Each component owns its table
//! definitions and receives a cheap [`Storage`] clone. Multi-table changes
//! (order snapshot + stock release + outbox rows) commit in a single
//! write transaction.
//!
//! # Tables
//!
//! | Table | Owner | Key | Value |
//! |-------|-------|-----|-------|
//! | `orders` | `OrderStore` | `order_id` | JSON `Order` |
//! | `customer_orders` | `OrderStore` | `(customer_id, order_id)` | `()` |
//! | `payment_intents` | `OrderStore` | `intent_id` | `order_id` |
//! | `stock` | `InventoryLedger` | `product_id` | `u64` |
//! | `ledger_operations` | `InventoryLedger` | idempotency key | `u64` quantity |
//! | `refunds` | `RefundStore` | `refund_id` | JSON `Refund` |
//! | `order_refunds` | `RefundStore` | `(order_id, refund_id)` | `()` |
//! | `gateway_refunds` | `RefundStore` | gateway refund id | `refund_id` |
//! | `processed_webhooks` | `WebhookStore` | `event_id` | JSON `ProcessedEvent` |
//! | `audit_log` | `AuditStorage` | `sequence` | JSON `AuditEntry` |
//! | `outbox` | `Outbox` | `sequence` | JSON `OutboxEntry` |
//! | `outbox_dead_letter` | `Outbox` | `sequence` | JSON `OutboxEntry` |
//! | `sequence_counter` | shared | name | `u64` |
//!
//! # Durability
//!
//! redb commits with `Durability::Immediate`: once `commit()` returns the
//! change survives a crash. Write transactions are serialized by redb, which
//! is what makes the stock compare-and-swap and the order version check
//! atomic.

use redb::{
    Database, ReadTransaction, ReadableDatabase, ReadableTable, TableDefinition, WriteTransaction,
};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use crate::audit::AuditStorage;
use crate::inventory::InventoryLedger;
use crate::notifications::Outbox;
use crate::orders::OrderStore;
use crate::refunds::RefundStore;
use crate::webhooks::WebhookStore;

/// Named monotonic counters: key = counter name, value = last issued number
const SEQUENCE_TABLE: TableDefinition<&str, u64> = TableDefinition::new("sequence_counter");

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("Storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Version conflict on {id}: expected {expected}, found {actual}")]
    VersionConflict {
        id: String,
        expected: u64,
        actual: u64,
    },

    #[error("Record not found: {0}")]
    NotFound(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Handle to the engine database
#[derive(Clone)]
pub struct Storage {
    db: Arc<Database>,
}

impl Storage {
    /// Open or create the database file at `path`
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let db = Database::create(path)?;
        Self::init(db)
    }

    /// Open an in-memory database (tests and local tooling)
    pub fn open_in_memory() -> StorageResult<Self> {
        let db = Database::builder().create_with_backend(redb::backends::InMemoryBackend::new())?;
        Self::init(db)
    }

    fn init(db: Database) -> StorageResult<Self> {
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(SEQUENCE_TABLE)?;
        }
        OrderStore::init_tables(&write_txn)?;
        InventoryLedger::init_tables(&write_txn)?;
        RefundStore::init_tables(&write_txn)?;
        WebhookStore::init_tables(&write_txn)?;
        AuditStorage::init_tables(&write_txn)?;
        Outbox::init_tables(&write_txn)?;
        write_txn.commit()?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Begin a write transaction
    pub fn begin_write(&self) -> StorageResult<WriteTransaction> {
        Ok(self.db.begin_write()?)
    }

    /// Begin a read transaction
    pub fn begin_read(&self) -> StorageResult<ReadTransaction> {
        Ok(self.db.begin_read()?)
    }

    /// Increment the named counter inside `txn` and return the new value
    pub fn next_sequence(txn: &WriteTransaction, name: &str) -> StorageResult<u64> {
        let mut table = txn.open_table(SEQUENCE_TABLE)?;
        let current = table.get(name)?.map(|guard| guard.value()).unwrap_or(0);
        let next = current + 1;
        table.insert(name, next)?;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequences_are_independent() {
        let storage = Storage::open_in_memory().unwrap();
        let txn = storage.begin_write().unwrap();
        assert_eq!(Storage::next_sequence(&txn, "order").unwrap(), 1);
        assert_eq!(Storage::next_sequence(&txn, "order").unwrap(), 2);
        assert_eq!(Storage::next_sequence(&txn, "refund").unwrap(), 1);
        txn.commit().unwrap();

        let txn = storage.begin_write().unwrap();
        assert_eq!(Storage::next_sequence(&txn, "order").unwrap(), 3);
    }

    #[test]
    fn test_aborted_transaction_does_not_consume_sequence() {
        let storage = Storage::open_in_memory().unwrap();
        {
            let txn = storage.begin_write().unwrap();
            Storage::next_sequence(&txn, "order").unwrap();
            // dropped without commit
        }
        let txn = storage.begin_write().unwrap();
        assert_eq!(Storage::next_sequence(&txn, "order").unwrap(), 1);
    }

    #[test]
    fn test_file_backed_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.redb");
        {
            let storage = Storage::open(&path).unwrap();
            let txn = storage.begin_write().unwrap();
            Storage::next_sequence(&txn, "order").unwrap();
            txn.commit().unwrap();
        }
        let storage = Storage::open(&path).unwrap();
        let txn = storage.begin_write().unwrap();
        assert_eq!(Storage::next_sequence(&txn, "order").unwrap(), 2);
    }
}
