//! Transactional notification outbox
//!
//! Rows are written by [`Outbox::enqueue_in`] inside the same write
//! transaction as the state change they describe, then drained by the
//! [`OutboxWorker`](super::OutboxWorker). Delivery is at-least-once.

use redb::{ReadableTable, ReadableTableMetadata, TableDefinition, WriteTransaction};

use super::types::{NotificationRequest, OutboxEntry};
use crate::db::{Storage, StorageError, StorageResult};

/// Pending rows: key = sequence, value = JSON-serialized OutboxEntry
const OUTBOX_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("outbox");

/// Rows that exhausted their attempts: key = sequence, value = JSON OutboxEntry
const DEAD_LETTER_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("outbox_dead_letter");

const OUTBOX_SEQUENCE: &str = "outbox";

#[derive(Clone)]
pub struct Outbox {
    storage: Storage,
}

impl Outbox {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    pub(crate) fn init_tables(txn: &WriteTransaction) -> StorageResult<()> {
        let _ = txn.open_table(OUTBOX_TABLE)?;
        let _ = txn.open_table(DEAD_LETTER_TABLE)?;
        Ok(())
    }

    /// Append requests inside an open write transaction
    pub fn enqueue_in(
        txn: &WriteTransaction,
        requests: &[NotificationRequest],
        now: i64,
    ) -> StorageResult<()> {
        if requests.is_empty() {
            return Ok(());
        }
        let mut table = txn.open_table(OUTBOX_TABLE)?;
        for request in requests {
            let sequence = Storage::next_sequence(txn, OUTBOX_SEQUENCE)?;
            let entry = OutboxEntry {
                sequence,
                request: request.clone(),
                attempts: 0,
                next_attempt_at: now,
                last_error: None,
                created_at: now,
            };
            let value = serde_json::to_vec(&entry)?;
            table.insert(sequence, value.as_slice())?;
        }
        Ok(())
    }

    /// Append requests in their own transaction
    pub fn enqueue(&self, requests: &[NotificationRequest], now: i64) -> StorageResult<()> {
        let txn = self.storage.begin_write()?;
        Self::enqueue_in(&txn, requests, now)?;
        txn.commit()?;
        Ok(())
    }

    /// Rows due at `now`, oldest first
    pub fn due(&self, now: i64, limit: usize) -> StorageResult<Vec<OutboxEntry>> {
        let txn = self.storage.begin_read()?;
        let table = txn.open_table(OUTBOX_TABLE)?;
        let mut entries = Vec::new();
        for row in table.iter()? {
            let (_, value) = row?;
            let entry: OutboxEntry = serde_json::from_slice(value.value())?;
            if entry.next_attempt_at <= now {
                entries.push(entry);
                if entries.len() >= limit {
                    break;
                }
            }
        }
        Ok(entries)
    }

    /// Every pending row regardless of schedule
    pub fn pending(&self) -> StorageResult<Vec<OutboxEntry>> {
        self.due(i64::MAX, usize::MAX)
    }

    pub fn pending_count(&self) -> StorageResult<u64> {
        let txn = self.storage.begin_read()?;
        let table = txn.open_table(OUTBOX_TABLE)?;
        Ok(table.len()?)
    }

    pub fn mark_delivered(&self, sequence: u64) -> StorageResult<()> {
        let txn = self.storage.begin_write()?;
        {
            let mut table = txn.open_table(OUTBOX_TABLE)?;
            table.remove(sequence)?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Record a failed attempt and schedule the next one
    pub fn mark_failed(&self, sequence: u64, error: &str, next_attempt_at: i64) -> StorageResult<()> {
        let txn = self.storage.begin_write()?;
        {
            let mut table = txn.open_table(OUTBOX_TABLE)?;
            let mut entry: OutboxEntry = match table.get(sequence)? {
                Some(value) => serde_json::from_slice(value.value())?,
                None => return Err(StorageError::NotFound(format!("outbox:{}", sequence))),
            };
            entry.attempts += 1;
            entry.last_error = Some(error.to_string());
            entry.next_attempt_at = next_attempt_at;
            let value = serde_json::to_vec(&entry)?;
            table.insert(sequence, value.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Move a row to the dead-letter table
    pub fn move_to_dead_letter(&self, sequence: u64, error: &str) -> StorageResult<()> {
        let txn = self.storage.begin_write()?;
        {
            let mut outbox = txn.open_table(OUTBOX_TABLE)?;
            let mut dead = txn.open_table(DEAD_LETTER_TABLE)?;
            let entry = outbox
                .remove(sequence)?
                .map(|value| serde_json::from_slice::<OutboxEntry>(value.value()))
                .transpose()?;
            if let Some(mut entry) = entry {
                entry.attempts += 1;
                entry.last_error = Some(error.to_string());
                let value = serde_json::to_vec(&entry)?;
                dead.insert(sequence, value.as_slice())?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    pub fn dead_letters(&self) -> StorageResult<Vec<OutboxEntry>> {
        let txn = self.storage.begin_read()?;
        let table = txn.open_table(DEAD_LETTER_TABLE)?;
        let mut entries = Vec::new();
        for row in table.iter()? {
            let (_, value) = row?;
            entries.push(serde_json::from_slice(value.value())?);
        }
        Ok(entries)
    }
}
