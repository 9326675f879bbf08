//! Processed-event dedupe records

use redb::{ReadableTable, ReadableTableMetadata, TableDefinition, WriteTransaction};
use serde::{Deserialize, Serialize};

use crate::db::{Storage, StorageResult};

/// Processed events: key = gateway event id, value = JSON ProcessedEvent
const PROCESSED_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("processed_webhooks");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedEvent {
    pub event_id: String,
    pub event_type: String,
    pub processed_at: i64,
    /// `applied`, `no_change`, `ignored` or `rejected`
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Clone)]
pub struct WebhookStore {
    storage: Storage,
}

impl WebhookStore {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    pub(crate) fn init_tables(txn: &WriteTransaction) -> StorageResult<()> {
        let _ = txn.open_table(PROCESSED_TABLE)?;
        Ok(())
    }

    pub fn get(&self, event_id: &str) -> StorageResult<Option<ProcessedEvent>> {
        let txn = self.storage.begin_read()?;
        let table = txn.open_table(PROCESSED_TABLE)?;
        match table.get(event_id)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    /// Record an event as processed; a concurrent duplicate keeps the first record
    pub fn record(&self, event: &ProcessedEvent) -> StorageResult<bool> {
        let txn = self.storage.begin_write()?;
        let inserted = {
            let mut table = txn.open_table(PROCESSED_TABLE)?;
            if table.get(event.event_id.as_str())?.is_some() {
                false
            } else {
                let value = serde_json::to_vec(event)?;
                table.insert(event.event_id.as_str(), value.as_slice())?;
                true
            }
        };
        txn.commit()?;
        Ok(inserted)
    }

    pub fn count(&self) -> StorageResult<u64> {
        let txn = self.storage.begin_read()?;
        let table = txn.open_table(PROCESSED_TABLE)?;
        Ok(table.len()?)
    }

    /// Delete records processed before `cutoff` (millis), returns how many
    pub fn purge_older_than(&self, cutoff: i64) -> StorageResult<usize> {
        let txn = self.storage.begin_write()?;
        let purged = {
            let mut table = txn.open_table(PROCESSED_TABLE)?;
            let mut expired = Vec::new();
            for entry in table.iter()? {
                let (key, value) = entry?;
                let event: ProcessedEvent = serde_json::from_slice(value.value())?;
                if event.processed_at < cutoff {
                    expired.push(key.value().to_string());
                }
            }
            for event_id in &expired {
                table.remove(event_id.as_str())?;
            }
            expired.len()
        };
        txn.commit()?;
        Ok(purged)
    }
}
