//! Append-only audit storage on redb
//!
//! There is no update or delete API. Appends run in a redb write
//! transaction, which serializes them, so sequence numbers and the hash
//! chain never fork.

use redb::{ReadableTable, ReadableTableMetadata, TableDefinition, WriteTransaction};
use sha2::{Digest, Sha256};
use shared::order::Actor;

use super::types::{
    AuditAction, AuditChainBreak, AuditChainVerification, AuditEntry, AuditQuery,
};
use crate::db::{Storage, StorageResult};

/// Audit entries: key = sequence, value = JSON-serialized AuditEntry
const AUDIT_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("audit_log");

const GENESIS_HASH: &str = "genesis";

#[derive(Clone)]
pub struct AuditStorage {
    storage: Storage,
}

impl AuditStorage {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    pub(crate) fn init_tables(txn: &WriteTransaction) -> StorageResult<()> {
        let _ = txn.open_table(AUDIT_TABLE)?;
        Ok(())
    }

    /// Append one entry, chaining it to the current tail
    pub fn append(
        &self,
        action: AuditAction,
        actor: Actor,
        target_type: String,
        target_id: String,
        details: serde_json::Value,
        timestamp: i64,
    ) -> StorageResult<AuditEntry> {
        let txn = self.storage.begin_write()?;
        let entry = {
            let mut table = txn.open_table(AUDIT_TABLE)?;
            let (id, prev_hash) = match table.last()? {
                Some((key, value)) => {
                    let last: AuditEntry = serde_json::from_slice(value.value())?;
                    (key.value() + 1, last.curr_hash)
                }
                None => (1, GENESIS_HASH.to_string()),
            };

            let mut entry = AuditEntry {
                id,
                timestamp,
                action,
                actor,
                target_type,
                target_id,
                details,
                prev_hash,
                curr_hash: String::new(),
            };
            entry.curr_hash = compute_audit_hash(&entry);

            let value = serde_json::to_vec(&entry)?;
            table.insert(id, value.as_slice())?;
            entry
        };
        txn.commit()?;
        Ok(entry)
    }

    /// Matching entries newest first, plus the total match count
    pub fn query(&self, q: &AuditQuery) -> StorageResult<(Vec<AuditEntry>, u64)> {
        let txn = self.storage.begin_read()?;
        let table = txn.open_table(AUDIT_TABLE)?;

        let mut total = 0u64;
        let mut items = Vec::new();
        for row in table.iter()?.rev() {
            let (_, value) = row?;
            let entry: AuditEntry = serde_json::from_slice(value.value())?;
            let matches = q.target_type.as_ref().is_none_or(|t| *t == entry.target_type)
                && q.target_id.as_ref().is_none_or(|t| *t == entry.target_id)
                && q.action.is_none_or(|a| a == entry.action);
            if !matches {
                continue;
            }
            if total as usize >= q.offset && items.len() < q.limit {
                items.push(entry);
            }
            total += 1;
        }
        Ok((items, total))
    }

    pub fn count(&self) -> StorageResult<u64> {
        let txn = self.storage.begin_read()?;
        let table = txn.open_table(AUDIT_TABLE)?;
        Ok(table.len()?)
    }

    /// Walk the whole chain, checking linkage and recomputing every hash
    pub fn verify_chain(&self) -> StorageResult<AuditChainVerification> {
        let txn = self.storage.begin_read()?;
        let table = txn.open_table(AUDIT_TABLE)?;

        let mut expected_prev = GENESIS_HASH.to_string();
        let mut total_entries = 0u64;
        let mut breaks = Vec::new();

        for row in table.iter()? {
            let (_, value) = row?;
            let entry: AuditEntry = serde_json::from_slice(value.value())?;
            total_entries += 1;

            if entry.prev_hash != expected_prev || compute_audit_hash(&entry) != entry.curr_hash {
                breaks.push(AuditChainBreak {
                    entry_id: entry.id,
                    expected_prev_hash: expected_prev.clone(),
                    actual_prev_hash: entry.prev_hash.clone(),
                });
            }
            expected_prev = entry.curr_hash;
        }

        Ok(AuditChainVerification {
            total_entries,
            chain_intact: breaks.is_empty(),
            breaks,
        })
    }
}

/// SHA-256 over every stored field except `curr_hash`
///
/// Variable-length fields are `\x00`-separated so `("ab","cd")` and
/// `("abc","d")` hash differently.
fn compute_audit_hash(entry: &AuditEntry) -> String {
    let mut hasher = Sha256::new();

    hasher.update(entry.prev_hash.as_bytes());
    hasher.update(b"\x00");
    hasher.update(entry.id.to_le_bytes());
    hasher.update(entry.timestamp.to_le_bytes());

    let action = serde_json::to_string(&entry.action).unwrap_or_default();
    hasher.update(action.as_bytes());
    hasher.update(b"\x00");
    hasher.update(entry.actor.to_string().as_bytes());
    hasher.update(b"\x00");
    hasher.update(entry.target_type.as_bytes());
    hasher.update(b"\x00");
    hasher.update(entry.target_id.as_bytes());
    hasher.update(b"\x00");

    let details = serde_json::to_string(&entry.details).unwrap_or_default();
    hasher.update(details.as_bytes());

    format!("{:x}", hasher.finalize())
}
