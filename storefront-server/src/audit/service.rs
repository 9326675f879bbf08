//! Audit service
//!
//! `record*` never returns an error. A failed append is logged on the
//! `audit` target and counted; the counter is surfaced by `/health` as an
//! operational alert. The state change being described has already
//! committed by the time it is audited and is never rolled back.

use serde::Serialize;
use shared::order::Actor;
use std::sync::atomic::{AtomicU64, Ordering};

use super::diff::{create_diff, create_snapshot};
use super::storage::AuditStorage;
use super::types::{AuditAction, AuditChainVerification, AuditEntry, AuditQuery};
use crate::db::StorageResult;

pub struct AuditService {
    storage: AuditStorage,
    failures: AtomicU64,
}

impl std::fmt::Debug for AuditService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditService")
            .field("failures", &self.failures.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl AuditService {
    pub fn new(storage: AuditStorage) -> Self {
        Self {
            storage,
            failures: AtomicU64::new(0),
        }
    }

    /// Append an entry with pre-built details
    pub fn record(
        &self,
        actor: &Actor,
        action: AuditAction,
        target_type: &str,
        target_id: &str,
        details: serde_json::Value,
    ) -> Option<AuditEntry> {
        match self.storage.append(
            action,
            actor.clone(),
            target_type.to_string(),
            target_id.to_string(),
            details,
            shared::util::now_millis(),
        ) {
            Ok(entry) => Some(entry),
            Err(e) => {
                let failures = self.failures.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::error!(
                    target: "audit",
                    %action,
                    target_type,
                    target_id,
                    actor = %actor,
                    failures,
                    error = %e,
                    "Audit write failed"
                );
                None
            }
        }
    }

    /// Append an entry holding a full snapshot of `value`
    pub fn record_snapshot<T: Serialize>(
        &self,
        actor: &Actor,
        action: AuditAction,
        target_type: &str,
        target_id: &str,
        value: &T,
    ) -> Option<AuditEntry> {
        let details = create_snapshot(value, target_type);
        self.record(actor, action, target_type, target_id, details)
    }

    /// Append an entry holding the before/after diff
    pub fn record_change<T: Serialize>(
        &self,
        actor: &Actor,
        action: AuditAction,
        target_type: &str,
        target_id: &str,
        before: &T,
        after: &T,
    ) -> Option<AuditEntry> {
        let details = create_diff(before, after, target_type);
        self.record(actor, action, target_type, target_id, details)
    }

    /// Failed appends since startup
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn query(&self, q: &AuditQuery) -> StorageResult<(Vec<AuditEntry>, u64)> {
        self.storage.query(q)
    }

    pub fn verify_chain(&self) -> StorageResult<AuditChainVerification> {
        self.storage.verify_chain()
    }
}
