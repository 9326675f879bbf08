//! Audit log types
//!
//! Entries are immutable and never deleted. Each one carries a SHA-256 hash
//! chained to its predecessor so tampering is detectable.

use serde::{Deserialize, Serialize};
use shared::order::Actor;

/// Audited operation (closed set, never free text)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    // Orders
    OrderCreated,
    OrderStatusChanged,
    OrderPaymentConfirmed,
    OrderPaymentFailed,
    OrderCancelled,
    OrderArchived,
    ManualReviewFlagged,
    ManualReviewResolved,

    // Refunds
    RefundRequested,
    RefundApproved,
    RefundRejected,
    RefundProcessed,
    RefundCompleted,
    RefundFailed,

    // Inventory
    StockAdjusted,
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Immutable audit entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Global sequence, starts at 1
    pub id: u64,
    pub timestamp: i64,
    pub action: AuditAction,
    pub actor: Actor,
    /// `order`, `refund`, `stock`
    pub target_type: String,
    pub target_id: String,
    /// Snapshot or `{"changes": [...]}` diff
    pub details: serde_json::Value,
    pub prev_hash: String,
    pub curr_hash: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditQuery {
    pub target_type: Option<String>,
    pub target_id: Option<String>,
    pub action: Option<AuditAction>,
    #[serde(default)]
    pub offset: usize,
    /// Page size (default 50)
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

#[derive(Debug, Serialize)]
pub struct AuditListResponse {
    pub items: Vec<AuditEntry>,
    pub total: u64,
}

#[derive(Debug, Serialize)]
pub struct AuditChainVerification {
    pub total_entries: u64,
    pub chain_intact: bool,
    pub breaks: Vec<AuditChainBreak>,
}

#[derive(Debug, Serialize)]
pub struct AuditChainBreak {
    pub entry_id: u64,
    pub expected_prev_hash: String,
    pub actual_prev_hash: String,
}
