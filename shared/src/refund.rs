//! Refund aggregate types

use crate::order::{Actor, Money};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum RefundStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
    Processing,
    Completed,
    Failed,
}

impl RefundStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Rejected | Self::Failed)
    }

    /// Still holding part of the order's refundable balance
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Pending | Self::Approved | Self::Processing)
    }
}

impl fmt::Display for RefundStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RefundType {
    Full,
    Partial,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RefundReason {
    DamagedProduct,
    WrongProduct,
    NotAsDescribed,
    LateDelivery,
    CustomerChangedMind,
    DuplicateOrder,
    PaymentError,
    OutOfStock,
    QualityIssue,
    Other,
}

/// Stock to put back once the refund completes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RestockLine {
    pub product_id: String,
    pub quantity: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RestockState {
    /// No restock lines were requested
    #[default]
    NotRequested,
    Pending,
    Released,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RefundHistoryEntry {
    pub status: RefundStatus,
    pub timestamp: i64,
    pub actor: Actor,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Refund aggregate
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Refund {
    /// `REF-000001`
    pub refund_id: String,
    pub order_id: String,
    pub amount: Money,
    pub refund_type: RefundType,
    pub reason: RefundReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: RefundStatus,
    pub requested_by: Actor,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<Actor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejected_by: Option<Actor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejected_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_by: Option<Actor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_refund_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin_notes: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub restock: Vec<RestockLine>,
    pub restock_state: RestockState,
    pub status_history: Vec<RefundHistoryEntry>,
    pub version: u64,
    pub created_at: i64,
    pub updated_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refund_status_groups() {
        assert!(RefundStatus::Completed.is_terminal());
        assert!(RefundStatus::Rejected.is_terminal());
        assert!(RefundStatus::Failed.is_terminal());
        assert!(RefundStatus::Processing.is_in_flight());
        assert!(!RefundStatus::Completed.is_in_flight());
    }

    #[test]
    fn test_reason_serde() {
        let json = serde_json::to_string(&RefundReason::CustomerChangedMind).unwrap();
        assert_eq!(json, "\"customer_changed_mind\"");
    }
}
