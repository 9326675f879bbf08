//! Engine error taxonomy
//!
//! Every public engine operation returns [`OrderError`]. Validation and
//! business-rule errors go back to the caller as-is; storage faults are
//! wrapped; gateway errors carry a correlation id for log lookup.

use shared::error::{AppError, ErrorCode};
use shared::order::{OrderStatus, PaymentStatus};
use thiserror::Error;

use crate::db::StorageError;
use crate::inventory::LedgerError;
use crate::payments::{GatewayError, SignatureError};

#[derive(Debug, Error)]
pub enum OrderError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Insufficient stock for {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: String,
        requested: u64,
        available: u64,
    },

    #[error("Order {order_id} cannot move from {from} to {to}")]
    InvalidTransition {
        order_id: String,
        from: OrderStatus,
        to: OrderStatus,
    },

    #[error("Order {order_id} payment cannot move from {from} to {to}")]
    InvalidPaymentTransition {
        order_id: String,
        from: PaymentStatus,
        to: PaymentStatus,
    },

    #[error("{resource} {id} was modified concurrently")]
    VersionConflict { resource: &'static str, id: String },

    /// Business rule conflict that is not an edge of a state machine
    #[error("{message}")]
    Conflict { code: ErrorCode, message: String },

    #[error("Webhook signature invalid: {0}")]
    WebhookSignatureInvalid(#[from] SignatureError),

    #[error("Payment gateway error: {0}")]
    PaymentGateway(#[from] GatewayError),

    #[error("{resource} not found: {id}")]
    NotFound { resource: &'static str, id: String },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The actor is not the owner of the resource
    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Storage error: {0}")]
    Storage(StorageError),
}

pub type OrderResult<T> = Result<T, OrderError>;

impl OrderError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn order_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            resource: "Order",
            id: id.into(),
        }
    }

    pub fn refund_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            resource: "Refund",
            id: id.into(),
        }
    }

    pub fn conflict(code: ErrorCode, msg: impl Into<String>) -> Self {
        Self::Conflict {
            code,
            message: msg.into(),
        }
    }

    pub fn admin_required(action: &str) -> Self {
        Self::Unauthorized(format!("{} requires an admin actor", action))
    }

    /// Conflicts that the optimistic-concurrency loop may retry
    pub fn is_version_conflict(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }
}

impl From<StorageError> for OrderError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::VersionConflict { id, .. } => Self::VersionConflict {
                resource: "Record",
                id,
            },
            other => Self::Storage(other),
        }
    }
}

impl From<LedgerError> for OrderError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientStock {
                product_id,
                requested,
                available,
            } => Self::InsufficientStock {
                product_id,
                requested,
                available,
            },
            LedgerError::ZeroQuantity => Self::validation("quantity must be positive"),
            LedgerError::Storage(e) => e.into(),
        }
    }
}

impl From<redb::StorageError> for OrderError {
    fn from(err: redb::StorageError) -> Self {
        StorageError::from(err).into()
    }
}

impl From<redb::TableError> for OrderError {
    fn from(err: redb::TableError) -> Self {
        StorageError::from(err).into()
    }
}

impl From<redb::CommitError> for OrderError {
    fn from(err: redb::CommitError) -> Self {
        StorageError::from(err).into()
    }
}

impl From<OrderError> for AppError {
    fn from(err: OrderError) -> Self {
        match err {
            OrderError::Validation(msg) => AppError::validation(msg),
            OrderError::InsufficientStock {
                product_id,
                requested,
                available,
            } => AppError::with_message(
                ErrorCode::InsufficientStock,
                format!("Insufficient stock for {}", product_id),
            )
            .with_detail("product_id", product_id)
            .with_detail("requested", requested)
            .with_detail("available", available),
            OrderError::InvalidTransition { order_id, from, to } => AppError::with_message(
                ErrorCode::InvalidTransition,
                format!("Order cannot move from {} to {}", from, to),
            )
            .with_detail("order_id", order_id)
            .with_detail("from", from.as_str())
            .with_detail("to", to.as_str()),
            OrderError::InvalidPaymentTransition { order_id, from, to } => {
                AppError::with_message(
                    ErrorCode::InvalidTransition,
                    format!("Payment cannot move from {} to {}", from, to),
                )
                .with_detail("order_id", order_id)
                .with_detail("from", from.as_str())
                .with_detail("to", to.as_str())
            }
            OrderError::VersionConflict { resource, id } => AppError::with_message(
                ErrorCode::OrderVersionConflict,
                format!("{} {} was modified concurrently, retry the request", resource, id),
            )
            .with_detail("id", id),
            OrderError::Conflict { code, message } => AppError::with_message(code, message),
            OrderError::WebhookSignatureInvalid(e) => {
                AppError::with_message(ErrorCode::WebhookSignatureInvalid, e.to_string())
            }
            OrderError::PaymentGateway(e) => AppError::with_message(
                ErrorCode::PaymentGatewayError,
                format!("Payment provider error: {}", e.message),
            )
            .with_detail("retryable", e.is_retryable())
            .with_detail("correlation_id", e.correlation_id),
            OrderError::NotFound { resource, id } => {
                let code = match resource {
                    "Order" => ErrorCode::OrderNotFound,
                    "Refund" => ErrorCode::RefundNotFound,
                    "Product" => ErrorCode::ProductNotFound,
                    _ => ErrorCode::NotFound,
                };
                AppError::with_message(code, format!("{} {} not found", resource, id))
                    .with_detail("id", id)
            }
            OrderError::Unauthorized(msg) => AppError::with_message(ErrorCode::AdminRequired, msg),
            OrderError::Forbidden(msg) => AppError::with_message(ErrorCode::PermissionDenied, msg),
            OrderError::Storage(e) => AppError::database(e.to_string()),
        }
    }
}
