//! Shared types for the storefront order engine
//!
//! Wire and domain types used by the server and its clients: the unified
//! error system, order and refund aggregates, money in minor units.

pub mod error;
pub mod order;
pub mod refund;
pub mod util;

// Re-exports
pub use axum::{Json, body};
pub use http;
pub use serde::{Deserialize, Serialize};

pub use error::{ApiResponse, AppError, AppResult, ErrorCode};
pub use order::{Actor, ActorKind, Money, Order, OrderStatus, PaymentStatus};
pub use refund::{Refund, RefundStatus};
