//! Refunds against paid orders

mod storage;
mod workflow;

pub use storage::RefundStore;
pub use workflow::{RefundRequest, RefundWorkflow, can_transition_refund, refundable_balance};
