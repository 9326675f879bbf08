//! Inventory ledger
//!
//! Holds per-product stock counters and exposes atomic, idempotent
//! reserve/release used by checkout, cancellation and refund restocks.

mod ledger;

pub use ledger::{
    IdempotencyKey, InventoryLedger, LedgerError, LedgerOp, LedgerResult, StockMovement,
};
