//! Audit log
//!
//! Append-only, hash-chained record of every admin- or system-driven state
//! change. Writes are isolated from the operations they describe.

mod diff;
mod service;
mod storage;
mod types;

pub use diff::{FieldChange, create_diff, create_snapshot};
pub use service::AuditService;
pub use storage::AuditStorage;
pub use types::*;
