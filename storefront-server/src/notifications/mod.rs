//! Customer/admin notifications via a durable outbox

mod outbox;
mod sink;
mod types;
mod worker;

pub use outbox::Outbox;
pub use sink::{HttpSink, LogSink, NotificationSink, SinkError};
pub use types::{NotificationKind, NotificationRequest, OutboxEntry, Recipient};
pub use worker::{DrainReport, MAX_ATTEMPTS, OutboxWorker};
