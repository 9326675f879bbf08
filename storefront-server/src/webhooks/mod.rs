//! Payment gateway webhooks

mod event;
mod reconciler;
mod storage;

pub use event::{EventPayload, WebhookEvent};
pub use reconciler::{WebhookOutcome, WebhookReconciler};
pub use storage::{ProcessedEvent, WebhookStore};
