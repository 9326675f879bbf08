//! Outbox drain loop
//!
//! Note: redb operations are synchronous, the sink call is the only await.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::outbox::Outbox;
use super::sink::NotificationSink;
use super::types::OutboxEntry;

/// Attempts before a row is dead-lettered
pub const MAX_ATTEMPTS: u32 = 5;
const RETRY_BASE_DELAY_MS: i64 = 2_000;
const RETRY_MAX_DELAY_MS: i64 = 5 * 60 * 1000;
const POLL_INTERVAL: Duration = Duration::from_secs(2);
const BATCH_SIZE: usize = 100;

/// Summary of one drain pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    pub delivered: usize,
    pub retried: usize,
    pub dead_lettered: usize,
}

pub struct OutboxWorker {
    outbox: Outbox,
    sink: Arc<dyn NotificationSink>,
}

impl OutboxWorker {
    pub fn new(outbox: Outbox, sink: Arc<dyn NotificationSink>) -> Self {
        Self { outbox, sink }
    }

    /// Poll until `shutdown` fires
    pub async fn run(self, shutdown: CancellationToken) {
        tracing::info!("Outbox worker started");
        let mut interval = tokio::time::interval(POLL_INTERVAL);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Outbox worker stopping");
                    break;
                }
                _ = interval.tick() => {
                    self.drain_once(shared::util::now_millis()).await;
                }
            }
        }
    }

    /// Deliver every row due at `now`
    pub async fn drain_once(&self, now: i64) -> DrainReport {
        let mut report = DrainReport::default();
        let due = match self.outbox.due(now, BATCH_SIZE) {
            Ok(due) => due,
            Err(e) => {
                tracing::error!(error = %e, "Failed to read notification outbox");
                return report;
            }
        };

        for entry in due {
            match self.sink.deliver(&entry).await {
                Ok(()) => {
                    if let Err(e) = self.outbox.mark_delivered(entry.sequence) {
                        tracing::error!(sequence = entry.sequence, error = %e, "Failed to clear delivered notification");
                    }
                    report.delivered += 1;
                }
                Err(err) => {
                    let error = err.to_string();
                    if entry.attempts + 1 >= MAX_ATTEMPTS {
                        tracing::error!(
                            sequence = entry.sequence,
                            order_id = %entry.request.order_id,
                            kind = ?entry.request.kind,
                            attempts = entry.attempts + 1,
                            error = %error,
                            "Notification delivery exhausted, moving to dead letter"
                        );
                        if let Err(e) = self.outbox.move_to_dead_letter(entry.sequence, &error) {
                            tracing::error!(sequence = entry.sequence, error = %e, "Failed to dead-letter notification");
                        }
                        report.dead_lettered += 1;
                    } else {
                        let next = now + retry_delay_ms(&entry);
                        tracing::warn!(
                            sequence = entry.sequence,
                            order_id = %entry.request.order_id,
                            attempts = entry.attempts + 1,
                            error = %error,
                            "Notification delivery failed, will retry"
                        );
                        if let Err(e) = self.outbox.mark_failed(entry.sequence, &error, next) {
                            tracing::error!(sequence = entry.sequence, error = %e, "Failed to reschedule notification");
                        }
                        report.retried += 1;
                    }
                }
            }
        }
        report
    }
}

/// `base * 2^attempts`, capped
fn retry_delay_ms(entry: &OutboxEntry) -> i64 {
    (RETRY_BASE_DELAY_MS * 2i64.pow(entry.attempts)).min(RETRY_MAX_DELAY_MS)
}
