//! Background task management
//!
//! - [`TaskKind::Worker`] - long-running loop (outbox drain)
//! - [`TaskKind::Periodic`] - timer-driven housekeeping (dedupe purge, log cleanup)

use futures::FutureExt;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::utils::logger::cleanup_old_logs;
use crate::webhooks::WebhookStore;

const PURGE_INTERVAL: Duration = Duration::from_secs(60 * 60);
const LOG_CLEANUP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);
/// Application log files older than this are removed
pub const LOG_RETENTION_DAYS: u64 = 14;
const MILLIS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Worker,
    Periodic,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Worker => write!(f, "Worker"),
            TaskKind::Periodic => write!(f, "Periodic"),
        }
    }
}

struct RegisteredTask {
    name: &'static str,
    kind: TaskKind,
    handle: JoinHandle<()>,
}

/// Owns every spawned background task and the shared shutdown token
pub struct BackgroundTasks {
    tasks: Vec<RegisteredTask>,
    shutdown: CancellationToken,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self {
            tasks: Vec::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Token tasks select on to stop
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Spawn `future`, logging a panic or an early exit
    pub fn spawn<F>(&mut self, name: &'static str, kind: TaskKind, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let token = self.shutdown.clone();
        let wrapped_future = async move {
            let result = AssertUnwindSafe(future).catch_unwind().await;
            match result {
                Ok(()) if token.is_cancelled() => {}
                Ok(()) => {
                    tracing::warn!(task = %name, kind = %kind, "Background task completed unexpectedly");
                }
                Err(panic_info) => {
                    let panic_msg = if let Some(s) = panic_info.downcast_ref::<&str>() {
                        (*s).to_string()
                    } else if let Some(s) = panic_info.downcast_ref::<String>() {
                        s.clone()
                    } else {
                        "Unknown panic".to_string()
                    };
                    tracing::error!(task = %name, kind = %kind, panic = %panic_msg, "Background task panicked");
                }
            }
        };

        let handle = tokio::spawn(wrapped_future);
        tracing::debug!(task = %name, kind = %kind, "Registered background task");
        self.tasks.push(RegisteredTask { name, kind, handle });
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn log_summary(&self) {
        let workers = self.tasks.iter().filter(|t| t.kind == TaskKind::Worker).count();
        tracing::info!(
            total = self.tasks.len(),
            workers,
            periodic = self.tasks.len() - workers,
            "Background tasks registered"
        );
    }

    /// Cancel every task and wait for them to finish
    pub async fn shutdown(self) {
        tracing::info!("Shutting down {} background tasks...", self.tasks.len());
        self.shutdown.cancel();

        for task in self.tasks {
            match task.handle.await {
                Ok(()) => tracing::debug!(task = %task.name, "Task completed"),
                Err(e) if e.is_cancelled() => tracing::debug!(task = %task.name, "Task cancelled"),
                Err(e) => tracing::error!(task = %task.name, error = ?e, "Task panicked"),
            }
        }

        tracing::info!("All background tasks stopped");
    }
}

impl Default for BackgroundTasks {
    fn default() -> Self {
        Self::new()
    }
}

/// Drop dedupe records older than the retention window, hourly
pub async fn purge_processed_webhooks(
    store: WebhookStore,
    retention_days: i64,
    shutdown: CancellationToken,
) {
    let mut interval = tokio::time::interval(PURGE_INTERVAL);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {
                let cutoff = shared::util::now_millis() - retention_days * MILLIS_PER_DAY;
                match store.purge_older_than(cutoff) {
                    Ok(0) => {}
                    Ok(purged) => tracing::info!(target: "payment", purged, "Purged processed webhook records"),
                    Err(e) => tracing::error!(target: "payment", error = %e, "Webhook dedupe purge failed"),
                }
            }
        }
    }
}

/// Remove old application log files, daily
pub async fn cleanup_logs(log_dir: PathBuf, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(LOG_CLEANUP_INTERVAL);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {
                match cleanup_old_logs(&log_dir, LOG_RETENTION_DAYS) {
                    Ok(0) => {}
                    Ok(removed) => tracing::info!(removed, "Removed old log files"),
                    Err(e) => tracing::warn!(error = %e, "Log cleanup failed"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Storage;
    use crate::webhooks::ProcessedEvent;

    #[tokio::test]
    async fn test_shutdown_stops_tasks() {
        let mut tasks = BackgroundTasks::new();
        let token = tasks.shutdown_token();
        tasks.spawn("idle", TaskKind::Worker, async move {
            token.cancelled().await;
        });
        assert_eq!(tasks.len(), 1);
        tasks.shutdown().await;
    }

    #[tokio::test]
    async fn test_purge_runs_on_first_tick() {
        let store = WebhookStore::new(Storage::open_in_memory().unwrap());
        store
            .record(&ProcessedEvent {
                event_id: "evt_old".into(),
                event_type: "payment_intent.succeeded".into(),
                processed_at: 0,
                outcome: "applied".into(),
                order_id: None,
                detail: None,
            })
            .unwrap();

        let mut tasks = BackgroundTasks::new();
        tasks.spawn(
            "webhook_purge",
            TaskKind::Periodic,
            purge_processed_webhooks(store.clone(), 30, tasks.shutdown_token()),
        );
        for _ in 0..50 {
            if store.count().unwrap() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(store.count().unwrap(), 0);
        tasks.shutdown().await;
    }
}
