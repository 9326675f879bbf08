use std::sync::Arc;
use std::time::Duration;

use crate::audit::{AuditService, AuditStorage};
use crate::auth::{JwtConfig, JwtService};
use crate::core::tasks::{self, BackgroundTasks, TaskKind};
use crate::core::{Config, Result};
use crate::db::Storage;
use crate::inventory::InventoryLedger;
use crate::notifications::{HttpSink, LogSink, NotificationSink, Outbox, OutboxWorker};
use crate::orders::{OrderManager, OrderService};
use crate::payments::{PaymentGateway, StripeGateway};
use crate::refunds::RefundWorkflow;
use crate::webhooks::{WebhookReconciler, WebhookStore};

const NOTIFICATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared handles to every service
///
/// | Field | Purpose |
/// |-------|---------|
/// | config | immutable configuration |
/// | storage | redb database handle |
/// | jwt_service | actor token validation |
/// | orders | order lifecycle, payments, stock |
/// | webhooks | gateway event reconciliation |
/// | outbox | pending notifications |
///
/// Cloning is cheap; every field is reference counted.
#[derive(Clone)]
pub struct ServerState {
    pub config: Arc<Config>,
    pub storage: Storage,
    pub jwt_service: Arc<JwtService>,
    pub orders: Arc<OrderService>,
    pub webhooks: Arc<WebhookReconciler>,
    pub outbox: Outbox,
}

impl ServerState {
    /// Open the database under `WORK_DIR` and wire the services against the
    /// live payment gateway
    pub fn initialize(config: &Config) -> Result<Self> {
        std::fs::create_dir_all(&config.work_dir)?;
        let storage = Storage::open(config.database_path())?;
        let gateway: Arc<dyn PaymentGateway> = Arc::new(StripeGateway::new(config.stripe())?);
        tracing::info!(
            path = %config.database_path().display(),
            environment = %config.environment,
            "Database opened"
        );
        Ok(Self::build(config.clone(), storage, gateway))
    }

    /// Wire the services over an already opened database
    pub fn build(config: Config, storage: Storage, gateway: Arc<dyn PaymentGateway>) -> Self {
        let audit = Arc::new(AuditService::new(AuditStorage::new(storage.clone())));
        let manager = OrderManager::new(storage.clone());
        let refunds = Arc::new(RefundWorkflow::new(
            storage.clone(),
            manager.clone(),
            gateway.clone(),
            audit.clone(),
        ));
        let orders = Arc::new(OrderService::new(
            manager,
            InventoryLedger::new(storage.clone()),
            gateway,
            audit,
            refunds,
            config.pricing(),
            config.currency.clone(),
        ));
        let webhooks = Arc::new(WebhookReconciler::new(
            WebhookStore::new(storage.clone()),
            orders.clone(),
            config.webhook_secret.clone(),
            config.webhook_tolerance_secs,
        ));
        let jwt_service = Arc::new(JwtService::with_config(JwtConfig::new(
            config.jwt_secret.clone(),
        )));

        Self {
            config: Arc::new(config),
            outbox: Outbox::new(storage.clone()),
            storage,
            jwt_service,
            orders,
            webhooks,
        }
    }

    pub fn jwt_service(&self) -> &JwtService {
        &self.jwt_service
    }

    /// Notification sink chosen by `NOTIFICATION_WEBHOOK_URL`
    pub fn notification_sink(&self) -> Arc<dyn NotificationSink> {
        if let Some(url) = &self.config.notification_webhook_url {
            match HttpSink::new(url.clone(), NOTIFICATION_TIMEOUT) {
                Ok(sink) => return Arc::new(sink),
                Err(e) => {
                    tracing::error!(error = %e, "HTTP notification sink unavailable, logging instead")
                }
            }
        }
        Arc::new(LogSink)
    }

    /// Spawn the outbox worker and housekeeping tasks
    pub fn start_background_tasks(&self) -> BackgroundTasks {
        let mut tasks = BackgroundTasks::new();

        let worker = OutboxWorker::new(self.outbox.clone(), self.notification_sink());
        tasks.spawn(
            "outbox_worker",
            TaskKind::Worker,
            worker.run(tasks.shutdown_token()),
        );
        tasks.spawn(
            "webhook_dedupe_purge",
            TaskKind::Periodic,
            tasks::purge_processed_webhooks(
                self.webhooks.store().clone(),
                self.config.webhook_retention_days,
                tasks.shutdown_token(),
            ),
        );
        tasks.spawn(
            "log_cleanup",
            TaskKind::Periodic,
            tasks::cleanup_logs(self.config.log_dir(), tasks.shutdown_token()),
        );

        tasks.log_summary();
        tasks
    }
}
