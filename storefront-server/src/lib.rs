//! Storefront order engine
//!
//! Order lifecycle and payment reconciliation for a small storefront: checkout
//! with stock reservation, order and payment state machines, gateway webhook
//! reconciliation, refunds, audit trail and customer/admin notifications.
//!
//! # Module layout
//!
//! ```text
//! storefront-server/src/
//! ├── core/           # config, state, server, background tasks
//! ├── auth/           # JWT actor authentication
//! ├── api/            # HTTP routes and handlers
//! ├── db/             # redb storage handle
//! ├── orders/         # pricing, validation, state machines, order service
//! ├── inventory/      # stock ledger
//! ├── payments/       # gateway client, webhook signatures
//! ├── webhooks/       # event reconciliation and dedupe
//! ├── refunds/        # refund workflow
//! ├── audit/          # hash-chained audit log
//! ├── notifications/  # outbox and delivery sinks
//! └── utils/          # logging
//! ```

pub mod api;
pub mod audit;
pub mod auth;
pub mod core;
pub mod db;
pub mod inventory;
pub mod notifications;
pub mod orders;
pub mod payments;
pub mod refunds;
pub mod utils;
pub mod webhooks;

pub use auth::{CurrentUser, JwtService};
pub use core::{Config, Server, ServerState};
pub use orders::{OrderError, OrderResult, OrderService};
pub use utils::logger::{cleanup_old_logs, init_logger_with_file};
