//! Health check (no authentication)
//!
//! ```json
//! {
//!   "status": "ok",
//!   "version": "0.1.0",
//!   "audit_failures": 0,
//!   "outbox_pending": 3
//! }
//! ```
//!
//! `status` is `degraded` when audit writes have failed or the outbox
//! cannot be read.

use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;

use crate::core::ServerState;

pub fn router() -> Router<ServerState> {
    Router::new().route("/health", get(health))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
    environment: String,
    /// Audit writes that failed since startup
    audit_failures: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    outbox_pending: Option<u64>,
}

pub async fn health(State(state): State<ServerState>) -> Json<HealthResponse> {
    let audit_failures = state.orders.audit().failures();
    let outbox_pending = match state.outbox.pending_count() {
        Ok(count) => Some(count),
        Err(e) => {
            tracing::error!(error = %e, "Outbox unreadable during health check");
            None
        }
    };
    let status = if audit_failures == 0 && outbox_pending.is_some() {
        "ok"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        environment: state.config.environment.clone(),
        audit_failures,
        outbox_pending,
    })
}
