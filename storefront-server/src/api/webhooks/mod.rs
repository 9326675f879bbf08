//! Payment gateway webhook endpoint
//!
//! Authenticated by the gateway signature, not by a bearer token.

mod handler;

use axum::{Router, routing::post};

use crate::core::ServerState;

pub fn router() -> Router<ServerState> {
    Router::new().route("/webhooks/payment-gateway", post(handler::handle_webhook))
}
