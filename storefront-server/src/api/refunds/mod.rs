//! Refund API
//!
//! Requests are opened against an order; approval, rejection and gateway
//! processing are admin actions on the refund itself.

mod handler;

use axum::{
    Router,
    routing::{get, post, put},
};

use crate::core::ServerState;

pub fn router() -> Router<ServerState> {
    Router::new()
        .route(
            "/orders/{id}/refunds",
            post(handler::request).get(handler::list_for_order),
        )
        .route("/refunds/{id}", get(handler::get_by_id))
        .route("/refunds/{id}/approve", put(handler::approve))
        .route("/refunds/{id}/reject", put(handler::reject))
        .route("/refunds/{id}/process", put(handler::process))
}
