//! HTTP API
//!
//! - [`health`] - liveness and alert counters (public)
//! - [`webhooks`] - payment gateway events (signature-authenticated)
//! - [`orders`] - checkout and order lifecycle
//! - [`refunds`] - refund requests and processing
//! - [`inventory`] - stock lookup and adjustment
//! - [`audit`] - audit log (admin)

pub mod audit;
pub mod health;
pub mod inventory;
pub mod orders;
pub mod refunds;
pub mod webhooks;

use axum::{Router, middleware};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::auth::require_auth;
use crate::core::ServerState;

/// Assemble every route with its middleware
pub fn build_app(state: ServerState) -> Router {
    let protected = Router::new()
        .merge(orders::router())
        .merge(refunds::router())
        .merge(inventory::router())
        .merge(audit::router())
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(health::router())
        .merge(webhooks::router())
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
