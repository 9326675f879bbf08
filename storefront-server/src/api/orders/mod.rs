//! Order API
//!
//! | Path | Method | Actor |
//! |------|--------|-------|
//! | /orders | POST | customer, admin |
//! | /orders | GET | customer (own), admin (all) |
//! | /orders/{id} | GET | owner, admin |
//! | /orders/{id}/create-payment-intent | POST | owner, admin |
//! | /orders/{id}/pay | PUT | owner, admin |
//! | /orders/{id}/cancel | PUT | owner, admin |
//! | /orders/{id}/status | PUT | admin |
//! | /orders/{id}/archive | PUT | admin |
//! | /orders/{id}/review/resolve | PUT | admin |

mod handler;

use axum::{
    Router,
    routing::{get, post, put},
};

use crate::core::ServerState;

pub fn router() -> Router<ServerState> {
    Router::new().nest("/orders", routes())
}

fn routes() -> Router<ServerState> {
    Router::new()
        .route("/", post(handler::create).get(handler::list))
        .route("/{id}", get(handler::get_by_id))
        .route("/{id}/create-payment-intent", post(handler::create_payment_intent))
        .route("/{id}/pay", put(handler::pay))
        .route("/{id}/cancel", put(handler::cancel))
        .route("/{id}/status", put(handler::update_status))
        .route("/{id}/archive", put(handler::archive))
        .route("/{id}/review/resolve", put(handler::resolve_review))
}
