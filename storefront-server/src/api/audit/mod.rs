//! Audit log API (admin only)
//!
//! | Path | Method | Description |
//! |------|--------|-------------|
//! | /audit | GET | paged entries, filter by target/action |
//! | /audit/verify | GET | hash chain verification |

mod handler;

use axum::{Router, middleware, routing::get};

use crate::auth::require_admin;
use crate::core::ServerState;

pub fn router() -> Router<ServerState> {
    Router::new()
        .route("/audit", get(handler::list))
        .route("/audit/verify", get(handler::verify_chain))
        .route_layer(middleware::from_fn(require_admin))
}
