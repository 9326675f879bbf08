//! Inventory API: stock lookup and admin stock take

mod handler;

use axum::{Router, routing::get};

use crate::core::ServerState;

pub fn router() -> Router<ServerState> {
    Router::new().route(
        "/inventory/{product_id}",
        get(handler::get_stock).put(handler::set_stock),
    )
}
