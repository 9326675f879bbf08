use axum::{
    Json,
    extract::{Path, State},
};
use serde::{Deserialize, Serialize};
use shared::AppResult;

use crate::auth::CurrentUser;
use crate::core::ServerState;

#[derive(Debug, Deserialize)]
pub struct SetStockRequest {
    pub stock: u64,
}

#[derive(Debug, Serialize)]
pub struct StockResponse {
    pub product_id: String,
    pub stock: u64,
}

pub async fn get_stock(
    State(state): State<ServerState>,
    _user: CurrentUser,
    Path(product_id): Path<String>,
) -> AppResult<Json<StockResponse>> {
    let stock = state.orders.stock(&product_id)?;
    Ok(Json(StockResponse { product_id, stock }))
}

pub async fn set_stock(
    State(state): State<ServerState>,
    user: CurrentUser,
    Path(product_id): Path<String>,
    Json(payload): Json<SetStockRequest>,
) -> AppResult<Json<StockResponse>> {
    let stock = state
        .orders
        .set_stock(&user.actor(), &product_id, payload.stock)?;
    Ok(Json(StockResponse { product_id, stock }))
}
