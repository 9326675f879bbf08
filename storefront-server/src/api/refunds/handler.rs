use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Deserialize;
use shared::AppResult;
use shared::refund::Refund;

use crate::auth::CurrentUser;
use crate::core::ServerState;
use crate::refunds::RefundRequest;

#[derive(Debug, Default, Deserialize)]
pub struct ApproveRequest {
    pub admin_notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RejectRequest {
    pub reason: String,
}

pub async fn request(
    State(state): State<ServerState>,
    user: CurrentUser,
    Path(order_id): Path<String>,
    Json(payload): Json<RefundRequest>,
) -> AppResult<(StatusCode, Json<Refund>)> {
    let refund = state
        .orders
        .refunds()
        .request(&user.actor(), &order_id, payload)?;
    Ok((StatusCode::CREATED, Json(refund)))
}

pub async fn list_for_order(
    State(state): State<ServerState>,
    user: CurrentUser,
    Path(order_id): Path<String>,
) -> AppResult<Json<Vec<Refund>>> {
    let refunds = state
        .orders
        .refunds()
        .list_for_order(&user.actor(), &order_id)?;
    Ok(Json(refunds))
}

pub async fn get_by_id(
    State(state): State<ServerState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<Json<Refund>> {
    Ok(Json(state.orders.refunds().get(&user.actor(), &id)?))
}

pub async fn approve(
    State(state): State<ServerState>,
    user: CurrentUser,
    Path(id): Path<String>,
    Json(payload): Json<ApproveRequest>,
) -> AppResult<Json<Refund>> {
    let refund = state
        .orders
        .refunds()
        .approve(&user.actor(), &id, payload.admin_notes)?;
    Ok(Json(refund))
}

pub async fn reject(
    State(state): State<ServerState>,
    user: CurrentUser,
    Path(id): Path<String>,
    Json(payload): Json<RejectRequest>,
) -> AppResult<Json<Refund>> {
    let refund = state
        .orders
        .refunds()
        .reject(&user.actor(), &id, payload.reason)?;
    Ok(Json(refund))
}

/// Submit an approved refund to the gateway
pub async fn process(
    State(state): State<ServerState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<Json<Refund>> {
    Ok(Json(state.orders.refunds().process(&user.actor(), &id).await?))
}
