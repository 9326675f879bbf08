//! Order API handlers

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use shared::order::{Money, Order, OrderStatus};
use shared::AppResult;

use crate::auth::CurrentUser;
use crate::core::ServerState;
use crate::orders::CreateOrderRequest;
use crate::payments::IntentStatus;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<OrderStatus>,
    #[serde(default)]
    pub include_archived: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdateRequest {
    pub status: OrderStatus,
    pub note: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ResolveReviewRequest {
    pub note: Option<String>,
}

/// What the storefront needs to complete payment in the browser
#[derive(Debug, Serialize)]
pub struct PaymentIntentResponse {
    pub payment_intent_id: String,
    pub client_secret: Option<String>,
    pub status: IntentStatus,
    pub amount: Money,
}

pub async fn create(
    State(state): State<ServerState>,
    user: CurrentUser,
    Json(payload): Json<CreateOrderRequest>,
) -> AppResult<(StatusCode, Json<Order>)> {
    let order = state.orders.create_order(&user.actor(), payload)?;
    Ok((StatusCode::CREATED, Json(order)))
}

pub async fn list(
    State(state): State<ServerState>,
    user: CurrentUser,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<Vec<Order>>> {
    let orders = state
        .orders
        .list_orders(&user.actor(), query.status, query.include_archived)?;
    Ok(Json(orders))
}

pub async fn get_by_id(
    State(state): State<ServerState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<Json<Order>> {
    Ok(Json(state.orders.get_order(&user.actor(), &id)?))
}

pub async fn create_payment_intent(
    State(state): State<ServerState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<Json<PaymentIntentResponse>> {
    let intent = state.orders.create_payment_intent(&user.actor(), &id).await?;
    Ok(Json(PaymentIntentResponse {
        payment_intent_id: intent.id,
        client_secret: intent.client_secret,
        status: intent.status,
        amount: intent.amount,
    }))
}

pub async fn pay(
    State(state): State<ServerState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<Json<Order>> {
    Ok(Json(state.orders.pay(&user.actor(), &id).await?))
}

pub async fn cancel(
    State(state): State<ServerState>,
    user: CurrentUser,
    Path(id): Path<String>,
    payload: Option<Json<CancelRequest>>,
) -> AppResult<Json<Order>> {
    let Json(payload) = payload.unwrap_or_default();
    Ok(Json(state.orders.cancel(&user.actor(), &id, payload.reason)?))
}

pub async fn update_status(
    State(state): State<ServerState>,
    user: CurrentUser,
    Path(id): Path<String>,
    Json(payload): Json<StatusUpdateRequest>,
) -> AppResult<Json<Order>> {
    let order = state
        .orders
        .update_status(&user.actor(), &id, payload.status, payload.note)?;
    Ok(Json(order))
}

pub async fn archive(
    State(state): State<ServerState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<Json<Order>> {
    Ok(Json(state.orders.archive(&user.actor(), &id)?))
}

pub async fn resolve_review(
    State(state): State<ServerState>,
    user: CurrentUser,
    Path(id): Path<String>,
    payload: Option<Json<ResolveReviewRequest>>,
) -> AppResult<Json<Order>> {
    let Json(payload) = payload.unwrap_or_default();
    Ok(Json(state.orders.resolve_review(&user.actor(), &id, payload.note)?))
}
