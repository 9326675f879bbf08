use axum::{
    Json,
    extract::{Query, State},
};
use shared::{AppError, AppResult};

use crate::audit::{AuditChainVerification, AuditListResponse, AuditQuery};
use crate::core::ServerState;

const MAX_PAGE_SIZE: usize = 500;

pub async fn list(
    State(state): State<ServerState>,
    Query(mut query): Query<AuditQuery>,
) -> AppResult<Json<AuditListResponse>> {
    query.limit = query.limit.clamp(1, MAX_PAGE_SIZE);
    let (items, total) = state
        .orders
        .audit()
        .query(&query)
        .map_err(|e| AppError::database(e.to_string()))?;
    Ok(Json(AuditListResponse { items, total }))
}

pub async fn verify_chain(
    State(state): State<ServerState>,
) -> AppResult<Json<AuditChainVerification>> {
    let result = state
        .orders
        .audit()
        .verify_chain()
        .map_err(|e| AppError::database(e.to_string()))?;
    if !result.chain_intact {
        tracing::error!(
            target: "audit",
            breaks = result.breaks.len(),
            "Audit chain verification found breaks"
        );
    }
    Ok(Json(result))
}
