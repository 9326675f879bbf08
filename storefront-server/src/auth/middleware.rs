//! Authentication middleware for route groups

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use shared::{AppError, ErrorCode};

use super::CurrentUser;
use super::extractor::authenticate;
use crate::core::ServerState;

/// Require a valid bearer token; injects [`CurrentUser`] into the request
pub async fn require_auth(
    State(state): State<ServerState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    if req.method() == http::Method::OPTIONS {
        return Ok(next.run(req).await);
    }

    let header = req
        .headers()
        .get(http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok());
    let user = authenticate(state.jwt_service(), header, req.uri())?;
    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}

/// Require the admin role; must run after [`require_auth`]
pub async fn require_admin(req: Request, next: Next) -> Result<Response, AppError> {
    let user = req
        .extensions()
        .get::<CurrentUser>()
        .ok_or_else(AppError::unauthorized)?;
    if !user.is_admin() {
        tracing::warn!(
            target: "security",
            user_id = %user.id,
            role = %user.role,
            uri = %req.uri(),
            "Admin role required"
        );
        return Err(AppError::new(ErrorCode::AdminRequired));
    }
    Ok(next.run(req).await)
}
