//! Request extractor for the authenticated caller

use axum::{extract::FromRequestParts, http::request::Parts};
use shared::AppError;

use super::{CurrentUser, JwtError, JwtService};
use crate::core::ServerState;

/// Resolve the caller from an `Authorization: Bearer` header
pub(crate) fn authenticate(
    jwt: &JwtService,
    header: Option<&str>,
    uri: &http::Uri,
) -> Result<CurrentUser, AppError> {
    let Some(header) = header else {
        tracing::warn!(target: "security", uri = %uri, "Missing authorization header");
        return Err(AppError::unauthorized());
    };
    let token = JwtService::extract_from_header(header)
        .ok_or_else(|| AppError::invalid_token("Invalid authorization header"))?;

    let claims = jwt.validate_token(token).map_err(|e| {
        tracing::warn!(target: "security", uri = %uri, error = %e, "Token rejected");
        match e {
            JwtError::ExpiredToken => AppError::token_expired(),
            _ => AppError::invalid_token("Invalid token"),
        }
    })?;

    CurrentUser::try_from(claims)
        .map_err(|e| AppError::invalid_token(format!("Malformed token claims: {}", e)))
}

impl FromRequestParts<ServerState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &ServerState,
    ) -> Result<Self, Self::Rejection> {
        // Already resolved by require_auth
        if let Some(user) = parts.extensions.get::<CurrentUser>() {
            return Ok(user.clone());
        }

        let header = parts
            .headers
            .get(http::header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok());
        let user = authenticate(state.jwt_service(), header, &parts.uri)?;
        parts.extensions.insert(user.clone());
        Ok(user)
    }
}
