use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use shared::AppResult;

use crate::core::ServerState;
use crate::payments::SIGNATURE_HEADER;
use crate::webhooks::WebhookOutcome;

/// Handle one gateway delivery
///
/// Takes the raw body so the signature is checked over the exact bytes sent.
/// Every processed or deduplicated event is acknowledged with 200; a bad
/// signature is a 400 and a storage fault a 5xx, which the gateway retries.
pub async fn handle_webhook(
    State(state): State<ServerState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<WebhookOutcome>> {
    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
    let outcome = state.webhooks.handle(&body, signature)?;
    Ok(Json(outcome))
}
