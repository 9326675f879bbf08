//! Stripe REST client (no SDK dependency)
//!
//! Every call gets a fresh correlation id that is logged with each attempt.
//! POSTs carry the caller's `Idempotency-Key` so a retried request can never
//! create a second charge or refund. Network failures, 429 and 5xx are
//! retried with exponential backoff; other 4xx are returned immediately.

use async_trait::async_trait;
use serde::Deserialize;
use shared::order::Money;
use std::time::Duration;

use super::gateway::{
    CreateIntentRequest, CreateRefundRequest, GatewayError, GatewayErrorKind, GatewayRefund,
    GatewayRefundStatus, IntentStatus, PaymentGateway, PaymentIntent,
};

const RETRY_BASE_DELAY_MS: u64 = 500;
const RETRY_MAX_DELAY_MS: u64 = 4_000;

#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub api_base: String,
    pub secret_key: String,
    pub timeout: Duration,
    pub max_retries: u32,
}

pub struct StripeGateway {
    client: reqwest::Client,
    config: StripeConfig,
}

impl std::fmt::Debug for StripeGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeGateway")
            .field("api_base", &self.config.api_base)
            .field("max_retries", &self.config.max_retries)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct StripeIntent {
    id: String,
    client_secret: Option<String>,
    status: IntentStatus,
    amount: i64,
    #[serde(default)]
    metadata: std::collections::HashMap<String, String>,
    last_payment_error: Option<StripeErrorBody>,
}

impl From<StripeIntent> for PaymentIntent {
    fn from(intent: StripeIntent) -> Self {
        PaymentIntent {
            id: intent.id,
            client_secret: intent.client_secret,
            status: intent.status,
            amount: Money::from_pence(intent.amount),
            order_id: intent.metadata.get("order_id").cloned(),
            last_error: intent.last_payment_error.and_then(|e| e.message),
        }
    }
}

#[derive(Debug, Deserialize)]
struct StripeRefund {
    id: String,
    status: GatewayRefundStatus,
    failure_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    #[serde(rename = "type")]
    kind: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeErrorEnvelope {
    error: StripeErrorBody,
}

impl StripeGateway {
    pub fn new(config: StripeConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GatewayError::new(GatewayErrorKind::Network, e.to_string(), "init"))?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base.trim_end_matches('/'), path)
    }

    /// Send the request built by `build`, retrying transient failures
    async fn execute<T, F>(&self, operation: &str, build: F) -> Result<T, GatewayError>
    where
        T: serde::de::DeserializeOwned,
        F: Fn() -> reqwest::RequestBuilder,
    {
        let correlation_id = uuid::Uuid::new_v4().to_string();
        let mut attempt = 0u32;

        loop {
            let result = self.send_once::<T>(build(), &correlation_id).await;
            match result {
                Ok(value) => {
                    tracing::debug!(target: "payment", operation, %correlation_id, attempt, "Gateway call succeeded");
                    return Ok(value);
                }
                Err(err) if err.is_retryable() && attempt < self.config.max_retries => {
                    let delay = backoff_delay(attempt);
                    tracing::warn!(
                        target: "payment",
                        operation,
                        %correlation_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err.message,
                        "Gateway call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    tracing::error!(
                        target: "payment",
                        operation,
                        %correlation_id,
                        attempt,
                        kind = ?err.kind,
                        status = ?err.status,
                        error = %err.message,
                        "Gateway call failed"
                    );
                    return Err(err);
                }
            }
        }
    }

    async fn send_once<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        correlation_id: &str,
    ) -> Result<T, GatewayError> {
        let resp = request.send().await.map_err(|e| {
            let kind = if e.is_timeout() {
                GatewayErrorKind::Timeout
            } else {
                GatewayErrorKind::Network
            };
            GatewayError::new(kind, e.to_string(), correlation_id)
        })?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| {
            GatewayError::new(GatewayErrorKind::Network, e.to_string(), correlation_id)
        })?;

        if !status.is_success() {
            return Err(classify_error(status.as_u16(), &body, correlation_id));
        }

        serde_json::from_str(&body).map_err(|e| {
            GatewayError::new(
                GatewayErrorKind::Decode,
                format!("unexpected gateway response: {}", e),
                correlation_id,
            )
            .with_status(status.as_u16())
        })
    }
}

/// Map a non-2xx response to an error kind
fn classify_error(status: u16, body: &str, correlation_id: &str) -> GatewayError {
    let parsed = serde_json::from_str::<StripeErrorEnvelope>(body).ok();
    let message = parsed
        .as_ref()
        .and_then(|e| e.error.message.clone())
        .unwrap_or_else(|| format!("gateway returned HTTP {}", status));
    let is_card_error = parsed
        .as_ref()
        .and_then(|e| e.error.kind.as_deref())
        .is_some_and(|kind| kind == "card_error");

    let kind = match status {
        429 => GatewayErrorKind::RateLimited,
        500..=599 => GatewayErrorKind::Server,
        402 => GatewayErrorKind::CardDeclined,
        _ if is_card_error => GatewayErrorKind::CardDeclined,
        _ => GatewayErrorKind::InvalidRequest,
    };
    GatewayError::new(kind, message, correlation_id).with_status(status)
}

/// `base * 2^attempt`, capped
fn backoff_delay(attempt: u32) -> Duration {
    let ms = RETRY_BASE_DELAY_MS
        .saturating_mul(2u64.saturating_pow(attempt))
        .min(RETRY_MAX_DELAY_MS);
    Duration::from_millis(ms)
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn create_payment_intent(
        &self,
        request: &CreateIntentRequest,
    ) -> Result<PaymentIntent, GatewayError> {
        let form = [
            ("amount", request.amount.pence().to_string()),
            ("currency", request.currency.clone()),
            ("metadata[order_id]", request.order_id.clone()),
            ("automatic_payment_methods[enabled]", "true".to_string()),
        ];
        let url = self.url("/v1/payment_intents");
        let intent: StripeIntent = self
            .execute("create_payment_intent", || {
                self.client
                    .post(&url)
                    .basic_auth(&self.config.secret_key, None::<&str>)
                    .header("Idempotency-Key", &request.idempotency_key)
                    .form(&form)
            })
            .await?;
        Ok(intent.into())
    }

    async fn retrieve_payment_intent(
        &self,
        intent_id: &str,
    ) -> Result<PaymentIntent, GatewayError> {
        let url = self.url(&format!("/v1/payment_intents/{}", intent_id));
        let intent: StripeIntent = self
            .execute("retrieve_payment_intent", || {
                self.client
                    .get(&url)
                    .basic_auth(&self.config.secret_key, None::<&str>)
            })
            .await?;
        Ok(intent.into())
    }

    async fn create_refund(
        &self,
        request: &CreateRefundRequest,
    ) -> Result<GatewayRefund, GatewayError> {
        let form = [
            ("payment_intent", request.payment_intent_id.clone()),
            ("amount", request.amount.pence().to_string()),
            ("metadata[refund_id]", request.refund_id.clone()),
        ];
        let url = self.url("/v1/refunds");
        let refund: StripeRefund = self
            .execute("create_refund", || {
                self.client
                    .post(&url)
                    .basic_auth(&self.config.secret_key, None::<&str>)
                    .header("Idempotency-Key", &request.idempotency_key)
                    .form(&form)
            })
            .await?;
        Ok(GatewayRefund {
            id: refund.id,
            status: refund.status,
            failure_reason: refund.failure_reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::http::StatusCode;
    use axum::routing::post;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_is_capped() {
        assert_eq!(backoff_delay(0), Duration::from_millis(500));
        assert_eq!(backoff_delay(2), Duration::from_millis(2_000));
        assert_eq!(backoff_delay(3), Duration::from_millis(4_000));
        assert_eq!(backoff_delay(10), Duration::from_millis(4_000));
    }

    #[test]
    fn test_classify_card_error_is_not_retryable() {
        let body = r#"{"error":{"type":"card_error","message":"Your card was declined."}}"#;
        let err = classify_error(400, body, "corr-1");
        assert_eq!(err.kind, GatewayErrorKind::CardDeclined);
        assert_eq!(err.message, "Your card was declined.");
        assert!(!err.is_retryable());

        let err = classify_error(503, "upstream unavailable", "corr-2");
        assert_eq!(err.kind, GatewayErrorKind::Server);
        assert!(err.is_retryable());
        assert_eq!(classify_error(429, "", "c").kind, GatewayErrorKind::RateLimited);
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn gateway(api_base: String, max_retries: u32) -> StripeGateway {
        StripeGateway::new(StripeConfig {
            api_base,
            secret_key: "sk_test".into(),
            timeout: Duration::from_secs(5),
            max_retries,
        })
        .unwrap()
    }

    fn request() -> CreateIntentRequest {
        CreateIntentRequest {
            order_id: "ORD-00001".into(),
            amount: Money::from_pence(766),
            currency: "gbp".into(),
            idempotency_key: "ORD-00001:intent".into(),
        }
    }

    #[tokio::test]
    async fn test_server_errors_are_retried_then_succeed() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let router = Router::new().route(
            "/v1/payment_intents",
            post(move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 1 {
                        (StatusCode::SERVICE_UNAVAILABLE, String::new())
                    } else {
                        (
                            StatusCode::OK,
                            r#"{"id":"pi_1","client_secret":"pi_1_secret","status":"requires_payment_method","amount":766,"metadata":{"order_id":"ORD-00001"}}"#.to_string(),
                        )
                    }
                }
            }),
        );
        let gateway = gateway(serve(router).await, 3);

        let intent = gateway.create_payment_intent(&request()).await.unwrap();
        assert_eq!(intent.id, "pi_1");
        assert_eq!(intent.amount, Money::from_pence(766));
        assert_eq!(intent.order_id.as_deref(), Some("ORD-00001"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let router = Router::new().route(
            "/v1/payment_intents",
            post(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    (
                        StatusCode::BAD_REQUEST,
                        r#"{"error":{"type":"invalid_request_error","message":"Amount must be at least 30p"}}"#,
                    )
                }
            }),
        );
        let gateway = gateway(serve(router).await, 3);

        let err = gateway.create_payment_intent(&request()).await.unwrap_err();
        assert_eq!(err.kind, GatewayErrorKind::InvalidRequest);
        assert_eq!(err.status, Some(400));
        assert!(!err.correlation_id.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
