use rust_decimal::Decimal;
use shared::order::Money;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use super::{Result, ServerError};
use crate::auth::DEV_JWT_SECRET;
use crate::orders::PricingPolicy;
use crate::payments::StripeConfig;

const DEV_GATEWAY_SECRET_KEY: &str = "sk_test_development";
const DEV_WEBHOOK_SECRET: &str = "whsec_development";

/// Server configuration
///
/// # Environment variables
///
/// | Variable | Default | Meaning |
/// |----------|---------|---------|
/// | ENVIRONMENT | development | development / staging / production |
/// | WORK_DIR | ./work_dir | database file and logs |
/// | HTTP_PORT | 8080 | listen port |
/// | LOG_LEVEL | info | tracing filter |
/// | LOG_JSON | false | JSON console output |
/// | JWT_SECRET | dev fallback | HS256 secret for actor tokens |
/// | PAYMENT_GATEWAY_API_BASE | https://api.stripe.com | gateway REST base |
/// | PAYMENT_GATEWAY_SECRET_KEY | dev fallback | gateway API key |
/// | PAYMENT_GATEWAY_WEBHOOK_SECRET | dev fallback | webhook signing secret |
/// | PAYMENT_GATEWAY_TIMEOUT_MS | 20000 | per-call timeout |
/// | PAYMENT_GATEWAY_MAX_RETRIES | 3 | retries on transient failure |
/// | WEBHOOK_TOLERANCE_SECS | 300 | signature timestamp skew |
/// | WEBHOOK_RETENTION_DAYS | 30 | dedupe record retention |
/// | FREE_DELIVERY_THRESHOLD | 5.00 | delivery is free at or above this subtotal |
/// | DELIVERY_FEE | 2.50 | flat delivery fee below the threshold |
/// | CURRENCY | gbp | currency sent to the gateway |
/// | NOTIFICATION_WEBHOOK_URL | unset | optional HTTP notification sink |
///
/// Outside `development` the three secrets must be set explicitly.
#[derive(Debug, Clone)]
pub struct Config {
    pub environment: String,
    pub work_dir: PathBuf,
    pub http_port: u16,
    pub log_level: String,
    pub log_json: bool,
    pub jwt_secret: String,
    pub gateway_api_base: String,
    pub gateway_secret_key: String,
    pub webhook_secret: String,
    pub gateway_timeout_ms: u64,
    pub gateway_max_retries: u32,
    pub webhook_tolerance_secs: i64,
    pub webhook_retention_days: i64,
    pub free_delivery_threshold: Money,
    pub delivery_fee: Money,
    pub currency: String,
    pub notification_webhook_url: Option<String>,
}

impl Config {
    /// Load from the process environment (and `.env` if present)
    pub fn from_env() -> Result<Self> {
        let _ = dotenv::dotenv();
        Self::from_source(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup
    pub fn from_source(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let environment = get("ENVIRONMENT").unwrap_or_else(|| "development".into());
        let development = environment == "development";

        let secret = |key: &str, fallback: &str| -> Result<String> {
            match get(key).filter(|v| !v.trim().is_empty()) {
                Some(value) => Ok(value),
                None if development => {
                    tracing::warn!(variable = key, "Secret not set, using development fallback");
                    Ok(fallback.to_string())
                }
                None => Err(ServerError::Config(format!(
                    "{} must be set when ENVIRONMENT={}",
                    key, environment
                ))),
            }
        };

        Ok(Self {
            work_dir: get("WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./work_dir")),
            http_port: parse(&get, "HTTP_PORT", 8080)?,
            log_level: get("LOG_LEVEL").unwrap_or_else(|| "info".into()),
            log_json: parse(&get, "LOG_JSON", false)?,
            jwt_secret: secret("JWT_SECRET", DEV_JWT_SECRET)?,
            gateway_api_base: get("PAYMENT_GATEWAY_API_BASE")
                .unwrap_or_else(|| "https://api.stripe.com".into()),
            gateway_secret_key: secret("PAYMENT_GATEWAY_SECRET_KEY", DEV_GATEWAY_SECRET_KEY)?,
            webhook_secret: secret("PAYMENT_GATEWAY_WEBHOOK_SECRET", DEV_WEBHOOK_SECRET)?,
            gateway_timeout_ms: parse(&get, "PAYMENT_GATEWAY_TIMEOUT_MS", 20_000)?,
            gateway_max_retries: parse(&get, "PAYMENT_GATEWAY_MAX_RETRIES", 3)?,
            webhook_tolerance_secs: parse(&get, "WEBHOOK_TOLERANCE_SECS", 300)?,
            webhook_retention_days: parse(&get, "WEBHOOK_RETENTION_DAYS", 30)?,
            free_delivery_threshold: money(&get, "FREE_DELIVERY_THRESHOLD", Money::from_pence(500))?,
            delivery_fee: money(&get, "DELIVERY_FEE", Money::from_pence(250))?,
            currency: get("CURRENCY")
                .map(|c| c.to_lowercase())
                .unwrap_or_else(|| "gbp".into()),
            notification_webhook_url: get("NOTIFICATION_WEBHOOK_URL").filter(|u| !u.is_empty()),
            environment,
        })
    }

    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }

    pub fn database_path(&self) -> PathBuf {
        self.work_dir.join("storefront.redb")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.work_dir.join("logs")
    }

    pub fn pricing(&self) -> PricingPolicy {
        PricingPolicy {
            free_delivery_threshold: self.free_delivery_threshold,
            delivery_fee: self.delivery_fee,
            ..PricingPolicy::default()
        }
    }

    pub fn stripe(&self) -> StripeConfig {
        StripeConfig {
            api_base: self.gateway_api_base.clone(),
            secret_key: self.gateway_secret_key.clone(),
            timeout: Duration::from_millis(self.gateway_timeout_ms),
            max_retries: self.gateway_max_retries,
        }
    }
}

fn parse<T: FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T> {
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ServerError::Config(format!("{} has an invalid value '{}'", key, raw))),
        None => Ok(default),
    }
}

/// Parse a pounds amount such as `5.00`
fn money(get: &impl Fn(&str) -> Option<String>, key: &str, default: Money) -> Result<Money> {
    let Some(raw) = get(key) else {
        return Ok(default);
    };
    Decimal::from_str(raw.trim())
        .ok()
        .and_then(Money::from_decimal)
        .filter(|m| !m.is_negative())
        .ok_or_else(|| ServerError::Config(format!("{} has an invalid amount '{}'", key, raw)))
}
