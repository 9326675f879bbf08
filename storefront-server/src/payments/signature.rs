//! Webhook signature verification (HMAC-SHA256)
//!
//! Header format: `t=<unix seconds>,v1=<hex>[,v1=<hex>...]` where each `v1`
//! is `hex(hmac_sha256(secret, "<t>.<raw body>"))`. Several `v1` entries may
//! be present during secret rotation; any match is accepted.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the signature
pub const SIGNATURE_HEADER: &str = "Stripe-Signature";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("missing signature header")]
    MissingHeader,

    #[error("malformed signature header: {0}")]
    Malformed(&'static str),

    #[error("signature mismatch")]
    Mismatch,

    #[error("timestamp {timestamp} outside tolerance (now {now})")]
    OutsideTolerance { timestamp: i64, now: i64 },

    #[error("invalid signing key")]
    InvalidKey,
}

/// Verify `header` against the raw `payload`
///
/// Returns the signed timestamp on success.
pub fn verify_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    tolerance_secs: i64,
    now_secs: i64,
) -> Result<i64, SignatureError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        let part = part.trim();
        if let Some(t) = part.strip_prefix("t=") {
            timestamp = Some(t);
        } else if let Some(v) = part.strip_prefix("v1=") {
            signatures.push(v);
        }
    }

    let timestamp = timestamp.ok_or(SignatureError::Malformed("missing timestamp"))?;
    if signatures.is_empty() {
        return Err(SignatureError::Malformed("missing v1 signature"));
    }
    let ts: i64 = timestamp
        .parse()
        .map_err(|_| SignatureError::Malformed("invalid timestamp"))?;

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::InvalidKey)?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);

    // Constant-time comparison via verify_slice
    let matched = signatures.iter().any(|sig| {
        hex::decode(sig)
            .map(|bytes| mac.clone().verify_slice(&bytes).is_ok())
            .unwrap_or(false)
    });
    if !matched {
        return Err(SignatureError::Mismatch);
    }

    if (now_secs - ts).abs() > tolerance_secs {
        return Err(SignatureError::OutsideTolerance {
            timestamp: ts,
            now: now_secs,
        });
    }

    Ok(ts)
}

/// Build a signature header for `payload` (fakes and local tooling)
pub fn sign_payload(payload: &[u8], secret: &str, timestamp: i64) -> String {
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return format!("t={}", timestamp),
    };
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    format!(
        "t={},v1={}",
        timestamp,
        hex::encode(mac.finalize().into_bytes())
    )
}
