//! Webhook signatures
//!
//! Header format: `t=<unix seconds>,v1=<hex hmac_sha256("<t>.<payload>")>`.
//! Several `v1` entries may be present during secret rotation.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::AppError;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the webhook signature
pub const SIGNATURE_HEADER: &str = "Payment-Signature";

#[derive(Debug, PartialEq, Eq)]
struct ParsedSignature {
    timestamp: i64,
    signatures: Vec<Vec<u8>>,
}

fn parse_signature_header(header: &str) -> Result<ParsedSignature, AppError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => {
                timestamp = Some(value.parse::<i64>().map_err(|_| AppError::InvalidSignature)?);
            }
            "v1" => {
                if let Ok(bytes) = hex::decode(value) {
                    signatures.push(bytes);
                }
            }
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(AppError::InvalidSignature)?;
    if signatures.is_empty() {
        return Err(AppError::InvalidSignature);
    }

    Ok(ParsedSignature {
        timestamp,
        signatures,
    })
}

fn signed_mac(payload: &[u8], secret: &str, timestamp: i64) -> Result<HmacSha256, AppError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::Internal(anyhow::anyhow!("invalid HMAC key: {e}")))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(mac)
}

/// Produce a signature header value for `payload`
pub fn sign_webhook_payload(
    payload: &[u8],
    secret: &str,
    timestamp: i64,
) -> Result<String, AppError> {
    let signature = signed_mac(payload, secret, timestamp)?.finalize().into_bytes();
    Ok(format!("t={},v1={}", timestamp, hex::encode(signature)))
}

/// Verify a webhook signature header against the raw request body
///
/// # Errors
/// `InvalidSignature` if the header is malformed, the timestamp is outside
/// `tolerance_seconds` of `now`, or no `v1` entry matches
pub fn verify_webhook_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    tolerance_seconds: i64,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    let parsed = parse_signature_header(header)?;

    let within_tolerance = now
        .timestamp()
        .checked_sub(parsed.timestamp)
        .map(i64::unsigned_abs)
        .is_some_and(|age| age <= tolerance_seconds.unsigned_abs());
    if !within_tolerance {
        tracing::warn!(
            timestamp = parsed.timestamp,
            "Webhook signature timestamp outside tolerance"
        );
        return Err(AppError::InvalidSignature);
    }

    let mac = signed_mac(payload, secret, parsed.timestamp)?;
    let matched = parsed
        .signatures
        .iter()
        .any(|signature| mac.clone().verify_slice(signature).is_ok());

    if matched {
        Ok(())
    } else {
        Err(AppError::InvalidSignature)
    }
}
