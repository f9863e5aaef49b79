// SPDX-License-Identifier: MIT OR Apache-2.0
//! Authentication: shared API key plus a per-upload HMAC signature.
//!
//! The signature covers `sha256_hex(file_bytes) || canonical_json(options)
//! || timestamp`, where `timestamp` is decimal milliseconds since the Unix
//! epoch carried as a form field and accepted within ±300 s of server time.

use crate::ApiError;
use axum::http::HeaderMap;
use cdf_error::ErrorCode;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Clock skew tolerance for the signature timestamp.
pub const TIMESTAMP_TOLERANCE_MS: i64 = 300_000;

fn unauthorized(message: &str) -> ApiError {
    ApiError::new(ErrorCode::Unauthorized, message)
}

/// Compare two secrets without leaking where they diverge: hashing first
/// makes the comparison independent of both content and length.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    Sha256::digest(a) == Sha256::digest(b)
}

/// Check the `X-API-Key` header against the shared secret.
pub fn verify_api_key(headers: &HeaderMap, expected: &str) -> Result<(), ApiError> {
    let provided = headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| unauthorized("missing X-API-Key header"))?;
    if !constant_time_eq(provided.as_bytes(), expected.as_bytes()) {
        return Err(unauthorized("invalid API key"));
    }
    Ok(())
}

/// Compute the hex signature for an upload; shared with tests and clients.
pub fn sign_upload(
    secret: &str,
    file_sha256_hex: &str,
    canonical_options: &str,
    timestamp: &str,
) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(file_sha256_hex.as_bytes());
    mac.update(canonical_options.as_bytes());
    mac.update(timestamp.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Verify the `X-Signature` header for an upload.
pub fn verify_signature(
    headers: &HeaderMap,
    secret: &str,
    file_sha256_hex: &str,
    canonical_options: &str,
    timestamp: &str,
    now_ms: i64,
) -> Result<(), ApiError> {
    let provided = headers
        .get("x-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| unauthorized("missing X-Signature header"))?;

    let ts: i64 = timestamp
        .parse()
        .map_err(|_| unauthorized("malformed timestamp"))?;
    if (now_ms - ts).abs() > TIMESTAMP_TOLERANCE_MS {
        return Err(unauthorized("stale timestamp"));
    }

    let signature =
        hex::decode(provided).map_err(|_| unauthorized("malformed signature"))?;

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(file_sha256_hex.as_bytes());
    mac.update(canonical_options.as_bytes());
    mac.update(timestamp.as_bytes());
    mac.verify_slice(&signature)
        .map_err(|_| unauthorized("invalid signature"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
