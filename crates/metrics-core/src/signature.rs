//! Signed-payload verification.
//!
//! GitHub signs every webhook body with HMAC-SHA256 under the shared
//! webhook secret and sends the hex digest in `X-Hub-Signature-256` as
//! `sha256=<hex>`. Verification recomputes the digest and compares in
//! constant time. A missing prefix, bad hex, and a digest mismatch are all
//! the same opaque error: the response must not tell a forger which check
//! failed.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Required signature header prefix.
const SIGNATURE_PREFIX: &str = "sha256=";

/// Signature verification failure.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    /// The signature header is absent, malformed, or does not match the
    /// payload.
    #[error("invalid signature")]
    InvalidSignature,
}

/// Verify `header` against `payload` under `secret`.
///
/// # Examples
///
/// ```
/// use metrics_core::signature::{compute_signature, verify_signature};
///
/// let payload = br#"{"a":1}"#;
/// let header = compute_signature(payload, "s");
/// assert!(verify_signature(payload, &header, "s").is_ok());
/// assert!(verify_signature(payload, &header, "wrong").is_err());
/// ```
///
/// # Errors
///
/// Returns `SignatureError::InvalidSignature` in every failure mode.
pub fn verify_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
) -> Result<(), SignatureError> {
    let hex_digest = header
        .strip_prefix(SIGNATURE_PREFIX)
        .ok_or(SignatureError::InvalidSignature)?;

    let claimed = hex::decode(hex_digest).map_err(|_| SignatureError::InvalidSignature)?;

    let expected = hmac_sha256(payload, secret)?;

    // Length differs only when the header is malformed; the digest compare
    // itself is constant-time.
    if claimed.len() != expected.len() {
        return Err(SignatureError::InvalidSignature);
    }

    if bool::from(claimed.ct_eq(&expected)) {
        Ok(())
    } else {
        Err(SignatureError::InvalidSignature)
    }
}

/// Compute the signature header value for `payload` under `secret`.
///
/// Used by tests and local tooling to produce valid deliveries.
pub fn compute_signature(payload: &[u8], secret: &str) -> String {
    let digest = hmac_sha256(payload, secret).expect("HMAC accepts keys of any length");
    format!("{}{}", SIGNATURE_PREFIX, hex::encode(digest))
}

fn hmac_sha256(payload: &[u8], secret: &str) -> Result<Vec<u8>, SignatureError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| SignatureError::InvalidSignature)?;
    mac.update(payload);
    Ok(mac.finalize().into_bytes().to_vec())
}

#[cfg(test)]
#[path = "signature_tests.rs"]
mod tests;
