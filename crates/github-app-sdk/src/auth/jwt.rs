//! App JWT minting.
//!
//! GitHub App authentication requires an RS256-signed JWT whose claims are
//! `iss` (app ID), `iat`, and `exp` (at most ten minutes after issuance).
//! The JWT authorizes app-level endpoints: the hook delivery index,
//! redelivery, and installation token exchange.

use chrono::{Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::RsaPrivateKey;
use serde::Serialize;

use super::{AppId, AppJwt, PrivateKey};
use crate::error::AuthError;

/// JWT claims for GitHub App authentication.
#[derive(Debug, Serialize)]
struct Claims {
    /// The GitHub App ID.
    iss: u64,
    /// Issued-at, backdated sixty seconds to absorb clock drift between
    /// this host and GitHub.
    iat: i64,
    /// Expiration timestamp.
    exp: i64,
}

/// Validate that `pem` parses as an RSA private key.
///
/// Accepts PKCS#1 and PKCS#8 encodings.
pub(crate) fn validate_rsa_pem(pem: &str) -> Result<(), AuthError> {
    if RsaPrivateKey::from_pkcs1_pem(pem).is_ok() {
        return Ok(());
    }
    RsaPrivateKey::from_pkcs8_pem(pem)
        .map(|_| ())
        .map_err(|e| AuthError::InvalidPrivateKey {
            message: format!("not a valid RSA private key: {}", e),
        })
}

/// Mint a signed App JWT valid for `ttl`.
///
/// # Errors
///
/// Returns `AuthError::InvalidPrivateKey` if the key cannot be used for
/// signing and `AuthError::JwtGenerationFailed` if encoding fails.
pub(crate) fn mint_app_jwt(
    key: &PrivateKey,
    app_id: AppId,
    ttl: Duration,
) -> Result<AppJwt, AuthError> {
    let now = Utc::now();
    let expires_at = now + ttl;

    let claims = Claims {
        iss: app_id.as_u64(),
        iat: (now - Duration::seconds(60)).timestamp(),
        exp: expires_at.timestamp(),
    };

    let encoding_key =
        EncodingKey::from_rsa_pem(key.pem_bytes()).map_err(|e| AuthError::InvalidPrivateKey {
            message: format!("failed to build signing key: {}", e),
        })?;

    let header = Header::new(Algorithm::RS256);

    let token =
        encode(&header, &claims, &encoding_key).map_err(|e| AuthError::JwtGenerationFailed {
            message: format!("failed to encode JWT: {}", e),
        })?;

    Ok(AppJwt::new(token, expires_at))
}

#[cfg(test)]
#[path = "jwt_tests.rs"]
pub(crate) mod tests;
