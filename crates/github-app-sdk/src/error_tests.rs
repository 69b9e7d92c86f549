//! Tests for SDK error classification.

use super::*;

#[test]
fn test_auth_error_transience() {
    assert!(!AuthError::InvalidPrivateKey {
        message: "bad pem".to_string()
    }
    .is_transient());

    assert!(!AuthError::JwtGenerationFailed {
        message: "encode".to_string()
    }
    .is_transient());

    assert!(AuthError::TokenExchangeFailed {
        status: 503,
        message: "unavailable".to_string()
    }
    .is_transient());

    assert!(AuthError::TokenExchangeFailed {
        status: 429,
        message: "slow down".to_string()
    }
    .is_transient());

    assert!(!AuthError::TokenExchangeFailed {
        status: 404,
        message: "no installation".to_string()
    }
    .is_transient());

    assert!(AuthError::Network("connection reset".to_string()).is_transient());
}

#[test]
fn test_api_error_transience() {
    assert!(ApiError::RateLimited.is_transient());
    assert!(ApiError::Http {
        status: 502,
        message: "bad gateway".to_string()
    }
    .is_transient());

    assert!(!ApiError::Http {
        status: 422,
        message: "unprocessable".to_string()
    }
    .is_transient());

    assert!(!ApiError::AuthenticationFailed.is_transient());
    assert!(!ApiError::LogsExpired { status: 410 }.is_transient());
    assert!(!ApiError::RepositoryGone {
        message: "Could not resolve to a Repository".to_string()
    }
    .is_transient());
}

#[test]
fn test_permanent_outcomes() {
    assert!(ApiError::LogsExpired { status: 404 }.is_permanent());
    assert!(ApiError::RepositoryGone {
        message: "gone".to_string()
    }
    .is_permanent());

    assert!(!ApiError::RateLimited.is_permanent());
    assert!(!ApiError::AuthenticationFailed.is_permanent());
}

#[test]
fn test_from_status_classification() {
    assert!(matches!(
        ApiError::from_status(401, "unauthorized".to_string()),
        ApiError::AuthenticationFailed
    ));
    assert!(matches!(
        ApiError::from_status(429, "rate".to_string()),
        ApiError::RateLimited
    ));
    assert!(matches!(
        ApiError::from_status(500, "oops".to_string()),
        ApiError::Http { status: 500, .. }
    ));
}
