//! Error types for GitHub App SDK operations.
//!
//! Errors carry the classification the jobs need to decide between retrying,
//! refreshing credentials, or recording a permanent per-item outcome.

use thiserror::Error;

/// Authentication-related errors.
///
/// Covers credential problems, JWT minting failures, and installation token
/// exchange failures. `is_transient` distinguishes conditions worth retrying
/// from configuration problems that will not fix themselves.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The App private key is invalid or malformed (non-retryable).
    #[error("Invalid private key: {message}")]
    InvalidPrivateKey { message: String },

    /// JWT encoding failed (non-retryable).
    #[error("JWT generation failed: {message}")]
    JwtGenerationFailed { message: String },

    /// GitHub rejected the token exchange.
    #[error("Token exchange failed: {status} - {message}")]
    TokenExchangeFailed { status: u16, message: String },

    /// Network connectivity or transport error.
    #[error("Network error: {0}")]
    Network(String),
}

impl AuthError {
    /// Check whether this error may succeed if retried.
    ///
    /// Server errors and rate limiting during token exchange are transient;
    /// bad credentials are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::InvalidPrivateKey { .. } => false,
            Self::JwtGenerationFailed { .. } => false,
            Self::TokenExchangeFailed { status, .. } => *status >= 500 || *status == 429,
            Self::Network(_) => true,
        }
    }
}

/// Errors during GitHub API operations (REST and GraphQL).
///
/// The permanent variants (`LogsExpired`, `RepositoryGone`) are terminal for
/// the item being processed and are converted into recorded outcomes by the
/// jobs; everything transient is retried or surfaced as a run failure.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Authentication failed while minting or exchanging tokens.
    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),

    /// GitHub returned 401 for a request that carried a token.
    ///
    /// When this arrives after previously successful calls it signals an
    /// expired installation token; callers should invalidate the cached
    /// token and retry a bounded number of times.
    #[error("GitHub rejected credentials (401)")]
    AuthenticationFailed,

    /// The workflow log archive is no longer available (404/410 on the
    /// logs URL). Permanent for the delivery.
    #[error("Workflow logs expired or not found: {status}")]
    LogsExpired { status: u16 },

    /// GraphQL could not resolve the repository. Permanent for the commit;
    /// carries GitHub's message verbatim for the status note.
    #[error("Repository gone: {message}")]
    RepositoryGone { message: String },

    /// Rate limit exhausted.
    #[error("Rate limit exceeded")]
    RateLimited,

    /// Any other HTTP error response.
    #[error("HTTP error: {status} - {message}")]
    Http { status: u16, message: String },

    /// GraphQL responded with errors that are not a repository resolution
    /// failure.
    #[error("GraphQL error: {message}")]
    GraphQl { message: String },

    /// Failed to parse a response body.
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP transport error (network, TLS, timeout).
    #[error("HTTP client error: {0}")]
    Transport(#[from] reqwest::Error),
}

impl ApiError {
    /// Classify a non-success HTTP status for a generic API call.
    pub(crate) fn from_status(status: u16, message: String) -> Self {
        match status {
            401 => Self::AuthenticationFailed,
            429 => Self::RateLimited,
            _ => Self::Http { status, message },
        }
    }

    /// Check whether this error may succeed if retried.
    ///
    /// Permanent per-item outcomes (`LogsExpired`, `RepositoryGone`) and
    /// client errors are not transient. A 401 is handled separately through
    /// the token-refresh path, so it is not considered transient either.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Auth(e) => e.is_transient(),
            Self::AuthenticationFailed => false,
            Self::LogsExpired { .. } => false,
            Self::RepositoryGone { .. } => false,
            Self::RateLimited => true,
            Self::Http { status, .. } => *status >= 500,
            Self::GraphQl { .. } => false,
            Self::Json(_) => false,
            Self::Transport(_) => true,
        }
    }

    /// Check whether this error is a terminal outcome for the item being
    /// processed, as opposed to a failure of the run.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            Self::LogsExpired { .. } | Self::RepositoryGone { .. }
        )
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
