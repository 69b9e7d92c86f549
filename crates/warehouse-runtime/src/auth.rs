//! Access tokens for Google service calls.
//!
//! Workloads running on Google infrastructure fetch service-account tokens
//! from the instance metadata server; tests inject a static token. The
//! object-store and lease code in the core crate reuses the same source.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tokio::sync::RwLock;

use crate::error::WarehouseError;

/// Metadata server token endpoint for the default service account.
const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Refresh margin before a cached token's expiry.
const REFRESH_MARGIN_SECONDS: i64 = 120;

/// Source of bearer tokens for Google API calls.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Get a currently valid bearer token.
    async fn token(&self) -> Result<String, WarehouseError>;
}

/// A fixed token, for tests and local development against emulators.
#[derive(Debug, Clone)]
pub struct StaticTokenSource {
    token: String,
}

impl StaticTokenSource {
    /// Wrap a fixed token string.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenSource for StaticTokenSource {
    async fn token(&self) -> Result<String, WarehouseError> {
        Ok(self.token.clone())
    }
}

#[derive(Debug, Deserialize)]
struct MetadataTokenResponse {
    access_token: String,
    expires_in: i64,
}

struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

/// Token source backed by the instance metadata server.
///
/// Tokens are cached and refreshed two minutes before expiry; the cache is
/// single-writer with reader fan-out.
pub struct MetadataTokenSource {
    http: reqwest::Client,
    url: String,
    cached: RwLock<Option<CachedToken>>,
}

impl MetadataTokenSource {
    /// Create a source against the standard metadata endpoint.
    pub fn new(http: reqwest::Client) -> Self {
        Self::with_url(http, METADATA_TOKEN_URL)
    }

    /// Create a source against a custom endpoint (tests).
    pub fn with_url(http: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
            cached: RwLock::new(None),
        }
    }

    async fn fetch(&self) -> Result<CachedToken, WarehouseError> {
        let response = self
            .http
            .get(&self.url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|e| WarehouseError::ConnectionFailed {
                message: format!("metadata server unreachable: {}", e),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(WarehouseError::AuthenticationFailed {
                message: format!("metadata server answered {}", status),
            });
        }

        let parsed: MetadataTokenResponse =
            response
                .json()
                .await
                .map_err(|e| WarehouseError::AuthenticationFailed {
                    message: format!("invalid metadata token response: {}", e),
                })?;

        Ok(CachedToken {
            token: parsed.access_token,
            expires_at: Utc::now() + Duration::seconds(parsed.expires_in),
        })
    }
}

#[async_trait]
impl TokenSource for MetadataTokenSource {
    async fn token(&self) -> Result<String, WarehouseError> {
        {
            let cached = self.cached.read().await;
            if let Some(entry) = cached.as_ref() {
                if Utc::now() + Duration::seconds(REFRESH_MARGIN_SECONDS) < entry.expires_at {
                    return Ok(entry.token.clone());
                }
            }
        }

        let fresh = self.fetch().await?;
        let token = fresh.token.clone();
        *self.cached.write().await = Some(fresh);
        Ok(token)
    }
}

impl std::fmt::Debug for MetadataTokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataTokenSource")
            .field("url", &self.url)
            .finish()
    }
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
