//! GitHub App authentication.
//!
//! This module provides:
//! - ID types (`AppId`, `InstallationId`)
//! - Credential and token types (`AppCredentials`, `AppJwt`, `InstallationToken`)
//! - Token scoping for installation tokens (`TokenScope`)
//! - The caching `TokenManager` used by the API client
//!
//! App JWTs are short-lived and cached for roughly eight minutes;
//! installation tokens are cached per scope until shortly before GitHub's
//! one-hour expiry. The cache is single-writer with reader fan-out.

pub mod jwt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use tokio::sync::RwLock;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::AuthError;

// ============================================================================
// ID Types
// ============================================================================

/// GitHub App identifier assigned during app registration.
///
/// # Examples
///
/// ```
/// use github_app_sdk::auth::AppId;
///
/// let app_id = AppId::new(123456);
/// assert_eq!(app_id.as_u64(), 123456);
/// assert_eq!(app_id.to_string(), "123456");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AppId(u64);

impl AppId {
    /// Create a new GitHub App ID.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw u64 value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for AppId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AppId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u64>().map(Self::new)
    }
}

/// GitHub App installation identifier for a specific account.
///
/// Used to exchange an App JWT for an installation token scoped to the
/// repositories and permissions of that installation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstallationId(u64);

impl InstallationId {
    /// Create a new installation ID.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw u64 value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for InstallationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for InstallationId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u64>().map(Self::new)
    }
}

// ============================================================================
// Credentials
// ============================================================================

/// PEM-encoded RSA private key for App JWT signing.
///
/// The key material is zeroized on drop and never appears in `Debug` output.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PrivateKey {
    pem: String,
}

impl PrivateKey {
    /// Create a private key from a PEM-encoded string.
    ///
    /// Accepts both PKCS#1 (`BEGIN RSA PRIVATE KEY`) and PKCS#8
    /// (`BEGIN PRIVATE KEY`) encodings, the two forms GitHub App key
    /// downloads have used over time.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidPrivateKey` if the PEM cannot be parsed
    /// as an RSA private key.
    pub fn from_pem(pem: &str) -> Result<Self, AuthError> {
        let pem = pem.trim();

        if pem.is_empty() {
            return Err(AuthError::InvalidPrivateKey {
                message: "PEM string is empty".to_string(),
            });
        }

        jwt::validate_rsa_pem(pem)?;

        Ok(Self {
            pem: pem.to_string(),
        })
    }

    /// Get the PEM bytes for signing.
    pub(crate) fn pem_bytes(&self) -> &[u8] {
        self.pem.as_bytes()
    }
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateKey")
            .field("pem", &"<REDACTED>")
            .finish()
    }
}

/// GitHub App credentials: app ID, installation ID, and signing key.
#[derive(Debug, Clone)]
pub struct AppCredentials {
    /// The GitHub App ID (JWT `iss` claim).
    pub app_id: AppId,

    /// The installation whose tokens this deployment uses.
    pub installation_id: InstallationId,

    /// RSA private key for JWT signing.
    pub private_key: PrivateKey,
}

impl AppCredentials {
    /// Create credentials from the three configured values.
    pub fn new(app_id: AppId, installation_id: InstallationId, private_key: PrivateKey) -> Self {
        Self {
            app_id,
            installation_id,
            private_key,
        }
    }
}

// ============================================================================
// Tokens
// ============================================================================

/// A signed App JWT with its expiry.
#[derive(Debug, Clone)]
pub struct AppJwt {
    token: String,
    expires_at: DateTime<Utc>,
}

impl AppJwt {
    /// Create a JWT from a signed token string and its expiry.
    pub fn new(token: String, expires_at: DateTime<Utc>) -> Self {
        Self { token, expires_at }
    }

    /// The signed token string for the `Authorization: Bearer` header.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// When the token expires.
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Check whether the token has already expired.
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// Check whether the token expires within `margin`.
    pub fn expires_soon(&self, margin: Duration) -> bool {
        Utc::now() + margin >= self.expires_at
    }
}

/// An installation access token with its expiry.
#[derive(Debug, Clone)]
pub struct InstallationToken {
    token: String,
    expires_at: DateTime<Utc>,
}

impl InstallationToken {
    /// Create a token from its string and expiry.
    pub fn new(token: String, expires_at: DateTime<Utc>) -> Self {
        Self { token, expires_at }
    }

    /// The token string for the `Authorization: Bearer` header.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// When the token expires.
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Check whether the token expires within `margin`.
    pub fn expires_soon(&self, margin: Duration) -> bool {
        Utc::now() + margin >= self.expires_at
    }
}

// ============================================================================
// Token Scope
// ============================================================================

/// Repository and permission scoping for an installation token.
///
/// An empty scope requests the installation's full grant. The artifact job
/// narrows tokens to a single repository with `actions: read`.
///
/// # Examples
///
/// ```
/// use github_app_sdk::auth::TokenScope;
///
/// let scope = TokenScope::actions_read("metrics");
/// assert_eq!(scope.repositories(), &["metrics".to_string()]);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenScope {
    repositories: Vec<String>,
    permissions: BTreeMap<String, String>,
}

impl TokenScope {
    /// The installation's full grant (no narrowing).
    pub fn full() -> Self {
        Self::default()
    }

    /// A scope limited to one repository with `actions: read`, sufficient
    /// to download workflow log archives.
    pub fn actions_read(repository: impl Into<String>) -> Self {
        let mut permissions = BTreeMap::new();
        permissions.insert("actions".to_string(), "read".to_string());
        Self {
            repositories: vec![repository.into()],
            permissions,
        }
    }

    /// Add a permission to the scope.
    pub fn with_permission(mut self, name: impl Into<String>, level: impl Into<String>) -> Self {
        self.permissions.insert(name.into(), level.into());
        self
    }

    /// The repositories this scope is limited to (empty = all).
    pub fn repositories(&self) -> &[String] {
        &self.repositories
    }

    /// The permissions this scope requests (empty = installation default).
    pub fn permissions(&self) -> &BTreeMap<String, String> {
        &self.permissions
    }

    /// Stable cache key for this scope.
    ///
    /// `BTreeMap` iteration order makes the permission part deterministic.
    pub(crate) fn cache_key(&self) -> String {
        let mut key = String::new();
        for repo in &self.repositories {
            key.push_str(repo);
            key.push(',');
        }
        key.push('|');
        for (name, level) in &self.permissions {
            key.push_str(name);
            key.push('=');
            key.push_str(level);
            key.push(',');
        }
        key
    }
}

// ============================================================================
// Token Manager
// ============================================================================

/// How long minted App JWTs are considered valid before re-minting.
///
/// GitHub allows up to ten minutes; eight leaves margin for clock drift and
/// in-flight requests.
const JWT_TTL_MINUTES: i64 = 8;

/// Refresh margin for cached installation tokens.
const TOKEN_REFRESH_MARGIN_MINUTES: i64 = 2;

/// Wire shape of GitHub's installation token response.
#[derive(Debug, Deserialize)]
struct AccessTokenResponse {
    token: String,
    expires_at: DateTime<Utc>,
}

/// Wire shape of the token exchange request body.
#[derive(Debug, Serialize)]
struct AccessTokenRequest<'a> {
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    repositories: &'a [String],
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    permissions: &'a BTreeMap<String, String>,
}

/// Caching token manager for a single GitHub App installation.
///
/// Mints RS256 App JWTs and exchanges them for installation tokens, caching
/// both. Callers that observe a 401 after a previously successful call
/// should `invalidate` the scope they used and retry once; the next
/// `installation_token` call mints a fresh token.
pub struct TokenManager {
    http: reqwest::Client,
    credentials: AppCredentials,
    api_url: String,
    jwt_cache: RwLock<Option<AppJwt>>,
    token_cache: RwLock<HashMap<String, InstallationToken>>,
}

impl TokenManager {
    /// Create a token manager.
    ///
    /// # Arguments
    ///
    /// * `http` - Shared HTTP client (carries the user agent and timeouts)
    /// * `credentials` - App ID, installation ID, and signing key
    /// * `api_url` - REST API base URL, no trailing slash
    pub fn new(http: reqwest::Client, credentials: AppCredentials, api_url: String) -> Self {
        Self {
            http,
            credentials,
            api_url,
            jwt_cache: RwLock::new(None),
            token_cache: RwLock::new(HashMap::new()),
        }
    }

    /// The installation this manager mints tokens for.
    pub fn installation_id(&self) -> InstallationId {
        self.credentials.installation_id
    }

    /// Get a valid App JWT, minting a new one if the cached JWT is absent
    /// or expiring within a minute.
    pub async fn app_jwt(&self) -> Result<AppJwt, AuthError> {
        {
            let cached = self.jwt_cache.read().await;
            if let Some(jwt) = cached.as_ref() {
                if !jwt.expires_soon(Duration::minutes(1)) {
                    return Ok(jwt.clone());
                }
            }
        }

        let jwt = jwt::mint_app_jwt(
            &self.credentials.private_key,
            self.credentials.app_id,
            Duration::minutes(JWT_TTL_MINUTES),
        )?;

        *self.jwt_cache.write().await = Some(jwt.clone());
        Ok(jwt)
    }

    /// Get an installation token for `scope`, reusing the cached token
    /// unless it expires within the refresh margin.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::TokenExchangeFailed` when GitHub rejects the
    /// exchange, and `AuthError::Network` on transport failure.
    pub async fn installation_token(
        &self,
        scope: &TokenScope,
    ) -> Result<InstallationToken, AuthError> {
        let key = scope.cache_key();

        {
            let cache = self.token_cache.read().await;
            if let Some(token) = cache.get(&key) {
                if !token.expires_soon(Duration::minutes(TOKEN_REFRESH_MARGIN_MINUTES)) {
                    return Ok(token.clone());
                }
            }
        }

        let token = self.exchange(scope).await?;

        self.token_cache.write().await.insert(key, token.clone());
        Ok(token)
    }

    /// Drop the cached token for `scope`.
    ///
    /// Used when a 401 arrives after a prior success; the next
    /// `installation_token` call performs a fresh exchange.
    pub async fn invalidate(&self, scope: &TokenScope) {
        self.token_cache.write().await.remove(&scope.cache_key());
    }

    async fn exchange(&self, scope: &TokenScope) -> Result<InstallationToken, AuthError> {
        let jwt = self.app_jwt().await?;

        tracing::debug!(
            installation_id = %self.credentials.installation_id,
            repositories = scope.repositories().len(),
            "Minting installation token"
        );

        let url = format!(
            "{}/app/installations/{}/access_tokens",
            self.api_url,
            self.credentials.installation_id.as_u64()
        );

        let body = AccessTokenRequest {
            repositories: scope.repositories(),
            permissions: scope.permissions(),
        };

        let response = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", jwt.token()))
            .header("Accept", "application/vnd.github+json")
            .json(&body)
            .send()
            .await
            .map_err(|e| AuthError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unable to read error body".to_string());
            return Err(AuthError::TokenExchangeFailed {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: AccessTokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Network(e.to_string()))?;

        Ok(InstallationToken::new(parsed.token, parsed.expires_at))
    }
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("app_id", &self.credentials.app_id)
            .field("installation_id", &self.credentials.installation_id)
            .field("api_url", &self.api_url)
            .finish()
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
