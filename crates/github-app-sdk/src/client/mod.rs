//! GitHub API client for authenticated operations.
//!
//! `GitHubClient` covers the three surfaces the aggregator needs:
//! - the App hook delivery index (listing and redelivery), JWT-authenticated
//! - workflow log archive downloads and issue comments, installation-token
//!   authenticated
//! - the GraphQL commit/pull-request/review walk (see [`crate::graphql`])
//!
//! GitHub Enterprise Server deployments are supported through
//! [`ClientConfig::with_enterprise_url`].

mod comments;
mod deliveries;
mod workflow_logs;

use std::sync::Arc;
use std::time::Duration;

use crate::auth::{AppCredentials, TokenManager, TokenScope};
use crate::error::ApiError;

pub use deliveries::{DeliveryPage, HookDelivery};
pub use workflow_logs::LogsArchive;

/// Configuration for GitHub API client behavior.
///
/// # Examples
///
/// ```
/// use github_app_sdk::client::ClientConfig;
/// use std::time::Duration;
///
/// let config = ClientConfig::default()
///     .with_user_agent("github-metrics/0.1.0")
///     .with_timeout(Duration::from_secs(60));
/// ```
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// User agent string for API requests (required by GitHub)
    pub user_agent: String,
    /// Request timeout for API calls
    pub timeout: Duration,
    /// Request timeout for workflow log archive downloads, which can be
    /// large and are served from slow storage
    pub logs_timeout: Duration,
    /// REST API base URL, no trailing slash
    pub api_url: String,
    /// GraphQL endpoint URL
    pub graphql_url: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            user_agent: "github-metrics/0.1.0".to_string(),
            timeout: Duration::from_secs(30),
            logs_timeout: Duration::from_secs(300),
            api_url: "https://api.github.com".to_string(),
            graphql_url: "https://api.github.com/graphql".to_string(),
        }
    }
}

impl ClientConfig {
    /// Set the user agent string.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Set the API request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the log download timeout.
    pub fn with_logs_timeout(mut self, timeout: Duration) -> Self {
        self.logs_timeout = timeout;
        self
    }

    /// Point the client at a GitHub Enterprise Server deployment.
    ///
    /// REST lives under `{url}/api/v3` and GraphQL under
    /// `{url}/api/graphql` on Enterprise Server.
    pub fn with_enterprise_url(mut self, base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        self.api_url = format!("{}/api/v3", base);
        self.graphql_url = format!("{}/api/graphql", base);
        self
    }

    /// Set the REST API base URL directly (tests point this at a stub).
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    /// Set the GraphQL endpoint URL directly.
    pub fn with_graphql_url(mut self, url: impl Into<String>) -> Self {
        self.graphql_url = url.into();
        self
    }
}

/// GitHub API client for a single App installation.
///
/// Cheap to clone; the HTTP connection pools and token caches are shared.
#[derive(Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    logs_http: reqwest::Client,
    tokens: Arc<TokenManager>,
    config: ClientConfig,
}

impl GitHubClient {
    /// Create a client from App credentials and configuration.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::Transport` if the underlying HTTP clients cannot
    /// be constructed.
    pub fn new(credentials: AppCredentials, config: ClientConfig) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()?;

        // Archive downloads get their own client so the long timeout does
        // not apply to ordinary API calls.
        let logs_http = reqwest::Client::builder()
            .timeout(config.logs_timeout)
            .user_agent(&config.user_agent)
            .build()?;

        let tokens = Arc::new(TokenManager::new(
            http.clone(),
            credentials,
            config.api_url.clone(),
        ));

        Ok(Self {
            http,
            logs_http,
            tokens,
            config,
        })
    }

    /// Get the client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Get the token manager (for explicit invalidation on 401).
    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    /// Drop the cached installation token for `scope`.
    ///
    /// Call when a 401 arrives after previously successful requests; the
    /// next request mints a fresh token.
    pub async fn invalidate_token(&self, scope: &TokenScope) {
        self.tokens.invalidate(scope).await;
    }

    /// Make an authenticated GET request as the App (JWT).
    pub(crate) async fn get_as_app(&self, path: &str) -> Result<reqwest::Response, ApiError> {
        let jwt = self.tokens.app_jwt().await?;
        let url = format!("{}/{}", self.config.api_url, path.trim_start_matches('/'));

        let response = self
            .http
            .get(&url)
            .header("Authorization", format!("Bearer {}", jwt.token()))
            .header("Accept", "application/vnd.github+json")
            .send()
            .await?;

        Ok(response)
    }

    /// Make an authenticated POST request as the App (JWT).
    pub(crate) async fn post_as_app(&self, path: &str) -> Result<reqwest::Response, ApiError> {
        let jwt = self.tokens.app_jwt().await?;
        let url = format!("{}/{}", self.config.api_url, path.trim_start_matches('/'));

        let response = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", jwt.token()))
            .header("Accept", "application/vnd.github+json")
            .send()
            .await?;

        Ok(response)
    }

    /// Read the body of an error response, tolerating read failures.
    pub(crate) async fn error_body(response: reqwest::Response) -> String {
        response
            .text()
            .await
            .unwrap_or_else(|_| "unable to read error body".to_string())
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub(crate) fn logs_http(&self) -> &reqwest::Client {
        &self.logs_http
    }
}

impl std::fmt::Debug for GitHubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubClient")
            .field("config", &self.config)
            .field("tokens", &self.tokens)
            .finish()
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
