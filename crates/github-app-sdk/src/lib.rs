//! # GitHub App SDK
//!
//! GitHub App client for the metrics aggregator: authentication, the REST
//! surfaces the ingestion pipelines need, and the GraphQL commit review
//! walk.
//!
//! This SDK provides:
//! - App JWT minting and installation token exchange with scope-aware
//!   caching
//! - Hook delivery index walking and redelivery (retry reconciler)
//! - Workflow log archive downloads as byte streams (artifact job)
//! - `associatedPullRequests` review traversal (review job)
//! - Error classification separating transient failures, credential
//!   refresh signals, and permanent per-item outcomes
//!
//! # Examples
//!
//! ```rust,no_run
//! use github_app_sdk::auth::{AppCredentials, AppId, InstallationId, PrivateKey};
//! use github_app_sdk::client::{ClientConfig, GitHubClient};
//!
//! # async fn example(pem: &str) -> Result<(), Box<dyn std::error::Error>> {
//! let credentials = AppCredentials::new(
//!     AppId::new(123456),
//!     InstallationId::new(789),
//!     PrivateKey::from_pem(pem)?,
//! );
//!
//! let client = GitHubClient::new(credentials, ClientConfig::default())?;
//!
//! let page = client.list_deliveries(None).await?;
//! for delivery in &page.deliveries {
//!     println!("{} -> {}", delivery.guid, delivery.status_code);
//! }
//! # Ok(())
//! # }
//! ```

// Public modules
pub mod auth;
pub mod client;
pub mod error;
pub mod graphql;

// Re-export commonly used types at crate root for convenience
pub use error::{ApiError, AuthError};

pub use auth::{
    AppCredentials, AppId, AppJwt, InstallationId, InstallationToken, TokenManager, TokenScope,
};

pub use client::{ClientConfig, DeliveryPage, GitHubClient, HookDelivery, LogsArchive};

pub use graphql::{CommitAssociations, PullRequest, ReviewState};
