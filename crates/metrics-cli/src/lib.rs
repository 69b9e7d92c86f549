//! # Metrics CLI
//!
//! Single binary for the GitHub metrics aggregator:
//!
//! ```text
//! github-metrics webhook server
//! github-metrics retry server
//! github-metrics retry job
//! github-metrics artifact job
//! github-metrics review job
//! ```
//!
//! Every option is a flag with an environment-variable fallback, validated
//! before any dependency is constructed. Validation failures and
//! dependency initialization failures exit non-zero.

use clap::{Args, Parser, Subcommand};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use github_app_sdk::auth::{AppCredentials, AppId, InstallationId, PrivateKey};
use github_app_sdk::{ClientConfig, GitHubClient};
use metrics_core::lease::GcsLeaseStore;
use metrics_core::object_store::GcsObjectWriter;
use metrics_jobs::{
    ArtifactJob, ArtifactJobConfig, Reconciler, ReconcilerConfig, ReviewJob, ReviewJobConfig,
    TableRef,
};
use metrics_server::{AppState, ServerConfig, ServerMetrics};
use warehouse_runtime::{BigQueryConfig, BigQueryGateway, MetadataTokenSource, WarehouseGateway};

// ============================================================================
// CLI Structure
// ============================================================================

/// GitHub metrics aggregator.
#[derive(Debug, Parser)]
#[command(name = "github-metrics")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Webhook ingestion and enrichment pipelines for GitHub metrics")]
pub struct Cli {
    /// Logging level filter (overridden by RUST_LOG)
    #[arg(long, global = true, default_value = "info", env = "LOG_LEVEL")]
    pub log_level: String,

    /// Emit JSON-structured logs
    #[arg(long, global = true, env = "LOG_JSON")]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Webhook ingestion service
    Webhook {
        #[command(subcommand)]
        action: WebhookCommands,
    },

    /// Retry reconciler
    Retry {
        #[command(subcommand)]
        action: RetryCommands,
    },

    /// Artifact-log ingestion
    Artifact {
        #[command(subcommand)]
        action: ArtifactCommands,
    },

    /// Commit review status
    Review {
        #[command(subcommand)]
        action: ReviewCommands,
    },
}

#[derive(Debug, Subcommand)]
pub enum WebhookCommands {
    /// Serve the webhook endpoint
    Server(WebhookArgs),
}

#[derive(Debug, Subcommand)]
pub enum RetryCommands {
    /// Serve `POST /retry` for scheduler-triggered passes
    Server(RetryArgs),

    /// Run one reconcile pass and exit
    Job(RetryArgs),
}

#[derive(Debug, Subcommand)]
pub enum ArtifactCommands {
    /// Run one artifact batch and exit
    Job(ArtifactArgs),
}

#[derive(Debug, Subcommand)]
pub enum ReviewCommands {
    /// Run one review batch and exit
    Job(ReviewArgs),
}

// ============================================================================
// Option Groups
// ============================================================================

/// Options every subcommand needs.
#[derive(Debug, Clone, Args)]
pub struct CommonArgs {
    /// Warehouse and object-store tenancy
    #[arg(long, env = "PROJECT_ID")]
    pub project_id: String,

    /// Warehouse namespace
    #[arg(long, env = "DATASET_ID")]
    pub dataset_id: String,

    /// Overrides PROJECT_ID for warehouse operations
    #[arg(long, env = "BIG_QUERY_PROJECT_ID")]
    pub big_query_project_id: Option<String>,

    /// HTTP listen port
    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,
}

impl CommonArgs {
    /// The project warehouse operations run in.
    pub fn warehouse_project(&self) -> &str {
        self.big_query_project_id
            .as_deref()
            .filter(|p| !p.is_empty())
            .unwrap_or(&self.project_id)
    }
}

/// GitHub App credential options.
#[derive(Debug, Clone, Args)]
pub struct GitHubArgs {
    /// GitHub App ID
    #[arg(long, env = "GITHUB_APP_ID")]
    pub github_app_id: u64,

    /// GitHub App installation ID
    #[arg(long, env = "GITHUB_INSTALL_ID")]
    pub github_install_id: u64,

    /// PEM-encoded App private key
    #[arg(long, env = "GITHUB_PRIVATE_KEY", hide_env_values = true)]
    pub github_private_key: String,

    /// GitHub Enterprise Server base URL (must start with https://)
    #[arg(long, env = "GITHUB_ENTERPRISE_SERVER_URL")]
    pub github_enterprise_server_url: Option<String>,
}

/// Webhook server options.
#[derive(Debug, Clone, Args)]
pub struct WebhookArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Events table
    #[arg(long, env = "EVENTS_TABLE_ID", default_value = "events")]
    pub events_table_id: String,

    /// Failure events table
    #[arg(long, env = "FAILURE_EVENTS_TABLE_ID", default_value = "failure_events")]
    pub failure_events_table_id: String,

    /// HMAC key for delivery signatures (GITHUB_WEBHOOK_SECRET also
    /// honored)
    #[arg(long, env = "WEBHOOK_SECRET", hide_env_values = true, default_value = "")]
    pub webhook_secret: String,

    /// Maximum attempts for the events insert
    #[arg(long, env = "RETRY_LIMIT", default_value_t = 3)]
    pub retry_limit: u32,
}

impl WebhookArgs {
    /// The webhook secret, honoring the `GITHUB_WEBHOOK_SECRET` fallback
    /// name.
    pub fn resolved_webhook_secret(&self) -> String {
        if !self.webhook_secret.is_empty() {
            return self.webhook_secret.clone();
        }
        std::env::var("GITHUB_WEBHOOK_SECRET").unwrap_or_default()
    }
}

/// Retry reconciler options.
#[derive(Debug, Clone, Args)]
pub struct RetryArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    #[command(flatten)]
    pub github: GitHubArgs,

    /// Events table
    #[arg(long, env = "EVENTS_TABLE_ID", default_value = "events")]
    pub events_table_id: String,

    /// Checkpoints table
    #[arg(long, env = "CHECKPOINT_TABLE_ID", default_value = "checkpoints")]
    pub checkpoint_table_id: String,

    /// Bucket holding the retry lock object
    #[arg(long, env = "BUCKET_NAME")]
    pub bucket_name: String,

    /// Lease TTL (e.g. 5m, 300s)
    #[arg(long, env = "LOCK_TTL", default_value = "5m", value_parser = parse_duration)]
    pub lock_ttl: std::time::Duration,

    /// Clock skew allowance for the lease
    #[arg(long, env = "LOCK_TTL_CLOCK_SKEW", default_value = "10s", value_parser = parse_duration)]
    pub lock_ttl_clock_skew: std::time::Duration,
}

/// Artifact job options.
#[derive(Debug, Clone, Args)]
pub struct ArtifactArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    #[command(flatten)]
    pub github: GitHubArgs,

    /// Destination bucket for log archives
    #[arg(long, env = "BUCKET_NAME")]
    pub bucket_name: String,

    /// Events table
    #[arg(long, env = "EVENTS_TABLE_ID", default_value = "events")]
    pub events_table_id: String,

    /// Artifacts table
    #[arg(long, env = "ARTIFACTS_TABLE_ID", default_value = "artifacts")]
    pub artifacts_table_id: String,

    /// Maximum deliveries per run
    #[arg(long, env = "BATCH_SIZE", default_value_t = 100)]
    pub batch_size: u32,
}

/// Review job options.
#[derive(Debug, Clone, Args)]
pub struct ReviewArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    #[command(flatten)]
    pub github: GitHubArgs,

    /// Push events table
    #[arg(long, env = "PUSH_EVENTS_TABLE_ID", default_value = "push_events")]
    pub push_events_table_id: String,

    /// Commit review status table
    #[arg(
        long,
        env = "COMMIT_REVIEW_STATUS_TABLE_ID",
        default_value = "commit_review_status"
    )]
    pub commit_review_status_table_id: String,

    /// Issues table
    #[arg(long, env = "ISSUES_TABLE_ID", default_value = "issues")]
    pub issues_table_id: String,
}

// ============================================================================
// Validation
// ============================================================================

/// Configuration validation failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("required option {option} is empty")]
    Required { option: &'static str },

    #[error("PORT must be in [1, 65535]")]
    InvalidPort,

    #[error("GITHUB_ENTERPRISE_SERVER_URL must start with https://")]
    InvalidEnterpriseUrl,
}

fn require(option: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::Required { option });
    }
    Ok(())
}

impl CommonArgs {
    pub fn validate(&self) -> Result<(), ConfigError> {
        require("PROJECT_ID", &self.project_id)?;
        require("DATASET_ID", &self.dataset_id)?;
        if self.port == 0 {
            return Err(ConfigError::InvalidPort);
        }
        Ok(())
    }
}

impl GitHubArgs {
    pub fn validate(&self) -> Result<(), ConfigError> {
        require("GITHUB_PRIVATE_KEY", &self.github_private_key)?;
        if let Some(url) = &self.github_enterprise_server_url {
            if !url.starts_with("https://") {
                return Err(ConfigError::InvalidEnterpriseUrl);
            }
        }
        Ok(())
    }
}

impl WebhookArgs {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.common.validate()?;
        require("EVENTS_TABLE_ID", &self.events_table_id)?;
        require("FAILURE_EVENTS_TABLE_ID", &self.failure_events_table_id)?;
        require("WEBHOOK_SECRET", &self.resolved_webhook_secret())?;
        Ok(())
    }
}

impl RetryArgs {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.common.validate()?;
        self.github.validate()?;
        require("EVENTS_TABLE_ID", &self.events_table_id)?;
        require("CHECKPOINT_TABLE_ID", &self.checkpoint_table_id)?;
        require("BUCKET_NAME", &self.bucket_name)?;
        Ok(())
    }
}

impl ArtifactArgs {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.common.validate()?;
        self.github.validate()?;
        require("BUCKET_NAME", &self.bucket_name)?;
        require("EVENTS_TABLE_ID", &self.events_table_id)?;
        require("ARTIFACTS_TABLE_ID", &self.artifacts_table_id)?;
        Ok(())
    }
}

impl ReviewArgs {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.common.validate()?;
        self.github.validate()?;
        require("PUSH_EVENTS_TABLE_ID", &self.push_events_table_id)?;
        require(
            "COMMIT_REVIEW_STATUS_TABLE_ID",
            &self.commit_review_status_table_id,
        )?;
        require("ISSUES_TABLE_ID", &self.issues_table_id)?;
        Ok(())
    }
}

/// Parse durations like `300s`, `5m`, `1h`, or bare seconds.
pub fn parse_duration(value: &str) -> Result<std::time::Duration, String> {
    let value = value.trim();
    let (number, unit) = match value.find(|c: char| !c.is_ascii_digit()) {
        Some(split) => value.split_at(split),
        None => (value, "s"),
    };

    let count: u64 = number
        .parse()
        .map_err(|_| format!("invalid duration: {}", value))?;

    let seconds = match unit {
        "s" | "sec" => count,
        "m" | "min" => count * 60,
        "h" => count * 3600,
        _ => return Err(format!("invalid duration unit: {}", unit)),
    };

    Ok(std::time::Duration::from_secs(seconds))
}

// ============================================================================
// Wiring
// ============================================================================

/// Build the warehouse gateway from the common options.
pub fn build_gateway(common: &CommonArgs) -> Arc<dyn WarehouseGateway> {
    let http = reqwest::Client::new();
    let config = BigQueryConfig::new(common.warehouse_project(), &common.dataset_id);
    let tokens = Arc::new(MetadataTokenSource::new(http.clone()));
    Arc::new(BigQueryGateway::new(http, config, tokens))
}

/// Build the GitHub client from the App credential options.
pub fn build_github(github: &GitHubArgs) -> anyhow::Result<GitHubClient> {
    let credentials = AppCredentials::new(
        AppId::new(github.github_app_id),
        InstallationId::new(github.github_install_id),
        PrivateKey::from_pem(&github.github_private_key)?,
    );

    let mut config = ClientConfig::default()
        .with_user_agent(concat!("github-metrics/", env!("CARGO_PKG_VERSION")));
    if let Some(url) = &github.github_enterprise_server_url {
        config = config.with_enterprise_url(url);
    }

    Ok(GitHubClient::new(credentials, config)?)
}

fn table(common: &CommonArgs, table_id: &str) -> TableRef {
    TableRef::new(common.warehouse_project(), &common.dataset_id, table_id)
}

fn build_reconciler(args: &RetryArgs) -> anyhow::Result<Reconciler> {
    let gateway = build_gateway(&args.common);
    let github = build_github(&args.github)?;

    let http = reqwest::Client::new();
    let tokens = Arc::new(MetadataTokenSource::new(http.clone()));
    let leases = Arc::new(GcsLeaseStore::with_options(
        http,
        &args.bucket_name,
        tokens,
        "https://storage.googleapis.com",
        chrono::Duration::from_std(args.lock_ttl_clock_skew)
            .unwrap_or_else(|_| chrono::Duration::seconds(10)),
    ));

    let mut config = ReconcilerConfig::new(
        table(&args.common, &args.events_table_id),
        table(&args.common, &args.checkpoint_table_id),
    );
    config.lock_ttl = chrono::Duration::from_std(args.lock_ttl)
        .unwrap_or_else(|_| chrono::Duration::minutes(5));

    Ok(Reconciler::new(gateway, github, leases, config))
}

// ============================================================================
// Entry Points
// ============================================================================

/// Run the webhook server until shutdown.
pub async fn run_webhook_server(args: WebhookArgs) -> anyhow::Result<()> {
    args.validate()?;
    log_startup("webhook-server");

    let gateway = build_gateway(&args.common);
    let metrics = Arc::new(ServerMetrics::new()?);
    let config = ServerConfig::new(
        args.resolved_webhook_secret(),
        &args.events_table_id,
        &args.failure_events_table_id,
    )
    .with_retry_limit(args.retry_limit);

    let state = AppState::new(config, gateway, metrics);
    let shutdown = shutdown_signal(state.clone());

    metrics_server::serve(state, args.common.port, shutdown).await?;
    Ok(())
}

/// Run the retry server until shutdown.
pub async fn run_retry_server(args: RetryArgs) -> anyhow::Result<()> {
    args.validate()?;
    log_startup("retry-server");

    let gateway = build_gateway(&args.common);
    let metrics = Arc::new(ServerMetrics::new()?);
    let reconciler = Arc::new(build_reconciler(&args)?);

    let state =
        AppState::new(ServerConfig::retry_only(), gateway, metrics).with_retry_trigger(reconciler);
    let shutdown = shutdown_signal(state.clone());

    metrics_server::serve(state, args.common.port, shutdown).await?;
    Ok(())
}

/// Run one reconcile pass.
pub async fn run_retry_job(args: RetryArgs) -> anyhow::Result<()> {
    args.validate()?;
    log_startup("retry-job");

    let reconciler = build_reconciler(&args)?;
    reconciler.run().await?;
    Ok(())
}

/// Run one artifact batch.
pub async fn run_artifact_job(args: ArtifactArgs) -> anyhow::Result<()> {
    args.validate()?;
    log_startup("artifact-job");

    let gateway = build_gateway(&args.common);
    let github = build_github(&args.github)?;

    let http = reqwest::Client::new();
    let tokens = Arc::new(MetadataTokenSource::new(http.clone()));
    let objects = Arc::new(GcsObjectWriter::new(http, tokens));

    let mut config = ArtifactJobConfig::new(
        &args.bucket_name,
        table(&args.common, &args.events_table_id),
        table(&args.common, &args.artifacts_table_id),
    );
    config.batch_size = args.batch_size;

    let job = ArtifactJob::new(gateway, github, objects, config);
    job.run().await?;
    Ok(())
}

/// Run one review batch.
pub async fn run_review_job(args: ReviewArgs) -> anyhow::Result<()> {
    args.validate()?;
    log_startup("review-job");

    let gateway = build_gateway(&args.common);
    let github = build_github(&args.github)?;

    let config = ReviewJobConfig::new(
        table(&args.common, &args.push_events_table_id),
        table(&args.common, &args.commit_review_status_table_id),
        table(&args.common, &args.issues_table_id),
    );

    let job = ReviewJob::new(gateway, github, config);
    job.run().await?;
    Ok(())
}

/// Structured startup line: run name, commit, version.
fn log_startup(run: &str) {
    info!(
        run,
        version = env!("CARGO_PKG_VERSION"),
        commit = option_env!("BUILD_COMMIT").unwrap_or("unknown"),
        "Starting"
    );
}

/// Resolve on SIGTERM or ctrl-c, flipping the shutdown flag first so
/// draining requests observe it.
async fn shutdown_signal(state: AppState) {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received; draining");
    state.begin_shutdown();
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
