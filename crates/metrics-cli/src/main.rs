//! Binary entry point for the metrics aggregator.
//!
//! Parses the command line, initializes logging, and dispatches to the
//! selected service or job. Exit code 0 on success; non-zero on
//! configuration or dependency initialization failure.

use clap::Parser;
use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use metrics_cli::{
    run_artifact_job, run_retry_job, run_retry_server, run_review_job, run_webhook_server,
    ArtifactCommands, Cli, Commands, RetryCommands, ReviewCommands, WebhookCommands,
};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_logging(&cli.log_level, cli.json_logs);

    let outcome = match cli.command {
        Commands::Webhook {
            action: WebhookCommands::Server(args),
        } => run_webhook_server(args).await,
        Commands::Retry {
            action: RetryCommands::Server(args),
        } => run_retry_server(args).await,
        Commands::Retry {
            action: RetryCommands::Job(args),
        } => run_retry_job(args).await,
        Commands::Artifact {
            action: ArtifactCommands::Job(args),
        } => run_artifact_job(args).await,
        Commands::Review {
            action: ReviewCommands::Job(args),
        } => run_review_job(args).await,
    };

    if let Err(err) = outcome {
        error!(error = %err, "Run failed");
        std::process::exit(1);
    }
}

fn init_logging(level: &str, json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}
