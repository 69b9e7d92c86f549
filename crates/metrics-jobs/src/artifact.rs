//! Artifact-log ingestion job.
//!
//! For each completed `workflow_run` delivery not yet in the artifacts
//! table, downloads GitHub's workflow log archive and streams it to object
//! storage, then records the outcome. Outcomes are per-delivery values,
//! never run failures: an expired archive records `NOT_FOUND`, any other
//! problem records `FAILURE`, and a `FAILURE` row deliberately blocks
//! reprocessing until an operator deletes it (unbounded automatic retry
//! would burn API quota on permanently broken events).

use futures::TryStreamExt;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use github_app_sdk::{ApiError, GitHubClient};
use metrics_core::object_store::{GcsUri, ObjectStoreError, ObjectWriter};
use metrics_core::pool::{default_concurrency, WorkerPool};
use metrics_core::records::{ArtifactRecord, ArtifactStatus};
use warehouse_runtime::{query_as, InsertRow, WarehouseGateway};

use crate::queries;
use crate::{JobError, TableRef};

/// Configuration for an artifact job run.
#[derive(Debug, Clone)]
pub struct ArtifactJobConfig {
    /// Destination bucket for log archives.
    pub bucket: String,

    /// Events table (selection).
    pub events: TableRef,

    /// Artifacts table (selection exclusion and output).
    pub artifacts: TableRef,

    /// Maximum deliveries per run.
    pub batch_size: u32,

    /// Worker pool width.
    pub concurrency: usize,

    /// Post a comment linking the archive on each associated pull request.
    pub comment_on_pull_requests: bool,
}

impl ArtifactJobConfig {
    /// Defaults: batch of 100, pool sized to the host, comments on.
    pub fn new(bucket: impl Into<String>, events: TableRef, artifacts: TableRef) -> Self {
        Self {
            bucket: bucket.into(),
            events,
            artifacts,
            batch_size: 100,
            concurrency: default_concurrency(),
            comment_on_pull_requests: true,
        }
    }
}

/// Counters from one artifact job run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactSummary {
    pub selected: u64,
    pub success: u64,
    pub not_found: u64,
    pub failure: u64,
}

/// One row of the artifact selection query.
#[derive(Debug, Clone, Deserialize)]
pub struct ArtifactEventRow {
    pub delivery_id: String,
    pub repo_slug: String,
    pub repo_name: String,
    pub org_name: String,

    #[serde(default)]
    pub logs_url: Option<String>,

    #[serde(default)]
    pub github_actor: Option<String>,

    #[serde(default)]
    pub workflow_url: Option<String>,

    #[serde(default)]
    pub workflow_run_id: Option<i64>,

    #[serde(default)]
    pub workflow_run_attempt: Option<i64>,

    #[serde(default)]
    pub pull_request_numbers: Vec<u64>,
}

/// The artifact-log ingestion job.
pub struct ArtifactJob {
    gateway: Arc<dyn WarehouseGateway>,
    github: GitHubClient,
    objects: Arc<dyn ObjectWriter>,
    config: ArtifactJobConfig,
}

impl ArtifactJob {
    pub fn new(
        gateway: Arc<dyn WarehouseGateway>,
        github: GitHubClient,
        objects: Arc<dyn ObjectWriter>,
        config: ArtifactJobConfig,
    ) -> Self {
        Self {
            gateway,
            github,
            objects,
            config,
        }
    }

    /// Run one batch.
    ///
    /// Safe to repeat: the selection query excludes deliveries already in
    /// the artifacts table, and the final insert carries the delivery id
    /// as its dedupe key.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<ArtifactSummary, JobError> {
        let rows: Vec<ArtifactEventRow> = query_as(
            self.gateway.as_ref(),
            queries::artifact_selection(
                &self.config.events,
                &self.config.artifacts,
                self.config.batch_size,
            ),
        )
        .await?;

        let mut summary = ArtifactSummary {
            selected: rows.len() as u64,
            ..ArtifactSummary::default()
        };

        if rows.is_empty() {
            info!("No unprocessed workflow_run deliveries");
            return Ok(summary);
        }

        let mut pool: WorkerPool<ArtifactRecord> = WorkerPool::new(self.config.concurrency);
        for row in rows {
            let github = self.github.clone();
            let objects = Arc::clone(&self.objects);
            let bucket = self.config.bucket.clone();
            let comment = self.config.comment_on_pull_requests;
            pool.submit(async move { process_event(github, objects, bucket, comment, row).await });
        }

        let records = pool.join().await;

        for record in &records {
            match record.status {
                ArtifactStatus::Success => summary.success += 1,
                ArtifactStatus::NotFound => summary.not_found += 1,
                ArtifactStatus::Failure => summary.failure += 1,
            }
        }

        let inserts: Result<Vec<InsertRow>, _> = records
            .iter()
            .map(|record| InsertRow::from_record(Some(record.delivery_id.clone()), record))
            .collect();

        self.gateway
            .insert(self.config.artifacts.table_id(), inserts?)
            .await?;

        info!(
            selected = summary.selected,
            success = summary.success,
            not_found = summary.not_found,
            failure = summary.failure,
            "Artifact batch complete"
        );

        Ok(summary)
    }
}

impl std::fmt::Debug for ArtifactJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactJob")
            .field("config", &self.config)
            .finish()
    }
}

/// Process one delivery into its artifact record.
///
/// Always produces a record; the status encodes the outcome.
async fn process_event(
    github: GitHubClient,
    objects: Arc<dyn ObjectWriter>,
    bucket: String,
    comment_on_pull_requests: bool,
    row: ArtifactEventRow,
) -> ArtifactRecord {
    let logs_uri = GcsUri::for_artifact_logs(&bucket, &row.repo_slug, &row.delivery_id);

    let status = ingest_logs(&github, objects.as_ref(), &logs_uri, &row).await;

    let status = match status {
        ArtifactStatus::Success if comment_on_pull_requests => {
            comment_on_prs(&github, &logs_uri, &row).await
        }
        other => other,
    };

    ArtifactRecord {
        delivery_id: row.delivery_id,
        processed_at: chrono::Utc::now(),
        status,
        workflow_uri: row.workflow_url.unwrap_or_default(),
        logs_uri: logs_uri.to_string(),
        github_actor: row.github_actor.unwrap_or_default(),
        organization_name: row.org_name,
        repository_name: row.repo_name,
        repository_slug: row.repo_slug,
        job_name: job_name(row.workflow_run_id, row.workflow_run_attempt),
    }
}

/// Download the archive and stream it into object storage.
async fn ingest_logs(
    github: &GitHubClient,
    objects: &dyn ObjectWriter,
    logs_uri: &GcsUri,
    row: &ArtifactEventRow,
) -> ArtifactStatus {
    let Some(logs_url) = row.logs_url.as_deref() else {
        warn!(delivery_id = %row.delivery_id, "Event payload carries no logs URL");
        return ArtifactStatus::Failure;
    };

    let archive = match github.download_workflow_logs(logs_url, &row.repo_name).await {
        Ok(archive) => archive,
        Err(ApiError::LogsExpired { status }) => {
            info!(
                delivery_id = %row.delivery_id,
                status,
                "Workflow logs no longer available"
            );
            return ArtifactStatus::NotFound;
        }
        Err(err) => {
            warn!(
                delivery_id = %row.delivery_id,
                error = %err,
                "Workflow log download failed"
            );
            return ArtifactStatus::Failure;
        }
    };

    let stream = archive
        .into_stream()
        .map_err(|e| ObjectStoreError::Transport {
            message: e.to_string(),
        });

    match objects.write(logs_uri, Box::pin(stream)).await {
        Ok(()) => ArtifactStatus::Success,
        Err(err) => {
            warn!(
                delivery_id = %row.delivery_id,
                uri = %logs_uri,
                error = %err,
                "Archive upload failed"
            );
            ArtifactStatus::Failure
        }
    }
}

/// Post an archive-location comment on every associated pull request.
///
/// Runs only after the logs are safely stored; a comment failure degrades
/// the record to `FAILURE` so an operator notices, but the archive stays.
async fn comment_on_prs(
    github: &GitHubClient,
    logs_uri: &GcsUri,
    row: &ArtifactEventRow,
) -> ArtifactStatus {
    let body = format!("Workflow run logs archived at `{}`.", logs_uri);

    for number in &row.pull_request_numbers {
        if let Err(err) = github
            .create_issue_comment(&row.org_name, &row.repo_name, *number, &body)
            .await
        {
            warn!(
                delivery_id = %row.delivery_id,
                pull_request = number,
                error = %err,
                "Failed to comment archive location"
            );
            return ArtifactStatus::Failure;
        }
    }

    ArtifactStatus::Success
}

/// Identifier for the ingested run: run id plus attempt.
fn job_name(run_id: Option<i64>, run_attempt: Option<i64>) -> String {
    format!("{}-{}", run_id.unwrap_or(0), run_attempt.unwrap_or(1))
}

#[cfg(test)]
#[path = "artifact_tests.rs"]
mod tests;
