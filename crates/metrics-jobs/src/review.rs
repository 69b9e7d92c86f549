//! Commit-review-status job.
//!
//! For each new default-branch commit, asks GitHub which pull requests the
//! commit is associated with and what their review decisions are, then
//! correlates unapproved commits with break-glass issues and persists one
//! verdict row per commit.
//!
//! Pull request selection is deterministic: the first pull request with an
//! approving review wins; otherwise the first associated pull request in
//! GitHub's order; otherwise the verdict is `UNKNOWN` with no pull request
//! attached. A repository GitHub can no longer resolve also yields
//! `UNKNOWN`, with GitHub's message kept verbatim in `note`.

use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use github_app_sdk::{ApiError, GitHubClient, PullRequest, ReviewState};
use metrics_core::pool::{default_concurrency, WorkerPool};
use metrics_core::records::{ApprovalStatus, Commit, CommitReviewStatusRecord};
use warehouse_runtime::{query_as, InsertRow, WarehouseGateway};

use crate::queries;
use crate::{JobError, TableRef};

/// Configuration for a review job run.
#[derive(Debug, Clone)]
pub struct ReviewJobConfig {
    /// Push events table (selection source).
    pub push_events: TableRef,

    /// Commit review status table (selection exclusion and output).
    pub review_status: TableRef,

    /// Issues table (break-glass correlation).
    pub issues: TableRef,

    /// Worker pool width for both stages.
    pub concurrency: usize,
}

impl ReviewJobConfig {
    /// Defaults: pool sized to the host.
    pub fn new(push_events: TableRef, review_status: TableRef, issues: TableRef) -> Self {
        Self {
            push_events,
            review_status,
            issues,
            concurrency: default_concurrency(),
        }
    }
}

/// Counters from one review job run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReviewSummary {
    pub selected: u64,

    /// Commits dropped this run after transient failures (GitHub or the
    /// break-glass lookup); the next run picks them up again.
    pub dropped: u64,

    pub approved: u64,
    pub changes_requested: u64,
    pub review_required: u64,
    pub unknown: u64,

    /// Records that matched at least one break-glass issue.
    pub break_glass_matches: u64,
}

/// Shape of break-glass lookup rows.
#[derive(Debug, Deserialize)]
struct BreakGlassRow {
    html_url: String,
}

/// The commit-review-status job.
pub struct ReviewJob {
    gateway: Arc<dyn WarehouseGateway>,
    github: GitHubClient,
    config: ReviewJobConfig,
}

impl ReviewJob {
    pub fn new(
        gateway: Arc<dyn WarehouseGateway>,
        github: GitHubClient,
        config: ReviewJobConfig,
    ) -> Self {
        Self {
            gateway,
            github,
            config,
        }
    }

    /// Run one batch.
    ///
    /// Safe to repeat: the selection query excludes commits already in the
    /// output table, and the final insert carries the commit SHA as its
    /// dedupe key.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<ReviewSummary, JobError> {
        let commits: Vec<Commit> = query_as(
            self.gateway.as_ref(),
            queries::commit_selection(&self.config.push_events, &self.config.review_status),
        )
        .await?;

        let mut summary = ReviewSummary {
            selected: commits.len() as u64,
            ..ReviewSummary::default()
        };

        if commits.is_empty() {
            info!("No unprocessed default-branch commits");
            return Ok(summary);
        }

        // Stage one: per-commit GitHub walk
        let mut pool: WorkerPool<Result<CommitReviewStatusRecord, JobError>> =
            WorkerPool::new(self.config.concurrency);
        for commit in commits {
            let github = self.github.clone();
            pool.submit(async move { process_commit(github, commit).await });
        }

        let mut records = Vec::new();
        for outcome in pool.join().await {
            match outcome {
                Ok(record) => records.push(record),
                Err(err) => {
                    warn!(error = %err, "Commit processing failed; will retry next run");
                    summary.dropped += 1;
                }
            }
        }

        // Stage two: break-glass correlation for everything not approved
        let mut pool: WorkerPool<Result<CommitReviewStatusRecord, JobError>> =
            WorkerPool::new(self.config.concurrency);
        for record in records {
            let gateway = Arc::clone(&self.gateway);
            let issues = self.config.issues.clone();
            pool.submit(async move { correlate_break_glass(gateway, issues, record).await });
        }

        let mut surviving = Vec::new();
        for outcome in pool.join().await {
            match outcome {
                Ok(record) => surviving.push(record),
                Err(err) => {
                    warn!(error = %err, "Break-glass lookup failed; will retry next run");
                    summary.dropped += 1;
                }
            }
        }

        for record in &surviving {
            match record.approval_status {
                ApprovalStatus::Approved => summary.approved += 1,
                ApprovalStatus::ChangesRequested => summary.changes_requested += 1,
                ApprovalStatus::ReviewRequired => summary.review_required += 1,
                ApprovalStatus::Unknown => summary.unknown += 1,
            }
            if !record.break_glass_issue_urls.is_empty() {
                summary.break_glass_matches += 1;
            }
        }

        let inserts: Result<Vec<InsertRow>, _> = surviving
            .iter()
            .map(|record| InsertRow::from_record(Some(record.commit_sha.clone()), record))
            .collect();

        self.gateway
            .insert(self.config.review_status.table_id(), inserts?)
            .await?;

        info!(
            selected = summary.selected,
            dropped = summary.dropped,
            approved = summary.approved,
            changes_requested = summary.changes_requested,
            review_required = summary.review_required,
            unknown = summary.unknown,
            break_glass_matches = summary.break_glass_matches,
            "Review batch complete"
        );

        Ok(summary)
    }
}

impl std::fmt::Debug for ReviewJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReviewJob")
            .field("config", &self.config)
            .finish()
    }
}

/// Resolve one commit's verdict from its associated pull requests.
///
/// Transient GitHub failures bubble up and drop the commit from this run.
async fn process_commit(
    github: GitHubClient,
    commit: Commit,
) -> Result<CommitReviewStatusRecord, JobError> {
    let associations = match github
        .associated_pull_requests(&commit.organization, &commit.repository, &commit.commit_sha)
        .await
    {
        Ok(associations) => associations,
        Err(ApiError::RepositoryGone { message }) => {
            let mut record =
                CommitReviewStatusRecord::for_commit(&commit, ApprovalStatus::Unknown);
            record.note = Some(message);
            return Ok(record);
        }
        Err(err) => return Err(err.into()),
    };

    let Some(selected) = select_pull_request(&associations.pull_requests) else {
        return Ok(CommitReviewStatusRecord::for_commit(
            &commit,
            ApprovalStatus::Unknown,
        ));
    };

    let mut record =
        CommitReviewStatusRecord::for_commit(&commit, scan_reviews(selected));
    record.pull_request_id = Some(selected.id.clone());
    record.pull_request_number = Some(selected.number);
    record.pull_request_html_url = Some(selected.url.clone());
    Ok(record)
}

/// Deterministic pull request choice: first approving pull request wins,
/// else the first associated pull request in GitHub's order.
fn select_pull_request(pull_requests: &[PullRequest]) -> Option<&PullRequest> {
    pull_requests
        .iter()
        .find(|pr| pr.has_approval())
        .or_else(|| pull_requests.first())
}

/// Approval verdict for the selected pull request.
///
/// An approving review wins outright; otherwise a changes-requested review
/// beats the default of review-required.
fn scan_reviews(pull_request: &PullRequest) -> ApprovalStatus {
    let mut status = ApprovalStatus::ReviewRequired;
    for review in &pull_request.reviews {
        match review {
            ReviewState::Approved => return ApprovalStatus::Approved,
            ReviewState::ChangesRequested => status = ApprovalStatus::ChangesRequested,
            _ => {}
        }
    }
    status
}

/// Attach break-glass issue URLs to a non-approved record.
///
/// A warehouse failure drops the record from this run; the selection query
/// re-selects the commit next time.
async fn correlate_break_glass(
    gateway: Arc<dyn WarehouseGateway>,
    issues: TableRef,
    mut record: CommitReviewStatusRecord,
) -> Result<CommitReviewStatusRecord, JobError> {
    if record.approval_status == ApprovalStatus::Approved {
        return Ok(record);
    }

    let rows: Vec<BreakGlassRow> = query_as(
        gateway.as_ref(),
        queries::break_glass_lookup(&issues, &record.author, record.commit_timestamp),
    )
    .await?;

    record.break_glass_issue_urls = rows.into_iter().map(|row| row.html_url).collect();
    Ok(record)
}

#[cfg(test)]
#[path = "review_tests.rs"]
mod tests;
