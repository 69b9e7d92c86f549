//! Warehouse row types.
//!
//! Every table the aggregator reads or writes has a record type here. Field
//! names match the warehouse column names so rows decode and serialize by
//! name; status enums serialize to the uppercase strings the dashboards and
//! views expect.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Events
// ============================================================================

/// One accepted webhook delivery (table *events*).
///
/// Created by the webhook server after signature verification; never
/// mutated or deleted. The retry reconciler only ever causes GitHub to
/// redeliver, so webhook-path verification remains the sole insertion
/// authority for this table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventRecord {
    /// GitHub delivery GUID, unique per delivery.
    pub delivery_id: String,

    /// The `X-Hub-Signature-256` header as received.
    pub signature: String,

    /// When the server accepted the delivery.
    pub received: DateTime<Utc>,

    /// GitHub event name (`workflow_run`, `push`, ...).
    pub event: String,

    /// Raw payload JSON, verbatim.
    pub payload: String,
}

/// A delivery whose persistence failed terminally (table *failure_events*).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FailureEventRecord {
    pub delivery_id: String,
    pub created: DateTime<Utc>,
}

// ============================================================================
// Checkpoints
// ============================================================================

/// Retry reconciler cursor (table *checkpoints*).
///
/// Rows are append-only; the latest by `created` is authoritative.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckpointRecord {
    /// Most recent successfully reconciled delivery GUID.
    pub delivery_id: String,

    pub created: DateTime<Utc>,
}

// ============================================================================
// Artifacts
// ============================================================================

/// Outcome of one artifact-log ingestion attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ArtifactStatus {
    /// Logs downloaded and stored.
    Success,

    /// GitHub no longer serves the log archive (404/410). Terminal.
    NotFound,

    /// Download or upload failed. A tombstone: the delivery is not
    /// reprocessed until an operator deletes the row.
    Failure,
}

impl std::fmt::Display for ArtifactStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Success => "SUCCESS",
            Self::NotFound => "NOT_FOUND",
            Self::Failure => "FAILURE",
        };
        write!(f, "{}", s)
    }
}

/// One processed workflow-run delivery (table *artifacts*).
///
/// At most one `SUCCESS`-or-`NOT_FOUND` row exists per `delivery_id`,
/// enforced by the job's selection query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArtifactRecord {
    /// Delivery this artifact was derived from.
    pub delivery_id: String,

    pub processed_at: DateTime<Utc>,

    pub status: ArtifactStatus,

    /// HTML URL of the workflow run.
    pub workflow_uri: String,

    /// Planned or actual object-store location of the log archive.
    pub logs_uri: String,

    pub github_actor: String,
    pub organization_name: String,
    pub repository_name: String,
    pub repository_slug: String,
    pub job_name: String,
}

// ============================================================================
// Commit Review Status
// ============================================================================

/// Review verdict for one default-branch commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalStatus {
    /// A pull request associated with the commit has an approving review.
    Approved,

    /// The selected pull request's latest scan found changes requested.
    ChangesRequested,

    /// A pull request exists but carries no decisive review.
    ReviewRequired,

    /// No pull request, or the repository could not be resolved.
    Unknown,
}

impl std::fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Approved => "APPROVED",
            Self::ChangesRequested => "CHANGES_REQUESTED",
            Self::ReviewRequired => "REVIEW_REQUIRED",
            Self::Unknown => "UNKNOWN",
        };
        write!(f, "{}", s)
    }
}

/// A default-branch commit selected for review-status processing.
///
/// Shape of the commit selection query's rows.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Commit {
    /// The pusher.
    pub author: String,

    pub organization: String,
    pub repository: String,

    /// The repository's default branch at push time.
    pub branch: String,

    /// Repository visibility (`public`, `private`, `internal`).
    pub visibility: String,

    pub commit_sha: String,
    pub commit_timestamp: DateTime<Utc>,
}

impl Commit {
    /// The commit's HTML URL on GitHub.
    pub fn html_url(&self) -> String {
        format!(
            "https://github.com/{}/{}/commit/{}",
            self.organization, self.repository, self.commit_sha
        )
    }
}

/// Review verdict row (table *commit_review_status*).
///
/// At most one row per `commit_sha`, enforced by the job's selection
/// query. `break_glass_issue_urls` is ordered; `note` carries permanent
/// repository-gone markers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommitReviewStatusRecord {
    pub author: String,
    pub organization: String,
    pub repository: String,
    pub branch: String,
    pub visibility: String,
    pub commit_sha: String,
    pub commit_timestamp: DateTime<Utc>,
    pub commit_html_url: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pull_request_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pull_request_number: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pull_request_html_url: Option<String>,

    pub approval_status: ApprovalStatus,

    #[serde(default)]
    pub break_glass_issue_urls: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl CommitReviewStatusRecord {
    /// Start a record for `commit` with no pull request attached and the
    /// given status.
    pub fn for_commit(commit: &Commit, approval_status: ApprovalStatus) -> Self {
        Self {
            author: commit.author.clone(),
            organization: commit.organization.clone(),
            repository: commit.repository.clone(),
            branch: commit.branch.clone(),
            visibility: commit.visibility.clone(),
            commit_sha: commit.commit_sha.clone(),
            commit_timestamp: commit.commit_timestamp,
            commit_html_url: commit.html_url(),
            pull_request_id: None,
            pull_request_number: None,
            pull_request_html_url: None,
            approval_status,
            break_glass_issue_urls: Vec::new(),
            note: None,
        }
    }
}

#[cfg(test)]
#[path = "records_tests.rs"]
mod tests;
