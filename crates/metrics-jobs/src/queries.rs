//! Selection queries.
//!
//! The three driving queries of the batch pipelines plus the reconciler's
//! lookups, in standard SQL. Each selection excludes rows already present
//! in its output table; that exclusion is what makes job runs idempotent
//! and gives monotonic progress across runs.

use chrono::{DateTime, Utc};
use warehouse_runtime::{QueryParameter, QueryRequest};

use crate::TableRef;

/// Rows for the artifact job: completed `workflow_run` events whose
/// delivery is not yet in the artifacts table.
///
/// The payload is stored verbatim, so the event coordinates are extracted
/// with JSON functions here rather than materialized columns.
pub fn artifact_selection(events: &TableRef, artifacts: &TableRef, batch_size: u32) -> QueryRequest {
    let sql = format!(
        r#"SELECT
  delivery_id,
  JSON_VALUE(payload, '$.repository.full_name') AS repo_slug,
  JSON_VALUE(payload, '$.repository.name') AS repo_name,
  JSON_VALUE(payload, '$.repository.owner.login') AS org_name,
  JSON_VALUE(payload, '$.workflow_run.logs_url') AS logs_url,
  JSON_VALUE(payload, '$.workflow_run.actor.login') AS github_actor,
  JSON_VALUE(payload, '$.workflow_run.html_url') AS workflow_url,
  CAST(JSON_VALUE(payload, '$.workflow_run.id') AS INT64) AS workflow_run_id,
  CAST(JSON_VALUE(payload, '$.workflow_run.run_attempt') AS INT64) AS workflow_run_attempt,
  ARRAY(
    SELECT CAST(JSON_VALUE(pr, '$.number') AS INT64)
    FROM UNNEST(JSON_QUERY_ARRAY(payload, '$.workflow_run.pull_requests')) AS pr
  ) AS pull_request_numbers
FROM `{events}`
WHERE event = 'workflow_run'
  AND JSON_VALUE(payload, '$.workflow_run.status') = 'completed'
  AND delivery_id NOT IN (SELECT delivery_id FROM `{artifacts}`)
LIMIT {batch_size}"#,
        events = events.qualified(),
        artifacts = artifacts.qualified(),
        batch_size = batch_size,
    );
    QueryRequest::new(sql)
}

/// Rows for the review job: default-branch commits lacking a review-status
/// row.
pub fn commit_selection(push_events: &TableRef, review_status: &TableRef) -> QueryRequest {
    let sql = format!(
        r#"WITH commits AS (
  SELECT
    pe.pusher AS author,
    pe.organization,
    pe.repository,
    pe.repository_default_branch AS branch,
    pe.repository_visibility AS visibility,
    c.id AS commit_sha,
    TIMESTAMP(c.timestamp) AS commit_timestamp
  FROM `{push_events}` pe, UNNEST(pe.commits) c
  WHERE pe.ref = CONCAT('refs/heads/', pe.repository_default_branch)
)
SELECT commits.*
FROM commits
LEFT JOIN `{review_status}` crs ON crs.commit_sha = commits.commit_sha
WHERE crs.commit_sha IS NULL"#,
        push_events = push_events.qualified(),
        review_status = review_status.qualified(),
    );
    QueryRequest::new(sql)
}

/// Break-glass issues by `author` whose open window contains `timestamp`.
pub fn break_glass_lookup(
    issues: &TableRef,
    author: &str,
    timestamp: DateTime<Utc>,
) -> QueryRequest {
    let sql = format!(
        r#"SELECT html_url
FROM `{issues}`
WHERE repository = 'breakglass'
  AND author = @author
  AND created_at <= @timestamp
  AND closed_at >= @timestamp"#,
        issues = issues.qualified(),
    );
    QueryRequest::new(sql)
        .with_parameter(QueryParameter::string("author", author))
        .with_parameter(QueryParameter::timestamp("timestamp", timestamp))
}

/// The authoritative checkpoint: latest row by `created`.
pub fn latest_checkpoint(checkpoints: &TableRef) -> QueryRequest {
    QueryRequest::new(format!(
        "SELECT delivery_id, created FROM `{}` ORDER BY created DESC LIMIT 1",
        checkpoints.qualified(),
    ))
}

/// Whether a delivery already reached the events table.
pub fn event_exists(events: &TableRef, delivery_id: &str) -> QueryRequest {
    QueryRequest::new(format!(
        "SELECT delivery_id FROM `{}` WHERE delivery_id = @delivery_id LIMIT 1",
        events.qualified(),
    ))
    .with_parameter(QueryParameter::string("delivery_id", delivery_id))
}

#[cfg(test)]
#[path = "queries_tests.rs"]
mod tests;
