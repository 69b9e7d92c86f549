//! # Metrics Jobs
//!
//! The aggregator's batch pipelines:
//!
//! - [`reconciler`] - singleton walk of GitHub's delivery index, requesting
//!   redelivery for anything that failed and never reached the events table
//! - [`artifact`] - workflow log archives copied to object storage
//! - [`review`] - per-commit review-approval verdicts with break-glass
//!   correlation
//!
//! Each job opens the warehouse gateway and the GitHub client, runs its
//! selection query, fans work out on a bounded pool, and finishes with one
//! batched insert. The selection queries (see [`queries`]) exclude rows
//! already present in the output table, which makes every job safe to
//! repeat.

use thiserror::Error;

pub mod artifact;
pub mod queries;
pub mod reconciler;
pub mod review;

#[cfg(test)]
pub(crate) mod testutil;

pub use artifact::{ArtifactJob, ArtifactJobConfig, ArtifactSummary};
pub use reconciler::{ReconcileSummary, Reconciler, ReconcilerConfig, RETRY_LOCK_NAME};
pub use review::{ReviewJob, ReviewJobConfig, ReviewSummary};

/// A warehouse table addressed both ways the gateway needs it: fully
/// qualified for SQL, bare for streamed inserts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    qualified: String,
    table_id: String,
}

impl TableRef {
    /// Build a reference from project, dataset, and table id.
    pub fn new(
        project_id: impl AsRef<str>,
        dataset_id: impl AsRef<str>,
        table_id: impl Into<String>,
    ) -> Self {
        let table_id = table_id.into();
        Self {
            qualified: format!(
                "{}.{}.{}",
                project_id.as_ref(),
                dataset_id.as_ref(),
                table_id
            ),
            table_id,
        }
    }

    /// The fully qualified name for use in SQL (without backticks).
    pub fn qualified(&self) -> &str {
        &self.qualified
    }

    /// The bare table id for streamed inserts.
    pub fn table_id(&self) -> &str {
        &self.table_id
    }
}

impl std::fmt::Display for TableRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.qualified)
    }
}

/// Errors that abort a job run.
///
/// Per-item failures are converted into recorded outcomes inside the jobs;
/// what surfaces here failed the run itself (selection query, checkpoint
/// I/O, the final insert, lease-store trouble).
#[derive(Debug, Error)]
pub enum JobError {
    #[error("warehouse operation failed: {0}")]
    Warehouse(#[from] warehouse_runtime::WarehouseError),

    #[error("GitHub operation failed: {0}")]
    GitHub(#[from] github_app_sdk::ApiError),

    #[error("object storage operation failed: {0}")]
    ObjectStore(#[from] metrics_core::ObjectStoreError),

    #[error("lease operation failed: {0}")]
    Lease(#[from] metrics_core::LeaseError),
}
