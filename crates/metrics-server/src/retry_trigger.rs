//! Retry trigger seam.
//!
//! `POST /retry` runs one reconciler pass. The endpoint depends on this
//! small trait rather than the reconciler directly so handler tests can
//! stub the outcome.

use async_trait::async_trait;

use metrics_jobs::{JobError, Reconciler};

/// Something that can run one retry-reconcile pass.
#[async_trait]
pub trait RetryTrigger: Send + Sync {
    /// Run one pass. `Ok(true)` means the lock was contended and the pass
    /// was skipped, which callers treat as success.
    async fn trigger(&self) -> Result<bool, JobError>;
}

#[async_trait]
impl RetryTrigger for Reconciler {
    async fn trigger(&self) -> Result<bool, JobError> {
        let summary = self.run().await?;
        Ok(summary.lock_contended)
    }
}
