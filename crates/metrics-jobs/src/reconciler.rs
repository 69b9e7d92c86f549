//! Retry reconciler.
//!
//! A singleton periodic job that walks GitHub's hook delivery index
//! newest-first and requests redelivery for any delivery that failed and
//! never reached the events table. The distributed lease makes overlapping
//! schedules safe: a held lease means another instance is making progress,
//! and the run exits quietly having touched nothing.
//!
//! The reconciler never writes event rows itself. Redelivered payloads
//! re-enter through the webhook endpoint, keeping signature verification
//! the sole insertion authority for the events table.

use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{info, instrument, warn};

use github_app_sdk::{ApiError, GitHubClient, TokenScope};
use metrics_core::lease::LeaseStore;
use metrics_core::records::CheckpointRecord;
use warehouse_runtime::{query_as, InsertRow, WarehouseGateway};

use crate::queries;
use crate::{JobError, TableRef};

/// Name of the lease object inside the configured bucket.
pub const RETRY_LOCK_NAME: &str = "retry-lock";

/// Configuration for a reconciler run.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Events table (existence checks).
    pub events: TableRef,

    /// Checkpoints table (cursor persistence).
    pub checkpoints: TableRef,

    /// Lease TTL; one run must finish within it.
    pub lock_ttl: Duration,

    /// Maximum credential refreshes per run after mid-walk 401s.
    pub max_token_refreshes: u32,
}

impl ReconcilerConfig {
    /// Defaults: five-minute lease, three refreshes.
    pub fn new(events: TableRef, checkpoints: TableRef) -> Self {
        Self {
            events,
            checkpoints,
            lock_ttl: Duration::minutes(5),
            max_token_refreshes: 3,
        }
    }
}

/// Counters from one reconciler run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    /// The lease was held elsewhere; nothing was done.
    pub lock_contended: bool,

    /// Deliveries observed in the walk.
    pub observed: u64,

    /// Skipped: GitHub recorded a 2xx for the delivery.
    pub skipped_delivered: u64,

    /// Skipped: the delivery is already in the events table.
    pub skipped_present: u64,

    /// Redelivery requested.
    pub redelivered: u64,

    /// Redelivery requests that failed (logged, run continued).
    pub failed: u64,

    /// Pages walked.
    pub pages: u64,

    /// Credential refreshes performed after mid-walk 401s.
    pub token_refreshes: u64,
}

impl ReconcileSummary {
    fn contended() -> Self {
        Self {
            lock_contended: true,
            ..Self::default()
        }
    }
}

/// The retry reconciler.
pub struct Reconciler {
    gateway: Arc<dyn WarehouseGateway>,
    github: GitHubClient,
    leases: Arc<dyn LeaseStore>,
    config: ReconcilerConfig,
}

/// Shape of checkpoint lookup rows.
#[derive(Debug, serde::Deserialize)]
struct CheckpointRow {
    delivery_id: String,
}

impl Reconciler {
    pub fn new(
        gateway: Arc<dyn WarehouseGateway>,
        github: GitHubClient,
        leases: Arc<dyn LeaseStore>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            gateway,
            github,
            leases,
            config,
        }
    }

    /// Run one reconcile pass.
    ///
    /// Returns `Ok` with `lock_contended` set when another instance holds
    /// the lease. The lease is released on every exit path.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<ReconcileSummary, JobError> {
        let lease = match self
            .leases
            .acquire(RETRY_LOCK_NAME, self.config.lock_ttl)
            .await
        {
            Ok(lease) => lease,
            Err(err) if err.is_held() => {
                info!("Retry lock is held elsewhere; exiting quietly");
                return Ok(ReconcileSummary::contended());
            }
            Err(err) => return Err(err.into()),
        };

        let outcome = self.reconcile().await;

        // Release regardless of how the walk ended
        if let Err(release_err) = self.leases.release(lease).await {
            warn!(error = %release_err, "Failed to release retry lock");
        }

        match &outcome {
            Ok(summary) => info!(
                observed = summary.observed,
                skipped_delivered = summary.skipped_delivered,
                skipped_present = summary.skipped_present,
                redelivered = summary.redelivered,
                failed = summary.failed,
                pages = summary.pages,
                "Reconcile pass complete"
            ),
            Err(err) => warn!(error = %err, "Reconcile pass failed"),
        }

        outcome
    }

    async fn reconcile(&self) -> Result<ReconcileSummary, JobError> {
        let stored_checkpoint = self.read_checkpoint().await?;
        let mut summary = ReconcileSummary::default();
        let mut cursor: Option<String> = None;

        loop {
            let page = match self.github.list_deliveries(cursor.as_deref()).await {
                Ok(page) => page,
                Err(ApiError::AuthenticationFailed)
                    if summary.token_refreshes
                        < u64::from(self.config.max_token_refreshes) =>
                {
                    // Token expired mid-walk: refresh and resume from the
                    // same cursor
                    self.github.invalidate_token(&TokenScope::full()).await;
                    summary.token_refreshes += 1;
                    continue;
                }
                Err(err) => return Err(err.into()),
            };

            summary.pages += 1;
            let mut reached_checkpoint = false;
            let mut last_processed: Option<String> = None;

            for delivery in &page.deliveries {
                if stored_checkpoint.as_deref() == Some(delivery.guid.as_str()) {
                    reached_checkpoint = true;
                    break;
                }

                summary.observed += 1;
                last_processed = Some(delivery.guid.clone());

                if delivery.succeeded() {
                    summary.skipped_delivered += 1;
                    continue;
                }

                // An accepted delivery can still be missing downstream, so
                // the events table is the authority
                if self.event_present(&delivery.guid).await? {
                    summary.skipped_present += 1;
                    continue;
                }

                match self.github.redeliver(delivery.id).await {
                    Ok(()) => {
                        info!(
                            delivery_id = %delivery.guid,
                            event = %delivery.event,
                            "Requested redelivery"
                        );
                        summary.redelivered += 1;
                    }
                    Err(err) => {
                        warn!(
                            delivery_id = %delivery.guid,
                            error = %err,
                            "Redelivery request failed"
                        );
                        summary.failed += 1;
                    }
                }
            }

            if let Some(delivery_id) = last_processed {
                self.write_checkpoint(&delivery_id).await?;
            }

            if reached_checkpoint || page.next_cursor.is_none() {
                break;
            }
            cursor = page.next_cursor;
        }

        Ok(summary)
    }

    async fn read_checkpoint(&self) -> Result<Option<String>, JobError> {
        let rows: Vec<CheckpointRow> = query_as(
            self.gateway.as_ref(),
            queries::latest_checkpoint(&self.config.checkpoints),
        )
        .await?;

        Ok(rows.into_iter().next().map(|row| row.delivery_id))
    }

    async fn event_present(&self, delivery_id: &str) -> Result<bool, JobError> {
        let rows = self
            .gateway
            .query(queries::event_exists(&self.config.events, delivery_id))
            .await?;
        Ok(!rows.is_empty())
    }

    async fn write_checkpoint(&self, delivery_id: &str) -> Result<(), JobError> {
        let record = CheckpointRecord {
            delivery_id: delivery_id.to_string(),
            created: Utc::now(),
        };

        let row = InsertRow::from_record(None, &record)?;
        self.gateway
            .insert(self.config.checkpoints.table_id(), vec![row])
            .await?;
        Ok(())
    }
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
#[path = "reconciler_tests.rs"]
mod tests;
