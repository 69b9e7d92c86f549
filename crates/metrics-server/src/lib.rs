//! # Metrics Server
//!
//! HTTP service for receiving GitHub webhooks and persisting them to the
//! events table.
//!
//! This service provides:
//! - `POST /webhook` with signature validation and retried persistence
//! - `GET /healthz` reporting warehouse reachability
//! - `GET /metrics` serving the Prometheus registry
//! - `POST /retry` triggering one reconciler pass (retry-server mode)
//!
//! The webhook handler never calls GitHub. Responses are terse status-text
//! tokens; everything diagnostic goes to the structured logs.

use axum::{
    extract::{DefaultBodyLimit, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Router,
};
use bytes::Bytes;
use chrono::Utc;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use rand::RngExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument, warn};

use metrics_core::records::{EventRecord, FailureEventRecord};
use metrics_core::signature::verify_signature;
use warehouse_runtime::{InsertRow, WarehouseGateway, WarehouseError};

mod retry_trigger;

pub use retry_trigger::RetryTrigger;

// ============================================================================
// Response Tokens
// ============================================================================

const BODY_CREATED: &str = "created";
const BODY_BAD_REQUEST: &str = "bad request";
const BODY_INTERNAL_ERROR: &str = "internal error";
const BODY_UNAVAILABLE: &str = "unavailable";
const BODY_OK: &str = "ok";

/// Maximum accepted webhook body.
const MAX_BODY_BYTES: usize = 25 * 1024 * 1024;

/// Base delay for insert retry backoff.
const RETRY_BASE_DELAY_MS: u64 = 100;

/// Cap on a single backoff sleep.
const RETRY_MAX_DELAY_MS: u64 = 5_000;

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for the webhook service.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Shared secret for signature verification.
    pub webhook_secret: String,

    /// Events table id (bare, for streamed inserts).
    pub events_table_id: String,

    /// Failure events table id.
    pub failure_events_table_id: String,

    /// Maximum attempts for the events insert.
    pub retry_limit: u32,
}

impl ServerConfig {
    pub fn new(
        webhook_secret: impl Into<String>,
        events_table_id: impl Into<String>,
        failure_events_table_id: impl Into<String>,
    ) -> Self {
        Self {
            webhook_secret: webhook_secret.into(),
            events_table_id: events_table_id.into(),
            failure_events_table_id: failure_events_table_id.into(),
            retry_limit: 3,
        }
    }

    /// Configuration for a retry-only deployment: the webhook endpoint is
    /// disabled.
    pub fn retry_only() -> Self {
        Self::new("", "", "")
    }

    pub fn with_retry_limit(mut self, retry_limit: u32) -> Self {
        self.retry_limit = retry_limit.max(1);
        self
    }
}

// ============================================================================
// Metrics
// ============================================================================

/// Prometheus counters for the service.
pub struct ServerMetrics {
    registry: Registry,
    webhooks_received: IntCounter,
    webhooks_finished: IntCounterVec,
    insert_retries: IntCounter,
}

impl ServerMetrics {
    /// Create and register the counters.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let webhooks_received = IntCounter::new(
            "webhooks_received_total",
            "Webhook requests received, before any validation",
        )?;
        registry.register(Box::new(webhooks_received.clone()))?;

        let webhooks_finished = IntCounterVec::new(
            Opts::new(
                "webhooks_finished_total",
                "Webhook requests by final disposition",
            ),
            &["disposition"],
        )?;
        registry.register(Box::new(webhooks_finished.clone()))?;

        let insert_retries = IntCounter::new(
            "event_insert_retries_total",
            "Event insert attempts beyond the first",
        )?;
        registry.register(Box::new(insert_retries.clone()))?;

        Ok(Self {
            registry,
            webhooks_received,
            webhooks_finished,
            insert_retries,
        })
    }

    fn finished(&self, disposition: &str) {
        self.webhooks_finished
            .with_label_values(&[disposition])
            .inc();
    }

    /// Render the registry in the text exposition format.
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(err) = encoder.encode(&self.registry.gather(), &mut buffer) {
            warn!(error = %err, "Failed to encode metrics");
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl std::fmt::Debug for ServerMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerMetrics").finish()
    }
}

// ============================================================================
// Application State
// ============================================================================

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    config: Arc<ServerConfig>,
    gateway: Arc<dyn WarehouseGateway>,
    metrics: Arc<ServerMetrics>,
    shutting_down: Arc<AtomicBool>,
    retry_trigger: Option<Arc<dyn RetryTrigger>>,
}

impl AppState {
    /// State for the webhook server (no retry endpoint).
    pub fn new(
        config: ServerConfig,
        gateway: Arc<dyn WarehouseGateway>,
        metrics: Arc<ServerMetrics>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            gateway,
            metrics,
            shutting_down: Arc::new(AtomicBool::new(false)),
            retry_trigger: None,
        }
    }

    /// Attach a retry trigger, enabling `POST /retry`.
    pub fn with_retry_trigger(mut self, trigger: Arc<dyn RetryTrigger>) -> Self {
        self.retry_trigger = Some(trigger);
        self
    }

    /// Flip the shutdown flag: in-flight requests drain, new webhook
    /// posts answer 503.
    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
    }

    fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("retry_enabled", &self.retry_trigger.is_some())
            .finish()
    }
}

// ============================================================================
// Router
// ============================================================================

/// Build the HTTP router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/webhook", post(handle_webhook))
        .route("/healthz", get(handle_healthz))
        .route("/metrics", get(handle_metrics))
        .route("/retry", post(handle_retry))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until `shutdown` completes.
///
/// The shutdown future should flip the state's flag (see
/// [`AppState::begin_shutdown`]) before resolving so that draining
/// requests observe it.
pub async fn serve(
    state: AppState,
    port: u16,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), ServerError> {
    let router = create_router(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ServerError::BindFailed {
            address: addr.to_string(),
            message: e.to_string(),
        })?;

    info!(address = %addr, "Listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| ServerError::ServeFailed {
            message: e.to_string(),
        })
}

/// Errors starting or running the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {address}: {message}")]
    BindFailed { address: String, message: String },

    #[error("server failed: {message}")]
    ServeFailed { message: String },
}

// ============================================================================
// Handlers
// ============================================================================

/// Handle one GitHub webhook delivery.
#[instrument(skip(state, headers, body), fields(delivery_id, event))]
async fn handle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, &'static str) {
    // Retry-server deployments carry no webhook secret and do not accept
    // deliveries
    if state.config.webhook_secret.is_empty() {
        return (StatusCode::NOT_FOUND, BODY_BAD_REQUEST);
    }

    state.metrics.webhooks_received.inc();

    if state.is_shutting_down() {
        state.metrics.finished("unavailable");
        return (StatusCode::SERVICE_UNAVAILABLE, BODY_UNAVAILABLE);
    }

    let (delivery_id, event, signature) = match required_headers(&headers) {
        Some(parts) => parts,
        None => {
            warn!("Missing required webhook headers");
            state.metrics.finished("bad_request");
            return (StatusCode::BAD_REQUEST, BODY_BAD_REQUEST);
        }
    };

    tracing::Span::current().record("delivery_id", delivery_id.as_str());
    tracing::Span::current().record("event", event.as_str());

    if verify_signature(&body, &signature, &state.config.webhook_secret).is_err() {
        warn!(delivery_id = %delivery_id, "Webhook signature rejected");
        state.metrics.finished("bad_request");
        return (StatusCode::BAD_REQUEST, BODY_BAD_REQUEST);
    }

    let record = EventRecord {
        delivery_id: delivery_id.clone(),
        signature,
        received: Utc::now(),
        event,
        payload: String::from_utf8_lossy(&body).into_owned(),
    };

    match persist_with_retry(&state, &record).await {
        Ok(()) => {
            info!(delivery_id = %delivery_id, "Event persisted");
            state.metrics.finished("created");
            (StatusCode::CREATED, BODY_CREATED)
        }
        Err(err) => {
            error!(
                delivery_id = %delivery_id,
                error = %err,
                "Event persistence exhausted retries"
            );
            record_failure(&state, &delivery_id).await;
            state.metrics.finished("internal_error");
            (StatusCode::INTERNAL_SERVER_ERROR, BODY_INTERNAL_ERROR)
        }
    }
}

/// Health check: 200 when the warehouse is reachable.
async fn handle_healthz(State(state): State<AppState>) -> (StatusCode, &'static str) {
    if state.is_shutting_down() {
        return (StatusCode::SERVICE_UNAVAILABLE, BODY_UNAVAILABLE);
    }

    match state.gateway.health_check().await {
        Ok(()) => (StatusCode::OK, BODY_OK),
        Err(err) => {
            warn!(error = %err, "Health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, BODY_UNAVAILABLE)
        }
    }
}

/// Prometheus text exposition.
async fn handle_metrics(State(state): State<AppState>) -> String {
    state.metrics.render()
}

/// Trigger one reconciler pass.
///
/// Contention for the retry lock counts as success: another instance is
/// already doing the work.
#[instrument(skip(state))]
async fn handle_retry(State(state): State<AppState>) -> (StatusCode, &'static str) {
    let Some(trigger) = state.retry_trigger.as_ref() else {
        return (StatusCode::NOT_FOUND, BODY_BAD_REQUEST);
    };

    if state.is_shutting_down() {
        return (StatusCode::SERVICE_UNAVAILABLE, BODY_UNAVAILABLE);
    }

    match trigger.trigger().await {
        Ok(contended) => {
            if contended {
                info!("Retry pass skipped: lock contended");
            }
            (StatusCode::OK, BODY_OK)
        }
        Err(err) => {
            error!(error = %err, "Retry pass failed");
            (StatusCode::INTERNAL_SERVER_ERROR, BODY_INTERNAL_ERROR)
        }
    }
}

// ============================================================================
// Persistence
// ============================================================================

/// Extract the three required webhook headers.
fn required_headers(headers: &HeaderMap) -> Option<(String, String, String)> {
    let get = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(|v| v.to_string())
    };

    Some((
        get("X-GitHub-Delivery")?,
        get("X-GitHub-Event")?,
        get("X-Hub-Signature-256")?,
    ))
}

/// Insert the event row, retrying transiently with jittered exponential
/// backoff up to the configured limit.
async fn persist_with_retry(state: &AppState, record: &EventRecord) -> Result<(), WarehouseError> {
    let row = InsertRow::from_record(Some(record.delivery_id.clone()), record)?;

    let mut attempt = 0u32;
    loop {
        attempt += 1;

        match state
            .gateway
            .insert(&state.config.events_table_id, vec![row.clone()])
            .await
        {
            Ok(()) => return Ok(()),
            Err(err) if attempt >= state.config.retry_limit => return Err(err),
            Err(err) => {
                state.metrics.insert_retries.inc();
                let delay = backoff_delay(attempt);
                warn!(
                    delivery_id = %record.delivery_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Event insert failed; backing off"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Exponential backoff with jitter, capped.
fn backoff_delay(attempt: u32) -> Duration {
    let exponential = RETRY_BASE_DELAY_MS.saturating_mul(1u64 << attempt.min(10));
    let jitter = rand::rng().random_range(0..RETRY_BASE_DELAY_MS);
    Duration::from_millis(exponential.min(RETRY_MAX_DELAY_MS) + jitter)
}

/// Best-effort failure-event row after retries are exhausted.
async fn record_failure(state: &AppState, delivery_id: &str) {
    let record = FailureEventRecord {
        delivery_id: delivery_id.to_string(),
        created: Utc::now(),
    };

    let row = match InsertRow::from_record(Some(delivery_id.to_string()), &record) {
        Ok(row) => row,
        Err(err) => {
            error!(delivery_id = %delivery_id, error = %err, "Failure record serialization failed");
            return;
        }
    };

    if let Err(err) = state
        .gateway
        .insert(&state.config.failure_events_table_id, vec![row])
        .await
    {
        error!(
            delivery_id = %delivery_id,
            error = %err,
            "Failed to record failure event"
        );
    }
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
