//! Tests for the artifact-log ingestion job.

use super::*;
use crate::testutil::{github_client_for, mount_token_exchange};
use metrics_core::object_store::MemoryObjectStore;
use warehouse_runtime::MemoryWarehouse;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SELECTION_MARKER: &str = "NOT IN (SELECT delivery_id FROM `proj.data.artifacts`)";

fn config() -> ArtifactJobConfig {
    ArtifactJobConfig {
        batch_size: 100,
        concurrency: 2,
        ..ArtifactJobConfig::new(
            "logs-bucket",
            TableRef::new("proj", "data", "events"),
            TableRef::new("proj", "data", "artifacts"),
        )
    }
}

fn event_row(server: &MockServer, delivery_id: &str, prs: &[u64]) -> serde_json::Value {
    serde_json::json!({
        "delivery_id": delivery_id,
        "repo_slug": "acme/metrics",
        "repo_name": "metrics",
        "org_name": "acme",
        "logs_url": format!("{}/repos/acme/metrics/actions/runs/7/logs", server.uri()),
        "github_actor": "alice",
        "workflow_url": "https://github.com/acme/metrics/actions/runs/7",
        "workflow_run_id": 7,
        "workflow_run_attempt": 1,
        "pull_request_numbers": prs,
    })
}

struct Fixture {
    server: MockServer,
    warehouse: Arc<MemoryWarehouse>,
    objects: Arc<MemoryObjectStore>,
}

impl Fixture {
    async fn new() -> Self {
        let fixture = Self {
            server: MockServer::start().await,
            warehouse: Arc::new(MemoryWarehouse::new()),
            objects: Arc::new(MemoryObjectStore::new()),
        };
        mount_token_exchange(&fixture.server).await;
        fixture
    }

    fn job(&self) -> ArtifactJob {
        ArtifactJob::new(
            Arc::clone(&self.warehouse) as Arc<dyn WarehouseGateway>,
            github_client_for(&self.server),
            Arc::clone(&self.objects) as Arc<dyn ObjectWriter>,
            config(),
        )
    }

    fn artifact_rows(&self) -> Vec<serde_json::Value> {
        self.warehouse.inserted_rows("artifacts")
    }
}

#[tokio::test]
async fn test_success_path_stores_archive_and_records_row() {
    let fixture = Fixture::new().await;

    fixture.warehouse.stub_query_json(
        SELECTION_MARKER,
        vec![event_row(&fixture.server, "abc-123", &[])],
    );

    Mock::given(method("GET"))
        .and(path("/repos/acme/metrics/actions/runs/7/logs"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"zip-bytes".to_vec()))
        .mount(&fixture.server)
        .await;

    let summary = fixture.job().run().await.expect("run");

    assert_eq!(
        summary,
        ArtifactSummary {
            selected: 1,
            success: 1,
            not_found: 0,
            failure: 0,
        }
    );

    // Archive landed at the deterministic path
    let uri = GcsUri::parse("gs://logs-bucket/acme/metrics/abc-123/artifacts.tar.gz").unwrap();
    assert_eq!(
        fixture.objects.object_bytes(&uri).as_deref(),
        Some(b"zip-bytes".as_slice())
    );

    // One artifact row, keyed on the delivery id
    let rows = fixture.artifact_rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["delivery_id"], serde_json::json!("abc-123"));
    assert_eq!(rows[0]["status"], serde_json::json!("SUCCESS"));
    assert_eq!(
        rows[0]["logs_uri"],
        serde_json::json!("gs://logs-bucket/acme/metrics/abc-123/artifacts.tar.gz")
    );
    assert_eq!(rows[0]["job_name"], serde_json::json!("7-1"));
    assert_eq!(
        fixture.warehouse.inserted_dedupe_ids("artifacts"),
        vec![Some("abc-123".to_string())]
    );
}

#[tokio::test]
async fn test_expired_logs_record_not_found_and_store_nothing() {
    let fixture = Fixture::new().await;

    fixture.warehouse.stub_query_json(
        SELECTION_MARKER,
        vec![event_row(&fixture.server, "abc-123", &[])],
    );

    Mock::given(method("GET"))
        .and(path("/repos/acme/metrics/actions/runs/7/logs"))
        .respond_with(ResponseTemplate::new(410))
        .mount(&fixture.server)
        .await;

    let summary = fixture.job().run().await.expect("run");

    assert_eq!(summary.not_found, 1);
    assert_eq!(summary.success, 0);

    // Nothing uploaded, but the row still carries the planned path
    assert_eq!(fixture.objects.object_count(), 0);
    let rows = fixture.artifact_rows();
    assert_eq!(rows[0]["status"], serde_json::json!("NOT_FOUND"));
    assert_eq!(
        rows[0]["logs_uri"],
        serde_json::json!("gs://logs-bucket/acme/metrics/abc-123/artifacts.tar.gz")
    );
}

#[tokio::test]
async fn test_transient_download_error_records_failure() {
    let fixture = Fixture::new().await;

    fixture.warehouse.stub_query_json(
        SELECTION_MARKER,
        vec![event_row(&fixture.server, "abc-123", &[])],
    );

    Mock::given(method("GET"))
        .and(path("/repos/acme/metrics/actions/runs/7/logs"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&fixture.server)
        .await;

    let summary = fixture.job().run().await.expect("run");

    assert_eq!(summary.failure, 1);
    let rows = fixture.artifact_rows();
    assert_eq!(rows[0]["status"], serde_json::json!("FAILURE"));
}

#[tokio::test]
async fn test_upload_failure_records_failure() {
    let fixture = Fixture::new().await;
    fixture.objects.fail_writes(true);

    fixture.warehouse.stub_query_json(
        SELECTION_MARKER,
        vec![event_row(&fixture.server, "abc-123", &[])],
    );

    Mock::given(method("GET"))
        .and(path("/repos/acme/metrics/actions/runs/7/logs"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"zip".to_vec()))
        .mount(&fixture.server)
        .await;

    let summary = fixture.job().run().await.expect("run");

    assert_eq!(summary.failure, 1);
    assert_eq!(fixture.objects.object_count(), 0);
}

#[tokio::test]
async fn test_comments_posted_after_logs_stored() {
    let fixture = Fixture::new().await;

    fixture.warehouse.stub_query_json(
        SELECTION_MARKER,
        vec![event_row(&fixture.server, "abc-123", &[48, 52])],
    );

    Mock::given(method("GET"))
        .and(path("/repos/acme/metrics/actions/runs/7/logs"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"zip".to_vec()))
        .mount(&fixture.server)
        .await;

    Mock::given(method("POST"))
        .and(path("/repos/acme/metrics/issues/48/comments"))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({"id": 1})))
        .expect(1)
        .mount(&fixture.server)
        .await;

    Mock::given(method("POST"))
        .and(path("/repos/acme/metrics/issues/52/comments"))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({"id": 2})))
        .expect(1)
        .mount(&fixture.server)
        .await;

    let summary = fixture.job().run().await.expect("run");
    assert_eq!(summary.success, 1);
}

#[tokio::test]
async fn test_comment_failure_degrades_to_failure_with_archive_kept() {
    let fixture = Fixture::new().await;

    fixture.warehouse.stub_query_json(
        SELECTION_MARKER,
        vec![event_row(&fixture.server, "abc-123", &[48])],
    );

    Mock::given(method("GET"))
        .and(path("/repos/acme/metrics/actions/runs/7/logs"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"zip".to_vec()))
        .mount(&fixture.server)
        .await;

    Mock::given(method("POST"))
        .and(path("/repos/acme/metrics/issues/48/comments"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&fixture.server)
        .await;

    let summary = fixture.job().run().await.expect("run");

    assert_eq!(summary.failure, 1);
    // The archive itself was stored before commenting
    assert_eq!(fixture.objects.object_count(), 1);
    let rows = fixture.artifact_rows();
    assert_eq!(rows[0]["status"], serde_json::json!("FAILURE"));
}

#[tokio::test]
async fn test_empty_selection_inserts_nothing() {
    let fixture = Fixture::new().await;

    let summary = fixture.job().run().await.expect("run");

    assert_eq!(summary.selected, 0);
    assert!(fixture.artifact_rows().is_empty());
}

#[tokio::test]
async fn test_selection_failure_fails_the_run() {
    let fixture = Fixture::new().await;
    fixture.warehouse.fail_queries(true);

    let err = fixture.job().run().await.expect_err("selection failed");
    assert!(matches!(err, JobError::Warehouse(_)));
}

#[tokio::test]
async fn test_final_insert_failure_fails_the_run() {
    let fixture = Fixture::new().await;
    fixture.warehouse.fail_inserts(true);

    fixture.warehouse.stub_query_json(
        SELECTION_MARKER,
        vec![event_row(&fixture.server, "abc-123", &[])],
    );

    Mock::given(method("GET"))
        .and(path("/repos/acme/metrics/actions/runs/7/logs"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"zip".to_vec()))
        .mount(&fixture.server)
        .await;

    let err = fixture.job().run().await.expect_err("insert failed");
    assert!(matches!(err, JobError::Warehouse(_)));
}
