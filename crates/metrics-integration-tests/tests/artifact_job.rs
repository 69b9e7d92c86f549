//! End-to-end artifact-log ingestion scenarios.

mod common;

use std::sync::Arc;

use metrics_core::object_store::{GcsUri, MemoryObjectStore, ObjectWriter};
use metrics_jobs::{ArtifactJob, ArtifactJobConfig, TableRef};
use warehouse_runtime::{MemoryWarehouse, WarehouseGateway};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{github_client_for, mount_token_exchange};

const SELECTION_MARKER: &str = "NOT IN (SELECT delivery_id FROM `proj.data.artifacts`)";

fn job(
    server: &MockServer,
    warehouse: Arc<MemoryWarehouse>,
    objects: Arc<MemoryObjectStore>,
) -> ArtifactJob {
    let mut config = ArtifactJobConfig::new(
        "logs-bucket",
        TableRef::new("proj", "data", "events"),
        TableRef::new("proj", "data", "artifacts"),
    );
    config.batch_size = 1;
    config.concurrency = 1;

    ArtifactJob::new(
        warehouse as Arc<dyn WarehouseGateway>,
        github_client_for(server),
        objects as Arc<dyn ObjectWriter>,
        config,
    )
}

fn event_row(server: &MockServer, delivery_id: &str) -> serde_json::Value {
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
        "pull_request_numbers": [],
    })
}

#[tokio::test]
async fn test_gone_archive_records_not_found_without_uploading() {
    let server = MockServer::start().await;
    mount_token_exchange(&server).await;
    let warehouse = Arc::new(MemoryWarehouse::new());
    let objects = Arc::new(MemoryObjectStore::new());

    warehouse.stub_query_json(SELECTION_MARKER, vec![event_row(&server, "abc-123")]);

    Mock::given(method("GET"))
        .and(path("/repos/acme/metrics/actions/runs/7/logs"))
        .respond_with(ResponseTemplate::new(410))
        .mount(&server)
        .await;

    let summary = job(&server, Arc::clone(&warehouse), Arc::clone(&objects))
        .run()
        .await
        .expect("run");

    assert_eq!(summary.not_found, 1);
    assert_eq!(objects.object_count(), 0, "nothing uploaded");

    let rows = warehouse.inserted_rows("artifacts");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["status"], serde_json::json!("NOT_FOUND"));
    assert_eq!(
        rows[0]["logs_uri"],
        serde_json::json!("gs://logs-bucket/acme/metrics/abc-123/artifacts.tar.gz")
    );
}

#[tokio::test]
async fn test_archive_flows_from_github_to_object_storage() {
    let server = MockServer::start().await;
    mount_token_exchange(&server).await;
    let warehouse = Arc::new(MemoryWarehouse::new());
    let objects = Arc::new(MemoryObjectStore::new());

    warehouse.stub_query_json(SELECTION_MARKER, vec![event_row(&server, "abc-123")]);

    let archive = b"PK\x03\x04 integration archive bytes".to_vec();
    Mock::given(method("GET"))
        .and(path("/repos/acme/metrics/actions/runs/7/logs"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(archive.clone()))
        .mount(&server)
        .await;

    let summary = job(&server, Arc::clone(&warehouse), Arc::clone(&objects))
        .run()
        .await
        .expect("run");

    assert_eq!(summary.success, 1);

    let uri = GcsUri::parse("gs://logs-bucket/acme/metrics/abc-123/artifacts.tar.gz").unwrap();
    assert_eq!(objects.object_bytes(&uri).as_deref(), Some(archive.as_slice()));

    let rows = warehouse.inserted_rows("artifacts");
    assert_eq!(rows[0]["status"], serde_json::json!("SUCCESS"));
}

#[tokio::test]
async fn test_second_run_over_unchanged_events_adds_no_rows() {
    let server = MockServer::start().await;
    mount_token_exchange(&server).await;
    let warehouse = Arc::new(MemoryWarehouse::new());
    let objects = Arc::new(MemoryObjectStore::new());

    warehouse.stub_query_json(SELECTION_MARKER, vec![event_row(&server, "abc-123")]);

    Mock::given(method("GET"))
        .and(path("/repos/acme/metrics/actions/runs/7/logs"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"zip".to_vec()))
        .mount(&server)
        .await;

    job(&server, Arc::clone(&warehouse), Arc::clone(&objects))
        .run()
        .await
        .expect("first run");
    assert_eq!(warehouse.inserted_rows("artifacts").len(), 1);

    // After the first run the selection query excludes the processed
    // delivery; model that by replacing the canned result with emptiness.
    let warehouse_after = Arc::new(MemoryWarehouse::new());
    warehouse_after.stub_query_json(SELECTION_MARKER, vec![]);

    let summary = job(&server, Arc::clone(&warehouse_after), objects)
        .run()
        .await
        .expect("second run");

    assert_eq!(summary.selected, 0);
    assert!(warehouse_after.inserted_rows("artifacts").is_empty());
}
