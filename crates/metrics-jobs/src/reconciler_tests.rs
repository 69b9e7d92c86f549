//! Tests for the retry reconciler.

use super::*;
use crate::testutil::github_client_for;
use metrics_core::lease::MemoryLeaseStore;
use warehouse_runtime::MemoryWarehouse;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config() -> ReconcilerConfig {
    ReconcilerConfig::new(
        TableRef::new("proj", "data", "events"),
        TableRef::new("proj", "data", "checkpoints"),
    )
}

fn delivery_json(id: u64, guid: &str, status_code: u16) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "guid": guid,
        "delivered_at": "2024-07-12T10:20:17Z",
        "redelivery": false,
        "status": "delivered",
        "status_code": status_code,
        "event": "workflow_run",
    })
}

struct Fixture {
    server: MockServer,
    warehouse: Arc<MemoryWarehouse>,
    leases: Arc<MemoryLeaseStore>,
}

impl Fixture {
    async fn new() -> Self {
        Self {
            server: MockServer::start().await,
            warehouse: Arc::new(MemoryWarehouse::new()),
            leases: Arc::new(MemoryLeaseStore::new()),
        }
    }

    fn reconciler(&self) -> Reconciler {
        Reconciler::new(
            Arc::clone(&self.warehouse) as Arc<dyn WarehouseGateway>,
            github_client_for(&self.server),
            Arc::clone(&self.leases) as Arc<dyn LeaseStore>,
            config(),
        )
    }

    fn checkpoint_rows(&self) -> Vec<serde_json::Value> {
        self.warehouse.inserted_rows("checkpoints")
    }
}

#[tokio::test]
async fn test_held_lock_exits_quietly_with_no_calls() {
    let fixture = Fixture::new().await;
    fixture
        .leases
        .hold_elsewhere(RETRY_LOCK_NAME, Duration::minutes(5));

    // No GitHub mocks mounted: any request would fail the run
    let summary = fixture.reconciler().run().await.expect("quiet exit");

    assert!(summary.lock_contended);
    assert_eq!(summary.observed, 0);
    assert_eq!(fixture.warehouse.query_count(), 0, "no warehouse reads");
    assert!(fixture.checkpoint_rows().is_empty(), "no checkpoint writes");
}

#[tokio::test]
async fn test_empty_delivery_page_terminates_cleanly() {
    let fixture = Fixture::new().await;

    Mock::given(method("GET"))
        .and(path("/app/hook/deliveries"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
        .mount(&fixture.server)
        .await;

    let summary = fixture.reconciler().run().await.expect("run");

    assert!(!summary.lock_contended);
    assert_eq!(summary.observed, 0);
    assert_eq!(summary.pages, 1);
    assert!(fixture.checkpoint_rows().is_empty());
    // The lease was released
    assert!(!fixture.leases.is_claimed(RETRY_LOCK_NAME));
}

#[tokio::test]
async fn test_walk_skips_delivered_and_present_redelivers_missing() {
    let fixture = Fixture::new().await;

    // guid-ok answered 200; guid-present failed but reached the events
    // table; guid-missing failed and is absent
    Mock::given(method("GET"))
        .and(path("/app/hook/deliveries"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            delivery_json(1, "guid-ok", 200),
            delivery_json(2, "guid-present", 503),
            delivery_json(3, "guid-missing", 500),
        ])))
        .mount(&fixture.server)
        .await;

    Mock::given(method("POST"))
        .and(path("/app/hook/deliveries/3/attempts"))
        .respond_with(ResponseTemplate::new(202).set_body_json(serde_json::json!({})))
        .expect(1)
        .mount(&fixture.server)
        .await;

    // guid-present is in the events table; guid-missing is not
    fixture.warehouse.stub_query_json_for_param(
        "delivery_id = @delivery_id",
        "delivery_id",
        "guid-present",
        vec![serde_json::json!({"delivery_id": "guid-present"})],
    );

    let summary = fixture.reconciler().run().await.expect("run");

    assert_eq!(summary.observed, 3);
    assert_eq!(summary.skipped_delivered, 1);
    assert_eq!(summary.skipped_present, 1);
    assert_eq!(summary.redelivered, 1);
    assert_eq!(summary.failed, 0);

    // One checkpoint row for the page, carrying the last processed guid
    let checkpoints = fixture.checkpoint_rows();
    assert_eq!(checkpoints.len(), 1);
    assert_eq!(
        checkpoints[0]["delivery_id"],
        serde_json::json!("guid-missing")
    );
}

#[tokio::test]
async fn test_walk_stops_at_stored_checkpoint() {
    let fixture = Fixture::new().await;

    fixture.warehouse.stub_query_json(
        "FROM `proj.data.checkpoints`",
        vec![serde_json::json!({
            "delivery_id": "guid-checkpoint",
            "created": "2024-07-12T00:00:00Z",
        })],
    );

    // The page continues past the checkpoint; nothing after it may be
    // observed. Both deliveries before the checkpoint answered 200.
    Mock::given(method("GET"))
        .and(path("/app/hook/deliveries"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            delivery_json(1, "guid-new", 200),
            delivery_json(2, "guid-checkpoint", 503),
            delivery_json(3, "guid-older", 500),
        ])))
        .mount(&fixture.server)
        .await;

    let summary = fixture.reconciler().run().await.expect("run");

    assert_eq!(summary.observed, 1, "walk stops at the checkpoint");
    assert_eq!(summary.skipped_delivered, 1);
    assert_eq!(summary.redelivered, 0);

    let checkpoints = fixture.checkpoint_rows();
    assert_eq!(checkpoints.len(), 1);
    assert_eq!(checkpoints[0]["delivery_id"], serde_json::json!("guid-new"));
}

#[tokio::test]
async fn test_walk_follows_cursor_across_pages() {
    let fixture = Fixture::new().await;

    Mock::given(method("GET"))
        .and(path("/app/hook/deliveries"))
        .and(query_param("cursor", "v1_page2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            delivery_json(2, "guid-two", 200),
        ])))
        .mount(&fixture.server)
        .await;

    Mock::given(method("GET"))
        .and(path("/app/hook/deliveries"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header(
                    "link",
                    format!(
                        "<{}/app/hook/deliveries?per_page=100&cursor=v1_page2>; rel=\"next\"",
                        fixture.server.uri()
                    )
                    .as_str(),
                )
                .set_body_json(serde_json::json!([delivery_json(1, "guid-one", 200)])),
        )
        .mount(&fixture.server)
        .await;

    let summary = fixture.reconciler().run().await.expect("run");

    assert_eq!(summary.pages, 2);
    assert_eq!(summary.observed, 2);
    // One checkpoint per non-empty page
    assert_eq!(fixture.checkpoint_rows().len(), 2);
}

#[tokio::test]
async fn test_mid_walk_401_refreshes_and_resumes() {
    let fixture = Fixture::new().await;

    Mock::given(method("GET"))
        .and(path("/app/hook/deliveries"))
        .respond_with(ResponseTemplate::new(401).set_body_string("Bad credentials"))
        .up_to_n_times(1)
        .mount(&fixture.server)
        .await;

    Mock::given(method("GET"))
        .and(path("/app/hook/deliveries"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
        .mount(&fixture.server)
        .await;

    let summary = fixture.reconciler().run().await.expect("run");

    assert_eq!(summary.token_refreshes, 1);
    assert_eq!(summary.pages, 1);
}

#[tokio::test]
async fn test_persistent_401_fails_the_run() {
    let fixture = Fixture::new().await;

    Mock::given(method("GET"))
        .and(path("/app/hook/deliveries"))
        .respond_with(ResponseTemplate::new(401).set_body_string("Bad credentials"))
        .mount(&fixture.server)
        .await;

    let err = fixture.reconciler().run().await.expect_err("exhausted");
    assert!(matches!(err, JobError::GitHub(_)));
    // The lease is still released on the failure path
    assert!(!fixture.leases.is_claimed(RETRY_LOCK_NAME));
}

#[tokio::test]
async fn test_redelivery_failure_is_counted_and_walk_continues() {
    let fixture = Fixture::new().await;

    Mock::given(method("GET"))
        .and(path("/app/hook/deliveries"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            delivery_json(1, "guid-bad", 500),
            delivery_json(2, "guid-good", 500),
        ])))
        .mount(&fixture.server)
        .await;

    Mock::given(method("POST"))
        .and(path("/app/hook/deliveries/1/attempts"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&fixture.server)
        .await;

    Mock::given(method("POST"))
        .and(path("/app/hook/deliveries/2/attempts"))
        .respond_with(ResponseTemplate::new(202).set_body_json(serde_json::json!({})))
        .expect(1)
        .mount(&fixture.server)
        .await;

    let summary = fixture.reconciler().run().await.expect("run");

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.redelivered, 1);
}

#[tokio::test]
async fn test_existence_check_failure_aborts_run() {
    let fixture = Fixture::new().await;

    Mock::given(method("GET"))
        .and(path("/app/hook/deliveries"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            delivery_json(1, "guid-x", 500),
        ])))
        .mount(&fixture.server)
        .await;

    fixture.warehouse.fail_queries(true);

    let err = fixture.reconciler().run().await.expect_err("aborted");
    assert!(matches!(err, JobError::Warehouse(_)));
    assert!(!fixture.leases.is_claimed(RETRY_LOCK_NAME));
}
