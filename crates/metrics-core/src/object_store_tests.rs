//! Tests for the object writer.

use super::*;
use warehouse_runtime::StaticTokenSource;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ============================================================================
// URI Parsing
// ============================================================================

#[test]
fn test_parse_valid_uri() {
    let uri = GcsUri::parse("gs://bucket/a/b/c.tar.gz").expect("parse");
    assert_eq!(uri.bucket(), "bucket");
    assert_eq!(uri.object(), "a/b/c.tar.gz");
    assert_eq!(uri.to_string(), "gs://bucket/a/b/c.tar.gz");
}

#[test]
fn test_parse_rejects_other_schemes() {
    assert!(GcsUri::parse("s3://bucket/object").is_err());
    assert!(GcsUri::parse("https://bucket/object").is_err());
    assert!(GcsUri::parse("bucket/object").is_err());
}

#[test]
fn test_parse_rejects_missing_parts() {
    assert!(GcsUri::parse("gs://").is_err());
    assert!(GcsUri::parse("gs://bucket").is_err());
    assert!(GcsUri::parse("gs://bucket/").is_err());
    assert!(GcsUri::parse("gs:///object").is_err());
}

#[test]
fn test_artifact_logs_uri_layout() {
    let uri = GcsUri::for_artifact_logs("logs-bucket", "acme/metrics", "abc-123");
    assert_eq!(
        uri.to_string(),
        "gs://logs-bucket/acme/metrics/abc-123/artifacts.tar.gz"
    );
}

// ============================================================================
// GCS Writer
// ============================================================================

#[tokio::test]
async fn test_gcs_write_streams_media_upload() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/upload/storage/v1/b/logs-bucket/o"))
        .and(query_param("uploadType", "media"))
        .and(query_param("name", "acme/metrics/abc-123/artifacts.tar.gz"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "name": "acme/metrics/abc-123/artifacts.tar.gz",
            "generation": "1",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let writer = GcsObjectWriter::with_api_url(
        reqwest::Client::new(),
        Arc::new(StaticTokenSource::new("test-token")),
        server.uri(),
    );

    let uri = GcsUri::for_artifact_logs("logs-bucket", "acme/metrics", "abc-123");
    writer
        .write(&uri, byte_stream_from(Bytes::from_static(b"archive")))
        .await
        .expect("write");
}

#[tokio::test]
async fn test_gcs_write_classifies_denial() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/upload/storage/v1/b/logs-bucket/o"))
        .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
        .mount(&server)
        .await;

    let writer = GcsObjectWriter::with_api_url(
        reqwest::Client::new(),
        Arc::new(StaticTokenSource::new("test-token")),
        server.uri(),
    );

    let uri = GcsUri::parse("gs://logs-bucket/x").expect("parse");
    let err = writer
        .write(&uri, byte_stream_from(Bytes::from_static(b"x")))
        .await
        .expect_err("denied");

    assert!(matches!(err, ObjectStoreError::AuthenticationFailed { .. }));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_gcs_write_surfaces_transient_rejection() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/upload/storage/v1/b/logs-bucket/o"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let writer = GcsObjectWriter::with_api_url(
        reqwest::Client::new(),
        Arc::new(StaticTokenSource::new("test-token")),
        server.uri(),
    );

    let uri = GcsUri::parse("gs://logs-bucket/x").expect("parse");
    let err = writer
        .write(&uri, byte_stream_from(Bytes::from_static(b"x")))
        .await
        .expect_err("unavailable");

    assert!(err.is_transient());
}

// ============================================================================
// Memory Writer
// ============================================================================

#[tokio::test]
async fn test_memory_store_records_objects() {
    let store = MemoryObjectStore::new();
    let uri = GcsUri::for_artifact_logs("b", "acme/metrics", "abc-123");

    store
        .write(&uri, byte_stream_from(Bytes::from_static(b"archive")))
        .await
        .expect("write");

    assert_eq!(store.object_count(), 1);
    assert_eq!(
        store.object_bytes(&uri).as_deref(),
        Some(b"archive".as_slice())
    );
}

#[tokio::test]
async fn test_memory_store_failed_write_stores_nothing() {
    let store = MemoryObjectStore::new();
    store.fail_writes(true);

    let uri = GcsUri::parse("gs://b/x").expect("parse");
    let err = store
        .write(&uri, byte_stream_from(Bytes::from_static(b"x")))
        .await
        .expect_err("failure");

    assert!(matches!(err, ObjectStoreError::UploadRejected { .. }));
    assert_eq!(store.object_count(), 0);
}
