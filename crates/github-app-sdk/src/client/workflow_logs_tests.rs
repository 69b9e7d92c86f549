//! Tests for workflow log archive downloads.

use super::*;
use crate::client::tests::test_credentials;
use crate::client::ClientConfig;
use wiremock::matchers::{body_json_string, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Mount the token-exchange stub every download needs.
async fn mount_token_exchange(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/app/installations/789/access_tokens"))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
            "token": "ghs_logs",
            "expires_at": (chrono::Utc::now() + chrono::Duration::minutes(60)).to_rfc3339(),
        })))
        .mount(server)
        .await;
}

async fn client_for(server: &MockServer) -> GitHubClient {
    let config = ClientConfig::default().with_api_url(server.uri());
    GitHubClient::new(test_credentials(), config).expect("client")
}

#[tokio::test]
async fn test_download_streams_archive_body() {
    let server = MockServer::start().await;
    mount_token_exchange(&server).await;

    let archive_bytes = b"PK\x03\x04 pretend this is a zip".to_vec();
    Mock::given(method("GET"))
        .and(path("/repos/acme/metrics/actions/runs/7/logs"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(archive_bytes.clone()))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let logs_url = format!("{}/repos/acme/metrics/actions/runs/7/logs", server.uri());

    let archive = client
        .download_workflow_logs(&logs_url, "metrics")
        .await
        .expect("download");

    let body = archive.bytes().await.expect("body");
    assert_eq!(body.as_ref(), archive_bytes.as_slice());
}

#[tokio::test]
async fn test_download_scopes_token_to_repository() {
    let server = MockServer::start().await;

    // The exchange must carry the repository and actions:read narrowing
    Mock::given(method("POST"))
        .and(path("/app/installations/789/access_tokens"))
        .and(body_json_string(
            serde_json::json!({
                "repositories": ["metrics"],
                "permissions": {"actions": "read"},
            })
            .to_string(),
        ))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
            "token": "ghs_scoped",
            "expires_at": (chrono::Utc::now() + chrono::Duration::minutes(60)).to_rfc3339(),
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/logs"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"zip".to_vec()))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    client
        .download_workflow_logs(&format!("{}/logs", server.uri()), "metrics")
        .await
        .expect("download");
}

#[tokio::test]
async fn test_download_classifies_404_as_expired() {
    let server = MockServer::start().await;
    mount_token_exchange(&server).await;

    Mock::given(method("GET"))
        .and(path("/logs"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let err = client
        .download_workflow_logs(&format!("{}/logs", server.uri()), "metrics")
        .await
        .expect_err("expired");

    assert!(matches!(err, ApiError::LogsExpired { status: 404 }));
    assert!(err.is_permanent());
}

#[tokio::test]
async fn test_download_classifies_410_as_expired() {
    let server = MockServer::start().await;
    mount_token_exchange(&server).await;

    Mock::given(method("GET"))
        .and(path("/logs"))
        .respond_with(ResponseTemplate::new(410))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let err = client
        .download_workflow_logs(&format!("{}/logs", server.uri()), "metrics")
        .await
        .expect_err("expired");

    assert!(matches!(err, ApiError::LogsExpired { status: 410 }));
}

#[tokio::test]
async fn test_download_surfaces_transient_server_error() {
    let server = MockServer::start().await;
    mount_token_exchange(&server).await;

    Mock::given(method("GET"))
        .and(path("/logs"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let err = client
        .download_workflow_logs(&format!("{}/logs", server.uri()), "metrics")
        .await
        .expect_err("bad gateway");

    assert!(err.is_transient());
    assert!(!err.is_permanent());
}
