//! Tests for issue comment creation.

use super::*;
use crate::client::tests::test_credentials;
use crate::client::ClientConfig;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mount_token_exchange(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/app/installations/789/access_tokens"))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
            "token": "ghs_comments",
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
async fn test_create_comment_posts_body() {
    let server = MockServer::start().await;
    mount_token_exchange(&server).await;

    Mock::given(method("POST"))
        .and(path("/repos/acme/metrics/issues/52/comments"))
        .and(body_json(serde_json::json!({
            "body": "Logs archived at gs://bucket/acme/metrics/abc-123/artifacts.tar.gz",
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({"id": 1})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    client
        .create_issue_comment(
            "acme",
            "metrics",
            52,
            "Logs archived at gs://bucket/acme/metrics/abc-123/artifacts.tar.gz",
        )
        .await
        .expect("comment");
}

#[tokio::test]
async fn test_create_comment_surfaces_permission_error() {
    let server = MockServer::start().await;
    mount_token_exchange(&server).await;

    Mock::given(method("POST"))
        .and(path("/repos/acme/metrics/issues/52/comments"))
        .respond_with(ResponseTemplate::new(403).set_body_string("Resource not accessible"))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let err = client
        .create_issue_comment("acme", "metrics", 52, "hello")
        .await
        .expect_err("forbidden");

    assert!(matches!(err, ApiError::Http { status: 403, .. }));
    assert!(!err.is_transient());
}
