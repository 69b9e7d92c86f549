//! Tests for the commit review GraphQL walk.

use super::*;
use crate::auth::jwt::tests::TEST_PRIVATE_KEY_PEM;
use crate::auth::{AppCredentials, AppId, InstallationId, PrivateKey};
use crate::client::ClientConfig;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_credentials() -> AppCredentials {
    AppCredentials::new(
        AppId::new(123456),
        InstallationId::new(789),
        PrivateKey::from_pem(TEST_PRIVATE_KEY_PEM).expect("valid key"),
    )
}

async fn mount_token_exchange(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/app/installations/789/access_tokens"))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
            "token": "ghs_graphql",
            "expires_at": (chrono::Utc::now() + chrono::Duration::minutes(60)).to_rfc3339(),
        })))
        .mount(server)
        .await;
}

async fn client_for(server: &MockServer) -> GitHubClient {
    let config = ClientConfig::default()
        .with_api_url(server.uri())
        .with_graphql_url(format!("{}/graphql", server.uri()));
    GitHubClient::new(test_credentials(), config).expect("client")
}

fn pr_node(
    number: u64,
    base_ref: &str,
    reviews: &[&str],
) -> serde_json::Value {
    serde_json::json!({
        "id": format!("PR_{}", number),
        "number": number,
        "url": format!("https://github.com/acme/metrics/pull/{}", number),
        "baseRefName": base_ref,
        "reviews": {
            "pageInfo": {"hasNextPage": false, "endCursor": null},
            "nodes": reviews.iter().map(|s| serde_json::json!({"state": s})).collect::<Vec<_>>(),
        },
    })
}

fn single_page_response(prs: Vec<serde_json::Value>) -> serde_json::Value {
    serde_json::json!({
        "data": {
            "repository": {
                "defaultBranchRef": {"name": "main"},
                "object": {
                    "associatedPullRequests": {
                        "pageInfo": {"hasNextPage": false, "endCursor": null},
                        "nodes": prs,
                    },
                },
            },
        },
    })
}

#[tokio::test]
async fn test_collects_pull_requests_with_reviews() {
    let server = MockServer::start().await;
    mount_token_exchange(&server).await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(single_page_response(vec![
            pr_node(48, "main", &["CHANGES_REQUESTED"]),
            pr_node(52, "main", &["APPROVED"]),
        ])))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let associations = client
        .associated_pull_requests("acme", "metrics", "abc123")
        .await
        .expect("associations");

    assert_eq!(associations.default_branch, "main");
    assert_eq!(associations.pull_requests.len(), 2);
    assert!(!associations.pull_requests[0].has_approval());
    assert!(associations.pull_requests[1].has_approval());
    assert_eq!(associations.pull_requests[1].number, 52);
}

#[tokio::test]
async fn test_filters_pull_requests_not_targeting_default_branch() {
    let server = MockServer::start().await;
    mount_token_exchange(&server).await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(single_page_response(vec![
            pr_node(10, "release-1.x", &["APPROVED"]),
            pr_node(11, "main", &[]),
        ])))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let associations = client
        .associated_pull_requests("acme", "metrics", "abc123")
        .await
        .expect("associations");

    // The release-branch PR is dropped even though it is approved
    assert_eq!(associations.pull_requests.len(), 1);
    assert_eq!(associations.pull_requests[0].number, 11);
    assert!(associations.pull_requests[0].reviews.is_empty());
}

#[tokio::test]
async fn test_unknown_commit_yields_empty_associations() {
    let server = MockServer::start().await;
    mount_token_exchange(&server).await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": {
                "repository": {
                    "defaultBranchRef": {"name": "main"},
                    "object": null,
                },
            },
        })))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let associations = client
        .associated_pull_requests("acme", "metrics", "deadbeef")
        .await
        .expect("associations");

    assert_eq!(associations.default_branch, "main");
    assert!(associations.pull_requests.is_empty());
}

#[tokio::test]
async fn test_repository_gone_classification() {
    let server = MockServer::start().await;
    mount_token_exchange(&server).await;

    let message =
        "Could not resolve to a Repository with the name 'acme/deleted-repo'.";
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": {"repository": null},
            "errors": [{"message": message}],
        })))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let err = client
        .associated_pull_requests("acme", "deleted-repo", "abc123")
        .await
        .expect_err("repo gone");

    match err {
        ApiError::RepositoryGone { message: m } => assert_eq!(m, message),
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_other_graphql_errors_are_not_repo_gone() {
    let server = MockServer::start().await;
    mount_token_exchange(&server).await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": null,
            "errors": [{"message": "Something went wrong while executing your query."}],
        })))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let err = client
        .associated_pull_requests("acme", "metrics", "abc123")
        .await
        .expect_err("graphql error");

    assert!(matches!(err, ApiError::GraphQl { .. }));
    assert!(!err.is_permanent());
}

#[tokio::test]
async fn test_review_state_parses_unknown_values() {
    let state: ReviewState = serde_json::from_str("\"SOME_FUTURE_STATE\"").expect("parse");
    assert_eq!(state, ReviewState::Other);

    let approved: ReviewState = serde_json::from_str("\"APPROVED\"").expect("parse");
    assert_eq!(approved, ReviewState::Approved);
}
