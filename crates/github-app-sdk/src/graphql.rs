//! GraphQL queries for commit review status.
//!
//! The review job needs, for one commit: the repository's current default
//! branch, every pull request associated with the commit, and the complete
//! review list of each of those pull requests. GraphQL answers all of that
//! in one paged walk where REST would need a request per pull request.
//!
//! Associated pull requests are paged 100 at a time; each pull request's
//! reviews are paged 100 at a time and drained to completion before the
//! result is returned. Pull requests whose base branch is not the
//! repository's current default branch are filtered out: a commit's review
//! decision is a property of the merge into the default branch.

use serde::{Deserialize, Serialize};

use crate::client::GitHubClient;
use crate::auth::TokenScope;
use crate::error::ApiError;

/// GraphQL error text prefix that identifies a deleted or inaccessible
/// repository. Everything after this classification is permanent for the
/// commit being processed.
const REPO_GONE_PREFIX: &str = "Could not resolve to a Repository";

const ASSOCIATED_PRS_QUERY: &str = r#"
query($owner: String!, $name: String!, $oid: GitObjectID!, $prCursor: String) {
  repository(owner: $owner, name: $name) {
    defaultBranchRef { name }
    object(oid: $oid) {
      ... on Commit {
        associatedPullRequests(first: 100, after: $prCursor) {
          pageInfo { hasNextPage endCursor }
          nodes {
            id
            number
            url
            baseRefName
            reviews(first: 100) {
              pageInfo { hasNextPage endCursor }
              nodes { state }
            }
          }
        }
      }
    }
  }
}
"#;

const PR_REVIEWS_QUERY: &str = r#"
query($owner: String!, $name: String!, $number: Int!, $cursor: String) {
  repository(owner: $owner, name: $name) {
    pullRequest(number: $number) {
      reviews(first: 100, after: $cursor) {
        pageInfo { hasNextPage endCursor }
        nodes { state }
      }
    }
  }
}
"#;

// ============================================================================
// Public Types
// ============================================================================

/// Review state as reported by GitHub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewState {
    Approved,
    ChangesRequested,
    Commented,
    Dismissed,
    Pending,
    /// Forward compatibility: states this build does not know about.
    #[serde(other)]
    Other,
}

/// A pull request associated with a commit, with its complete review list.
#[derive(Debug, Clone)]
pub struct PullRequest {
    /// GraphQL node ID.
    pub id: String,

    /// Pull request number.
    pub number: u64,

    /// HTML URL of the pull request.
    pub url: String,

    /// Base branch the pull request targets.
    pub base_ref_name: String,

    /// All reviews, in GitHub's order.
    pub reviews: Vec<ReviewState>,
}

impl PullRequest {
    /// Whether any review is in state `APPROVED`.
    pub fn has_approval(&self) -> bool {
        self.reviews.contains(&ReviewState::Approved)
    }
}

/// The pull requests targeting a repository's default branch that are
/// associated with one commit.
#[derive(Debug, Clone)]
pub struct CommitAssociations {
    /// The repository's current default branch name.
    pub default_branch: String,

    /// Associated pull requests whose base is the default branch, in
    /// GitHub's order.
    pub pull_requests: Vec<PullRequest>,
}

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Serialize)]
struct GraphQlRequest<'a> {
    query: &'a str,
    variables: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlErrorEntry>,
}

#[derive(Debug, Deserialize)]
struct GraphQlErrorEntry {
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    has_next_page: bool,
    end_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommitQueryData {
    repository: Option<CommitQueryRepository>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommitQueryRepository {
    default_branch_ref: Option<NamedRef>,
    object: Option<CommitObject>,
}

#[derive(Debug, Deserialize)]
struct NamedRef {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommitObject {
    associated_pull_requests: Option<PullRequestConnection>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PullRequestConnection {
    page_info: PageInfo,
    nodes: Vec<PullRequestNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PullRequestNode {
    id: String,
    number: u64,
    url: String,
    base_ref_name: String,
    reviews: ReviewConnection,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReviewConnection {
    page_info: PageInfo,
    nodes: Vec<ReviewNode>,
}

#[derive(Debug, Deserialize)]
struct ReviewNode {
    state: ReviewState,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReviewsQueryData {
    repository: Option<ReviewsQueryRepository>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReviewsQueryRepository {
    pull_request: Option<ReviewsQueryPullRequest>,
}

#[derive(Debug, Deserialize)]
struct ReviewsQueryPullRequest {
    reviews: ReviewConnection,
}

// ============================================================================
// Client Operations
// ============================================================================

impl GitHubClient {
    /// Fetch the pull requests targeting the default branch that are
    /// associated with `oid` in `owner/name`, each with its complete
    /// review list.
    ///
    /// # Errors
    ///
    /// - `ApiError::RepositoryGone` when GitHub cannot resolve the
    ///   repository (permanent; carries GitHub's message for the status
    ///   note)
    /// - `ApiError::AuthenticationFailed` on 401 (token refresh signal)
    /// - `ApiError::GraphQl` for other GraphQL-level errors
    pub async fn associated_pull_requests(
        &self,
        owner: &str,
        name: &str,
        oid: &str,
    ) -> Result<CommitAssociations, ApiError> {
        let mut default_branch = String::new();
        let mut pull_requests = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let variables = serde_json::json!({
                "owner": owner,
                "name": name,
                "oid": oid,
                "prCursor": cursor,
            });

            let data: CommitQueryData = self.execute(ASSOCIATED_PRS_QUERY, variables).await?;

            let repository = data.repository.ok_or_else(|| ApiError::GraphQl {
                message: "repository missing from response".to_string(),
            })?;

            if let Some(branch) = repository.default_branch_ref {
                default_branch = branch.name;
            }

            // A null object means the commit is unknown to the repository;
            // there is nothing to associate.
            let connection = match repository.object.and_then(|o| o.associated_pull_requests) {
                Some(connection) => connection,
                None => break,
            };

            for node in connection.nodes {
                let reviews = self.drain_reviews(owner, name, &node).await?;
                pull_requests.push(PullRequest {
                    id: node.id,
                    number: node.number,
                    url: node.url,
                    base_ref_name: node.base_ref_name,
                    reviews,
                });
            }

            if connection.page_info.has_next_page {
                cursor = connection.page_info.end_cursor;
            } else {
                break;
            }
        }

        pull_requests.retain(|pr| pr.base_ref_name == default_branch);

        Ok(CommitAssociations {
            default_branch,
            pull_requests,
        })
    }

    /// Collect all review states for one pull request, following the
    /// review connection's pagination to completion.
    async fn drain_reviews(
        &self,
        owner: &str,
        name: &str,
        node: &PullRequestNode,
    ) -> Result<Vec<ReviewState>, ApiError> {
        let mut reviews: Vec<ReviewState> =
            node.reviews.nodes.iter().map(|r| r.state).collect();

        let mut page_info = PageInfo {
            has_next_page: node.reviews.page_info.has_next_page,
            end_cursor: node.reviews.page_info.end_cursor.clone(),
        };

        while page_info.has_next_page {
            let variables = serde_json::json!({
                "owner": owner,
                "name": name,
                "number": node.number,
                "cursor": page_info.end_cursor,
            });

            let data: ReviewsQueryData = self.execute(PR_REVIEWS_QUERY, variables).await?;

            let connection = data
                .repository
                .and_then(|r| r.pull_request)
                .map(|pr| pr.reviews)
                .ok_or_else(|| ApiError::GraphQl {
                    message: format!("pull request #{} missing from response", node.number),
                })?;

            reviews.extend(connection.nodes.iter().map(|r| r.state));
            page_info = connection.page_info;
        }

        Ok(reviews)
    }

    /// Execute one GraphQL request and classify errors.
    async fn execute<T: serde::de::DeserializeOwned>(
        &self,
        query: &str,
        variables: serde_json::Value,
    ) -> Result<T, ApiError> {
        let token = self
            .tokens()
            .installation_token(&TokenScope::full())
            .await?;

        let response = self
            .http()
            .post(&self.config().graphql_url)
            .header("Authorization", format!("Bearer {}", token.token()))
            .json(&GraphQlRequest { query, variables })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = Self::error_body(response).await;
            return Err(ApiError::from_status(status.as_u16(), message));
        }

        let body: GraphQlResponse<T> = response.json().await?;

        if let Some(gone) = body
            .errors
            .iter()
            .find(|e| e.message.starts_with(REPO_GONE_PREFIX))
        {
            return Err(ApiError::RepositoryGone {
                message: gone.message.clone(),
            });
        }

        if let Some(first) = body.errors.first() {
            return Err(ApiError::GraphQl {
                message: first.message.clone(),
            });
        }

        body.data.ok_or_else(|| ApiError::GraphQl {
            message: "response carried neither data nor errors".to_string(),
        })
    }
}

#[cfg(test)]
#[path = "graphql_tests.rs"]
mod tests;
