//! Issue and pull request comments.
//!
//! The artifact job posts a comment on each pull request associated with a
//! workflow run once the log archive is safely in object storage. GitHub
//! treats PR comments as issue comments, so one endpoint covers both.

use serde::Serialize;

use super::GitHubClient;
use crate::auth::TokenScope;
use crate::error::ApiError;

#[derive(Debug, Serialize)]
struct CreateCommentRequest<'a> {
    body: &'a str,
}

impl GitHubClient {
    /// Create a comment on an issue or pull request.
    ///
    /// Uses the installation's full grant; posting comments needs
    /// `issues: write` which per-repository narrowing would have to carry
    /// anyway.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::AuthenticationFailed` on 401 and `ApiError::Http`
    /// for other error statuses.
    pub async fn create_issue_comment(
        &self,
        owner: &str,
        repository: &str,
        issue_number: u64,
        body: &str,
    ) -> Result<(), ApiError> {
        let token = self
            .tokens()
            .installation_token(&TokenScope::full())
            .await?;

        let url = format!(
            "{}/repos/{}/{}/issues/{}/comments",
            self.config().api_url,
            owner,
            repository,
            issue_number
        );

        let response = self
            .http()
            .post(&url)
            .header("Authorization", format!("Bearer {}", token.token()))
            .header("Accept", "application/vnd.github+json")
            .json(&CreateCommentRequest { body })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = Self::error_body(response).await;
            return Err(ApiError::from_status(status.as_u16(), message));
        }

        Ok(())
    }
}

#[cfg(test)]
#[path = "comments_tests.rs"]
mod tests;
