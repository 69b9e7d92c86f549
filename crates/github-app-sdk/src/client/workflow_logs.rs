//! Workflow log archive downloads.
//!
//! GitHub serves the zipped logs of a workflow run at a short-lived URL;
//! the request needs an installation token with `actions: read` on the
//! repository and follows a redirect to blob storage. Expired archives
//! answer 404 or 410, which is a permanent outcome for the delivery.

use bytes::Bytes;
use futures::Stream;

use super::GitHubClient;
use crate::auth::TokenScope;
use crate::error::ApiError;

/// An open workflow log archive download.
///
/// Wraps the redirected response so callers can stream the body straight
/// into object storage without buffering the archive in memory.
pub struct LogsArchive {
    response: reqwest::Response,
}

impl LogsArchive {
    /// Content length as reported by the server, if present.
    pub fn content_length(&self) -> Option<u64> {
        self.response.content_length()
    }

    /// Consume the download and return the byte stream.
    pub fn into_stream(self) -> impl Stream<Item = Result<Bytes, reqwest::Error>> {
        self.response.bytes_stream()
    }

    /// Buffer the whole archive (tests and small archives only).
    pub async fn bytes(self) -> Result<Bytes, ApiError> {
        Ok(self.response.bytes().await?)
    }
}

impl std::fmt::Debug for LogsArchive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogsArchive")
            .field("content_length", &self.content_length())
            .finish()
    }
}

impl GitHubClient {
    /// Download the log archive at `logs_url`.
    ///
    /// Mints an installation token scoped to `{actions: read}` on
    /// `repository` and follows redirects to the archive location.
    ///
    /// # Errors
    ///
    /// - `ApiError::LogsExpired` on 404/410 (permanent for the delivery)
    /// - `ApiError::AuthenticationFailed` on 401 (token refresh signal)
    /// - `ApiError::Http` / `ApiError::Transport` otherwise
    pub async fn download_workflow_logs(
        &self,
        logs_url: &str,
        repository: &str,
    ) -> Result<LogsArchive, ApiError> {
        let scope = TokenScope::actions_read(repository);
        let token = self.tokens().installation_token(&scope).await?;

        let response = self
            .logs_http()
            .get(logs_url)
            .header("Authorization", format!("Bearer {}", token.token()))
            .header("Accept", "application/vnd.github+json")
            .send()
            .await?;

        let status = response.status().as_u16();
        match status {
            200..=299 => Ok(LogsArchive { response }),
            404 | 410 => Err(ApiError::LogsExpired { status }),
            _ => {
                let message = Self::error_body(response).await;
                Err(ApiError::from_status(status, message))
            }
        }
    }
}

#[cfg(test)]
#[path = "workflow_logs_tests.rs"]
mod tests;
