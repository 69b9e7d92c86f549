//! Object storage writer.
//!
//! Log archives are streamed to a bucket under a deterministic path
//! (`gs://<bucket>/<repo_slug>/<delivery_id>/artifacts.tar.gz`). The
//! production writer uses the storage JSON API's single-request media
//! upload, which is atomic: the object only becomes visible once the
//! request completes, so a failed write leaves no partial object behind.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt, TryStreamExt};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::Mutex;
use thiserror::Error;

use warehouse_runtime::TokenSource;

/// A stream of body chunks for an upload.
pub type ByteStream =
    Pin<Box<dyn Stream<Item = Result<Bytes, ObjectStoreError>> + Send + 'static>>;

/// Wrap a single buffer as a [`ByteStream`].
pub fn byte_stream_from(bytes: Bytes) -> ByteStream {
    Box::pin(futures::stream::once(async move { Ok(bytes) }))
}

/// Errors during object storage operations.
#[derive(Debug, Error)]
pub enum ObjectStoreError {
    /// The URI is not of the form `gs://<bucket>/<object>`.
    #[error("malformed object URI: {uri}")]
    MalformedUri { uri: String },

    /// The storage service rejected the upload.
    #[error("upload rejected: {status} - {message}")]
    UploadRejected { status: u16, message: String },

    /// Authentication with the storage service failed.
    #[error("storage authentication failed: {message}")]
    AuthenticationFailed { message: String },

    /// Transport failure, including mid-stream source errors.
    #[error("storage transport error: {message}")]
    Transport { message: String },
}

impl ObjectStoreError {
    /// Check if the error is transient and worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::MalformedUri { .. } => false,
            Self::UploadRejected { status, .. } => *status >= 500 || *status == 429,
            Self::AuthenticationFailed { .. } => false,
            Self::Transport { .. } => true,
        }
    }
}

// ============================================================================
// URIs
// ============================================================================

/// A parsed `gs://<bucket>/<object>` URI.
///
/// # Examples
///
/// ```
/// use metrics_core::object_store::GcsUri;
///
/// let uri = GcsUri::parse("gs://my-bucket/acme/metrics/abc-123/artifacts.tar.gz").unwrap();
/// assert_eq!(uri.bucket(), "my-bucket");
/// assert_eq!(uri.object(), "acme/metrics/abc-123/artifacts.tar.gz");
/// assert!(GcsUri::parse("s3://nope/x").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GcsUri {
    bucket: String,
    object: String,
}

impl GcsUri {
    /// Parse a `gs://` URI.
    ///
    /// # Errors
    ///
    /// Returns `ObjectStoreError::MalformedUri` when the scheme is not
    /// `gs`, or bucket or object name is empty.
    pub fn parse(uri: &str) -> Result<Self, ObjectStoreError> {
        let malformed = || ObjectStoreError::MalformedUri {
            uri: uri.to_string(),
        };

        let rest = uri.strip_prefix("gs://").ok_or_else(malformed)?;
        let (bucket, object) = rest.split_once('/').ok_or_else(malformed)?;

        if bucket.is_empty() || object.is_empty() {
            return Err(malformed());
        }

        Ok(Self {
            bucket: bucket.to_string(),
            object: object.to_string(),
        })
    }

    /// Build the URI for a delivery's log archive.
    pub fn for_artifact_logs(bucket: &str, repo_slug: &str, delivery_id: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            object: format!("{}/{}/artifacts.tar.gz", repo_slug, delivery_id),
        }
    }

    /// The bucket name.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// The object name (path within the bucket).
    pub fn object(&self) -> &str {
        &self.object
    }
}

impl std::fmt::Display for GcsUri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "gs://{}/{}", self.bucket, self.object)
    }
}

// ============================================================================
// Writer Trait
// ============================================================================

/// Streaming writer to object storage.
#[async_trait]
pub trait ObjectWriter: Send + Sync {
    /// Stream `body` to `uri`, replacing any existing object.
    ///
    /// Implementations must not leave a partial object visible on failure.
    async fn write(&self, uri: &GcsUri, body: ByteStream) -> Result<(), ObjectStoreError>;
}

// ============================================================================
// GCS Writer
// ============================================================================

/// Default storage JSON API endpoint.
const DEFAULT_STORAGE_API_URL: &str = "https://storage.googleapis.com";

/// Object writer backed by the storage JSON API.
pub struct GcsObjectWriter {
    http: reqwest::Client,
    api_url: String,
    tokens: Arc<dyn TokenSource>,
}

impl GcsObjectWriter {
    /// Create a writer against the public endpoint.
    pub fn new(http: reqwest::Client, tokens: Arc<dyn TokenSource>) -> Self {
        Self::with_api_url(http, tokens, DEFAULT_STORAGE_API_URL)
    }

    /// Create a writer against a custom endpoint (tests, emulators).
    pub fn with_api_url(
        http: reqwest::Client,
        tokens: Arc<dyn TokenSource>,
        api_url: impl Into<String>,
    ) -> Self {
        Self {
            http,
            api_url: api_url.into(),
            tokens,
        }
    }
}

#[async_trait]
impl ObjectWriter for GcsObjectWriter {
    async fn write(&self, uri: &GcsUri, body: ByteStream) -> Result<(), ObjectStoreError> {
        let token = self
            .tokens
            .token()
            .await
            .map_err(|e| ObjectStoreError::AuthenticationFailed {
                message: e.to_string(),
            })?;

        let url = format!(
            "{}/upload/storage/v1/b/{}/o",
            self.api_url,
            uri.bucket()
        );

        let stream = body.map_err(std::io::Error::other);

        let response = self
            .http
            .post(&url)
            .query(&[("uploadType", "media"), ("name", uri.object())])
            .bearer_auth(&token)
            .header("Content-Type", "application/octet-stream")
            .body(reqwest::Body::wrap_stream(stream))
            .send()
            .await
            .map_err(|e| ObjectStoreError::Transport {
                message: e.to_string(),
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "unable to read error body".to_string());

        match status.as_u16() {
            401 | 403 => Err(ObjectStoreError::AuthenticationFailed { message }),
            status => Err(ObjectStoreError::UploadRejected { status, message }),
        }
    }
}

impl std::fmt::Debug for GcsObjectWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcsObjectWriter")
            .field("api_url", &self.api_url)
            .finish()
    }
}

// ============================================================================
// Memory Writer
// ============================================================================

/// In-memory object store for tests: records every written object.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<String, Bytes>>,
    fail_writes: Mutex<bool>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent writes fail.
    pub fn fail_writes(&self, fail: bool) {
        *self.fail_writes.lock().unwrap() = fail;
    }

    /// The URIs written so far.
    pub fn object_uris(&self) -> Vec<String> {
        let mut uris: Vec<String> = self.objects.lock().unwrap().keys().cloned().collect();
        uris.sort();
        uris
    }

    /// The stored bytes for `uri`, if written.
    pub fn object_bytes(&self, uri: &GcsUri) -> Option<Bytes> {
        self.objects.lock().unwrap().get(&uri.to_string()).cloned()
    }

    /// Number of stored objects.
    pub fn object_count(&self) -> usize {
        self.objects.lock().unwrap().len()
    }
}

#[async_trait]
impl ObjectWriter for MemoryObjectStore {
    async fn write(&self, uri: &GcsUri, mut body: ByteStream) -> Result<(), ObjectStoreError> {
        let mut buffer = Vec::new();
        while let Some(chunk) = body.next().await {
            buffer.extend_from_slice(&chunk?);
        }

        if *self.fail_writes.lock().unwrap() {
            // Nothing stored: failed writes leave no partial object
            return Err(ObjectStoreError::UploadRejected {
                status: 503,
                message: "injected write failure".to_string(),
            });
        }

        self.objects
            .lock()
            .unwrap()
            .insert(uri.to_string(), Bytes::from(buffer));
        Ok(())
    }
}

impl std::fmt::Debug for MemoryObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryObjectStore")
            .field("objects", &self.object_count())
            .finish()
    }
}

#[cfg(test)]
#[path = "object_store_tests.rs"]
mod tests;
