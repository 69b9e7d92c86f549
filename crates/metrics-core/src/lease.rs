//! Distributed lease over bucket objects.
//!
//! The retry reconciler is a singleton: whichever instance claims the
//! `retry-lock` object runs, everyone else exits quietly. A claim is a
//! small JSON document whose expiry is `now + ttl − skew`; generation
//! preconditions on create and replace make the claim race-free, and the
//! skew allowance keeps two instances with drifting clocks from both
//! believing they hold an expired lease.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use thiserror::Error;

use warehouse_runtime::TokenSource;

/// Default tolerance for clock skew between lease holders.
pub const DEFAULT_CLOCK_SKEW_SECONDS: i64 = 10;

/// Errors during lease operations.
#[derive(Debug, Error)]
pub enum LeaseError {
    /// Another holder currently owns the lease. Benign: the caller exits
    /// quietly because someone else is making progress.
    #[error("lease is held by another holder")]
    Held,

    /// The backing store failed.
    #[error("lease store error: {message}")]
    Store { message: String },

    /// Authentication with the backing store failed.
    #[error("lease store authentication failed: {message}")]
    AuthenticationFailed { message: String },
}

impl LeaseError {
    /// Whether this is the benign contended-lease outcome.
    pub fn is_held(&self) -> bool {
        matches!(self, Self::Held)
    }
}

/// An acquired lease. Release through the store that issued it.
#[derive(Debug, Clone)]
pub struct Lease {
    name: String,
    generation: String,
    expires_at: DateTime<Utc>,
}

impl Lease {
    /// The lease object's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// When the claim lapses.
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}

/// Store issuing at-most-one-holder leases on named objects.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Claim `name` for `ttl`.
    ///
    /// The recorded expiry is `now + ttl − skew`. Returns
    /// `LeaseError::Held` while another unexpired claim exists.
    async fn acquire(&self, name: &str, ttl: Duration) -> Result<Lease, LeaseError>;

    /// Release a held lease.
    ///
    /// Releasing a lease that was already broken by another holder is not
    /// an error.
    async fn release(&self, lease: Lease) -> Result<(), LeaseError>;
}

/// The lease claim document stored in the object.
#[derive(Debug, Serialize, Deserialize)]
struct ClaimDocument {
    holder: String,
    expires_at: DateTime<Utc>,
}

// ============================================================================
// GCS Lease Store
// ============================================================================

/// Default storage JSON API endpoint.
const DEFAULT_STORAGE_API_URL: &str = "https://storage.googleapis.com";

/// Lease store backed by bucket objects with generation preconditions.
///
/// Create uses `ifGenerationMatch=0` (only-if-absent); breaking an expired
/// claim replaces it preconditioned on the observed generation. A 412 on
/// either path means another instance won the race, which is reported as
/// `Held`.
pub struct GcsLeaseStore {
    http: reqwest::Client,
    api_url: String,
    bucket: String,
    tokens: Arc<dyn TokenSource>,
    clock_skew: Duration,
    holder: String,
}

impl GcsLeaseStore {
    /// Create a store for `bucket` with the default skew allowance.
    pub fn new(http: reqwest::Client, bucket: impl Into<String>, tokens: Arc<dyn TokenSource>) -> Self {
        Self::with_options(
            http,
            bucket,
            tokens,
            DEFAULT_STORAGE_API_URL,
            Duration::seconds(DEFAULT_CLOCK_SKEW_SECONDS),
        )
    }

    /// Create a store with explicit endpoint and skew (tests, tuning).
    pub fn with_options(
        http: reqwest::Client,
        bucket: impl Into<String>,
        tokens: Arc<dyn TokenSource>,
        api_url: impl Into<String>,
        clock_skew: Duration,
    ) -> Self {
        Self {
            http,
            api_url: api_url.into(),
            bucket: bucket.into(),
            tokens,
            clock_skew,
            holder: format!("metrics-{}", uuid::Uuid::new_v4()),
        }
    }

    async fn bearer(&self) -> Result<String, LeaseError> {
        self.tokens
            .token()
            .await
            .map_err(|e| LeaseError::AuthenticationFailed {
                message: e.to_string(),
            })
    }

    fn encoded(name: &str) -> String {
        url::form_urlencoded::byte_serialize(name.as_bytes()).collect()
    }

    /// Upload a claim document preconditioned on `generation`
    /// (`"0"` = create only if absent).
    async fn put_claim(
        &self,
        name: &str,
        generation: &str,
        claim: &ClaimDocument,
        token: &str,
    ) -> Result<Option<String>, LeaseError> {
        let url = format!("{}/upload/storage/v1/b/{}/o", self.api_url, self.bucket);

        let body = serde_json::to_vec(claim).map_err(|e| LeaseError::Store {
            message: format!("claim serialization failed: {}", e),
        })?;

        let response = self
            .http
            .post(&url)
            .query(&[
                ("uploadType", "media"),
                ("name", name),
                ("ifGenerationMatch", generation),
            ])
            .bearer_auth(token)
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| LeaseError::Store {
                message: e.to_string(),
            })?;

        match response.status().as_u16() {
            200..=299 => {
                let object: ObjectResource =
                    response.json().await.map_err(|e| LeaseError::Store {
                        message: format!("invalid object resource: {}", e),
                    })?;
                Ok(Some(object.generation))
            }
            // Another instance created or replaced the object first
            412 => Ok(None),
            401 | 403 => Err(LeaseError::AuthenticationFailed {
                message: format!("storage answered {}", response.status()),
            }),
            status => Err(LeaseError::Store {
                message: format!("claim upload answered {}", status),
            }),
        }
    }

    /// Read the current claim, returning its generation and document.
    async fn read_claim(
        &self,
        name: &str,
        token: &str,
    ) -> Result<Option<(String, ClaimDocument)>, LeaseError> {
        let meta_url = format!(
            "{}/storage/v1/b/{}/o/{}",
            self.api_url,
            self.bucket,
            Self::encoded(name)
        );

        let response = self
            .http
            .get(&meta_url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| LeaseError::Store {
                message: e.to_string(),
            })?;

        match response.status().as_u16() {
            404 => return Ok(None),
            200..=299 => {}
            401 | 403 => {
                return Err(LeaseError::AuthenticationFailed {
                    message: format!("storage answered {}", response.status()),
                })
            }
            status => {
                return Err(LeaseError::Store {
                    message: format!("claim read answered {}", status),
                })
            }
        }

        let object: ObjectResource = response.json().await.map_err(|e| LeaseError::Store {
            message: format!("invalid object resource: {}", e),
        })?;

        let media = self
            .http
            .get(&meta_url)
            .query(&[("alt", "media")])
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| LeaseError::Store {
                message: e.to_string(),
            })?;

        if media.status().as_u16() == 404 {
            return Ok(None);
        }

        let claim: ClaimDocument = media.json().await.map_err(|e| LeaseError::Store {
            message: format!("invalid claim document: {}", e),
        })?;

        Ok(Some((object.generation, claim)))
    }
}

#[derive(Debug, Deserialize)]
struct ObjectResource {
    generation: String,
}

#[async_trait]
impl LeaseStore for GcsLeaseStore {
    async fn acquire(&self, name: &str, ttl: Duration) -> Result<Lease, LeaseError> {
        let token = self.bearer().await?;
        let expires_at = Utc::now() + ttl - self.clock_skew;
        let claim = ClaimDocument {
            holder: self.holder.clone(),
            expires_at,
        };

        // Two attempts: the second covers the window where the current
        // claim disappears between observation and replacement.
        for _ in 0..2 {
            match self.read_claim(name, &token).await? {
                None => {
                    if let Some(generation) =
                        self.put_claim(name, "0", &claim, &token).await?
                    {
                        return Ok(Lease {
                            name: name.to_string(),
                            generation,
                            expires_at,
                        });
                    }
                    // Lost the create race; re-observe
                }
                Some((generation, current)) => {
                    if Utc::now() < current.expires_at {
                        return Err(LeaseError::Held);
                    }
                    // Expired claim: break it, preconditioned on what we saw
                    if let Some(generation) =
                        self.put_claim(name, &generation, &claim, &token).await?
                    {
                        return Ok(Lease {
                            name: name.to_string(),
                            generation,
                            expires_at,
                        });
                    }
                }
            }
        }

        Err(LeaseError::Held)
    }

    async fn release(&self, lease: Lease) -> Result<(), LeaseError> {
        let token = self.bearer().await?;

        let url = format!(
            "{}/storage/v1/b/{}/o/{}",
            self.api_url,
            self.bucket,
            Self::encoded(&lease.name)
        );

        let response = self
            .http
            .delete(&url)
            .query(&[("ifGenerationMatch", lease.generation.as_str())])
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|e| LeaseError::Store {
                message: e.to_string(),
            })?;

        match response.status().as_u16() {
            200..=299 => Ok(()),
            // Already broken or replaced by a later holder
            404 | 412 => Ok(()),
            401 | 403 => Err(LeaseError::AuthenticationFailed {
                message: format!("storage answered {}", response.status()),
            }),
            status => Err(LeaseError::Store {
                message: format!("release answered {}", status),
            }),
        }
    }
}

impl std::fmt::Debug for GcsLeaseStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcsLeaseStore")
            .field("bucket", &self.bucket)
            .field("api_url", &self.api_url)
            .field("holder", &self.holder)
            .finish()
    }
}

// ============================================================================
// Memory Lease Store
// ============================================================================

struct MemoryClaim {
    generation: u64,
    expires_at: DateTime<Utc>,
}

/// In-memory lease store for tests.
#[derive(Default)]
pub struct MemoryLeaseStore {
    claims: Mutex<HashMap<String, MemoryClaim>>,
    next_generation: Mutex<u64>,
    clock_skew: Duration,
}

impl MemoryLeaseStore {
    pub fn new() -> Self {
        Self {
            claims: Mutex::new(HashMap::new()),
            next_generation: Mutex::new(1),
            clock_skew: Duration::seconds(DEFAULT_CLOCK_SKEW_SECONDS),
        }
    }

    /// Pre-claim `name` as if another instance held it.
    pub fn hold_elsewhere(&self, name: &str, ttl: Duration) {
        let generation = self.bump_generation();
        self.claims.lock().unwrap().insert(
            name.to_string(),
            MemoryClaim {
                generation,
                expires_at: Utc::now() + ttl,
            },
        );
    }

    /// Whether `name` currently carries a claim.
    pub fn is_claimed(&self, name: &str) -> bool {
        self.claims.lock().unwrap().contains_key(name)
    }

    fn bump_generation(&self) -> u64 {
        let mut counter = self.next_generation.lock().unwrap();
        let generation = *counter;
        *counter += 1;
        generation
    }
}

#[async_trait]
impl LeaseStore for MemoryLeaseStore {
    async fn acquire(&self, name: &str, ttl: Duration) -> Result<Lease, LeaseError> {
        let expires_at = Utc::now() + ttl - self.clock_skew;
        let generation = self.bump_generation();

        let mut claims = self.claims.lock().unwrap();
        if let Some(current) = claims.get(name) {
            if Utc::now() < current.expires_at {
                return Err(LeaseError::Held);
            }
        }

        claims.insert(
            name.to_string(),
            MemoryClaim {
                generation,
                expires_at,
            },
        );

        Ok(Lease {
            name: name.to_string(),
            generation: generation.to_string(),
            expires_at,
        })
    }

    async fn release(&self, lease: Lease) -> Result<(), LeaseError> {
        let mut claims = self.claims.lock().unwrap();
        if let Some(current) = claims.get(&lease.name) {
            if current.generation.to_string() == lease.generation {
                claims.remove(&lease.name);
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for MemoryLeaseStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryLeaseStore")
            .field("claims", &self.claims.lock().unwrap().len())
            .finish()
    }
}

#[cfg(test)]
#[path = "lease_tests.rs"]
mod tests;
