//! # Metrics Core
//!
//! Shared building blocks for the GitHub metrics aggregator: the warehouse
//! row types, the signed-payload verifier, the object-storage writer, the
//! distributed lease guarding the retry reconciler, and the bounded worker
//! pool the batch jobs fan out on.
//!
//! ## Module Organization
//!
//! - [`records`] - Warehouse row types and status enums
//! - [`signature`] - Constant-time webhook signature verification
//! - [`object_store`] - `gs://` URIs and streaming object writes
//! - [`lease`] - At-most-one-holder lease over bucket objects
//! - [`pool`] - Bounded fan-out/fan-in executor

// Module declarations
pub mod lease;
pub mod object_store;
pub mod pool;
pub mod records;
pub mod signature;

// Re-export commonly used types at crate root for convenience
pub use lease::{Lease, LeaseError, LeaseStore};
pub use object_store::{GcsUri, ObjectStoreError, ObjectWriter};
pub use pool::WorkerPool;
pub use records::{
    ApprovalStatus, ArtifactRecord, ArtifactStatus, CheckpointRecord, Commit,
    CommitReviewStatusRecord, EventRecord, FailureEventRecord,
};
pub use signature::{compute_signature, verify_signature, SignatureError};
