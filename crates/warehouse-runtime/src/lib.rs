//! # Warehouse Runtime
//!
//! Typed gateway to the analytical warehouse backing the metrics
//! aggregator, with a BigQuery REST provider and an in-memory provider for
//! tests.
//!
//! This library provides:
//! - A provider-agnostic gateway contract (`query` / `insert` / health)
//! - Name-keyed row decoding driven by the result schema
//! - Named query parameters for the correlation lookups
//! - Client-assigned dedupe ids on streamed inserts
//! - Token sources for Google service authentication
//!
//! ## Module Organization
//!
//! - [`error`] - Error types for all warehouse operations
//! - [`gateway`] - Gateway trait, query and row types
//! - [`row`] - Schema-introspective row decoding
//! - [`auth`] - Bearer token sources
//! - [`providers`] - BigQuery and in-memory implementations

// Module declarations
pub mod auth;
pub mod error;
pub mod gateway;
pub mod providers;
pub mod row;

// Re-export commonly used types at crate root for convenience
pub use auth::{MetadataTokenSource, StaticTokenSource, TokenSource};
pub use error::{RowError, WarehouseError};
pub use gateway::{
    query_as, InsertRow, ParameterValue, QueryParameter, QueryRequest, Row, WarehouseGateway,
};
pub use providers::{BigQueryConfig, BigQueryGateway, MemoryWarehouse};
