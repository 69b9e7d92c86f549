//! Warehouse gateway providers.
//!
//! - [`bigquery`] - BigQuery over its v2 REST API (production)
//! - [`memory`] - canned results and recorded inserts (tests)

pub mod bigquery;
pub mod memory;

pub use bigquery::{BigQueryConfig, BigQueryGateway};
pub use memory::MemoryWarehouse;
