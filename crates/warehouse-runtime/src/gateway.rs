//! Warehouse gateway contract.
//!
//! The gateway is a thin interface over a typed, append-only columnar
//! table store: `query` executes SQL and returns name-keyed rows, `insert`
//! streams rows carrying optional client-assigned dedupe ids. Everything
//! the aggregator writes flows through one insert per job run; everything
//! it reads comes from the selection queries.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::WarehouseError;

// ============================================================================
// Query Types
// ============================================================================

/// A named query parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterValue {
    String(String),
    Timestamp(DateTime<Utc>),
}

/// A named parameter for a parameterized query (`@name` in the SQL).
#[derive(Debug, Clone, PartialEq)]
pub struct QueryParameter {
    pub name: String,
    pub value: ParameterValue,
}

impl QueryParameter {
    /// A string parameter.
    pub fn string(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: ParameterValue::String(value.into()),
        }
    }

    /// A timestamp parameter.
    pub fn timestamp(name: impl Into<String>, value: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            value: ParameterValue::Timestamp(value),
        }
    }
}

/// A SQL query with optional named parameters.
///
/// # Examples
///
/// ```
/// use warehouse_runtime::gateway::{QueryRequest, QueryParameter};
///
/// let request = QueryRequest::new("SELECT html_url FROM issues WHERE author = @author")
///     .with_parameter(QueryParameter::string("author", "alice"));
/// assert_eq!(request.parameters.len(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct QueryRequest {
    /// The SQL text (standard SQL dialect).
    pub sql: String,

    /// Named parameters referenced as `@name` in the SQL.
    pub parameters: Vec<QueryParameter>,
}

impl QueryRequest {
    /// Create a query with no parameters.
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            parameters: Vec::new(),
        }
    }

    /// Add a named parameter.
    pub fn with_parameter(mut self, parameter: QueryParameter) -> Self {
        self.parameters.push(parameter);
        self
    }
}

// ============================================================================
// Row Types
// ============================================================================

/// One result row, keyed by column name.
///
/// Rows are produced by the provider's schema-introspective decoder and can
/// be turned into typed records with [`Row::decode`] (columns map to serde
/// field names).
#[derive(Debug, Clone)]
pub struct Row {
    columns: serde_json::Map<String, serde_json::Value>,
}

impl Row {
    /// Build a row from named column values.
    pub fn from_columns(columns: serde_json::Map<String, serde_json::Value>) -> Self {
        Self { columns }
    }

    /// Get a raw column value by name.
    pub fn get(&self, name: &str) -> Option<&serde_json::Value> {
        self.columns.get(name)
    }

    /// Decode the row into a typed record by column name.
    ///
    /// # Errors
    ///
    /// Returns `WarehouseError::Decode` if the row does not match the
    /// record's shape.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, WarehouseError> {
        serde_json::from_value(serde_json::Value::Object(self.columns.clone())).map_err(|e| {
            WarehouseError::Decode {
                column: e.to_string(),
                message: "row does not match record shape".to_string(),
            }
        })
    }

    /// The column names present in this row.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(|k| k.as_str())
    }
}

/// One row to insert, with an optional client-assigned dedupe id.
///
/// The warehouse deduplicates rows sharing a dedupe id over a short window,
/// which makes insert retries safe.
#[derive(Debug, Clone)]
pub struct InsertRow {
    /// Client-assigned dedupe key.
    pub dedupe_id: Option<String>,

    /// The row payload as a JSON object.
    pub payload: serde_json::Value,
}

impl InsertRow {
    /// Build an insert row from any serializable record.
    ///
    /// # Errors
    ///
    /// Returns `WarehouseError::Decode` if the record does not serialize to
    /// a JSON object.
    pub fn from_record<T: Serialize>(
        dedupe_id: Option<String>,
        record: &T,
    ) -> Result<Self, WarehouseError> {
        let payload = serde_json::to_value(record).map_err(|e| WarehouseError::Decode {
            column: String::new(),
            message: format!("record serialization failed: {}", e),
        })?;

        if !payload.is_object() {
            return Err(WarehouseError::Decode {
                column: String::new(),
                message: "insert rows must serialize to JSON objects".to_string(),
            });
        }

        Ok(Self { dedupe_id, payload })
    }
}

// ============================================================================
// Gateway Trait
// ============================================================================

/// Interface to the warehouse.
///
/// # Examples
///
/// ```no_run
/// use warehouse_runtime::gateway::{QueryRequest, WarehouseGateway, query_as};
/// use serde::Deserialize;
///
/// #[derive(Deserialize)]
/// struct CheckpointRow {
///     delivery_id: String,
/// }
///
/// # async fn example(gateway: &dyn WarehouseGateway) -> Result<(), warehouse_runtime::WarehouseError> {
/// let rows: Vec<CheckpointRow> = query_as(
///     gateway,
///     QueryRequest::new("SELECT delivery_id FROM checkpoints ORDER BY created DESC LIMIT 1"),
/// )
/// .await?;
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait WarehouseGateway: Send + Sync {
    /// Execute a query and return its complete, finite result set.
    ///
    /// # Errors
    ///
    /// Returns `WarehouseError::Query` on execution failure and
    /// `WarehouseError::Timeout` if the query does not finish in time.
    async fn query(&self, request: QueryRequest) -> Result<Vec<Row>, WarehouseError>;

    /// Insert rows into `table`.
    ///
    /// Rows stream in one batch; the provider surfaces per-row rejections
    /// in `WarehouseError::Insert`.
    async fn insert(&self, table: &str, rows: Vec<InsertRow>) -> Result<(), WarehouseError>;

    /// Verify the warehouse is reachable.
    async fn health_check(&self) -> Result<(), WarehouseError>;
}

/// Execute a query and decode every row into `T` by column name.
///
/// # Errors
///
/// Returns the query's error, or `WarehouseError::Decode` on the first row
/// that does not match `T`.
pub async fn query_as<T: DeserializeOwned>(
    gateway: &dyn WarehouseGateway,
    request: QueryRequest,
) -> Result<Vec<T>, WarehouseError> {
    let rows = gateway.query(request).await?;
    rows.iter().map(Row::decode).collect()
}

#[cfg(test)]
#[path = "gateway_tests.rs"]
mod tests;
