//! In-memory warehouse provider for tests.
//!
//! Query results are canned: each stub pairs a SQL substring with the rows
//! to return, and the first matching stub answers. Inserts are recorded
//! per table for assertions. Failures can be injected to exercise retry
//! and failure-record paths.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::WarehouseError;
use crate::gateway::{InsertRow, QueryRequest, Row, WarehouseGateway};

#[derive(Default)]
struct MemoryState {
    stubs: Vec<QueryStub>,
    inserted: HashMap<String, Vec<InsertRow>>,
    queries_seen: Vec<QueryRequest>,
    fail_queries: bool,
    fail_matching: Vec<String>,
    fail_inserts: bool,
    fail_insert_tables: Vec<String>,
    fail_health: bool,
}

struct QueryStub {
    sql_contains: String,
    param_equals: Option<(String, String)>,
    rows: Vec<Row>,
}

impl QueryStub {
    fn matches(&self, request: &QueryRequest) -> bool {
        if !request.sql.contains(&self.sql_contains) {
            return false;
        }
        match &self.param_equals {
            None => true,
            Some((name, value)) => request.parameters.iter().any(|p| {
                p.name == *name
                    && matches!(&p.value, crate::gateway::ParameterValue::String(s) if s == value)
            }),
        }
    }
}

/// In-memory [`WarehouseGateway`] implementation.
#[derive(Default)]
pub struct MemoryWarehouse {
    state: Mutex<MemoryState>,
}

impl MemoryWarehouse {
    /// Create an empty warehouse: every query answers zero rows.
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer queries whose SQL contains `sql_contains` with `rows`.
    ///
    /// Stubs are matched in registration order; the first match wins.
    pub fn stub_query(&self, sql_contains: impl Into<String>, rows: Vec<Row>) {
        self.state.lock().unwrap().stubs.push(QueryStub {
            sql_contains: sql_contains.into(),
            param_equals: None,
            rows,
        });
    }

    /// Like [`stub_query_json`](Self::stub_query_json), but the stub only
    /// answers when the request carries a string parameter `name` equal to
    /// `value`. Used to stub per-item lookups such as existence checks.
    pub fn stub_query_json_for_param(
        &self,
        sql_contains: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<String>,
        rows: Vec<serde_json::Value>,
    ) {
        let rows = rows
            .into_iter()
            .filter_map(|row| match row {
                serde_json::Value::Object(map) => Some(Row::from_columns(map)),
                _ => None,
            })
            .collect();
        self.state.lock().unwrap().stubs.push(QueryStub {
            sql_contains: sql_contains.into(),
            param_equals: Some((name.into(), value.into())),
            rows,
        });
    }

    /// Stub a query with rows built from JSON objects.
    pub fn stub_query_json(
        &self,
        sql_contains: impl Into<String>,
        rows: Vec<serde_json::Value>,
    ) {
        let rows = rows
            .into_iter()
            .filter_map(|value| match value {
                serde_json::Value::Object(map) => Some(Row::from_columns(map)),
                _ => None,
            })
            .collect();
        self.stub_query(sql_contains, rows);
    }

    /// Make every query fail with a connection error.
    pub fn fail_queries(&self, fail: bool) {
        self.state.lock().unwrap().fail_queries = fail;
    }

    /// Make queries whose SQL contains `sql_contains` fail with a
    /// connection error.
    pub fn fail_queries_matching(&self, sql_contains: impl Into<String>) {
        self.state
            .lock()
            .unwrap()
            .fail_matching
            .push(sql_contains.into());
    }

    /// Make every insert fail.
    pub fn fail_inserts(&self, fail: bool) {
        self.state.lock().unwrap().fail_inserts = fail;
    }

    /// Make inserts into `table` fail while other tables keep working.
    pub fn fail_inserts_table(&self, table: impl Into<String>) {
        self.state
            .lock()
            .unwrap()
            .fail_insert_tables
            .push(table.into());
    }

    /// Make health checks fail.
    pub fn fail_health(&self, fail: bool) {
        self.state.lock().unwrap().fail_health = fail;
    }

    /// Rows inserted into `table`, as JSON payloads.
    pub fn inserted_rows(&self, table: &str) -> Vec<serde_json::Value> {
        self.state
            .lock()
            .unwrap()
            .inserted
            .get(table)
            .map(|rows| rows.iter().map(|r| r.payload.clone()).collect())
            .unwrap_or_default()
    }

    /// Dedupe ids of rows inserted into `table`.
    pub fn inserted_dedupe_ids(&self, table: &str) -> Vec<Option<String>> {
        self.state
            .lock()
            .unwrap()
            .inserted
            .get(table)
            .map(|rows| rows.iter().map(|r| r.dedupe_id.clone()).collect())
            .unwrap_or_default()
    }

    /// Total number of queries executed.
    pub fn query_count(&self) -> usize {
        self.state.lock().unwrap().queries_seen.len()
    }

    /// SQL of every executed query, in order.
    pub fn queries_seen(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .queries_seen
            .iter()
            .map(|q| q.sql.clone())
            .collect()
    }
}

#[async_trait]
impl WarehouseGateway for MemoryWarehouse {
    async fn query(&self, request: QueryRequest) -> Result<Vec<Row>, WarehouseError> {
        let mut state = self.state.lock().unwrap();
        state.queries_seen.push(request.clone());

        if state.fail_queries
            || state
                .fail_matching
                .iter()
                .any(|marker| request.sql.contains(marker))
        {
            return Err(WarehouseError::ConnectionFailed {
                message: "injected query failure".to_string(),
            });
        }

        for stub in &state.stubs {
            if stub.matches(&request) {
                return Ok(stub.rows.clone());
            }
        }
        Ok(Vec::new())
    }

    async fn insert(&self, table: &str, rows: Vec<InsertRow>) -> Result<(), WarehouseError> {
        let mut state = self.state.lock().unwrap();

        if state.fail_inserts || state.fail_insert_tables.iter().any(|t| t == table) {
            return Err(WarehouseError::Insert {
                message: "injected insert failure".to_string(),
                row_errors: vec![],
            });
        }

        state
            .inserted
            .entry(table.to_string())
            .or_default()
            .extend(rows);
        Ok(())
    }

    async fn health_check(&self) -> Result<(), WarehouseError> {
        if self.state.lock().unwrap().fail_health {
            return Err(WarehouseError::ConnectionFailed {
                message: "injected health failure".to_string(),
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for MemoryWarehouse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().unwrap();
        f.debug_struct("MemoryWarehouse")
            .field("stubs", &state.stubs.len())
            .field("tables", &state.inserted.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
