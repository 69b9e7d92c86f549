//! BigQuery REST provider.
//!
//! Talks to the BigQuery v2 REST API with a [`TokenSource`] bearer token:
//! `jobs.query` for execution (polling and paging until the result set is
//! complete) and `tabledata.insertAll` for streamed inserts with
//! client-assigned `insertId` dedupe keys.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

use crate::auth::TokenSource;
use crate::error::{RowError, WarehouseError};
use crate::gateway::{InsertRow, ParameterValue, QueryRequest, Row, WarehouseGateway};
use crate::row::{decode_row, RawRow, TableSchema};

/// Default public endpoint.
const DEFAULT_API_URL: &str = "https://bigquery.googleapis.com";

/// How long one `jobs.query` round trip waits for completion.
const QUERY_TIMEOUT_MS: u64 = 30_000;

/// How many completion polls before giving up on a slow job.
const MAX_POLL_ATTEMPTS: u32 = 10;

/// Configuration for the BigQuery provider.
#[derive(Debug, Clone)]
pub struct BigQueryConfig {
    /// Project that owns the dataset and runs the query jobs.
    pub project_id: String,

    /// Dataset containing the aggregator's tables.
    pub dataset_id: String,

    /// API endpoint; overridden in tests.
    pub api_url: String,
}

impl BigQueryConfig {
    /// Configuration against the public endpoint.
    pub fn new(project_id: impl Into<String>, dataset_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            dataset_id: dataset_id.into(),
            api_url: DEFAULT_API_URL.to_string(),
        }
    }

    /// Point the provider at a different endpoint (tests).
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }
}

/// Warehouse gateway backed by the BigQuery REST API.
pub struct BigQueryGateway {
    http: reqwest::Client,
    config: BigQueryConfig,
    tokens: Arc<dyn TokenSource>,
}

impl BigQueryGateway {
    /// Create a gateway.
    pub fn new(
        http: reqwest::Client,
        config: BigQueryConfig,
        tokens: Arc<dyn TokenSource>,
    ) -> Self {
        Self {
            http,
            config,
            tokens,
        }
    }

    fn queries_url(&self) -> String {
        format!(
            "{}/bigquery/v2/projects/{}/queries",
            self.config.api_url, self.config.project_id
        )
    }

    fn results_url(&self, job_id: &str) -> String {
        format!(
            "{}/bigquery/v2/projects/{}/queries/{}",
            self.config.api_url, self.config.project_id, job_id
        )
    }

    fn insert_url(&self, table: &str) -> String {
        format!(
            "{}/bigquery/v2/projects/{}/datasets/{}/tables/{}/insertAll",
            self.config.api_url, self.config.project_id, self.config.dataset_id, table
        )
    }

    async fn bearer(&self) -> Result<String, WarehouseError> {
        self.tokens.token().await
    }

    fn build_parameters(request: &QueryRequest) -> Vec<serde_json::Value> {
        request
            .parameters
            .iter()
            .map(|p| {
                let (type_name, value) = match &p.value {
                    ParameterValue::String(s) => ("STRING", s.clone()),
                    ParameterValue::Timestamp(ts) => ("TIMESTAMP", ts.to_rfc3339()),
                };
                serde_json::json!({
                    "name": p.name,
                    "parameterType": {"type": type_name},
                    "parameterValue": {"value": value},
                })
            })
            .collect()
    }

    async fn check_response(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, WarehouseError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "unable to read error body".to_string());

        match status.as_u16() {
            401 | 403 => Err(WarehouseError::AuthenticationFailed { message: body }),
            500..=599 => Err(WarehouseError::ConnectionFailed {
                message: format!("{}: {}", status, body),
            }),
            _ => Err(WarehouseError::Query {
                message: format!("{}: {}", status, body),
            }),
        }
    }

    /// Collect one response page, following job completion polls and page
    /// tokens until the result set is exhausted.
    async fn collect_results(
        &self,
        mut page: QueryResponsePage,
        token: &str,
    ) -> Result<Vec<Row>, WarehouseError> {
        let mut rows = Vec::new();
        let mut polls = 0u32;

        loop {
            if !page.job_complete {
                polls += 1;
                if polls > MAX_POLL_ATTEMPTS {
                    return Err(WarehouseError::Timeout {
                        timeout_ms: QUERY_TIMEOUT_MS * u64::from(polls),
                    });
                }

                let job_id = page.job_id().ok_or_else(|| WarehouseError::Query {
                    message: "incomplete job without job reference".to_string(),
                })?;

                page = self.fetch_results(&job_id, None, token).await?;
                continue;
            }

            if let Some(schema) = &page.schema {
                for raw in &page.rows {
                    rows.push(decode_row(schema, raw)?);
                }
            }

            let Some(page_token) = page.page_token.take() else {
                break;
            };

            let job_id = page.job_id().ok_or_else(|| WarehouseError::Query {
                message: "paged response without job reference".to_string(),
            })?;

            page = self.fetch_results(&job_id, Some(&page_token), token).await?;
        }

        Ok(rows)
    }

    async fn fetch_results(
        &self,
        job_id: &str,
        page_token: Option<&str>,
        token: &str,
    ) -> Result<QueryResponsePage, WarehouseError> {
        let mut request = self
            .http
            .get(self.results_url(job_id))
            .bearer_auth(token)
            .query(&[("timeoutMs", QUERY_TIMEOUT_MS.to_string())]);

        if let Some(page_token) = page_token {
            request = request.query(&[("pageToken", page_token)]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| WarehouseError::ConnectionFailed {
                message: e.to_string(),
            })?;

        let response = Self::check_response(response).await?;
        response
            .json()
            .await
            .map_err(|e| WarehouseError::Query {
                message: format!("invalid query response: {}", e),
            })
    }
}

#[async_trait]
impl WarehouseGateway for BigQueryGateway {
    async fn query(&self, request: QueryRequest) -> Result<Vec<Row>, WarehouseError> {
        let token = self.bearer().await?;

        let mut body = serde_json::json!({
            "query": request.sql,
            "useLegacySql": false,
            "timeoutMs": QUERY_TIMEOUT_MS,
        });

        if !request.parameters.is_empty() {
            body["parameterMode"] = serde_json::json!("NAMED");
            body["queryParameters"] =
                serde_json::Value::Array(Self::build_parameters(&request));
        }

        debug!(sql = %request.sql, "Executing warehouse query");

        let response = self
            .http
            .post(self.queries_url())
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await
            .map_err(|e| WarehouseError::ConnectionFailed {
                message: e.to_string(),
            })?;

        let response = Self::check_response(response).await?;
        let page: QueryResponsePage =
            response
                .json()
                .await
                .map_err(|e| WarehouseError::Query {
                    message: format!("invalid query response: {}", e),
                })?;

        self.collect_results(page, &token).await
    }

    async fn insert(&self, table: &str, rows: Vec<InsertRow>) -> Result<(), WarehouseError> {
        if rows.is_empty() {
            return Ok(());
        }

        let token = self.bearer().await?;

        let wire_rows: Vec<serde_json::Value> = rows
            .iter()
            .map(|row| {
                let mut entry = serde_json::Map::new();
                if let Some(dedupe_id) = &row.dedupe_id {
                    entry.insert(
                        "insertId".to_string(),
                        serde_json::Value::String(dedupe_id.clone()),
                    );
                }
                entry.insert("json".to_string(), row.payload.clone());
                serde_json::Value::Object(entry)
            })
            .collect();

        let body = serde_json::json!({
            "kind": "bigquery#tableDataInsertAllRequest",
            "rows": wire_rows,
        });

        debug!(table = %table, count = rows.len(), "Inserting warehouse rows");

        let response = self
            .http
            .post(self.insert_url(table))
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await
            .map_err(|e| WarehouseError::ConnectionFailed {
                message: e.to_string(),
            })?;

        let response = Self::check_response(response).await?;
        let parsed: InsertAllResponse =
            response
                .json()
                .await
                .map_err(|e| WarehouseError::Insert {
                    message: format!("invalid insert response: {}", e),
                    row_errors: vec![],
                })?;

        if parsed.insert_errors.is_empty() {
            return Ok(());
        }

        let row_errors: Vec<RowError> = parsed
            .insert_errors
            .iter()
            .map(|entry| RowError {
                index: entry.index,
                message: entry
                    .errors
                    .first()
                    .map(|e| e.message.clone())
                    .unwrap_or_else(|| "unspecified".to_string()),
            })
            .collect();

        Err(WarehouseError::Insert {
            message: format!(
                "{} of {} rows rejected by table {}",
                row_errors.len(),
                rows.len(),
                table
            ),
            row_errors,
        })
    }

    async fn health_check(&self) -> Result<(), WarehouseError> {
        let token = self.bearer().await?;

        let url = format!(
            "{}/bigquery/v2/projects/{}/datasets/{}",
            self.config.api_url, self.config.project_id, self.config.dataset_id
        );

        let response = self
            .http
            .get(&url)
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|e| WarehouseError::ConnectionFailed {
                message: e.to_string(),
            })?;

        Self::check_response(response).await.map(|_| ())
    }
}

impl std::fmt::Debug for BigQueryGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BigQueryGateway")
            .field("config", &self.config)
            .finish()
    }
}

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponsePage {
    #[serde(default)]
    job_complete: bool,

    #[serde(default)]
    job_reference: Option<JobReference>,

    #[serde(default)]
    schema: Option<TableSchema>,

    #[serde(default)]
    rows: Vec<RawRow>,

    #[serde(default)]
    page_token: Option<String>,
}

impl QueryResponsePage {
    fn job_id(&self) -> Option<String> {
        self.job_reference.as_ref().map(|r| r.job_id.clone())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InsertAllResponse {
    #[serde(default)]
    insert_errors: Vec<InsertErrorEntry>,
}

#[derive(Debug, Deserialize)]
struct InsertErrorEntry {
    index: usize,
    #[serde(default)]
    errors: Vec<InsertErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct InsertErrorDetail {
    #[serde(default)]
    message: String,
}

#[cfg(test)]
#[path = "bigquery_tests.rs"]
mod tests;
