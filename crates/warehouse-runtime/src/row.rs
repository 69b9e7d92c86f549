//! Schema-introspective row decoding.
//!
//! The warehouse returns query results as positional cells plus a schema
//! describing each column. This module pairs the two into name-keyed rows:
//! scalar cells are converted to their natural JSON types, `REPEATED`
//! columns become arrays, and `RECORD` columns become nested objects.
//! Timestamps arrive as epoch-second strings and are rewritten as RFC 3339
//! so records can deserialize them into `chrono` types directly.

use chrono::{DateTime, SecondsFormat};
use serde::Deserialize;

use crate::error::WarehouseError;
use crate::gateway::Row;

/// Result schema for a query.
#[derive(Debug, Clone, Deserialize)]
pub struct TableSchema {
    #[serde(default)]
    pub fields: Vec<TableFieldSchema>,
}

/// One column of a result schema.
#[derive(Debug, Clone, Deserialize)]
pub struct TableFieldSchema {
    pub name: String,

    #[serde(rename = "type")]
    pub field_type: String,

    #[serde(default)]
    pub mode: Option<String>,

    /// Nested fields for RECORD columns.
    #[serde(default)]
    pub fields: Vec<TableFieldSchema>,
}

impl TableFieldSchema {
    fn is_repeated(&self) -> bool {
        self.mode.as_deref() == Some("REPEATED")
    }
}

/// One positional result row as the warehouse serves it.
#[derive(Debug, Clone, Deserialize)]
pub struct RawRow {
    #[serde(default)]
    pub f: Vec<RawCell>,
}

/// One positional cell.
#[derive(Debug, Clone, Deserialize)]
pub struct RawCell {
    #[serde(default)]
    pub v: serde_json::Value,
}

/// Pair a positional row with its schema, producing a name-keyed [`Row`].
///
/// # Errors
///
/// Returns `WarehouseError::Decode` naming the offending column when a
/// cell does not match its declared type.
pub fn decode_row(schema: &TableSchema, raw: &RawRow) -> Result<Row, WarehouseError> {
    let columns = decode_fields(&schema.fields, &raw.f)?;
    Ok(Row::from_columns(columns))
}

fn decode_fields(
    fields: &[TableFieldSchema],
    cells: &[RawCell],
) -> Result<serde_json::Map<String, serde_json::Value>, WarehouseError> {
    if fields.len() != cells.len() {
        return Err(WarehouseError::Decode {
            column: String::new(),
            message: format!(
                "schema has {} fields but row has {} cells",
                fields.len(),
                cells.len()
            ),
        });
    }

    let mut columns = serde_json::Map::with_capacity(fields.len());
    for (field, cell) in fields.iter().zip(cells.iter()) {
        columns.insert(field.name.clone(), decode_value(field, &cell.v)?);
    }
    Ok(columns)
}

fn decode_value(
    field: &TableFieldSchema,
    value: &serde_json::Value,
) -> Result<serde_json::Value, WarehouseError> {
    if value.is_null() {
        return Ok(serde_json::Value::Null);
    }

    if field.is_repeated() {
        let items = value.as_array().ok_or_else(|| decode_error(field, "expected array"))?;
        let mut decoded = Vec::with_capacity(items.len());
        for item in items {
            // Repeated cells wrap every element in another {"v": ...}
            let inner = item.get("v").unwrap_or(item);
            decoded.push(decode_scalar(field, inner)?);
        }
        return Ok(serde_json::Value::Array(decoded));
    }

    decode_scalar(field, value)
}

fn decode_scalar(
    field: &TableFieldSchema,
    value: &serde_json::Value,
) -> Result<serde_json::Value, WarehouseError> {
    if value.is_null() {
        return Ok(serde_json::Value::Null);
    }

    match field.field_type.as_str() {
        "STRING" | "DATE" | "DATETIME" | "TIME" | "BYTES" | "GEOGRAPHY" | "JSON" => {
            Ok(value.clone())
        }
        "INTEGER" | "INT64" => {
            let text = value
                .as_str()
                .ok_or_else(|| decode_error(field, "expected integer string"))?;
            let parsed: i64 = text
                .parse()
                .map_err(|_| decode_error(field, "invalid integer"))?;
            Ok(serde_json::Value::from(parsed))
        }
        "FLOAT" | "FLOAT64" | "NUMERIC" | "BIGNUMERIC" => {
            let text = value
                .as_str()
                .ok_or_else(|| decode_error(field, "expected float string"))?;
            let parsed: f64 = text
                .parse()
                .map_err(|_| decode_error(field, "invalid float"))?;
            Ok(serde_json::Value::from(parsed))
        }
        "BOOLEAN" | "BOOL" => {
            let text = value
                .as_str()
                .ok_or_else(|| decode_error(field, "expected boolean string"))?;
            match text {
                "true" => Ok(serde_json::Value::Bool(true)),
                "false" => Ok(serde_json::Value::Bool(false)),
                _ => Err(decode_error(field, "invalid boolean")),
            }
        }
        "TIMESTAMP" => {
            let text = value
                .as_str()
                .ok_or_else(|| decode_error(field, "expected timestamp string"))?;
            let epoch_seconds: f64 = text
                .parse()
                .map_err(|_| decode_error(field, "invalid epoch timestamp"))?;
            let micros = (epoch_seconds * 1_000_000.0).round() as i64;
            let timestamp = DateTime::from_timestamp_micros(micros)
                .ok_or_else(|| decode_error(field, "timestamp out of range"))?;
            Ok(serde_json::Value::String(
                timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
            ))
        }
        "RECORD" | "STRUCT" => {
            let raw: RawRow = serde_json::from_value(value.clone())
                .map_err(|_| decode_error(field, "expected nested record"))?;
            let nested = decode_fields(&field.fields, &raw.f)?;
            Ok(serde_json::Value::Object(nested))
        }
        other => Err(decode_error(field, &format!("unsupported type {}", other))),
    }
}

fn decode_error(field: &TableFieldSchema, message: &str) -> WarehouseError {
    WarehouseError::Decode {
        column: field.name.clone(),
        message: message.to_string(),
    }
}

#[cfg(test)]
#[path = "row_tests.rs"]
mod tests;
