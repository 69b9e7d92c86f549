//! Error types for warehouse operations.

use thiserror::Error;

/// A single rejected row inside a failed insert batch.
///
/// The warehouse reports partial failures per row; the index refers to the
/// position in the submitted batch.
#[derive(Debug, Clone)]
pub struct RowError {
    /// Index of the rejected row in the submitted batch.
    pub index: usize,

    /// The warehouse's reason for rejecting the row.
    pub message: String,
}

impl std::fmt::Display for RowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "row {}: {}", self.index, self.message)
    }
}

/// Comprehensive error type for all warehouse operations.
#[derive(Debug, Error)]
pub enum WarehouseError {
    /// Query execution failed.
    #[error("Query failed: {message}")]
    Query { message: String },

    /// A result row could not be decoded into the requested record type.
    #[error("Decode failed for column '{column}': {message}")]
    Decode { column: String, message: String },

    /// An insert batch was rejected; partial failures are reported per row.
    #[error("Insert failed: {message}")]
    Insert {
        message: String,
        row_errors: Vec<RowError>,
    },

    /// Authentication with the warehouse failed.
    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    /// Connection or transport failure.
    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    /// The query did not complete within the allotted time.
    #[error("Query timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Invalid gateway configuration.
    #[error("Invalid configuration: {message}")]
    Configuration { message: String },
}

impl WarehouseError {
    /// Check if the error is transient and worth retrying.
    ///
    /// Connection failures and timeouts may resolve on retry; decode
    /// errors, rejected rows, and bad credentials will not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Query { .. } => false,
            Self::Decode { .. } => false,
            Self::Insert { .. } => false,
            Self::AuthenticationFailed { .. } => false,
            Self::ConnectionFailed { .. } => true,
            Self::Timeout { .. } => true,
            Self::Configuration { .. } => false,
        }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
