//! Error types for tabular batch operations.

use thiserror::Error;

/// Errors from batch construction and row mutation.
#[derive(Debug, Error)]
pub enum TabularError {
    /// Column index out of range for the batch width.
    #[error("Column {column} out of range (batch has {width} columns)")]
    ColumnOutOfRange { column: usize, width: usize },

    /// Row mutation outside an open row.
    #[error("No row in progress - call begin_row() first")]
    NoOpenRow,

    /// Schema or structural error.
    #[error("Schema error: {0}")]
    Schema(String),
}

/// Result type for tabular operations.
pub type Result<T> = std::result::Result<T, TabularError>;
