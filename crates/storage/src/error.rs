//! Error types for destination stores.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Unsupported destination URL: {0}")]
    UnsupportedUrl(String),

    #[error("Invalid identifier: {0:?}")]
    InvalidIdentifier(String),

    #[error("Table {table} is missing columns: {}", missing.join(", "))]
    SchemaMismatch { table: String, missing: Vec<String> },

    #[error("Duplicate key: {0}")]
    UniqueViolation(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Operation not supported by {backend}: {operation}")]
    Unsupported {
        backend: &'static str,
        operation: &'static str,
    },
}

impl From<sqlx::Error> for StorageError {
    fn from(e: sqlx::Error) -> Self {
        match e.as_database_error() {
            Some(db) if db.is_unique_violation() => Self::UniqueViolation(db.message().to_string()),
            _ => Self::Query(e.to_string()),
        }
    }
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
