//! Error types for the ingestion crate.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that abort an ingestion run.
///
/// Failures of individual units are not errors of the run; they are reported
/// in the [`RunReport`](crate::RunReport).
#[derive(Error, Debug)]
pub enum IngestionError {
    #[error("Failed to read config {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Common(#[from] weather_common::CommonError),

    #[error("Region index failed: {0}")]
    Index(#[from] region_index::IndexError),

    #[error("Aggregation failed: {0}")]
    Aggregate(#[from] field_aggregator::AggregateError),

    #[error("Destination failed: {0}")]
    Storage(#[from] storage::StorageError),
}

/// Result type for ingestion operations.
pub type Result<T> = std::result::Result<T, IngestionError>;
