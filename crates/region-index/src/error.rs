//! Error types for region index construction.
//!
//! Every variant is fatal for the build: a partially mapped grid would
//! silently attribute values to the wrong region, so nothing is persisted
//! when any of these is returned.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("invalid coordinate at cell {index}: lat={lat}, lon={lon}")]
    InvalidCoordinate { index: usize, lat: f64, lon: f64 },

    #[error("region matrix shape {rows}x{cols} does not match grid {expected_rows}x{expected_cols}")]
    ShapeMismatch {
        rows: usize,
        cols: usize,
        expected_rows: usize,
        expected_cols: usize,
    },

    #[error("invalid grid: {0}")]
    InvalidGrid(String),

    #[error("invalid polygon {id}: {message}")]
    InvalidPolygon { id: String, message: String },

    #[error("invalid region matrix: {0}")]
    InvalidMatrix(String),

    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to start worker pool: {0}")]
    WorkerPool(String),
}

impl IndexError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn parse(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Parse {
            path: path.into(),
            source,
        }
    }
}

/// Result type for region index operations.
pub type Result<T> = std::result::Result<T, IndexError>;
