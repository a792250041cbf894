//! Region-aggregated weather ingestion library.
//!
//! Ties the region index, the field aggregator and a destination store into
//! a resumable pipeline.
//!
//! # Architecture
//!
//! This crate is used by the `ingester` service. It handles:
//!
//! - Configuration (YAML plus environment overrides)
//! - Building or loading the region matrix
//! - Month-by-month ingestion with per-unit retries
//! - Time-series conversion of the destination table

pub mod config;
pub mod error;
pub mod index;
pub mod pipeline;

// Re-exports
pub use config::{IndexConfig, IngestConfig, PipelineConfig, RetryConfig};
pub use error::{IngestionError, Result};
pub use index::{build_region_index, load_region_index};
pub use pipeline::{
    FailedUnit, FailurePolicy, IngestionPipeline, PipelineOptions, RetryPolicy, RunReport,
    UnitState, WorkUnit,
};
