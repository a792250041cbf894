//! The destination store seen by the ingestion pipeline.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use weather_common::AggregatedRow;

use crate::error::{Result, StorageError};
use crate::postgres::PgDestination;
use crate::sqlite::SqliteDestination;

/// What to do when an existing table lacks variable columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaPolicy {
    /// Fail with [`StorageError::SchemaMismatch`].
    #[default]
    Reject,
    /// Add the missing nullable columns.
    Widen,
}

/// What to do when a row's `(time, region_id)` already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    /// Plain insert; duplicates fail the commit.
    #[default]
    Reject,
    /// Overwrite the variable columns present in the incoming row.
    Upsert,
}

/// Result of [`Destination::prepare`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrepareOutcome {
    Created,
    Unchanged,
    Widened(Vec<String>),
}

/// A table keyed by `(time, region_id)` with one column per variable.
#[async_trait]
pub trait Destination: Send + Sync {
    /// Backend name for logs.
    fn backend(&self) -> &'static str;

    /// Create the table or reconcile its columns with `variables`.
    async fn prepare(
        &self,
        table: &str,
        variables: &[String],
        policy: SchemaPolicy,
    ) -> Result<PrepareOutcome>;

    /// `max(time)`, or `None` if the table is missing or empty.
    async fn watermark(&self, table: &str) -> Result<Option<NaiveDateTime>>;

    /// Insert `rows` in a single transaction, returning rows written.
    ///
    /// Variables missing from a row are stored as NULL.
    async fn append(
        &self,
        table: &str,
        variables: &[String],
        rows: &[AggregatedRow],
        conflict: ConflictPolicy,
    ) -> Result<u64>;

    /// Convert the table into a time-series optimized table. Idempotent.
    async fn make_time_series(&self, table: &str) -> Result<()>;
}

/// Open a destination from a URL (`postgres://`, `postgresql://`, `sqlite:`).
pub async fn connect(url: &str) -> Result<Arc<dyn Destination>> {
    if url.starts_with("postgres://") || url.starts_with("postgresql://") {
        Ok(Arc::new(PgDestination::connect(url).await?))
    } else if url.starts_with("sqlite:") {
        Ok(Arc::new(SqliteDestination::connect(url).await?))
    } else {
        let scheme = url.split(':').next().unwrap_or_default();
        Err(StorageError::UnsupportedUrl(format!("unknown scheme {:?}", scheme)))
    }
}
