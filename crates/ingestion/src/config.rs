//! Ingestion configuration.
//!
//! Loaded from a YAML file where every field has a default, then overridden
//! from the environment (`DATABASE_URL`, `START_DATE`, `END_DATE`,
//! `DESTINATION_TABLE`, `MAX_CONCURRENT_UNITS`, `INDEX_WORKERS`).

use field_aggregator::{SourceConfig, StagingConfig};
use region_index::DetailLevels;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use storage::{ConflictPolicy, SchemaPolicy};
use tracing::debug;
use weather_common::{VariableSet, YearMonth};

use crate::error::{IngestionError, Result};
use crate::pipeline::{FailurePolicy, PipelineOptions, RetryPolicy};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Destination table name.
    #[serde(default = "default_table")]
    pub table: String,

    /// First month to ingest when the destination is empty.
    #[serde(default = "default_start")]
    pub start: YearMonth,

    /// Last month to ingest (inclusive).
    #[serde(default = "default_end")]
    pub end: YearMonth,

    #[serde(default = "VariableSet::cosmo_rea6")]
    pub variables: VariableSet,

    #[serde(default)]
    pub source: SourceConfig,

    #[serde(default)]
    pub staging: StagingConfig,

    #[serde(default)]
    pub index: IndexConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_database_url() -> String {
    "postgresql://localhost:5432/weather".to_string()
}

fn default_table() -> String {
    "cosmo".to_string()
}

fn default_start() -> YearMonth {
    YearMonth::january(1995)
}

fn default_end() -> YearMonth {
    YearMonth::december(2018)
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            table: default_table(),
            start: default_start(),
            end: default_end(),
            variables: VariableSet::cosmo_rea6(),
            source: SourceConfig::default(),
            staging: StagingConfig::default(),
            index: IndexConfig::default(),
            pipeline: PipelineConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

/// Inputs and output of the region index build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    #[serde(default = "default_grid_path")]
    pub grid_path: PathBuf,

    #[serde(default = "default_polygons_path")]
    pub polygons_path: PathBuf,

    #[serde(default = "default_matrix_path")]
    pub matrix_path: PathBuf,

    /// Build threads; defaults to available CPUs minus one.
    #[serde(default)]
    pub workers: Option<usize>,

    /// Log how many cells fall inside more than one polygon.
    #[serde(default)]
    pub report_overlaps: bool,

    #[serde(default)]
    pub detail_levels: DetailLevels,
}

fn default_grid_path() -> PathBuf {
    PathBuf::from("data/cosmo_grid.json")
}

fn default_polygons_path() -> PathBuf {
    PathBuf::from("data/nuts_polygons.json")
}

fn default_matrix_path() -> PathBuf {
    PathBuf::from("data/region_matrix.json")
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            grid_path: default_grid_path(),
            polygons_path: default_polygons_path(),
            matrix_path: default_matrix_path(),
            workers: None,
            report_overlaps: false,
            detail_levels: DetailLevels::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Variables of one month processed at the same time.
    #[serde(default = "default_max_concurrent_units")]
    pub max_concurrent_units: usize,

    #[serde(default)]
    pub failure_policy: FailurePolicy,

    #[serde(default)]
    pub schema_policy: SchemaPolicy,

    #[serde(default)]
    pub conflict_policy: ConflictPolicy,

    /// Convert the table to a time-series table after a clean run.
    #[serde(default = "default_make_time_series")]
    pub make_time_series: bool,
}

fn default_max_concurrent_units() -> usize {
    4
}

fn default_make_time_series() -> bool {
    true
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_units: default_max_concurrent_units(),
            failure_policy: FailurePolicy::default(),
            schema_policy: SchemaPolicy::default(),
            conflict_policy: ConflictPolicy::default(),
            make_time_series: default_make_time_series(),
        }
    }
}

/// Per-unit retry of transient fetch failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry, doubled for each further retry.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_retries() -> u32 {
    5
}

fn default_initial_delay_ms() -> u64 {
    2_000
}

fn default_max_delay_ms() -> u64 {
    120_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

impl IngestConfig {
    /// Load a configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| IngestionError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;

        let config: IngestConfig =
            serde_yaml::from_str(&content).map_err(|source| IngestionError::ConfigParse {
                path: path.to_path_buf(),
                source,
            })?;

        debug!(path = %path.display(), table = %config.table, "Loaded ingestion config");
        Ok(config)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`, which maps a variable name to its value.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(url) = lookup("DATABASE_URL") {
            self.database_url = url;
        }
        if let Some(table) = lookup("DESTINATION_TABLE") {
            self.table = table;
        }
        if let Some(start) = lookup("START_DATE") {
            self.start = start.parse()?;
        }
        if let Some(end) = lookup("END_DATE") {
            self.end = end.parse()?;
        }
        if let Some(n) = lookup("MAX_CONCURRENT_UNITS") {
            self.pipeline.max_concurrent_units = parse_count("MAX_CONCURRENT_UNITS", &n)?;
        }
        if let Some(n) = lookup("INDEX_WORKERS") {
            self.index.workers = Some(parse_count("INDEX_WORKERS", &n)?);
        }
        Ok(())
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.start > self.end {
            return Err(IngestionError::InvalidConfig(format!(
                "start {} is after end {}",
                self.start, self.end
            )));
        }
        if self.pipeline.max_concurrent_units == 0 {
            return Err(IngestionError::InvalidConfig(
                "max_concurrent_units must be at least 1".into(),
            ));
        }
        if self.retry.initial_delay_ms > self.retry.max_delay_ms {
            return Err(IngestionError::InvalidConfig(
                "retry.initial_delay_ms exceeds retry.max_delay_ms".into(),
            ));
        }
        storage::schema::validate_columns(&self.table, &self.variables.names())?;
        Ok(())
    }

    /// Pipeline settings derived from this configuration.
    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            table: self.table.clone(),
            max_concurrent_units: self.pipeline.max_concurrent_units,
            failure_policy: self.pipeline.failure_policy,
            schema_policy: self.pipeline.schema_policy,
            conflict_policy: self.pipeline.conflict_policy,
            make_time_series: self.pipeline.make_time_series,
            retry: self.retry.policy(),
        }
    }
}

fn parse_count(key: &str, value: &str) -> Result<usize> {
    value
        .trim()
        .parse::<usize>()
        .ok()
        .filter(|n| *n > 0)
        .ok_or_else(|| IngestionError::InvalidConfig(format!("{key} must be a positive integer, got {value:?}")))
}
