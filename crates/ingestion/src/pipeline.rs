//! Incremental, month-by-month ingestion into the destination table.
//!
//! Work is split into units of one variable for one month. Units of a month
//! run concurrently; their rows are merged on `(time, region_id)` and the
//! month is committed as a single append. The destination's `max(time)` is
//! the only progress record, so a rerun resumes after the last committed
//! month.

use chrono::NaiveDateTime;
use field_aggregator::{AggregateError, FieldAggregator};
use futures::stream::{self, StreamExt};
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use storage::{ConflictPolicy, Destination, SchemaPolicy};
use tracing::{debug, error, info, instrument, warn};
use weather_common::{AggregatedRow, MergedRows, Variable, VariableSet, YearMonth};

use crate::error::Result;

/// What to do with a month in which some unit failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Stop the run so the watermark never moves past a gap.
    #[default]
    Halt,
    /// Leave the month uncommitted and continue with the next one.
    ///
    /// A later commit moves the watermark past the skipped month, so later
    /// runs never revisit it unless `start` is moved back before it.
    Skip,
}

/// Exponential backoff for transient failures of one unit.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(120),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based).
    pub fn delay(&self, retry: u32) -> Duration {
        let mut delay = self.initial_delay;
        for _ in 1..retry {
            delay = std::cmp::min(delay * 2, self.max_delay);
        }
        std::cmp::min(delay, self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub table: String,
    pub max_concurrent_units: usize,
    pub failure_policy: FailurePolicy,
    pub schema_policy: SchemaPolicy,
    pub conflict_policy: ConflictPolicy,
    pub make_time_series: bool,
    pub retry: RetryPolicy,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            table: "cosmo".to_string(),
            max_concurrent_units: 4,
            failure_policy: FailurePolicy::default(),
            schema_policy: SchemaPolicy::default(),
            conflict_policy: ConflictPolicy::default(),
            make_time_series: true,
            retry: RetryPolicy::default(),
        }
    }
}

/// Lifecycle of a work unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    Pending,
    Fetching,
    Aggregating,
    Committing,
    Done,
    Failed,
}

impl UnitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Fetching => "fetching",
            Self::Aggregating => "aggregating",
            Self::Committing => "committing",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Transitions allowed by the unit lifecycle.
    pub fn can_transition(&self, to: UnitState) -> bool {
        use UnitState::*;
        matches!(
            (self, to),
            (Pending, Fetching)
                | (Fetching, Aggregating)
                | (Fetching, Pending)
                | (Fetching, Failed)
                | (Aggregating, Committing)
                | (Aggregating, Pending)
                | (Aggregating, Failed)
                | (Committing, Done)
                | (Committing, Failed)
        )
    }
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One variable for one month.
#[derive(Debug, Clone)]
pub struct WorkUnit {
    pub variable: Variable,
    pub month: YearMonth,
    state: UnitState,
    attempt: u32,
}

impl WorkUnit {
    pub fn new(variable: Variable, month: YearMonth) -> Self {
        Self {
            variable,
            month,
            state: UnitState::Pending,
            attempt: 0,
        }
    }

    pub fn state(&self) -> UnitState {
        self.state
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    fn transition(&mut self, to: UnitState) {
        debug_assert!(
            self.state.can_transition(to),
            "invalid unit transition {} -> {}",
            self.state,
            to
        );
        if to == UnitState::Fetching {
            self.attempt += 1;
        }
        debug!(
            variable = %self.variable.name,
            month = %self.month,
            from = %self.state,
            state = %to,
            attempt = self.attempt,
            "Unit transition"
        );
        self.state = to;
    }
}

/// A unit that ended in [`UnitState::Failed`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedUnit {
    pub variable: String,
    pub month: YearMonth,
    pub attempts: u32,
    pub error: String,
}

/// Summary of one [`IngestionPipeline::run`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    /// Destination `max(time)` before the run.
    pub watermark: Option<NaiveDateTime>,
    /// First month considered after applying the watermark.
    pub resume_from: Option<YearMonth>,
    pub months_committed: Vec<YearMonth>,
    /// Months left uncommitted under the skip policy.
    pub months_skipped: Vec<YearMonth>,
    /// Month at which the halt policy stopped the run.
    pub halted_at: Option<YearMonth>,
    pub rows_written: u64,
    pub failed_units: Vec<FailedUnit>,
    /// Outcome of the time-series conversion, `None` if not attempted.
    pub time_series: Option<bool>,
}

impl RunReport {
    /// Every planned month was committed.
    pub fn is_complete(&self) -> bool {
        self.failed_units.is_empty() && self.halted_at.is_none()
    }
}

type UnitResult = std::result::Result<(WorkUnit, Vec<AggregatedRow>), FailedUnit>;

/// Drives units through fetch, aggregation and commit.
pub struct IngestionPipeline {
    aggregator: FieldAggregator,
    destination: Arc<dyn Destination>,
    options: PipelineOptions,
}

impl IngestionPipeline {
    pub fn new(
        aggregator: FieldAggregator,
        destination: Arc<dyn Destination>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            aggregator,
            destination,
            options,
        }
    }

    /// Ingest `variables` for every month in `[start, end]` not yet committed.
    ///
    /// Unit failures are reported, not returned. Errors are returned only for
    /// schema checks, watermark reads and commits, which leave the
    /// destination at its last committed month.
    #[instrument(skip(self, variables), fields(table = %self.options.table, start = %start, end = %end))]
    pub async fn run(
        &self,
        variables: &VariableSet,
        start: YearMonth,
        end: YearMonth,
    ) -> Result<RunReport> {
        let table = &self.options.table;
        let columns = variables.names();

        let outcome = self
            .destination
            .prepare(table, &columns, self.options.schema_policy)
            .await?;
        debug!(outcome = ?outcome, "Destination prepared");

        let watermark = self.destination.watermark(table).await?;
        let resume_from = match watermark {
            Some(ts) => std::cmp::max(start, YearMonth::after(ts)),
            None => start,
        };

        let mut report = RunReport {
            watermark,
            resume_from: Some(resume_from),
            ..Default::default()
        };

        info!(
            watermark = ?watermark,
            resume_from = %resume_from,
            variables = variables.len(),
            backend = self.destination.backend(),
            "Starting ingestion"
        );

        for month in resume_from.through(end) {
            let (units, failed) = self.run_month(variables, month).await;

            if !failed.is_empty() {
                for unit in &failed {
                    error!(
                        variable = %unit.variable,
                        month = %unit.month,
                        attempts = unit.attempts,
                        error = %unit.error,
                        "Unit failed"
                    );
                }
                report.failed_units.extend(failed);

                match self.options.failure_policy {
                    FailurePolicy::Halt => {
                        warn!(month = %month, "Halting run, month not committed");
                        report.halted_at = Some(month);
                        break;
                    }
                    FailurePolicy::Skip => {
                        warn!(month = %month, "Skipping month, it will not be retried by later runs");
                        report.months_skipped.push(month);
                        continue;
                    }
                }
            }

            let written = self.commit_month(month, &columns, units).await?;
            report.rows_written += written;
            report.months_committed.push(month);
        }

        if report.is_complete() && self.options.make_time_series {
            report.time_series = Some(self.make_time_series().await);
        }

        info!(
            months_committed = report.months_committed.len(),
            months_skipped = report.months_skipped.len(),
            failed_units = report.failed_units.len(),
            rows = report.rows_written,
            "Ingestion finished"
        );
        Ok(report)
    }

    /// Run every unit of `month`, returning the successful units with their
    /// rows and the failed units.
    async fn run_month(
        &self,
        variables: &VariableSet,
        month: YearMonth,
    ) -> (Vec<(WorkUnit, Vec<AggregatedRow>)>, Vec<FailedUnit>) {
        info!(month = %month, "Processing month");

        let results: Vec<UnitResult> = stream::iter(variables.iter().cloned())
            .map(|variable| self.run_unit(WorkUnit::new(variable, month)))
            .buffer_unordered(self.options.max_concurrent_units.max(1))
            .collect()
            .await;

        let (successes, failures): (Vec<_>, Vec<_>) =
            results.into_iter().partition(|r| r.is_ok());
        (
            successes.into_iter().filter_map(|r| r.ok()).collect(),
            failures.into_iter().filter_map(|r| r.err()).collect(),
        )
    }

    /// Drive one unit until it is ready to commit or has failed.
    async fn run_unit(&self, mut unit: WorkUnit) -> UnitResult {
        let started = Instant::now();
        let retry = &self.options.retry;

        let result = loop {
            unit.transition(UnitState::Fetching);
            match self.fetch_and_aggregate(&mut unit).await {
                Ok(rows) => break Ok(rows),
                Err(e) if e.is_retryable() && unit.attempt() <= retry.max_retries => {
                    let delay = retry.delay(unit.attempt());
                    warn!(
                        variable = %unit.variable.name,
                        month = %unit.month,
                        attempt = unit.attempt(),
                        max_retries = retry.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Unit failed, retrying"
                    );
                    counter!("ingest_fetch_retries_total").increment(1);
                    unit.transition(UnitState::Pending);
                    tokio::time::sleep(delay).await;
                }
                Err(e) => break Err(e),
            }
        };

        histogram!("ingest_unit_duration_seconds").record(started.elapsed().as_secs_f64());

        match result {
            Ok(rows) => {
                unit.transition(UnitState::Committing);
                Ok((unit, rows))
            }
            Err(e) => {
                unit.transition(UnitState::Failed);
                counter!("ingest_units_total", "outcome" => "failed").increment(1);
                Err(FailedUnit {
                    variable: unit.variable.name.clone(),
                    month: unit.month,
                    attempts: unit.attempt(),
                    error: e.to_string(),
                })
            }
        }
    }

    async fn fetch_and_aggregate(
        &self,
        unit: &mut WorkUnit,
    ) -> std::result::Result<Vec<AggregatedRow>, AggregateError> {
        let rows = self.aggregator.aggregate(&unit.variable, unit.month).await?;

        unit.transition(UnitState::Aggregating);
        let instants = rows.instants();
        let rows = tokio::task::spawn_blocking(move || rows.collect_rows())
            .await
            .map_err(|e| AggregateError::Task(e.to_string()))??;

        debug!(
            variable = %unit.variable.name,
            month = %unit.month,
            instants,
            rows = rows.len(),
            "Unit aggregated"
        );
        Ok(rows)
    }

    /// Merge the units of `month` into wide rows and append them at once.
    async fn commit_month(
        &self,
        month: YearMonth,
        columns: &[String],
        units: Vec<(WorkUnit, Vec<AggregatedRow>)>,
    ) -> Result<u64> {
        let mut merged = MergedRows::new();
        let mut committing = Vec::with_capacity(units.len());
        for (unit, rows) in units {
            merged.merge_all(rows);
            committing.push(unit);
        }

        if merged.is_empty() {
            warn!(month = %month, "No rows produced for month");
        }

        let rows = merged.into_rows();
        let written = match self
            .destination
            .append(&self.options.table, columns, &rows, self.options.conflict_policy)
            .await
        {
            Ok(written) => written,
            Err(e) => {
                for unit in &mut committing {
                    unit.transition(UnitState::Failed);
                }
                counter!("ingest_units_total", "outcome" => "failed").increment(committing.len() as u64);
                error!(month = %month, error = %e, "Commit failed");
                return Err(e.into());
            }
        };

        for unit in &mut committing {
            unit.transition(UnitState::Done);
        }
        counter!("ingest_units_total", "outcome" => "done").increment(committing.len() as u64);
        counter!("ingest_rows_committed_total").increment(written);

        info!(month = %month, rows = written, units = committing.len(), "Month committed");
        Ok(written)
    }

    async fn make_time_series(&self) -> bool {
        match self.destination.make_time_series(&self.options.table).await {
            Ok(()) => {
                info!(table = %self.options.table, "Converted to time-series table");
                true
            }
            Err(e) => {
                warn!(table = %self.options.table, error = %e, "Time-series conversion failed");
                false
            }
        }
    }
}
