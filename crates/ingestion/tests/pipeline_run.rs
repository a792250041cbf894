//! End-to-end runs of the ingestion pipeline against in-memory SQLite.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use field_aggregator::{Compression, FieldAggregator, StagingConfig};
use ingestion::{FailurePolicy, IngestionError, IngestionPipeline, PipelineOptions, RetryPolicy};
use std::sync::Arc;
use std::time::Duration;
use storage::{
    ConflictPolicy, Destination, PrepareOutcome, SchemaPolicy, SqliteDestination, StorageError,
};
use tempfile::TempDir;
use test_utils::{
    assert_approx_eq, constant_snapshots, month, test_variables, two_by_two,
    InMemoryArchiveSource, SyntheticDecoder,
};
use weather_common::{AggregatedRow, VariableSet, YearMonth};

const TABLE: &str = "cosmo";
const INSTANTS: usize = 3;
const CLOUD: [f32; 4] = [1.0, 1.0, 3.0, 3.0];

struct Harness {
    source: Arc<InMemoryArchiveSource>,
    db: Arc<SqliteDestination>,
    staging: TempDir,
}

impl Harness {
    async fn new() -> Self {
        Self {
            source: Arc::new(InMemoryArchiveSource::new()),
            db: Arc::new(SqliteDestination::open_memory().await.unwrap()),
            staging: tempfile::tempdir().unwrap(),
        }
    }

    /// Serve both test variables for `m`.
    fn publish(&self, m: YearMonth) {
        self.source
            .insert_snapshots("temp_air", m, &constant_snapshots(&two_by_two::VALUES, INSTANTS));
        self.source
            .insert_snapshots("cloud_cover", m, &constant_snapshots(&CLOUD, INSTANTS));
    }

    fn pipeline(&self, options: PipelineOptions) -> IngestionPipeline {
        self.pipeline_with(self.db.clone(), options)
    }

    fn pipeline_with(
        &self,
        destination: Arc<dyn Destination>,
        options: PipelineOptions,
    ) -> IngestionPipeline {
        let aggregator = FieldAggregator::new(
            self.source.clone(),
            Arc::new(SyntheticDecoder),
            Arc::new(two_by_two::matrix()),
            StagingConfig {
                dir: self.staging.path().to_path_buf(),
                compression: Compression::None,
            },
        );
        IngestionPipeline::new(aggregator, destination, options)
    }

    async fn count(&self) -> i64 {
        self.db.count(TABLE).await.unwrap()
    }
}

/// SQLite destination whose commits fail once rows reach `fail_from`.
struct FailingCommit {
    inner: Arc<SqliteDestination>,
    fail_from: NaiveDateTime,
}

#[async_trait]
impl Destination for FailingCommit {
    fn backend(&self) -> &'static str {
        self.inner.backend()
    }

    async fn prepare(
        &self,
        table: &str,
        variables: &[String],
        policy: SchemaPolicy,
    ) -> storage::Result<PrepareOutcome> {
        self.inner.prepare(table, variables, policy).await
    }

    async fn watermark(&self, table: &str) -> storage::Result<Option<NaiveDateTime>> {
        self.inner.watermark(table).await
    }

    async fn append(
        &self,
        table: &str,
        variables: &[String],
        rows: &[AggregatedRow],
        conflict: ConflictPolicy,
    ) -> storage::Result<u64> {
        if rows.iter().any(|r| r.timestamp >= self.fail_from) {
            return Err(StorageError::Connection("connection reset during commit".into()));
        }
        self.inner.append(table, variables, rows, conflict).await
    }

    async fn make_time_series(&self, table: &str) -> storage::Result<()> {
        self.inner.make_time_series(table).await
    }
}

fn options() -> PipelineOptions {
    PipelineOptions {
        table: TABLE.to_string(),
        max_concurrent_units: 2,
        make_time_series: false,
        retry: RetryPolicy {
            max_retries: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        },
        ..Default::default()
    }
}

#[tokio::test]
async fn test_two_by_two_end_to_end() {
    let h = Harness::new().await;
    h.publish(month(2000, 1));
    h.publish(month(2000, 2));

    let report = h
        .pipeline(options())
        .run(&test_variables(), month(2000, 1), month(2000, 2))
        .await
        .unwrap();

    assert!(report.is_complete());
    assert_eq!(report.watermark, None);
    assert_eq!(report.resume_from, Some(month(2000, 1)));
    assert_eq!(report.months_committed, vec![month(2000, 1), month(2000, 2)]);
    assert_eq!(report.rows_written, 12);

    let rows = h.db.rows(TABLE, &test_variables().names()).await.unwrap();
    assert_eq!(rows.len(), 12);

    let first = &rows[0];
    assert_eq!(first.timestamp, month(2000, 1).hour_offset(0));
    assert_eq!(first.region_id, "AA1");
    assert_eq!(first.country_code, "AA");
    assert_approx_eq!(first.values["temp_air"], two_by_two::MEAN_A, 1e-9);
    assert_approx_eq!(first.values["cloud_cover"], 1.0, 1e-9);

    let second = &rows[1];
    assert_eq!(second.region_id, "BB1");
    assert_approx_eq!(second.values["temp_air"], two_by_two::MEAN_B, 1e-9);
    assert_approx_eq!(second.values["cloud_cover"], 3.0, 1e-9);

    let last = rows.last().unwrap();
    assert_eq!(last.timestamp, month(2000, 2).hour_offset(INSTANTS - 1));
}

#[tokio::test]
async fn test_resumes_after_watermark() {
    let h = Harness::new().await;
    for m in 1..=3 {
        h.publish(month(2000, m));
    }
    let variables = test_variables();

    h.pipeline(options())
        .run(&variables, month(2000, 1), month(2000, 2))
        .await
        .unwrap();

    let report = h
        .pipeline(options())
        .run(&variables, month(2000, 1), month(2000, 3))
        .await
        .unwrap();

    assert_eq!(report.watermark, Some(month(2000, 2).hour_offset(INSTANTS - 1)));
    assert_eq!(report.resume_from, Some(month(2000, 3)));
    assert_eq!(report.months_committed, vec![month(2000, 3)]);
    assert_eq!(h.source.fetch_count("temp_air", month(2000, 1)), 1);
    assert_eq!(h.source.fetch_count("temp_air", month(2000, 3)), 1);
    assert_eq!(h.count().await, 18);
}

#[tokio::test]
async fn test_rerun_of_committed_range_is_a_no_op() {
    let h = Harness::new().await;
    h.publish(month(2000, 1));
    let variables = test_variables();

    h.pipeline(options())
        .run(&variables, month(2000, 1), month(2000, 1))
        .await
        .unwrap();
    let report = h
        .pipeline(options())
        .run(&variables, month(2000, 1), month(2000, 1))
        .await
        .unwrap();

    assert!(report.months_committed.is_empty());
    assert_eq!(report.rows_written, 0);
    assert_eq!(h.source.total_fetches(), 2);
    assert_eq!(h.count().await, 6);
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let h = Harness::new().await;
    h.publish(month(2000, 1));
    h.source.fail_times("temp_air", month(2000, 1), 2);

    let report = h
        .pipeline(options())
        .run(&test_variables(), month(2000, 1), month(2000, 1))
        .await
        .unwrap();

    assert!(report.is_complete());
    assert_eq!(h.source.fetch_count("temp_air", month(2000, 1)), 3);
    assert_eq!(h.source.fetch_count("cloud_cover", month(2000, 1)), 1);
    assert_eq!(h.count().await, 6);
}

#[tokio::test]
async fn test_exhausted_retries_halt_without_commit() {
    let h = Harness::new().await;
    h.publish(month(2000, 1));
    h.publish(month(2000, 2));
    h.source.fail_times("temp_air", month(2000, 1), 10);

    let report = h
        .pipeline(options())
        .run(&test_variables(), month(2000, 1), month(2000, 2))
        .await
        .unwrap();

    assert!(!report.is_complete());
    assert_eq!(report.halted_at, Some(month(2000, 1)));
    assert_eq!(report.failed_units.len(), 1);
    assert_eq!(report.failed_units[0].variable, "temp_air");
    assert_eq!(report.failed_units[0].attempts, 4);
    assert_eq!(h.source.fetch_count("temp_air", month(2000, 1)), 4);
    assert_eq!(h.source.fetch_count("temp_air", month(2000, 2)), 0);
    assert_eq!(h.count().await, 0);
    assert_eq!(report.time_series, None);
}

#[tokio::test]
async fn test_decode_errors_are_not_retried() {
    let h = Harness::new().await;
    h.publish(month(2000, 1));
    h.source.insert("temp_air", month(2000, 1), b"not an archive".to_vec());

    let report = h
        .pipeline(options())
        .run(&test_variables(), month(2000, 1), month(2000, 1))
        .await
        .unwrap();

    assert_eq!(report.failed_units.len(), 1);
    assert_eq!(report.failed_units[0].attempts, 1);
    assert_eq!(h.source.fetch_count("temp_air", month(2000, 1)), 1);
    assert_eq!(h.count().await, 0);
}

#[tokio::test]
async fn test_skip_policy_leaves_gap_and_continues() {
    let h = Harness::new().await;
    h.publish(month(2000, 1));
    h.publish(month(2000, 2));
    h.source.insert("cloud_cover", month(2000, 1), b"broken".to_vec());

    let mut opts = options();
    opts.failure_policy = FailurePolicy::Skip;
    let report = h
        .pipeline(opts.clone())
        .run(&test_variables(), month(2000, 1), month(2000, 2))
        .await
        .unwrap();

    assert_eq!(report.months_skipped, vec![month(2000, 1)]);
    assert_eq!(report.months_committed, vec![month(2000, 2)]);
    assert_eq!(report.halted_at, None);
    assert_eq!(h.count().await, 6);

    // The watermark is past the gap, so a rerun does not revisit it
    h.publish(month(2000, 1));
    let rerun = h
        .pipeline(opts)
        .run(&test_variables(), month(2000, 1), month(2000, 2))
        .await
        .unwrap();
    assert!(rerun.months_committed.is_empty());
    assert_eq!(h.count().await, 6);
}

#[tokio::test]
async fn test_concurrency_does_not_change_output() {
    let sequential = Harness::new().await;
    let concurrent = Harness::new().await;
    for h in [&sequential, &concurrent] {
        h.publish(month(2001, 6));
        h.publish(month(2001, 7));
    }

    let mut opts = options();
    opts.max_concurrent_units = 1;
    sequential
        .pipeline(opts.clone())
        .run(&test_variables(), month(2001, 6), month(2001, 7))
        .await
        .unwrap();

    opts.max_concurrent_units = 8;
    concurrent
        .pipeline(opts)
        .run(&test_variables(), month(2001, 6), month(2001, 7))
        .await
        .unwrap();

    let names = test_variables().names();
    assert_eq!(
        sequential.db.rows(TABLE, &names).await.unwrap(),
        concurrent.db.rows(TABLE, &names).await.unwrap()
    );
}

#[tokio::test]
async fn test_units_with_different_lengths_are_merged() {
    let h = Harness::new().await;
    let m = month(2000, 4);
    h.source
        .insert_snapshots("temp_air", m, &constant_snapshots(&two_by_two::VALUES, 3));
    h.source
        .insert_snapshots("cloud_cover", m, &constant_snapshots(&CLOUD, 2));

    let report = h
        .pipeline(options())
        .run(&test_variables(), m, m)
        .await
        .unwrap();
    assert_eq!(report.rows_written, 6);

    let rows = h.db.rows(TABLE, &test_variables().names()).await.unwrap();
    let tail: Vec<_> = rows.iter().filter(|r| r.timestamp == m.hour_offset(2)).collect();
    assert_eq!(tail.len(), 2);
    assert!(tail.iter().all(|r| !r.values.contains_key("cloud_cover")));
    assert!(tail.iter().all(|r| r.values.contains_key("temp_air")));
}

#[tokio::test]
async fn test_schema_policy_reject_and_widen() {
    let h = Harness::new().await;
    h.publish(month(2000, 1));
    h.publish(month(2000, 2));

    let temp_only = VariableSet::new(vec![test_variables().iter().next().unwrap().clone()]).unwrap();
    h.pipeline(options())
        .run(&temp_only, month(2000, 1), month(2000, 1))
        .await
        .unwrap();

    let err = h
        .pipeline(options())
        .run(&test_variables(), month(2000, 1), month(2000, 2))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        IngestionError::Storage(StorageError::SchemaMismatch { ref missing, .. })
            if missing == &vec!["cloud_cover".to_string()]
    ));
    assert_eq!(h.count().await, 6);

    let mut opts = options();
    opts.schema_policy = SchemaPolicy::Widen;
    let report = h
        .pipeline(opts)
        .run(&test_variables(), month(2000, 1), month(2000, 2))
        .await
        .unwrap();
    assert_eq!(report.months_committed, vec![month(2000, 2)]);

    let rows = h.db.rows(TABLE, &test_variables().names()).await.unwrap();
    assert!(rows
        .iter()
        .filter(|r| r.timestamp < month(2000, 2).start())
        .all(|r| !r.values.contains_key("cloud_cover")));
    assert!(rows
        .iter()
        .filter(|r| r.timestamp >= month(2000, 2).start())
        .all(|r| r.values.contains_key("cloud_cover")));
}

#[tokio::test]
async fn test_time_series_conversion_failure_is_not_fatal() {
    let h = Harness::new().await;
    h.publish(month(2000, 1));

    let mut opts = options();
    opts.make_time_series = true;
    let report = h
        .pipeline(opts)
        .run(&test_variables(), month(2000, 1), month(2000, 1))
        .await
        .unwrap();

    assert_eq!(report.months_committed, vec![month(2000, 1)]);
    assert_eq!(report.time_series, Some(false));
}

#[tokio::test]
async fn test_commit_failure_stops_run_before_watermark_moves() {
    let h = Harness::new().await;
    h.publish(month(2000, 1));
    h.publish(month(2000, 2));
    let variables = test_variables();

    let failing = Arc::new(FailingCommit {
        inner: h.db.clone(),
        fail_from: month(2000, 2).start(),
    });
    let err = h
        .pipeline_with(failing, options())
        .run(&variables, month(2000, 1), month(2000, 2))
        .await
        .unwrap_err();
    assert!(matches!(err, IngestionError::Storage(StorageError::Connection(_))));

    let rows = h.db.rows(TABLE, &variables.names()).await.unwrap();
    assert_eq!(rows.len(), 6);
    assert!(rows.iter().all(|r| r.timestamp < month(2000, 2).start()));

    let report = h
        .pipeline(options())
        .run(&variables, month(2000, 1), month(2000, 2))
        .await
        .unwrap();
    assert_eq!(report.resume_from, Some(month(2000, 2)));
    assert_eq!(report.months_committed, vec![month(2000, 2)]);
    assert_eq!(h.source.fetch_count("temp_air", month(2000, 1)), 1);
    assert_eq!(h.count().await, 12);
}
