//! SQLite destination, used for local runs and tests.
//!
//! Timestamps are stored as `YYYY-MM-DD HH:MM:SS` text, which sorts
//! chronologically so `MAX(time)` is the watermark.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{QueryBuilder, Row, Sqlite};
use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::{debug, info, instrument};
use weather_common::AggregatedRow;

use crate::destination::{ConflictPolicy, Destination, PrepareOutcome, SchemaPolicy};
use crate::error::{Result, StorageError};
use crate::schema;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// SQLite allows 32766 bound parameters per statement.
const BIND_LIMIT: usize = 32_000;

pub struct SqliteDestination {
    pool: SqlitePool,
}

impl SqliteDestination {
    /// Open a database from a `sqlite:` URL, creating the file if missing.
    pub async fn connect(url: &str) -> Result<Self> {
        if url.contains(":memory:") {
            return Self::open_memory().await;
        }

        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| StorageError::Connection(format!("{}: {}", url, e)))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        info!(url = %url, "Opened SQLite destination");
        Ok(Self { pool })
    }

    /// Open an in-memory database (for testing).
    pub async fn open_memory() -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(":memory:")
            .create_if_missing(true);

        // One connection that never recycles, otherwise the data disappears
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        Ok(Self { pool })
    }

    async fn columns(&self, table: &str) -> Result<Vec<String>> {
        let columns = sqlx::query_scalar::<_, String>("SELECT name FROM pragma_table_info(?1)")
            .bind(table)
            .fetch_all(&self.pool)
            .await?;
        Ok(columns)
    }

    /// Read the table back, ordered by `(time, region_id)`.
    ///
    /// NULL variable values are omitted from the row.
    pub async fn rows(&self, table: &str, variables: &[String]) -> Result<Vec<AggregatedRow>> {
        schema::validate_columns(table, variables)?;

        let mut columns: Vec<&str> = schema::FIXED_COLUMNS.to_vec();
        columns.extend(variables.iter().map(String::as_str));
        let sql = format!(
            "SELECT {} FROM {} ORDER BY {}, {}",
            columns.join(", "),
            table,
            schema::TIME_COLUMN,
            schema::REGION_COLUMN
        );

        let records = sqlx::query(&sql).fetch_all(&self.pool).await?;
        records
            .iter()
            .map(|record| {
                let time: String = record.try_get(0)?;
                let mut values = BTreeMap::new();
                for (i, variable) in variables.iter().enumerate() {
                    if let Some(value) = record.try_get::<Option<f64>, _>(i + 3)? {
                        values.insert(variable.clone(), value);
                    }
                }
                Ok(AggregatedRow {
                    timestamp: parse_time(&time)?,
                    region_id: record.try_get(1)?,
                    country_code: record.try_get(2)?,
                    values,
                })
            })
            .collect()
    }

    /// Number of rows in `table`.
    pub async fn count(&self, table: &str) -> Result<i64> {
        schema::validate_identifier(table)?;
        let count = sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

fn parse_time(value: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value, TIME_FORMAT)
        .map_err(|e| StorageError::Query(format!("invalid timestamp {:?}: {}", value, e)))
}

#[async_trait]
impl Destination for SqliteDestination {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    #[instrument(skip(self, variables))]
    async fn prepare(
        &self,
        table: &str,
        variables: &[String],
        policy: SchemaPolicy,
    ) -> Result<PrepareOutcome> {
        schema::validate_columns(table, variables)?;

        let existing = self.columns(table).await?;
        if existing.is_empty() {
            sqlx::query(&schema::create_table_sql(table, variables, "TEXT"))
                .execute(&self.pool)
                .await?;
            info!(table = %table, "Created destination table");
            return Ok(PrepareOutcome::Created);
        }

        let missing = schema::columns_to_add(table, &existing, variables, policy)?;
        if missing.is_empty() {
            return Ok(PrepareOutcome::Unchanged);
        }

        let mut tx = self.pool.begin().await?;
        for column in &missing {
            sqlx::query(&schema::add_column_sql(table, column))
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        info!(table = %table, columns = ?missing, "Widened destination table");
        Ok(PrepareOutcome::Widened(missing))
    }

    async fn watermark(&self, table: &str) -> Result<Option<NaiveDateTime>> {
        schema::validate_identifier(table)?;
        if self.columns(table).await?.is_empty() {
            return Ok(None);
        }

        let max = sqlx::query_scalar::<_, Option<String>>(&format!(
            "SELECT MAX({}) FROM {}",
            schema::TIME_COLUMN,
            table
        ))
        .fetch_one(&self.pool)
        .await?;

        max.as_deref().map(parse_time).transpose()
    }

    #[instrument(skip(self, variables, rows), fields(rows = rows.len()))]
    async fn append(
        &self,
        table: &str,
        variables: &[String],
        rows: &[AggregatedRow],
        conflict: ConflictPolicy,
    ) -> Result<u64> {
        schema::validate_columns(table, variables)?;
        if rows.is_empty() {
            return Ok(0);
        }

        let prefix = schema::insert_prefix(table, variables);
        let suffix = schema::conflict_clause(table, variables, conflict);
        let chunk_size = schema::rows_per_statement(variables.len(), BIND_LIMIT);

        let mut tx = self.pool.begin().await?;
        let mut written = 0;
        for chunk in rows.chunks(chunk_size) {
            let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(&prefix);
            builder.push_values(chunk, |mut values, row| {
                values
                    .push_bind(row.timestamp.format(TIME_FORMAT).to_string())
                    .push_bind(row.region_id.as_str())
                    .push_bind(row.country_code.as_str());
                for variable in variables {
                    values.push_bind(row.values.get(variable).copied());
                }
            });
            builder.push(&suffix);

            written += builder.build().execute(&mut *tx).await?.rows_affected();
        }
        tx.commit().await?;

        debug!(table = %table, written, "Appended rows");
        Ok(written)
    }

    async fn make_time_series(&self, _table: &str) -> Result<()> {
        Err(StorageError::Unsupported {
            backend: "sqlite",
            operation: "time-series conversion",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weather_common::YearMonth;

    fn vars(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn row(hour: usize, region: &str, values: &[(&str, f64)]) -> AggregatedRow {
        let ts = YearMonth::new(2018, 1).unwrap().hour_offset(hour);
        AggregatedRow {
            timestamp: ts,
            region_id: region.to_string(),
            country_code: region[..2].to_string(),
            values: values.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
        }
    }

    #[tokio::test]
    async fn test_prepare_creates_then_unchanged() {
        let db = SqliteDestination::open_memory().await.unwrap();
        let variables = vars(&["temp_air"]);

        let first = db.prepare("cosmo", &variables, SchemaPolicy::Reject).await.unwrap();
        assert_eq!(first, PrepareOutcome::Created);
        let second = db.prepare("cosmo", &variables, SchemaPolicy::Reject).await.unwrap();
        assert_eq!(second, PrepareOutcome::Unchanged);
    }

    #[tokio::test]
    async fn test_schema_reject_and_widen() {
        let db = SqliteDestination::open_memory().await.unwrap();
        db.prepare("cosmo", &vars(&["temp_air"]), SchemaPolicy::Reject)
            .await
            .unwrap();

        let wider = vars(&["temp_air", "ghi"]);
        let err = db
            .prepare("cosmo", &wider, SchemaPolicy::Reject)
            .await
            .unwrap_err();
        match err {
            StorageError::SchemaMismatch { missing, .. } => assert_eq!(missing, vars(&["ghi"])),
            other => panic!("unexpected error: {other}"),
        }

        let outcome = db.prepare("cosmo", &wider, SchemaPolicy::Widen).await.unwrap();
        assert_eq!(outcome, PrepareOutcome::Widened(vars(&["ghi"])));
        assert_eq!(
            db.prepare("cosmo", &wider, SchemaPolicy::Reject).await.unwrap(),
            PrepareOutcome::Unchanged
        );
    }

    #[tokio::test]
    async fn test_watermark() {
        let db = SqliteDestination::open_memory().await.unwrap();
        let variables = vars(&["temp_air"]);
        assert_eq!(db.watermark("cosmo").await.unwrap(), None);

        db.prepare("cosmo", &variables, SchemaPolicy::Reject).await.unwrap();
        assert_eq!(db.watermark("cosmo").await.unwrap(), None);

        let rows = vec![
            row(0, "DE1", &[("temp_air", 1.0)]),
            row(13, "DE1", &[("temp_air", 2.0)]),
            row(5, "FR1", &[("temp_air", 3.0)]),
        ];
        db.append("cosmo", &variables, &rows, ConflictPolicy::Reject)
            .await
            .unwrap();
        assert_eq!(db.watermark("cosmo").await.unwrap(), Some(rows[1].timestamp));
    }

    #[tokio::test]
    async fn test_append_reject_duplicate_rolls_back() {
        let db = SqliteDestination::open_memory().await.unwrap();
        let variables = vars(&["temp_air"]);
        db.prepare("cosmo", &variables, SchemaPolicy::Reject).await.unwrap();

        db.append("cosmo", &variables, &[row(0, "DE1", &[("temp_air", 1.0)])], ConflictPolicy::Reject)
            .await
            .unwrap();

        let batch = vec![
            row(1, "DE1", &[("temp_air", 2.0)]),
            row(0, "DE1", &[("temp_air", 9.0)]),
        ];
        let err = db
            .append("cosmo", &variables, &batch, ConflictPolicy::Reject)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::UniqueViolation(_)));
        assert_eq!(db.count("cosmo").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_append_upsert_keeps_existing_values() {
        let db = SqliteDestination::open_memory().await.unwrap();
        let variables = vars(&["temp_air", "ghi"]);
        db.prepare("cosmo", &variables, SchemaPolicy::Reject).await.unwrap();

        db.append(
            "cosmo",
            &variables,
            &[row(0, "DE1", &[("temp_air", 1.0), ("ghi", 100.0)])],
            ConflictPolicy::Reject,
        )
        .await
        .unwrap();
        db.append(
            "cosmo",
            &variables,
            &[row(0, "DE1", &[("temp_air", 2.0)])],
            ConflictPolicy::Upsert,
        )
        .await
        .unwrap();

        let stored = db.rows("cosmo", &variables).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].values["temp_air"], 2.0);
        assert_eq!(stored[0].values["ghi"], 100.0);
    }

    #[tokio::test]
    async fn test_rows_round_trip_with_nulls() {
        let db = SqliteDestination::open_memory().await.unwrap();
        let variables = vars(&["temp_air", "ghi"]);
        db.prepare("cosmo", &variables, SchemaPolicy::Reject).await.unwrap();

        let rows = vec![
            row(0, "DE1", &[("temp_air", 1.5)]),
            row(0, "FR1", &[("temp_air", 2.5), ("ghi", 7.0)]),
        ];
        let written = db
            .append("cosmo", &variables, &rows, ConflictPolicy::Reject)
            .await
            .unwrap();
        assert_eq!(written, 2);
        assert_eq!(db.rows("cosmo", &variables).await.unwrap(), rows);
    }

    #[tokio::test]
    async fn test_large_batch_is_chunked() {
        let db = SqliteDestination::open_memory().await.unwrap();
        let variables = vars(&["temp_air"]);
        db.prepare("cosmo", &variables, SchemaPolicy::Reject).await.unwrap();

        let rows: Vec<_> = (0..20_000)
            .map(|i| row(i / 10, &format!("DE{}", i % 10), &[("temp_air", i as f64)]))
            .collect();
        let written = db
            .append("cosmo", &variables, &rows, ConflictPolicy::Reject)
            .await
            .unwrap();
        assert_eq!(written, 20_000);
        assert_eq!(db.count("cosmo").await.unwrap(), 20_000);
    }

    #[tokio::test]
    async fn test_time_series_unsupported() {
        let db = SqliteDestination::open_memory().await.unwrap();
        assert!(matches!(
            db.make_time_series("cosmo").await,
            Err(StorageError::Unsupported { .. })
        ));
    }

    #[tokio::test]
    async fn test_file_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("regions.db").display());
        let variables = vars(&["temp_air"]);
        {
            let db = SqliteDestination::connect(&url).await.unwrap();
            db.prepare("cosmo", &variables, SchemaPolicy::Reject).await.unwrap();
            db.append("cosmo", &variables, &[row(3, "DE1", &[("temp_air", 1.0)])], ConflictPolicy::Reject)
                .await
                .unwrap();
        }
        let db = SqliteDestination::connect(&url).await.unwrap();
        assert_eq!(
            db.watermark("cosmo").await.unwrap(),
            Some(YearMonth::new(2018, 1).unwrap().hour_offset(3))
        );
    }
}
