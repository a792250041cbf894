//! PostgreSQL / TimescaleDB destination.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::{postgres::PgPoolOptions, PgPool, Postgres, QueryBuilder};
use tracing::{debug, info, instrument};
use weather_common::AggregatedRow;

use crate::destination::{ConflictPolicy, Destination, PrepareOutcome, SchemaPolicy};
use crate::error::{Result, StorageError};
use crate::schema;

/// PostgreSQL allows 65535 bound parameters per statement.
const BIND_LIMIT: usize = 60_000;

/// Table with `time TIMESTAMP` (without time zone) as first key column.
pub struct PgDestination {
    pool: PgPool,
}

impl PgDestination {
    /// Create a new connection pool from database URL.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        info!("Connected to PostgreSQL destination");
        Ok(Self { pool })
    }

    async fn columns(&self, table: &str) -> Result<Vec<String>> {
        let columns = sqlx::query_scalar::<_, String>(
            "SELECT column_name::text FROM information_schema.columns \
             WHERE table_schema = current_schema() AND table_name = $1 \
             ORDER BY ordinal_position",
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await?;
        Ok(columns)
    }
}

#[async_trait]
impl Destination for PgDestination {
    fn backend(&self) -> &'static str {
        "postgres"
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
            sqlx::query(&schema::create_table_sql(table, variables, "TIMESTAMP"))
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

        let max = sqlx::query_scalar::<_, Option<NaiveDateTime>>(&format!(
            "SELECT MAX({}) FROM {}",
            schema::TIME_COLUMN,
            table
        ))
        .fetch_one(&self.pool)
        .await?;
        Ok(max)
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
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(&prefix);
            builder.push_values(chunk, |mut values, row| {
                values
                    .push_bind(row.timestamp)
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

    /// TimescaleDB `create_hypertable`, partitioned on `time`.
    async fn make_time_series(&self, table: &str) -> Result<()> {
        schema::validate_identifier(table)?;
        sqlx::query(&format!(
            "SELECT create_hypertable('{}', '{}', if_not_exists => TRUE, migrate_data => TRUE)",
            table,
            schema::TIME_COLUMN
        ))
        .execute(&self.pool)
        .await?;

        info!(table = %table, "Converted table to hypertable");
        Ok(())
    }
}
