//! Region-aggregated weather ingester.
//!
//! Builds the grid-cell to region matrix once, then ingests monthly archives
//! into the destination table, resuming from the last committed month.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use field_aggregator::{FieldAggregator, GribDecoder, HttpArchiveSource};
use ingestion::{build_region_index, load_region_index, IngestConfig, IngestionPipeline};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use weather_common::YearMonth;

#[derive(Parser, Debug)]
#[command(name = "ingester")]
#[command(about = "Region-aggregated weather time series ingester")]
struct Args {
    /// Configuration file path
    #[arg(short, long, env = "INGESTER_CONFIG", default_value = "config/ingester.yaml")]
    config: PathBuf,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Serve Prometheus metrics on this port
    #[arg(long, env = "METRICS_PORT")]
    metrics_port: Option<u16>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build the region matrix and persist it
    BuildIndex {
        /// Rebuild even if a persisted matrix exists
        #[arg(long)]
        force: bool,

        /// Build threads (default: CPUs minus one)
        #[arg(long)]
        workers: Option<usize>,
    },

    /// Ingest months into the destination table
    Run {
        /// First month, YYYYMM or YYYY-MM
        #[arg(long)]
        start: Option<YearMonth>,

        /// Last month (inclusive)
        #[arg(long)]
        end: Option<YearMonth>,

        /// Comma separated subset of configured variables
        #[arg(long, value_delimiter = ',')]
        variables: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    // Initialize tracing
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true)
        .json()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    if let Some(port) = args.metrics_port {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(([0, 0, 0, 0], port))
            .install()
            .context("Failed to install Prometheus exporter")?;
        info!(port, "Prometheus metrics exporter initialized");
    }

    let mut config = load_config(&args.config)?;
    config.apply_env()?;

    match args.command {
        Command::BuildIndex { force, workers } => {
            if workers.is_some() {
                config.index.workers = workers;
            }
            let matrix = tokio::task::spawn_blocking(move || build_region_index(&config.index, force))
                .await
                .context("Index build task panicked")??;
            info!(
                regions = matrix.regions().len(),
                mapped_cells = matrix.mapped_cells(),
                "Region index ready"
            );
        }
        Command::Run {
            start,
            end,
            variables,
        } => {
            apply_run_args(&mut config, start, end, &variables)?;
            run(config).await?;
        }
    }

    Ok(())
}

fn load_config(path: &Path) -> Result<IngestConfig> {
    if path.exists() {
        let config = IngestConfig::load(path)?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    } else {
        warn!(path = %path.display(), "Config file not found, using defaults");
        Ok(IngestConfig::default())
    }
}

fn apply_run_args(
    config: &mut IngestConfig,
    start: Option<YearMonth>,
    end: Option<YearMonth>,
    variables: &[String],
) -> Result<()> {
    if let Some(start) = start {
        config.start = start;
    }
    if let Some(end) = end {
        config.end = end;
    }
    if !variables.is_empty() {
        config.variables = config.variables.select(variables)?;
    }
    config.validate()?;
    Ok(())
}

async fn run(config: IngestConfig) -> Result<()> {
    let index = config.index.clone();
    let matrix = tokio::task::spawn_blocking(move || load_region_index(&index))
        .await
        .context("Index load task panicked")?
        .context("Region index unavailable, run `ingester build-index` first")?;

    let source = HttpArchiveSource::new(config.source.clone())?;
    let destination = storage::connect(&config.database_url).await?;
    info!(
        backend = destination.backend(),
        table = %config.table,
        start = %config.start,
        end = %config.end,
        variables = ?config.variables.names(),
        "Starting ingestion run"
    );

    let aggregator = FieldAggregator::new(
        Arc::new(source),
        Arc::new(GribDecoder),
        Arc::new(matrix),
        config.staging.clone(),
    );
    let pipeline = IngestionPipeline::new(aggregator, destination, config.pipeline_options());
    let report = pipeline.run(&config.variables, config.start, config.end).await?;

    info!(report = %serde_json::to_string(&report)?, "Run report");

    if !report.is_complete() {
        bail!(
            "{} unit(s) failed, {} month(s) not committed",
            report.failed_units.len(),
            report.months_skipped.len() + usize::from(report.halted_at.is_some())
        );
    }
    Ok(())
}
