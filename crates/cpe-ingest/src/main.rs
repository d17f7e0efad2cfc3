//! CPE Ingest - load the NVD CPE dictionary into SQLite or DuckDB

use anyhow::{Context, Result};
use clap::Parser;
use cpe_common::logging::{init_logging, LogConfig, LogLevel};
use cpe_ingest::config::{
    Backend, IngestConfig, DEFAULT_DICTIONARY_URL, DEFAULT_FLUSH_INTERVAL_SECS,
    DEFAULT_HIGH_WATER_MARK, DEFAULT_RECORD_QUEUE_CAPACITY, DEFAULT_ROW_QUEUE_CAPACITY,
};
use cpe_ingest::SourceSpec;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "cpe-ingest")]
#[command(author, version, about = "Load the NVD CPE 2.3 dictionary into a local database")]
struct Cli {
    /// Database file to create or append to
    #[arg(short, long, env = "CPE_OUTPUT_FILE")]
    output_file: PathBuf,

    /// Storage backend
    #[arg(short = 't', long = "type", env = "CPE_BACKEND", value_enum, default_value_t = Backend::Columnar)]
    backend: Backend,

    /// Local dictionary (.xml or .xml.gz); downloads from --url when omitted
    #[arg(short, long, env = "CPE_INPUT")]
    input: Option<PathBuf>,

    /// Dictionary download URL
    #[arg(long, env = "CPE_DICTIONARY_URL", default_value = DEFAULT_DICTIONARY_URL)]
    url: String,

    /// Buffered rows that force a transactional flush
    #[arg(long, env = "CPE_HIGH_WATER_MARK", default_value_t = DEFAULT_HIGH_WATER_MARK)]
    high_water_mark: usize,

    /// Seconds between timer-driven transactional flushes
    #[arg(long, env = "CPE_FLUSH_INTERVAL_SECS", default_value_t = DEFAULT_FLUSH_INTERVAL_SECS)]
    flush_interval_secs: u64,

    #[arg(long, env = "CPE_RECORD_QUEUE_CAPACITY", default_value_t = DEFAULT_RECORD_QUEUE_CAPACITY)]
    record_queue_capacity: usize,

    #[arg(long, env = "CPE_ROW_QUEUE_CAPACITY", default_value_t = DEFAULT_ROW_QUEUE_CAPACITY)]
    row_queue_capacity: usize,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn source(&self) -> SourceSpec {
        match &self.input {
            Some(path) => SourceSpec::Local(path.clone()),
            None => SourceSpec::Download {
                url: self.url.clone(),
            },
        }
    }

    fn ingest_config(&self) -> IngestConfig {
        IngestConfig::builder()
            .high_water_mark(self.high_water_mark)
            .flush_interval(Duration::from_secs(self.flush_interval_secs))
            .record_queue_capacity(self.record_queue_capacity)
            .row_queue_capacity(self.row_queue_capacity)
            .build()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over the flag
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("cpe-ingest")
        .build()
        .merge_env()?;

    let _guard = init_logging(&log_config)?;

    info!(
        output = %cli.output_file.display(),
        backend = %cli.backend,
        "Starting CPE dictionary load"
    );

    let result = cpe_ingest::ingest(
        &cli.source(),
        &cli.output_file,
        cli.backend,
        cli.ingest_config(),
    )
    .await;

    match result {
        Ok(report) => {
            info!(
                rows_written = report.rows_written,
                records_skipped = report.records_skipped,
                identifiers_rejected = report.identifiers_rejected,
                "Ingestion complete"
            );
            Ok(())
        },
        Err(e) => {
            error!(error = %e, "Ingestion failed");
            Err(e).context("CPE dictionary load failed")
        },
    }
}
