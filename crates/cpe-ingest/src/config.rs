//! Ingestion configuration
//!
//! Pipeline knobs and backend selection. The binary fills this from flags
//! and environment variables; tests build it directly.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{IngestError, Result};

/// NVD download location of the official CPE 2.3 dictionary
pub const DEFAULT_DICTIONARY_URL: &str =
    "https://nvd.nist.gov/feeds/xml/cpe/dictionary/official-cpe-dictionary_v2.3.xml.gz";

/// Buffered rows that force a transactional flush
pub const DEFAULT_HIGH_WATER_MARK: usize = 10_000;

/// Largest accepted high-water mark
pub const MAX_HIGH_WATER_MARK: usize = 1_000_000;

/// Seconds between timer-driven transactional flushes
pub const DEFAULT_FLUSH_INTERVAL_SECS: u64 = 15;

/// Capacity of the raw-record queue between the reader and the normalizer
pub const DEFAULT_RECORD_QUEUE_CAPACITY: usize = 1000;

/// Capacity of the row queue between the normalizer and the writer
pub const DEFAULT_ROW_QUEUE_CAPACITY: usize = 100;

/// Rows between progress log lines
pub const DEFAULT_PROGRESS_EVERY: u64 = 10_000;

/// Storage engine the rows are written to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// DuckDB file, rows streamed through an appender
    #[default]
    #[value(alias = "duckdb")]
    Columnar,
    /// SQLite file, rows inserted in batched transactions
    #[value(alias = "sqlite", alias = "sqlite3")]
    Transactional,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Columnar => "columnar",
            Backend::Transactional => "transactional",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Backend {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "columnar" | "duckdb" => Ok(Backend::Columnar),
            "transactional" | "sqlite" | "sqlite3" => Ok(Backend::Transactional),
            other => Err(IngestError::Config(format!(
                "unknown backend '{}', allowed values are columnar, transactional",
                other
            ))),
        }
    }
}

/// Pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Buffered rows that trigger a transactional flush
    pub high_water_mark: usize,
    /// Time between timer-driven transactional flushes
    pub flush_interval: Duration,
    pub record_queue_capacity: usize,
    pub row_queue_capacity: usize,
    /// Rows between progress log lines
    pub progress_every: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
            flush_interval: Duration::from_secs(DEFAULT_FLUSH_INTERVAL_SECS),
            record_queue_capacity: DEFAULT_RECORD_QUEUE_CAPACITY,
            row_queue_capacity: DEFAULT_ROW_QUEUE_CAPACITY,
            progress_every: DEFAULT_PROGRESS_EVERY,
        }
    }
}

impl IngestConfig {
    pub fn builder() -> IngestConfigBuilder {
        IngestConfigBuilder::default()
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.high_water_mark == 0 {
            return Err(IngestError::Config("high water mark must be greater than 0".into()));
        }
        if self.high_water_mark > MAX_HIGH_WATER_MARK {
            return Err(IngestError::Config(format!(
                "high water mark must be at most {}",
                MAX_HIGH_WATER_MARK
            )));
        }
        if self.flush_interval.is_zero() {
            return Err(IngestError::Config("flush interval must be greater than 0".into()));
        }
        if self.record_queue_capacity == 0 || self.row_queue_capacity == 0 {
            return Err(IngestError::Config("queue capacities must be greater than 0".into()));
        }
        if self.progress_every == 0 {
            return Err(IngestError::Config("progress interval must be greater than 0".into()));
        }
        Ok(())
    }
}

/// Builder for IngestConfig
#[derive(Default)]
pub struct IngestConfigBuilder {
    config: IngestConfig,
}

impl IngestConfigBuilder {
    pub fn high_water_mark(mut self, rows: usize) -> Self {
        self.config.high_water_mark = rows;
        self
    }

    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.config.flush_interval = interval;
        self
    }

    pub fn record_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.record_queue_capacity = capacity;
        self
    }

    pub fn row_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.row_queue_capacity = capacity;
        self
    }

    pub fn progress_every(mut self, rows: u64) -> Self {
        self.config.progress_every = rows;
        self
    }

    pub fn build(self) -> IngestConfig {
        self.config
    }
}
