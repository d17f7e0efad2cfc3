//! CPE Ingest Library
//!
//! Loads the NVD CPE 2.3 dictionary into a local database in one streaming
//! pass.
//!
//! # Stages
//!
//! - **stream**: pull-parses `<cpe-item>` records out of the XML document
//! - **normalize**: unbinds each CPE 2.3 name into its eleven attributes
//! - **sink**: SQLite (batched transactions) or DuckDB (appender) writers
//! - **pipeline**: runs the three stages concurrently over bounded queues
//!
//! # Example
//!
//! ```no_run
//! use cpe_ingest::config::{Backend, IngestConfig};
//! use cpe_ingest::source::SourceSpec;
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let source = SourceSpec::Local("official-cpe-dictionary_v2.3.xml".into());
//!     let report = cpe_ingest::ingest(
//!         &source,
//!         Path::new("cpe.duckdb"),
//!         Backend::Columnar,
//!         IngestConfig::default(),
//!     )
//!     .await?;
//!     println!("{} rows", report.rows_written);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod normalize;
pub mod pipeline;
pub mod sink;
pub mod source;
pub mod stream;

use std::path::Path;
use tracing::info;

pub use config::{Backend, IngestConfig};
pub use error::{IngestError, Result};
pub use pipeline::{Pipeline, PipelineReport};
pub use source::SourceSpec;

/// Load a dictionary into `output` using `backend`
///
/// The output database is opened first: if that fails, nothing is
/// downloaded or read.
pub async fn ingest(
    source: &SourceSpec,
    output: &Path,
    backend: Backend,
    config: IngestConfig,
) -> Result<PipelineReport> {
    let pipeline = Pipeline::new(config)?;
    let sink = sink::open_sink(backend, output, pipeline.config()).await?;

    let prepared = source::prepare_source(source).await?;
    info!(document = %prepared.path().display(), "Source document ready");

    pipeline.run(prepared.path(), sink).await
}
