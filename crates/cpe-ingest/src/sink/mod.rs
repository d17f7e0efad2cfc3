//! Storage backends
//!
//! Every backend implements [`StorageSink`]: take the row queue, persist
//! everything that comes through it, and return once the queue is closed and
//! all buffered rows are committed. The pipeline only ever sees the trait.
//!
//! The two backends deliberately differ in how they treat write failures:
//!
//! | backend | write model | on a failed write |
//! |---|---|---|
//! | [`Backend::Transactional`] | batched multi-row `INSERT` per transaction | the whole load stops |
//! | [`Backend::Columnar`] | one appender, row at a time | the row is logged and skipped |

pub mod batched;
pub mod columnar;
pub mod transactional;

use async_trait::async_trait;
use std::path::Path;
use tokio::sync::mpsc;

use cpe_common::types::{COLUMNS, TABLE_NAME};
use cpe_common::NormalizedRow;

use crate::config::{Backend, IngestConfig};
use crate::error::Result;

pub use self::batched::{drain_batched, BatchCommit, FlushPolicy};
pub use self::columnar::DuckDbSink;
pub use self::transactional::SqliteSink;

/// Counts reported by a sink when its queue is exhausted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub rows_written: u64,
    /// Rows dropped after a per-row write failure (columnar backend only)
    pub rows_skipped: u64,
    /// Successful commits of buffered rows
    pub flushes: u64,
    /// Largest number of rows held unflushed at once
    pub peak_buffered: usize,
}

/// A storage backend consuming the normalized row queue
#[async_trait]
pub trait StorageSink: Send {
    fn backend(&self) -> Backend;

    /// Persist rows until the queue closes
    async fn write(&mut self, rows: mpsc::Receiver<NormalizedRow>) -> Result<WriteSummary>;
}

/// Open the configured backend at `path`, creating the `items` table
///
/// Runs before the source document is touched, so a bad output path fails
/// the load without reading anything.
pub async fn open_sink(
    backend: Backend,
    path: &Path,
    config: &IngestConfig,
) -> Result<Box<dyn StorageSink>> {
    let sink: Box<dyn StorageSink> = match backend {
        Backend::Transactional => Box::new(SqliteSink::open(path, config).await?),
        Backend::Columnar => Box::new(DuckDbSink::open(path, config).await?),
    };
    Ok(sink)
}

/// `CREATE TABLE` statement for `items` with every column typed `column_type`
pub(crate) fn create_table_sql(column_type: &str) -> String {
    let columns: Vec<String> = COLUMNS
        .iter()
        .map(|column| format!("\"{}\" {}", column, column_type))
        .collect();
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        TABLE_NAME,
        columns.join(", ")
    )
}

/// Quoted, comma-separated column list; `update` and `references` are
/// reserved words in both engines
pub(crate) fn quoted_columns() -> String {
    COLUMNS
        .iter()
        .map(|column| format!("\"{}\"", column))
        .collect::<Vec<_>>()
        .join(", ")
}
