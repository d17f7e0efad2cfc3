//! DuckDB backend
//!
//! Rows go through a single appender as they arrive. A row the appender
//! refuses is logged and skipped; only failing to open the appender or to
//! flush it at the end stops the load.

use async_trait::async_trait;
use duckdb::{params, Appender, Connection};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{info, warn};

use cpe_common::types::TABLE_NAME;
use cpe_common::NormalizedRow;

use super::{create_table_sql, StorageSink, WriteSummary};
use crate::config::{Backend, IngestConfig};
use crate::error::{IngestError, Result};

/// Storage handler for the DuckDB backend
pub struct DuckDbSink {
    path: PathBuf,
    conn: Option<Connection>,
    progress_every: u64,
}

impl DuckDbSink {
    /// Open or create the database file and ensure the `items` table exists
    pub async fn open(path: &Path, config: &IngestConfig) -> Result<Self> {
        let db_path = path.to_path_buf();
        let conn = tokio::task::spawn_blocking(move || -> Result<Connection> {
            let conn = Connection::open(&db_path)?;
            conn.execute_batch(&create_table_sql("VARCHAR"))?;
            Ok(conn)
        })
        .await??;

        info!(path = %path.display(), "Opened DuckDB output");

        Ok(Self {
            path: path.to_path_buf(),
            conn: Some(conn),
            progress_every: config.progress_every.max(1),
        })
    }
}

#[async_trait]
impl StorageSink for DuckDbSink {
    fn backend(&self) -> Backend {
        Backend::Columnar
    }

    async fn write(&mut self, rows: mpsc::Receiver<NormalizedRow>) -> Result<WriteSummary> {
        let conn = self.conn.take().ok_or_else(|| {
            IngestError::Stage(format!("DuckDB sink {} already consumed", self.path.display()))
        })?;
        let progress_every = self.progress_every;

        // The appender API is synchronous, so the whole drain runs on the
        // blocking pool and pulls rows with blocking_recv
        let summary = tokio::task::spawn_blocking(move || -> Result<WriteSummary> {
            let mut rows = rows;
            let summary = {
                let mut appender = conn.appender(TABLE_NAME)?;
                let summary = append_rows(&mut appender, &mut rows, progress_every);
                appender.flush()?;
                summary
            };
            drop(conn);
            Ok(summary)
        })
        .await??;

        info!(
            rows = summary.rows_written,
            skipped = summary.rows_skipped,
            "DuckDB load complete"
        );
        Ok(summary)
    }
}

/// Appends one row at a time to the `items` table
trait RowAppender {
    fn append(&mut self, row: &NormalizedRow) -> Result<()>;
}

impl RowAppender for Appender<'_> {
    fn append(&mut self, row: &NormalizedRow) -> Result<()> {
        let references = row.references_json()?;
        let [category, vendor, product, version, update, edition, language, sw_edition, target_sw, target_hw, other] =
            row.attributes();

        self.append_row(params![
            row.schema_version,
            row.title,
            category,
            vendor,
            product,
            version,
            update,
            edition,
            language,
            sw_edition,
            target_sw,
            target_hw,
            other,
            references,
        ])?;
        Ok(())
    }
}

fn append_rows<A>(
    appender: &mut A,
    rows: &mut mpsc::Receiver<NormalizedRow>,
    progress_every: u64,
) -> WriteSummary
where
    A: RowAppender + ?Sized,
{
    let mut summary = WriteSummary::default();

    while let Some(row) = rows.blocking_recv() {
        match appender.append(&row) {
            Ok(()) => {
                summary.rows_written += 1;
                if summary.rows_written % progress_every == 0 {
                    info!(rows = summary.rows_written, "Appended rows");
                }
            },
            Err(err) => {
                summary.rows_skipped += 1;
                warn!(title = %row.title, error = %err, "Skipping row the appender rejected");
            },
        }
    }

    // The final appender flush is the only commit on this backend
    summary.flushes = 1;
    summary
}
