//! SQLite backend
//!
//! Rows are buffered by [`drain_batched`] and each flush commits the whole
//! buffer in a single transaction. Any failed statement or commit stops the
//! load.

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::path::Path;
use tokio::sync::mpsc;
use tracing::{debug, info};

use cpe_common::types::TABLE_NAME;
use cpe_common::NormalizedRow;

use super::batched::{drain_batched, BatchCommit, FlushPolicy};
use super::{create_table_sql, quoted_columns, StorageSink, WriteSummary};
use crate::config::{Backend, IngestConfig};
use crate::error::Result;

/// Rows per multi-row `INSERT`; 14 bound columns each stays under the
/// SQLite host parameter limit
const INSERT_CHUNK_SIZE: usize = 2000;

/// Page cache size, in pages
const CACHE_SIZE_PAGES: &str = "2000";

/// Memory-mapped I/O window, in bytes
const MMAP_SIZE_BYTES: &str = "268435456";

/// Storage handler for the SQLite backend
pub struct SqliteSink {
    pool: SqlitePool,
    policy: FlushPolicy,
}

impl SqliteSink {
    /// Open or create the database file and ensure the `items` table exists
    ///
    /// Durability is traded for load speed: no rollback journal and no
    /// fsync. A crash mid-load can leave the file unusable.
    pub async fn open(path: &Path, config: &IngestConfig) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Off)
            .synchronous(SqliteSynchronous::Off)
            .pragma("cache_size", CACHE_SIZE_PAGES)
            .pragma("mmap_size", MMAP_SIZE_BYTES);

        // One connection: the writer is the only client and every flush is
        // one transaction
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        sqlx::query(&create_table_sql("TEXT")).execute(&pool).await?;
        info!(path = %path.display(), "Opened SQLite output");

        Ok(Self {
            pool,
            policy: FlushPolicy::from(config),
        })
    }

    /// Pool backing this sink
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn insert_chunk(
        tx: &mut sqlx::Transaction<'_, Sqlite>,
        rows: &[NormalizedRow],
    ) -> Result<()> {
        let references = rows
            .iter()
            .map(NormalizedRow::references_json)
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut query_builder: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("INSERT INTO {} ({}) ", TABLE_NAME, quoted_columns()));

        query_builder.push_values(rows.iter().zip(references), |mut b, (row, references)| {
            b.push_bind(row.schema_version.as_str())
                .push_bind(row.title.as_str());
            for value in row.attributes() {
                b.push_bind(value);
            }
            b.push_bind(references);
        });

        query_builder.build().execute(&mut **tx).await?;
        Ok(())
    }
}

#[async_trait]
impl BatchCommit for SqliteSink {
    async fn commit(&mut self, batch: &[NormalizedRow]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for chunk in batch.chunks(INSERT_CHUNK_SIZE) {
            Self::insert_chunk(&mut tx, chunk).await?;
        }

        tx.commit().await?;
        debug!(rows = batch.len(), "Committed transaction");
        Ok(())
    }
}

#[async_trait]
impl StorageSink for SqliteSink {
    fn backend(&self) -> Backend {
        Backend::Transactional
    }

    async fn write(&mut self, mut rows: mpsc::Receiver<NormalizedRow>) -> Result<WriteSummary> {
        let policy = self.policy;
        let summary = drain_batched(&mut rows, policy, self).await?;
        self.pool.close().await;

        info!(
            rows = summary.rows_written,
            flushes = summary.flushes,
            peak_buffered = summary.peak_buffered,
            "SQLite load complete"
        );
        Ok(summary)
    }
}
