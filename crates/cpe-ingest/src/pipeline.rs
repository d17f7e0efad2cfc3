//! Pipeline orchestrator
//!
//! Wires reader → normalizer → writer through two bounded queues:
//!
//! ```text
//! RecordStream ──(records)──▶ normalizer ──(rows)──▶ StorageSink
//!  blocking thread            tokio task            tokio task
//! ```
//!
//! A full queue blocks its producer, so memory stays bounded no matter how
//! slow the backend is. When the writer fails its receiver is dropped and
//! each upstream stage stops at its next send.

use std::io::BufRead;
use std::path::Path;
use tracing::{error, info, warn};

use crate::config::IngestConfig;
use crate::error::{IngestError, Result};
use crate::normalize::{spawn_normalizer, NormalizeSummary};
use crate::sink::{StorageSink, WriteSummary};
use crate::stream::{RecordStream, StreamSummary};

/// Outcome of one completed load
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineReport {
    /// Records the reader emitted
    pub records_read: u64,
    /// Records skipped for a broken structure
    pub records_skipped: u64,
    /// Records dropped because their identifier did not decode
    pub identifiers_rejected: u64,
    pub rows_written: u64,
    /// Rows the backend refused individually
    pub rows_skipped: u64,
    pub flushes: u64,
}

impl PipelineReport {
    fn from_stages(stream: StreamSummary, normalize: NormalizeSummary, write: WriteSummary) -> Self {
        Self {
            records_read: stream.emitted,
            records_skipped: stream.skipped,
            identifiers_rejected: normalize.rejected,
            rows_written: write.rows_written,
            rows_skipped: write.rows_skipped,
            flushes: write.flushes,
        }
    }
}

/// Runs one load from a source document into an opened sink
pub struct Pipeline {
    config: IngestConfig,
}

impl Pipeline {
    pub fn new(config: IngestConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Load every record of `source` into `sink`
    ///
    /// The document is opened before any stage starts; a missing file fails
    /// here without touching the sink. A writer failure wins over any other
    /// stage error because it is the one that stopped the run.
    pub async fn run(&self, source: &Path, sink: Box<dyn StorageSink>) -> Result<PipelineReport> {
        let stream = RecordStream::open(source)?;
        info!(source = %source.display(), "Opened source document");
        self.run_stream(stream, sink).await
    }

    /// Load every record of an already opened stream into `sink`
    ///
    /// A reader failure is returned after the rows queued ahead of it have
    /// been written.
    pub async fn run_stream<R>(
        &self,
        stream: RecordStream<R>,
        mut sink: Box<dyn StorageSink>,
    ) -> Result<PipelineReport>
    where
        R: BufRead + Send + 'static,
    {
        let backend = sink.backend();

        info!(
            backend = %backend,
            high_water_mark = self.config.high_water_mark,
            flush_interval_secs = self.config.flush_interval.as_secs(),
            "Starting pipeline"
        );

        let (records, reader) = stream.spawn(self.config.record_queue_capacity);
        let (rows, normalizer) = spawn_normalizer(records, self.config.row_queue_capacity);
        let writer = tokio::spawn(async move { sink.write(rows).await });

        let written = match writer.await {
            Ok(Ok(summary)) => summary,
            Ok(Err(e)) => {
                error!(backend = %backend, error = %e, "Writer failed");
                Self::wind_down(reader, normalizer).await;
                return Err(e);
            },
            Err(e) => {
                error!(backend = %backend, error = %e, "Writer panicked");
                Self::wind_down(reader, normalizer).await;
                return Err(IngestError::from(e));
            },
        };

        let normalized = normalizer.await?;
        let streamed = match reader.await? {
            Ok(summary) => summary,
            Err(e) => {
                error!(
                    rows_written = written.rows_written,
                    error = %e,
                    "Reader failed, load is incomplete"
                );
                return Err(e);
            },
        };

        let report = PipelineReport::from_stages(streamed, normalized, written);
        info!(
            records_read = report.records_read,
            records_skipped = report.records_skipped,
            identifiers_rejected = report.identifiers_rejected,
            rows_written = report.rows_written,
            rows_skipped = report.rows_skipped,
            flushes = report.flushes,
            "Pipeline complete"
        );
        Ok(report)
    }

    /// Wait for the upstream stages after the writer has gone away
    async fn wind_down(
        reader: tokio::task::JoinHandle<Result<StreamSummary>>,
        normalizer: tokio::task::JoinHandle<NormalizeSummary>,
    ) {
        if let Err(e) = normalizer.await {
            warn!(error = %e, "Normalizer did not shut down cleanly");
        }
        match reader.await {
            Ok(Ok(_)) => {},
            Ok(Err(e)) => warn!(error = %e, "Reader also failed"),
            Err(e) => warn!(error = %e, "Reader did not shut down cleanly"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Backend;
    use crate::stream::FailingReader;
    use async_trait::async_trait;
    use cpe_common::NormalizedRow;
    use std::io::Write;
    use std::sync::{Arc, Mutex};
    use tempfile::NamedTempFile;
    use tokio::sync::mpsc;

    /// Collects titles in memory, optionally failing after `fail_after` rows
    struct MemorySink {
        titles: Arc<Mutex<Vec<String>>>,
        fail_after: Option<usize>,
    }

    #[async_trait]
    impl StorageSink for MemorySink {
        fn backend(&self) -> Backend {
            Backend::Transactional
        }

        async fn write(&mut self, mut rows: mpsc::Receiver<NormalizedRow>) -> Result<WriteSummary> {
            let mut summary = WriteSummary::default();
            while let Some(row) = rows.recv().await {
                if self.fail_after == Some(summary.rows_written as usize) {
                    return Err(IngestError::Stage("disk full".to_string()));
                }
                self.titles.lock().unwrap().push(row.title);
                summary.rows_written += 1;
            }
            summary.flushes = 1;
            Ok(summary)
        }
    }

    fn item(title: &str, name: &str) -> String {
        format!(
            r#"<cpe-item name="legacy"><title>{title}</title><cpe-23:cpe23-item name="{name}"/></cpe-item>"#
        )
    }

    fn document(items: &[String]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"<?xml version="1.0"?><cpe-list xmlns:cpe-23="http://scap.nist.gov/schema/cpe-extension/2.3">{}</cpe-list>"#,
            items.concat()
        )
        .unwrap();
        file
    }

    fn small_config() -> IngestConfig {
        IngestConfig::builder()
            .record_queue_capacity(2)
            .row_queue_capacity(1)
            .build()
    }

    #[tokio::test]
    async fn test_rows_arrive_in_document_order() {
        let items: Vec<String> = (0..50)
            .map(|i| item(&format!("entry {i}"), &format!("cpe:2.3:a:acme:widget:{i}")))
            .collect();
        let file = document(&items);
        let titles = Arc::new(Mutex::new(Vec::new()));
        let sink = MemorySink {
            titles: titles.clone(),
            fail_after: None,
        };

        let report = Pipeline::new(small_config())
            .unwrap()
            .run(file.path(), Box::new(sink))
            .await
            .unwrap();

        assert_eq!(report.records_read, 50);
        assert_eq!(report.rows_written, 50);
        let expected: Vec<String> = (0..50).map(|i| format!("entry {i}")).collect();
        assert_eq!(*titles.lock().unwrap(), expected);
    }

    #[tokio::test]
    async fn test_rejected_identifiers_are_counted() {
        let file = document(&[
            item("good", "cpe:2.3:a:acme:good"),
            item("bad", "cpe:2.3:q:acme:bad"),
            item("also good", "cpe:2.3:h:acme:router"),
        ]);
        let sink = MemorySink {
            titles: Arc::new(Mutex::new(Vec::new())),
            fail_after: None,
        };

        let report = Pipeline::new(IngestConfig::default())
            .unwrap()
            .run(file.path(), Box::new(sink))
            .await
            .unwrap();

        assert_eq!(report.records_read, 3);
        assert_eq!(report.identifiers_rejected, 1);
        assert_eq!(report.rows_written, 2);
    }

    #[tokio::test]
    async fn test_writer_failure_stops_the_run() {
        let items: Vec<String> = (0..500)
            .map(|i| item(&format!("entry {i}"), "cpe:2.3:a:acme:widget"))
            .collect();
        let file = document(&items);
        let titles = Arc::new(Mutex::new(Vec::new()));
        let sink = MemorySink {
            titles: titles.clone(),
            fail_after: Some(5),
        };

        let err = Pipeline::new(small_config())
            .unwrap()
            .run(file.path(), Box::new(sink))
            .await
            .unwrap_err();

        assert!(matches!(err, IngestError::Stage(_)));
        assert_eq!(titles.lock().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_missing_source_fails_before_writing() {
        let titles = Arc::new(Mutex::new(Vec::new()));
        let sink = MemorySink {
            titles: titles.clone(),
            fail_after: None,
        };

        let err = Pipeline::new(IngestConfig::default())
            .unwrap()
            .run(Path::new("/nonexistent/cpe-dictionary.xml"), Box::new(sink))
            .await
            .unwrap_err();

        assert!(matches!(err, IngestError::SourceUnavailable { .. }));
        assert!(titles.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reader_failure_fails_run_after_queued_rows_are_written() {
        let reader = FailingReader::new(&format!(
            "<cpe-list xmlns:cpe-23=\"http://scap.nist.gov/schema/cpe-extension/2.3\">{}{}<cpe-item><title>cut",
            item("first", "cpe:2.3:a:acme:first"),
            item("second", "cpe:2.3:a:acme:second"),
        ));
        let titles = Arc::new(Mutex::new(Vec::new()));
        let sink = MemorySink {
            titles: titles.clone(),
            fail_after: None,
        };

        let err = Pipeline::new(IngestConfig::default())
            .unwrap()
            .run_stream(RecordStream::from_reader(reader), Box::new(sink))
            .await
            .unwrap_err();

        assert!(matches!(err, IngestError::Xml(quick_xml::Error::Io(_))));
        assert_eq!(*titles.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = IngestConfig::builder().row_queue_capacity(0).build();
        assert!(matches!(Pipeline::new(config), Err(IngestError::Config(_))));
    }
}
