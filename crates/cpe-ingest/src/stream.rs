//! Streaming reader for the CPE dictionary XML
//!
//! The dictionary is hundreds of megabytes, so it is never loaded whole.
//! [`RecordStream`] walks the document once with a `quick-xml` pull parser
//! and yields one [`RawRecord`] per `<cpe-item>`:
//!
//! ```xml
//! <cpe-item name="cpe:/a:acme:widget:1.0">
//!   <title xml:lang="en-US">Acme Widget 1.0</title>
//!   <references>
//!     <reference href="https://acme.example">Vendor</reference>
//!   </references>
//!   <cpe-23:cpe23-item name="cpe:2.3:a:acme:widget:1.0:*:*:*:*:*:*:*"/>
//! </cpe-item>
//! ```
//!
//! Records with a broken structure are logged and skipped. Failing to read
//! the document itself ends the stream with an error.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use cpe_common::Reference;

use crate::error::{IngestError, Result};

const ITEM_TAG: &[u8] = b"cpe-item";
const TITLE_TAG: &[u8] = b"title";
const REFERENCE_TAG: &[u8] = b"reference";
const CPE23_TAG: &[u8] = b"cpe23-item";

const READ_BUFFER_BYTES: usize = 64 * 1024;

/// One `<cpe-item>` as found in the document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub title: String,
    /// (kind, link) pairs in document order
    pub references: Vec<Reference>,
    /// CPE 2.3 formatted string from the `cpe23-item` extension
    pub cpe23_name: String,
}

/// Counts reported when a stream finishes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamSummary {
    pub emitted: u64,
    pub skipped: u64,
}

/// Lazy, single-pass sequence of [`RawRecord`]s
pub struct RecordStream<R: BufRead> {
    reader: Reader<R>,
    buf: Vec<u8>,
    item_buf: Vec<u8>,
    summary: StreamSummary,
    failure: Option<IngestError>,
    finished: bool,
}

impl RecordStream<BufReader<File>> {
    /// Open a dictionary file; failure here is fatal for the run
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| IngestError::SourceUnavailable {
            path: path.display().to_string(),
            source,
        })?;
        debug!(path = %path.display(), "Opened source document");
        Ok(Self::from_reader(BufReader::with_capacity(READ_BUFFER_BYTES, file)))
    }
}

impl<R: BufRead> RecordStream<R> {
    pub fn from_reader(inner: R) -> Self {
        let reader = Reader::from_reader(inner);

        Self {
            reader,
            buf: Vec::new(),
            item_buf: Vec::new(),
            summary: StreamSummary::default(),
            failure: None,
            finished: false,
        }
    }

    pub fn summary(&self) -> StreamSummary {
        self.summary
    }

    /// Consume the stream, returning its counts or the error that ended it
    pub fn finish(self) -> Result<StreamSummary> {
        match self.failure {
            Some(err) => Err(err),
            None => Ok(self.summary),
        }
    }

    fn next_record(&mut self) -> Option<RawRecord> {
        loop {
            self.buf.clear();
            let position = self.reader.buffer_position();

            let at_item = match self.reader.read_event_into(&mut self.buf) {
                Ok(Event::Start(e)) => e.local_name().as_ref() == ITEM_TAG,
                Ok(Event::Empty(e)) => {
                    if e.local_name().as_ref() == ITEM_TAG {
                        self.summary.skipped += 1;
                        warn!(position, "Skipping empty cpe-item");
                    }
                    false
                },
                Ok(Event::Eof) => {
                    self.finished = true;
                    return None;
                },
                Ok(_) => false,
                Err(err) => {
                    self.on_reader_error(position, err);
                    if self.finished {
                        return None;
                    }
                    false
                },
            };

            if !at_item {
                continue;
            }

            match self.read_item() {
                Ok(record) => {
                    self.summary.emitted += 1;
                    return Some(record);
                },
                Err(IngestError::Xml(err @ quick_xml::Error::Io(_))) => {
                    error!(position, error = %err, "Source document is unreadable, stopping");
                    self.failure = Some(IngestError::Xml(err));
                    self.finished = true;
                    return None;
                },
                Err(err) => {
                    self.summary.skipped += 1;
                    warn!(position, error = %err, "Skipping malformed cpe-item");
                },
            }
        }
    }

    /// Errors between records. I/O failures and errors that leave the reader
    /// where it was end the stream; anything else is stepped over.
    fn on_reader_error(&mut self, position: u64, err: quick_xml::Error) {
        let stalled = self.reader.buffer_position() == position;
        if stalled || matches!(err, quick_xml::Error::Io(_)) {
            error!(position, error = %err, "Source document is unreadable, stopping");
            self.failure = Some(err.into());
            self.finished = true;
        } else {
            warn!(position, error = %err, "Skipping malformed markup");
        }
    }

    /// Read the body of a `<cpe-item>` up to its closing tag
    fn read_item(&mut self) -> Result<RawRecord> {
        let mut title: Option<String> = None;
        let mut references = Vec::new();
        let mut names: Vec<String> = Vec::new();
        let mut open: Option<OpenField> = None;
        let mut text = String::new();

        loop {
            self.item_buf.clear();
            match self.reader.read_event_into(&mut self.item_buf)? {
                Event::Start(e) => match e.local_name().as_ref() {
                    TITLE_TAG => {
                        open = Some(OpenField::Title);
                        text.clear();
                    },
                    REFERENCE_TAG => {
                        open = Some(OpenField::Reference(attribute(&e, b"href")?.unwrap_or_default()));
                        text.clear();
                    },
                    CPE23_TAG => names.push(cpe23_name(&e)?),
                    _ => {},
                },
                Event::Empty(e) => match e.local_name().as_ref() {
                    CPE23_TAG => names.push(cpe23_name(&e)?),
                    REFERENCE_TAG => references.push(Reference::new(
                        String::new(),
                        attribute(&e, b"href")?.unwrap_or_default(),
                    )),
                    _ => {},
                },
                Event::Text(t) if open.is_some() => text.push_str(&t.unescape()?),
                Event::CData(c) if open.is_some() => text.push_str(&String::from_utf8_lossy(&c)),
                Event::End(e) => match e.local_name().as_ref() {
                    TITLE_TAG => {
                        if let Some(OpenField::Title) = open.take() {
                            title.get_or_insert_with(|| text.clone());
                        }
                    },
                    REFERENCE_TAG => {
                        if let Some(OpenField::Reference(href)) = open.take() {
                            references.push(Reference::new(text.as_str(), href));
                        }
                    },
                    ITEM_TAG => break,
                    _ => {},
                },
                Event::Eof => {
                    return Err(IngestError::Structure(
                        "document ended inside cpe-item".to_string(),
                    ))
                },
                _ => {},
            }
        }

        let cpe23_name = match names.len() {
            1 => names.remove(0),
            0 => return Err(IngestError::Structure("missing cpe23-item".to_string())),
            n => {
                return Err(IngestError::Structure(format!(
                    "expected one cpe23-item, found {}",
                    n
                )))
            },
        };

        Ok(RawRecord {
            title: title.unwrap_or_default(),
            references,
            cpe23_name,
        })
    }
}

impl<R: BufRead> Iterator for RecordStream<R> {
    type Item = RawRecord;

    fn next(&mut self) -> Option<RawRecord> {
        if self.finished {
            return None;
        }
        self.next_record()
    }
}

impl<R: BufRead + Send + 'static> RecordStream<R> {
    /// Run the reader on a blocking thread, pushing records into a bounded
    /// queue. The thread blocks while the queue is full and stops early if
    /// the receiving side is dropped.
    pub fn spawn(self, capacity: usize) -> (mpsc::Receiver<RawRecord>, JoinHandle<Result<StreamSummary>>) {
        let (tx, rx) = mpsc::channel(capacity);

        let handle = tokio::task::spawn_blocking(move || {
            let mut stream = self;
            for record in stream.by_ref() {
                if tx.blocking_send(record).is_err() {
                    debug!("Record queue closed, stopping reader");
                    break;
                }
            }

            let summary = stream.summary();
            info!(
                records = summary.emitted,
                skipped = summary.skipped,
                "Finished reading source document"
            );
            stream.finish()
        });

        (rx, handle)
    }
}

enum OpenField {
    Title,
    Reference(String),
}

fn attribute(e: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>> {
    match e.try_get_attribute(key)? {
        Some(attr) => Ok(Some(attr.unescape_value()?.into_owned())),
        None => Ok(None),
    }
}

fn cpe23_name(e: &BytesStart<'_>) -> Result<String> {
    attribute(e, b"name")?
        .filter(|name| !name.is_empty())
        .ok_or_else(|| IngestError::Structure("cpe23-item without a name".to_string()))
}


/// Serves a fixed document, fails one read with an I/O error, then reports
/// end of file
#[cfg(test)]
pub(crate) struct FailingReader {
    data: std::io::Cursor<Vec<u8>>,
    failed: bool,
}

#[cfg(test)]
impl FailingReader {
    pub(crate) fn new(document: &str) -> Self {
        Self {
            data: std::io::Cursor::new(document.as_bytes().to_vec()),
            failed: false,
        }
    }
}

#[cfg(test)]
impl std::io::Read for FailingReader {
    fn read(&mut self, out: &mut [u8]) -> std::io::Result<usize> {
        let available = self.fill_buf()?;
        let n = available.len().min(out.len());
        out[..n].copy_from_slice(&available[..n]);
        self.consume(n);
        Ok(n)
    }
}

#[cfg(test)]
impl BufRead for FailingReader {
    fn fill_buf(&mut self) -> std::io::Result<&[u8]> {
        if (self.data.position() as usize) < self.data.get_ref().len() {
            return self.data.fill_buf();
        }
        if !self.failed {
            self.failed = true;
            return Err(std::io::Error::new(std::io::ErrorKind::Other, "disk went away"));
        }
        Ok(&[])
    }

    fn consume(&mut self, amt: usize) {
        self.data.consume(amt);
    }
}
