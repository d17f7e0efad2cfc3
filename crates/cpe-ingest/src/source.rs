//! Source acquisition
//!
//! Gets the dictionary onto local disk as plain XML. Downloads and
//! decompressed copies live in a scratch directory that is removed when the
//! [`PreparedSource`] is dropped, whether the load succeeded or not.

use flate2::read::GzDecoder;
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};

use crate::error::{IngestError, Result};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const COMPRESSED_NAME: &str = "official-cpe-dictionary_v2.3.xml.gz";
const DOCUMENT_NAME: &str = "official-cpe-dictionary_v2.3.xml";

/// Where the dictionary comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
    /// Fetch from a URL; the body may be gzip-compressed
    Download { url: String },
    /// Read a local file, gzip-compressed or plain XML
    Local(PathBuf),
}

/// A plain XML document ready for [`crate::stream::RecordStream`]
#[derive(Debug)]
pub struct PreparedSource {
    path: PathBuf,
    // Held only for its Drop
    _workdir: Option<TempDir>,
}

impl PreparedSource {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Download and/or decompress `source` into a readable XML file
pub async fn prepare_source(source: &SourceSpec) -> Result<PreparedSource> {
    match source {
        SourceSpec::Download { url } => {
            let workdir = scratch_dir()?;
            let compressed = workdir.path().join(COMPRESSED_NAME);
            download_file(url, &compressed).await?;

            let path = if is_gzip(&compressed)? {
                let document = workdir.path().join(DOCUMENT_NAME);
                decompress(&compressed, &document).await?;
                tokio::fs::remove_file(&compressed).await?;
                document
            } else {
                compressed
            };

            Ok(PreparedSource {
                path,
                _workdir: Some(workdir),
            })
        },
        SourceSpec::Local(path) => {
            let gzipped = is_gzip(path).map_err(|e| match e {
                IngestError::Io(source) => IngestError::SourceUnavailable {
                    path: path.display().to_string(),
                    source,
                },
                other => other,
            })?;

            if !gzipped {
                debug!(path = %path.display(), "Reading local document in place");
                return Ok(PreparedSource {
                    path: path.clone(),
                    _workdir: None,
                });
            }

            let workdir = scratch_dir()?;
            let document = workdir.path().join(DOCUMENT_NAME);
            decompress(path, &document).await?;
            Ok(PreparedSource {
                path: document,
                _workdir: Some(workdir),
            })
        },
    }
}

fn scratch_dir() -> Result<TempDir> {
    Ok(tempfile::Builder::new().prefix("cpe-dictionary").tempdir()?)
}

/// Stream `url` to `output_path` with a progress bar
async fn download_file(url: &str, output_path: &Path) -> Result<()> {
    info!(url, "Downloading CPE dictionary");

    let client = reqwest::Client::new();
    let response = client.get(url).send().await?.error_for_status()?;

    let total_size = response.content_length().unwrap_or(0);
    let pb = ProgressBar::new(total_size);
    if let Ok(style) = ProgressStyle::default_bar().template(
        "{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({eta})",
    ) {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb.set_message(format!("Downloading {}", COMPRESSED_NAME));

    let mut file = BufWriter::new(File::create(output_path)?);
    let mut downloaded = 0u64;
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk)?;
        downloaded += chunk.len() as u64;
        pb.set_position(downloaded);
    }
    file.flush()?;

    pb.finish_with_message(format!("Downloaded {}", COMPRESSED_NAME));
    info!(bytes = downloaded, "Download complete");
    Ok(())
}

fn is_gzip(path: &Path) -> Result<bool> {
    let mut magic = [0u8; 2];
    let mut file = File::open(path)?;
    let read = file.read(&mut magic)?;
    Ok(read == magic.len() && magic == GZIP_MAGIC)
}

/// Gunzip `input` into `output` on the blocking pool
async fn decompress(input: &Path, output: &Path) -> Result<()> {
    let input = input.to_path_buf();
    let output = output.to_path_buf();

    let bytes = tokio::task::spawn_blocking(move || -> Result<u64> {
        let mut decoder = GzDecoder::new(BufReader::new(File::open(&input)?));
        let mut writer = BufWriter::new(File::create(&output)?);
        let bytes = std::io::copy(&mut decoder, &mut writer)?;
        writer.flush()?;
        Ok(bytes)
    })
    .await??;

    info!(bytes, "Decompressed source document");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;

    const XML: &str = "<cpe-list></cpe-list>";

    fn gzip(bytes: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(bytes).unwrap();
        encoder.finish().unwrap()
    }

    #[tokio::test]
    async fn test_plain_local_file_is_read_in_place() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dict.xml");
        std::fs::write(&path, XML).unwrap();

        let prepared = prepare_source(&SourceSpec::Local(path.clone())).await.unwrap();
        assert_eq!(prepared.path(), path.as_path());
    }

    #[tokio::test]
    async fn test_gzipped_local_file_is_decompressed_into_scratch_dir() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dict.xml.gz");
        std::fs::write(&path, gzip(XML.as_bytes())).unwrap();

        let prepared = prepare_source(&SourceSpec::Local(path)).await.unwrap();
        let scratch = prepared.path().to_path_buf();
        assert_eq!(std::fs::read_to_string(&scratch).unwrap(), XML);

        drop(prepared);
        assert!(!scratch.exists());
    }

    #[tokio::test]
    async fn test_missing_local_file_is_source_unavailable() {
        let err = prepare_source(&SourceSpec::Local(PathBuf::from("/nonexistent/dict.xml")))
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::SourceUnavailable { .. }));
    }

    #[test]
    fn test_is_gzip_on_short_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tiny");
        std::fs::write(&path, [0x1f]).unwrap();
        assert!(!is_gzip(&path).unwrap());
    }
}
