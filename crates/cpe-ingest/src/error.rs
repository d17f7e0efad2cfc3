//! Error types for CPE dictionary ingestion

use cpe_common::{CommonError, CpeError};

/// Result type for ingestion operations
pub type Result<T> = std::result::Result<T, IngestError>;

/// Error types for ingestion
///
/// Which of these abort a run is decided by the caller. The reader skips
/// records that fail with [`IngestError::Structure`], the normalizer drops
/// undecodable identifiers, and everything else stops the load.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Download error: {0}")]
    Download(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to open source document {path}: {source}")]
    SourceUnavailable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("Malformed record: {0}")]
    Structure(String),

    #[error("Invalid identifier: {0}")]
    Identifier(#[from] CpeError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("DuckDB error: {0}")]
    DuckDb(#[from] duckdb::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Pipeline stage failed: {0}")]
    Stage(String),
}

impl From<CommonError> for IngestError {
    fn from(err: CommonError) -> Self {
        match err {
            CommonError::Serialization(e) => IngestError::Serialization(e),
        }
    }
}

impl From<quick_xml::events::attributes::AttrError> for IngestError {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        IngestError::Xml(err.into())
    }
}

impl From<tokio::task::JoinError> for IngestError {
    fn from(err: tokio::task::JoinError) -> Self {
        IngestError::Stage(err.to_string())
    }
}
