//! Error types for extraction, monitoring and setup.
//!
//! I/O, Arrow and Parquet errors bubble up unchanged through `#[from]`.
//! Reader implementations that wrap a foreign error use [`ExtractError::read`].

use std::path::PathBuf;

use thiserror::Error;

use crate::config::FileType;

pub type Result<T> = std::result::Result<T, ExtractError>;

#[derive(Debug, Error)]
pub enum ExtractError {
    /// `validate_source` rejected the path. Never retried.
    #[error("Invalid source: {}", path.display())]
    InvalidSource { path: PathBuf },

    #[error("Unsupported file type: {}", path.display())]
    UnsupportedFileType { path: PathBuf },

    #[error("No extractor registered for file type '{file_type}'")]
    NoExtractor { file_type: FileType },

    #[error("Read error: {message}")]
    Read {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("Metrics file error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Logging setup error: {0}")]
    Logging(String),
}

impl ExtractError {
    /// Reader failure without an underlying cause.
    pub fn read(message: impl Into<String>) -> Self {
        Self::Read {
            message: message.into(),
            source: None,
        }
    }

    /// Reader failure wrapping the error that caused it.
    pub fn read_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Read {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}
