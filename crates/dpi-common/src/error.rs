//! Error types for the document pipeline ingest stage

use thiserror::Error;

/// Result type alias for ingest operations
pub type Result<T> = std::result::Result<T, IngestError>;

/// Main error type for the ingest stage
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Download failed for '{url}': {message}")]
    Download { url: String, message: String },

    #[error("Object store error: {0}")]
    Storage(String),

    #[error("Content type '{0}' is not supported for caching")]
    UnsupportedContentType(String),

    #[error("Update field '{0}' is not supported")]
    UnsupportedUpdateField(String),

    #[error("Render error: {0}")]
    Render(String),
}
