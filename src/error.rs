use std::path::PathBuf;

use thiserror::Error;

/// Main error type for Tabsentry operations
#[derive(Error, Debug)]
pub enum TabsentryError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Corrupt archive {path}: {message}")]
    CorruptArchive { path: PathBuf, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Missing {marker} in {path}")]
    MetadataMissing { path: PathBuf, marker: &'static str },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected server response: {0}")]
    Server(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TabsentryError {
    /// True for failures that exclude one snapshot instead of aborting a cycle.
    pub fn is_metadata_missing(&self) -> bool {
        matches!(self, TabsentryError::MetadataMissing { .. })
    }
}

pub type Result<T> = std::result::Result<T, TabsentryError>;
