//! Custom error types for rustexperts.
//!
//! Every fallible library function returns `Result<T, ExpertsError>`.
//! Stage-local failures (a fetch that hits a non-success status, a classifier
//! call that fails) are turned into status values by the pipeline; the errors
//! here are what is left when a durable file cannot be read or written.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for rustexperts operations.
#[derive(Debug, Error)]
pub enum ExpertsError {
    /// Network/HTTP request error
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Remote API answered with a non-success status
    #[error("API error: {code} - {message}")]
    Api {
        /// HTTP status code
        code: u16,
        /// Response body or description
        message: String,
    },

    /// Malformed payload that could not be defaulted
    #[error("Parse error: {0}")]
    Parse(String),

    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV table read/write error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Configuration error
    #[error("Config error: {0}")]
    Config(String),

    /// External classifier failed or returned unusable output
    #[error("Classifier error: {0}")]
    Classifier(String),

    /// Another run holds the data directory lock
    #[error("Data directory is locked by another run: {}", .0.display())]
    Locked(PathBuf),
}

/// Result type alias using `ExpertsError`
pub type Result<T> = std::result::Result<T, ExpertsError>;

impl From<tempfile::PersistError> for ExpertsError {
    fn from(e: tempfile::PersistError) -> Self {
        ExpertsError::Io(e.error)
    }
}

impl From<url::ParseError> for ExpertsError {
    fn from(e: url::ParseError) -> Self {
        ExpertsError::Config(format!("Invalid URL: {}", e))
    }
}
