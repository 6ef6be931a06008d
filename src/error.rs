//! Custom error types for pubmedkit.
//!
//! This module defines all error types used throughout the pipeline.
//! All functions return `Result<T, PubmedkitError>` instead of using `unwrap()`.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for pubmedkit operations.
///
/// Uses `thiserror` for ergonomic error handling and automatic `Display` implementation.
#[derive(Debug, Error)]
pub enum PubmedkitError {
    /// Batch file missing, unreadable, or not a PubMed article set
    #[error("Extraction error: {0}")]
    Extraction(String),

    /// Invalid filter target, output shape, or pipeline setting
    #[error("Config error: {0}")]
    Config(String),

    /// Malformed input handed to the store
    #[error("Validation error: {0}")]
    Validation(String),

    /// Underlying SQLite failure
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// A single file exceeded its processing budget
    #[error("Timed out after {limit:?} processing {}", .path.display())]
    Timeout {
        /// Batch file that was abandoned
        path: PathBuf,
        /// Budget the file exceeded
        limit: Duration,
    },

    /// Worker task panicked or was cancelled
    #[error("Worker error: {0}")]
    Worker(String),

    /// Network/HTTP request error
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// External API returned an error
    #[error("API error: {code} - {message}")]
    Api {
        /// Error code from API
        code: i32,
        /// Error message from API
        message: String,
    },

    /// Response or artifact parsing error
    #[error("Parse error: {0}")]
    Parse(String),

    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV read/write error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Result type alias using `PubmedkitError`
pub type Result<T> = std::result::Result<T, PubmedkitError>;

/// Extension trait for adding context to Option types
pub trait OptionExt<T> {
    /// Convert Option to Result with a parse error message
    fn ok_or_parse(self, msg: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_parse(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| PubmedkitError::Parse(msg.to_string()))
    }
}
