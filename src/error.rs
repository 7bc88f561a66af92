//! Error types for biwatch
//!
//! This module defines the crate-level error type, using `thiserror` for
//! ergonomic error handling. Errors raised by the monitored sources live in
//! [`crate::source::SourceError`] so the poller can classify them.

use thiserror::Error;

/// Main error type for biwatch operations
///
/// Only configuration problems are fatal to the process. Everything else is
/// logged by the poller and the daemon keeps running.
#[derive(Error, Debug)]
pub enum BiwatchError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Required credentials are missing from config and environment
    #[error("Missing credentials: {0}")]
    MissingCredentials(String),

    /// The state file could not be written
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type alias for biwatch operations
///
/// Uses `anyhow::Error` so call sites can attach context while still
/// allowing callers to downcast to [`BiwatchError`].
pub type Result<T> = anyhow::Result<T>;
