//! Error types for session and logging operations.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while managing a session.
#[derive(Debug, Error)]
pub enum Error {
    /// The session root (or one of its category directories) could not be created.
    ///
    /// This is fatal for a run: no phase may start without a session.
    #[error("failed to create session directory {}: {source}", .path.display())]
    SessionCreate {
        /// Directory that could not be created
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The session root already exists (identifier collision).
    #[error("session root already exists: {}", .0.display())]
    SessionCollision(PathBuf),

    /// Category is not one of data, logs, reports, temp, inventory
    #[error("invalid session path category: '{0}'")]
    InvalidCategory(String),

    /// Name is absolute or escapes its category directory
    #[error("invalid session path name: '{0}'")]
    InvalidName(String),

    /// A log sink could not be opened or written
    #[error("log sink {} unavailable: {source}", .path.display())]
    LogSink {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for session operations.
pub type Result<T> = std::result::Result<T, Error>;
