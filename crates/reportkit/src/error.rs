//! Error types for log processing and report rendering.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Log file could not be read
    #[error("failed to read log {path}: {source}")]
    LogRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Outcome record could not be decoded
    #[error("invalid outcome record {path}: {source}")]
    Outcome {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Template file could not be read
    #[error("failed to read template {path}: {source}")]
    Template {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Report could not be written inside the session
    #[error("failed to write report {path}: {source}")]
    ReportWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Report could not be copied to, or verified at, its destination
    #[error("failed to export report to {destination}: {message}")]
    ReportCopy {
        destination: PathBuf,
        message: String,
    },

    /// Session path error
    #[error(transparent)]
    Session(#[from] session::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
