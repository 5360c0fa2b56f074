//! Error types for restore protection.
//!
//! None of these abort a maintenance run; they end the safety net in the
//! `Failed` state and the checkpoint is skipped.

use thiserror::Error;

/// Errors that can occur while securing a restore checkpoint.
#[derive(Debug, Error)]
pub enum Error {
    /// Could not read the current shadow storage allocation
    #[error("could not query restore storage on {drive}: {message}")]
    Query { drive: String, message: String },

    /// Could not raise the allocation to the required minimum
    #[error("could not allocate {requested} bytes of restore storage on {drive}: {message}")]
    Allocation {
        drive: String,
        requested: u64,
        message: String,
    },

    /// Allocation was accepted but re-verification still reports too little
    #[error("restore storage on {drive} is {actual} bytes after resize, expected at least {required}")]
    Unverified {
        drive: String,
        actual: u64,
        required: u64,
    },

    /// Checkpoint creation failed
    #[error("could not create restore checkpoint: {message}")]
    Checkpoint { message: String },

    /// Restore points are not available on this platform
    #[error("restore checkpoints are not supported: {0}")]
    Unsupported(String),

    /// Command execution failed
    #[error("command failed: {message}")]
    Command {
        /// Description of what command failed
        message: String,
        /// Standard error output from the failed command
        stderr: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the failure looks like missing privileges
    pub fn is_permission(&self) -> bool {
        let text = match self {
            Error::Query { message, .. }
            | Error::Allocation { message, .. }
            | Error::Checkpoint { message } => message.as_str(),
            Error::Command { stderr, .. } => stderr.as_str(),
            Error::Io(e) => return e.kind() == std::io::ErrorKind::PermissionDenied,
            _ => return false,
        };
        let lower = text.to_lowercase();
        lower.contains("access is denied")
            || lower.contains("permission denied")
            || lower.contains("administrator")
    }
}

/// Result type for restore operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_detection() {
        let err = Error::Allocation {
            drive: "C:".into(),
            requested: 10,
            message: "Error: Access is denied.".into(),
        };
        assert!(err.is_permission());

        let err = Error::Query {
            drive: "C:".into(),
            message: "No items found that satisfy the query.".into(),
        };
        assert!(!err.is_permission());
    }
}
