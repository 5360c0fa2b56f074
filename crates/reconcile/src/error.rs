//! Error types for audit, diff, and apply.
//!
//! Each stage has its own type because each is recovered differently:
//! an [`AuditError`] skips the component, a [`DiffError`] is treated as an
//! empty diff, and an [`ApplyItemError`] only counts against one item.

use crate::types::StrategyKind;
use session::Component;
use thiserror::Error;

/// A configuration value had the wrong shape
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("config key '{key}' must be {expected}")]
pub struct ConfigValueError {
    pub key: String,
    pub expected: &'static str,
}

/// Failure of a read-only audit
#[derive(Debug, Error)]
pub enum AuditError {
    /// Unit could not inspect the system
    #[error("{component} audit failed: {message}")]
    Failed {
        component: Component,
        message: String,
    },

    /// Unit did not finish within its time budget
    #[error("{component} audit timed out after {seconds}s")]
    TimedOut { component: Component, seconds: u64 },

    /// Unit panicked or its worker disappeared
    #[error("{component} audit aborted: {message}")]
    Aborted {
        component: Component,
        message: String,
    },

    /// Unit is missing required configuration
    #[error("{component} audit is not configured: {message}")]
    NotConfigured {
        component: Component,
        message: String,
    },

    /// Invalid configuration value
    #[error(transparent)]
    Config(#[from] ConfigValueError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure while computing a diff
#[derive(Debug, Error)]
pub enum DiffError {
    /// A wildcard pattern could not be compiled
    #[error("invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// A subject's observed state cannot be evaluated by the strategy
    #[error("subject '{key}' is {state}, which the {strategy} strategy cannot evaluate")]
    StateMismatch {
        key: String,
        strategy: StrategyKind,
        state: &'static str,
    },

    /// Policy values are out of range or inconsistent
    #[error("invalid {strategy} policy: {message}")]
    InvalidPolicy {
        strategy: StrategyKind,
        message: String,
    },

    /// Invalid configuration value
    #[error(transparent)]
    Config(#[from] ConfigValueError),
}

/// Failure applying one diff item
#[derive(Debug, Error)]
pub enum ApplyItemError {
    /// The change was attempted and failed
    #[error("failed to apply '{key}': {message}")]
    Failed { key: String, message: String },

    /// An external command returned non-zero
    #[error("command failed for '{key}': {message}")]
    Command {
        key: String,
        message: String,
        stderr: String,
    },

    /// The unit cannot perform this action
    #[error("'{key}': {action} is not supported by this unit")]
    Unsupported { key: String, action: &'static str },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
