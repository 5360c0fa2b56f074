//! # reportkit
//!
//! Turns a finished session into something a human can read.
//!
//! - [`LogProcessor`] aggregates the consolidated log and the execution
//!   outcomes into [`Metrics`]
//! - [`ReportRenderer`] fills a `{{placeholder}}` template, writes it under
//!   the session's `reports/` and exports a verified copy

pub mod error;
pub mod processor;
pub mod render;

pub use error::{Error, Result};
pub use processor::{
    ComponentHealth, ErrorRecord, HealthStatus, LogProcessor, Metrics, read_outcomes, write_outcome,
};
pub use render::{AuditSummary, DEFAULT_TEMPLATE, PublishOutcome, ReportData, ReportRenderer};
