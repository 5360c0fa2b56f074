//! Log processor - aggregates the consolidated log and execution outcomes
//!
//! Parsing is line-oriented and forgiving: empty lines are ignored and a
//! line that does not decode is counted, reported once as a WARNING, and
//! skipped.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use reconcile::ExecutionOutcome;
use serde::{Deserialize, Serialize};
use session::{Category, Component, Level, LogEntry, Logger, Session};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Overall health of one component
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// No errors, every item applied
    Healthy,
    /// Some errors or failed items, but progress was made
    Degraded,
    /// Nothing succeeded
    Failing,
}

impl HealthStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Failing => "failing",
        }
    }
}

/// Per-component health indicator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub component: Component,
    pub entries: usize,
    pub warnings: usize,
    pub errors: usize,
    pub items_processed: usize,
    pub items_failed: usize,
    /// processed / (processed + failed); 1.0 when nothing was attempted
    pub success_ratio: f64,
    pub status: HealthStatus,
}

impl ComponentHealth {
    fn new(component: Component) -> Self {
        Self {
            component,
            entries: 0,
            warnings: 0,
            errors: 0,
            items_processed: 0,
            items_failed: 0,
            success_ratio: 1.0,
            status: HealthStatus::Healthy,
        }
    }

    fn finalize(&mut self, outcome: Option<&ExecutionOutcome>) {
        let attempted = self.items_processed + self.items_failed;
        if attempted > 0 {
            self.success_ratio = self.items_processed as f64 / attempted as f64;
        }
        let failed_outcome = outcome.is_some_and(|o| !o.success);
        self.status = if failed_outcome && self.items_processed == 0 {
            HealthStatus::Failing
        } else if failed_outcome || self.errors > 0 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };
    }
}

/// One ERROR or FATAL entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub timestamp: DateTime<Utc>,
    pub level: Level,
    pub component: Component,
    pub message: String,
    /// 1-based line number in the log
    pub line: usize,
}

/// Aggregate produced from one log and its outcomes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub log_path: PathBuf,
    pub total_entries: usize,
    pub level_counts: BTreeMap<Level, usize>,
    pub components: BTreeMap<Component, ComponentHealth>,
    /// ERROR/FATAL entries ordered by timestamp
    pub errors: Vec<ErrorRecord>,
    /// 1-based line numbers that could not be decoded
    pub malformed_lines: Vec<usize>,
    pub first_entry: Option<DateTime<Utc>>,
    pub last_entry: Option<DateTime<Utc>>,
}

impl Metrics {
    pub fn count(&self, level: Level) -> usize {
        self.level_counts.get(&level).copied().unwrap_or(0)
    }

    pub fn health(&self, component: Component) -> Option<&ComponentHealth> {
        self.components.get(&component)
    }

    /// Errors attributed to `component`
    pub fn errors_for(&self, component: Component) -> usize {
        self.health(component).map_or(0, |h| h.errors)
    }

    pub fn error_count(&self) -> usize {
        self.errors.len()
    }
}

/// Reads a consolidated log and summarizes it
#[derive(Debug, Default)]
pub struct LogProcessor {
    logger: Option<Arc<Logger>>,
}

impl LogProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report malformed lines through a structured logger instead of `log`
    pub fn with_logger(mut self, logger: Arc<Logger>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Process a log file.
    ///
    /// Only failing to read the file is an error; bad lines never are.
    pub fn process(&self, log_path: &Path, outcomes: &[ExecutionOutcome]) -> Result<Metrics> {
        let contents = fs::read_to_string(log_path).map_err(|source| Error::LogRead {
            path: log_path.to_path_buf(),
            source,
        })?;
        let mut metrics = self.process_str(&contents, outcomes);
        metrics.log_path = log_path.to_path_buf();
        Ok(metrics)
    }

    /// Process log contents already in memory
    pub fn process_str(&self, contents: &str, outcomes: &[ExecutionOutcome]) -> Metrics {
        let mut metrics = Metrics::default();

        for (index, line) in contents.lines().enumerate() {
            let number = index + 1;
            if line.trim().is_empty() {
                continue;
            }
            let entry = match LogEntry::parse_line(line) {
                Ok(entry) => entry,
                Err(e) => {
                    metrics.malformed_lines.push(number);
                    self.warn(format!("Skipping malformed log line {number}: {e}"));
                    continue;
                }
            };
            record(&mut metrics, entry, number);
        }

        for outcome in outcomes {
            let health = metrics
                .components
                .entry(outcome.component)
                .or_insert_with(|| ComponentHealth::new(outcome.component));
            health.items_processed += outcome.items_processed;
            health.items_failed += outcome.items_failed;
        }
        for (component, health) in &mut metrics.components {
            let outcome = outcomes.iter().find(|o| o.component == *component);
            health.finalize(outcome);
        }

        // Stable sort keeps write order for identical timestamps
        metrics.errors.sort_by_key(|e| e.timestamp);
        metrics
    }

    fn warn(&self, message: String) {
        match &self.logger {
            Some(logger) => logger.warning(Component::LogProcessor, message),
            None => log::warn!("{message}"),
        }
    }
}

fn record(metrics: &mut Metrics, entry: LogEntry, line: usize) {
    metrics.total_entries += 1;
    *metrics.level_counts.entry(entry.level).or_insert(0) += 1;

    metrics.first_entry = Some(match metrics.first_entry {
        Some(first) => first.min(entry.timestamp),
        None => entry.timestamp,
    });
    metrics.last_entry = Some(match metrics.last_entry {
        Some(last) => last.max(entry.timestamp),
        None => entry.timestamp,
    });

    let health = metrics
        .components
        .entry(entry.component)
        .or_insert_with(|| ComponentHealth::new(entry.component));
    health.entries += 1;
    match entry.level {
        Level::Warning => health.warnings += 1,
        Level::Error | Level::Fatal => health.errors += 1,
        _ => {}
    }

    if entry.level.is_error() {
        metrics.errors.push(ErrorRecord {
            timestamp: entry.timestamp,
            level: entry.level,
            component: entry.component,
            message: entry.message,
            line,
        });
    }
}

/// Persist an outcome as `logs/<unit>/outcome.json`
pub fn write_outcome(session: &Session, outcome: &ExecutionOutcome) -> Result<PathBuf> {
    let path = session.path(Category::Logs, &format!("{}/outcome.json", outcome.component.slug()))?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, serde_json::to_string_pretty(outcome)?)?;
    Ok(path)
}

/// Load every persisted outcome, in unit order
pub fn read_outcomes(session: &Session) -> Result<Vec<ExecutionOutcome>> {
    let mut outcomes = Vec::new();
    for component in Component::UNITS {
        let path = session.path(Category::Logs, &format!("{}/outcome.json", component.slug()))?;
        if !path.exists() {
            continue;
        }
        let contents = fs::read_to_string(&path)?;
        let outcome = serde_json::from_str(&contents).map_err(|source| Error::Outcome {
            path: path.clone(),
            source,
        })?;
        outcomes.push(outcome);
    }
    Ok(outcomes)
}
