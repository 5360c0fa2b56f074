//! Report renderer - fills a template and exports the artifact
//!
//! Templates use `{{name}}` placeholders. Unknown placeholders are left as
//! they are so that a typo shows up in the artifact instead of vanishing.

use crate::error::{Error, Result};
use crate::processor::{HealthStatus, Metrics};
use chrono::{DateTime, Utc};
use reconcile::ExecutionOutcome;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::json;
use session::{Category, Component, Level, Logger, Session};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

static PLACEHOLDER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([A-Za-z0-9_]+)\s*\}\}").ok());

/// Built-in report layout
pub const DEFAULT_TEMPLATE: &str = "# Maintenance report

- Session: `{{session_id}}`
- Started: {{started_at}}
- Generated: {{generated_at}}
- Mode: {{mode}}
- Overall: **{{overall_status}}**
- Restore: {{restore_status}}

## Inventory

{{audit_summary}}

## Changes

{{outcomes}}

## Health

{{component_health}}

## Log levels

{{level_counts}}

{{total_entries}} entries, {{malformed_lines}} malformed lines skipped.

## Errors

{{error_index}}
";

/// What an audit found, for the report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditSummary {
    pub component: Component,
    pub subjects: usize,
    /// Items in the computed diff; `None` when no diff was computed
    pub diff_items: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Everything a report is built from
#[derive(Debug, Clone)]
pub struct ReportData<'a> {
    pub session_id: &'a str,
    pub started_at: DateTime<Utc>,
    pub dry_run: bool,
    pub metrics: &'a Metrics,
    pub audits: &'a [AuditSummary],
    pub outcomes: &'a [ExecutionOutcome],
    /// Additional placeholders (e.g. `restore_status`)
    pub extra: BTreeMap<String, String>,
}

impl ReportData<'_> {
    fn placeholders(&self) -> BTreeMap<String, String> {
        let mut values = BTreeMap::new();
        let mut put = |key: &str, value: String| {
            values.insert(key.to_string(), value);
        };

        put("session_id", self.session_id.to_string());
        put("started_at", self.started_at.to_rfc3339());
        put("generated_at", Utc::now().to_rfc3339());
        put("mode", if self.dry_run { "dry run" } else { "apply" }.to_string());
        put("overall_status", overall_status(self.outcomes).to_string());
        put("restore_status", "not attempted".to_string());
        put("total_entries", self.metrics.total_entries.to_string());
        put("error_count", self.metrics.error_count().to_string());
        put("warning_count", self.metrics.count(Level::Warning).to_string());
        put("malformed_lines", self.metrics.malformed_lines.len().to_string());
        put("level_counts", level_table(self.metrics));
        put("component_health", health_table(self.metrics));
        put("audit_summary", audit_table(self.audits));
        put("outcomes", outcome_table(self.outcomes));
        put("error_index", error_list(self.metrics));

        for (key, value) in &self.extra {
            values.insert(key.clone(), value.clone());
        }
        values
    }
}

/// Result of [`ReportRenderer::publish`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishOutcome {
    /// Artifact inside the session's `reports/`
    pub artifact: PathBuf,
    /// Verified copy at the destination
    pub exported: Option<PathBuf>,
    /// Export failure, if any
    pub error: Option<String>,
}

/// Renders reports from a template
#[derive(Debug, Clone)]
pub struct ReportRenderer {
    template: String,
    file_name: String,
}

impl Default for ReportRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportRenderer {
    /// Renderer using the built-in template
    pub fn new() -> Self {
        Self::with_template(DEFAULT_TEMPLATE)
    }

    pub fn with_template(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            file_name: "maintenance-report.md".to_string(),
        }
    }

    /// Renderer using a template file; the artifact keeps its extension
    pub fn from_template_file(path: &Path) -> Result<Self> {
        let template = fs::read_to_string(path).map_err(|source| Error::Template {
            path: path.to_path_buf(),
            source,
        })?;
        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("md");
        Ok(Self::with_template(template).with_file_name(format!("maintenance-report.{extension}")))
    }

    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = file_name.into();
        self
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Substitute placeholders
    pub fn render(&self, data: &ReportData<'_>) -> String {
        let values = data.placeholders();
        let Some(re) = PLACEHOLDER.as_ref() else {
            return self.template.clone();
        };
        re.replace_all(&self.template, |caps: &Captures<'_>| {
            values
                .get(&caps[1])
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
    }

    /// Render into `reports/<file_name>` inside the session
    pub fn write(&self, session: &Session, data: &ReportData<'_>) -> Result<PathBuf> {
        let path = session.path(Category::Reports, &self.file_name)?;
        fs::write(&path, self.render(data)).map_err(|source| Error::ReportWrite {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }

    /// Copy an artifact into `destination` and verify the copy.
    ///
    /// The copy is named after the session so repeated runs never overwrite
    /// each other's reports.
    pub fn export(&self, artifact: &Path, destination: &Path, session_id: &str) -> Result<PathBuf> {
        let copy_error = |message: String| Error::ReportCopy {
            destination: destination.to_path_buf(),
            message,
        };

        let expected = fs::metadata(artifact)
            .map_err(|e| copy_error(format!("report artifact unreadable: {e}")))?
            .len();
        fs::create_dir_all(destination).map_err(|e| copy_error(e.to_string()))?;
        let target = destination.join(export_name(&self.file_name, session_id));
        let copied = fs::copy(artifact, &target).map_err(|e| copy_error(e.to_string()))?;

        let actual = fs::metadata(&target)
            .map_err(|e| copy_error(format!("copy not found after export: {e}")))?
            .len();
        if actual != expected || copied != expected {
            return Err(copy_error(format!(
                "size mismatch after copy ({actual} bytes, expected {expected})"
            )));
        }
        Ok(target)
    }

    /// Write the artifact and export it when a destination is given.
    ///
    /// Marks the session's report as exported only after the copy verified.
    /// An export failure is logged as WARNING and leaves the artifact in
    /// place.
    pub fn publish(
        &self,
        session: &Session,
        data: &ReportData<'_>,
        destination: Option<&Path>,
        logger: &Logger,
    ) -> Result<PublishOutcome> {
        let artifact = self.write(session, data)?;
        logger.log_data(
            Level::Info,
            Component::Report,
            "Report written",
            &json!({ "path": artifact }),
        );

        let Some(destination) = destination else {
            return Ok(PublishOutcome {
                artifact,
                exported: None,
                error: None,
            });
        };

        match self.export(&artifact, destination, session.id()) {
            Ok(exported) => {
                session.mark_report_exported();
                logger.log_data(
                    Level::Success,
                    Component::Report,
                    "Report exported",
                    &json!({ "path": exported }),
                );
                Ok(PublishOutcome {
                    artifact,
                    exported: Some(exported),
                    error: None,
                })
            }
            Err(e) => {
                logger.warning(
                    Component::Report,
                    format!("{e}; report kept at {}", artifact.display()),
                );
                Ok(PublishOutcome {
                    artifact,
                    exported: None,
                    error: Some(e.to_string()),
                })
            }
        }
    }
}

fn export_name(file_name: &str, session_id: &str) -> String {
    let path = Path::new(file_name);
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("report");
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{stem}-{session_id}.{ext}"),
        None => format!("{stem}-{session_id}"),
    }
}

fn overall_status(outcomes: &[ExecutionOutcome]) -> &'static str {
    if outcomes.iter().all(|o| o.success) {
        "success"
    } else if outcomes.iter().any(|o| o.items_processed > 0) {
        "partial success"
    } else {
        "failed"
    }
}

fn level_table(metrics: &Metrics) -> String {
    let mut out = String::from("| Level | Count |\n|---|---|\n");
    for level in Level::ALL {
        out.push_str(&format!("| {} | {} |\n", level, metrics.count(level)));
    }
    out
}

fn health_table(metrics: &Metrics) -> String {
    if metrics.components.is_empty() {
        return "No log entries.".to_string();
    }
    let mut out = String::from("| Component | Status | Entries | Warnings | Errors | Success |\n|---|---|---|---|---|---|\n");
    for health in metrics.components.values() {
        let marker = match health.status {
            HealthStatus::Healthy => "ok",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Failing => "FAILING",
        };
        out.push_str(&format!(
            "| {} | {} | {} | {} | {} | {:.0}% |\n",
            health.component,
            marker,
            health.entries,
            health.warnings,
            health.errors,
            health.success_ratio * 100.0
        ));
    }
    out
}

fn audit_table(audits: &[AuditSummary]) -> String {
    if audits.is_empty() {
        return "No components were audited.".to_string();
    }
    let mut out = String::from("| Component | Subjects | Diff | Note |\n|---|---|---|---|\n");
    for audit in audits {
        let diff = audit
            .diff_items
            .map_or_else(|| "-".to_string(), |n| n.to_string());
        out.push_str(&format!(
            "| {} | {} | {} | {} |\n",
            audit.component,
            audit.subjects,
            diff,
            audit.error.as_deref().unwrap_or("")
        ));
    }
    out
}

fn outcome_table(outcomes: &[ExecutionOutcome]) -> String {
    if outcomes.is_empty() {
        return "No changes were attempted.".to_string();
    }
    let mut out = String::from(
        "| Component | Result | Detected | Processed | Failed | Duration |\n|---|---|---|---|---|---|\n",
    );
    for outcome in outcomes {
        let result = match (outcome.success, outcome.dry_run) {
            (true, true) => "simulated",
            (true, false) => "ok",
            (false, _) => "FAILED",
        };
        out.push_str(&format!(
            "| {} | {} | {} | {} | {} | {} ms |\n",
            outcome.component,
            result,
            outcome.items_detected,
            outcome.items_processed,
            outcome.items_failed,
            outcome.duration_millis
        ));
    }
    out
}

fn error_list(metrics: &Metrics) -> String {
    if metrics.errors.is_empty() {
        return "None.".to_string();
    }
    metrics
        .errors
        .iter()
        .map(|e| {
            format!(
                "- `{}` {} [{}] {}",
                e.timestamp.format("%H:%M:%S%.3f"),
                e.level,
                e.component,
                e.message
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
