//! Core types for audit, diff, and apply

use serde::{Deserialize, Serialize};
use session::Component;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};

/// Observed state of a subject
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SubjectState {
    /// Subject exists (package installed, service present)
    Present,
    /// Subject does not exist
    Absent,
    /// Subject has a textual value (a setting)
    Setting { value: String },
    /// Subject has a numeric value (a tunable)
    Numeric { value: f64 },
    /// State cannot be determined
    Unknown,
}

impl SubjectState {
    pub fn is_present(&self) -> bool {
        matches!(self, Self::Present)
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    /// Short label for error messages
    pub fn label(&self) -> &'static str {
        match self {
            Self::Present => "present",
            Self::Absent => "absent",
            Self::Setting { .. } => "setting",
            Self::Numeric { .. } => "numeric",
            Self::Unknown => "unknown",
        }
    }
}

/// One inspected thing, identified by a stable key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subject {
    /// Identity used for diffing (package id, setting path, ...)
    pub key: String,
    /// Human-readable name
    pub name: String,
    pub state: SubjectState,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, String>,
}

impl Subject {
    pub fn new(key: impl Into<String>, name: impl Into<String>, state: SubjectState) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
            state,
            details: BTreeMap::new(),
        }
    }

    /// A present subject whose name equals its key
    pub fn present(key: impl Into<String>) -> Self {
        let key = key.into();
        Self::new(key.clone(), key, SubjectState::Present)
    }

    pub fn setting(key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        Self::new(
            key.clone(),
            key,
            SubjectState::Setting {
                value: value.into(),
            },
        )
    }

    pub fn numeric(key: impl Into<String>, value: f64) -> Self {
        let key = key.into();
        Self::new(key.clone(), key, SubjectState::Numeric { value })
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

/// Read-only inventory produced by an audit unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditResult {
    pub component: Component,
    pub items: Vec<Subject>,
    pub collected_at: DateTime<Utc>,
}

impl AuditResult {
    pub fn new(component: Component, items: Vec<Subject>) -> Self {
        Self {
            component,
            items,
            collected_at: Utc::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn find(&self, key: &str) -> Option<&Subject> {
        self.items.iter().find(|s| s.key == key)
    }
}

/// Diff strategy a component uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Set membership: remove present subjects matched by a deny policy
    Exclusion,
    /// Desired value: set subjects whose value differs
    Setting,
    /// Numeric: adjust subjects whose value drifts past a tolerance
    Threshold,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Exclusion => "exclusion",
            Self::Setting => "setting",
            Self::Threshold => "threshold",
        })
    }
}

/// What applying a diff item does
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum DiffAction {
    Remove,
    Set { from: Option<String>, to: String },
    Adjust { from: f64, to: f64 },
}

impl DiffAction {
    pub fn verb(&self) -> &'static str {
        match self {
            Self::Remove => "remove",
            Self::Set { .. } => "set",
            Self::Adjust { .. } => "adjust",
        }
    }

    /// Sentence fragment such as `remove Candy Crush` or `set Telemetry 1 → 0`
    pub fn describe(&self, name: &str) -> String {
        match self {
            Self::Remove => format!("remove {name}"),
            Self::Set { from, to } => format!(
                "set {} {} → {}",
                name,
                from.as_deref().unwrap_or("(unset)"),
                to
            ),
            Self::Adjust { from, to } => format!("adjust {name} {from} → {to}"),
        }
    }
}

/// One actionable item in a diff list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffItem {
    pub key: String,
    pub name: String,
    #[serde(flatten)]
    pub action: DiffAction,
}

/// Ordered, deduplicated actions for one component
///
/// Contains no timestamps so that computing it twice from the same inputs
/// serializes to identical bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffList {
    pub component: Component,
    pub strategy: StrategyKind,
    pub items: Vec<DiffItem>,
    /// Policy that produced the diff (patterns, targets, tolerances)
    #[serde(default)]
    pub policy: BTreeMap<String, serde_json::Value>,
}

impl DiffList {
    /// An explicitly empty diff
    pub fn empty(component: Component, strategy: StrategyKind) -> Self {
        Self {
            component,
            strategy,
            items: Vec::new(),
            policy: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn keys(&self) -> Vec<&str> {
        self.items.iter().map(|i| i.key.as_str()).collect()
    }

    /// Every key in this diff appears in `audit`
    pub fn is_subset_of(&self, audit: &AuditResult) -> bool {
        let audited: HashSet<&str> = audit.items.iter().map(|s| s.key.as_str()).collect();
        self.component == audit.component && self.items.iter().all(|i| audited.contains(i.key.as_str()))
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Result of applying a single diff item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ApplyResult {
    /// Already in the desired state at apply time
    NoChange,
    Created,
    Modified,
    Removed,
    Failed { error: String },
    Skipped { reason: String },
}

impl ApplyResult {
    /// Check if the result represents success (no failure)
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }

    /// Check if the result represents a change
    pub fn is_change(&self) -> bool {
        matches!(self, Self::Created | Self::Modified | Self::Removed)
    }
}

/// Per-item record inside an outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemOutcome {
    pub key: String,
    #[serde(flatten)]
    pub result: ApplyResult,
}

/// Standardized record every execution unit returns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub component: Component,
    pub success: bool,
    pub items_detected: usize,
    pub items_processed: usize,
    pub items_failed: usize,
    pub duration_millis: u64,
    pub dry_run: bool,
    pub log_path: Option<PathBuf>,
    #[serde(default)]
    pub items: Vec<ItemOutcome>,
    /// Unit-level failure (audit, diff, timeout) that is not tied to one item
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionOutcome {
    /// Outcome for an empty diff: nothing detected, nothing touched
    pub fn empty(component: Component, dry_run: bool, log_path: Option<PathBuf>) -> Self {
        Self {
            component,
            success: true,
            items_detected: 0,
            items_processed: 0,
            items_failed: 0,
            duration_millis: 0,
            dry_run,
            log_path,
            items: Vec::new(),
            error: None,
        }
    }

    /// Outcome for a unit that failed before it could apply anything.
    ///
    /// The unit-level failure counts as one failed item so that `success`
    /// stays equivalent to `items_failed == 0`.
    pub fn failed(
        component: Component,
        error: impl Into<String>,
        dry_run: bool,
        log_path: Option<PathBuf>,
    ) -> Self {
        Self {
            success: false,
            items_failed: 1,
            error: Some(error.into()),
            ..Self::empty(component, dry_run, log_path)
        }
    }

    /// Change breakdown of the recorded items
    pub fn summary(&self) -> ExecuteSummary {
        let mut summary = ExecuteSummary::default();
        for item in &self.items {
            summary.add_result(&item.result);
        }
        summary
    }
}

/// Summary of execution results
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteSummary {
    pub created: usize,
    pub modified: usize,
    pub removed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub no_change: usize,
}

impl ExecuteSummary {
    /// Total number of actual changes made
    pub fn total_changes(&self) -> usize {
        self.created + self.modified + self.removed
    }

    /// Check if execution was fully successful (no failures)
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    /// Total number of items recorded
    pub fn total(&self) -> usize {
        self.created + self.modified + self.removed + self.skipped + self.failed + self.no_change
    }

    /// Merge another summary into this one
    pub fn merge(&mut self, other: &ExecuteSummary) {
        self.created += other.created;
        self.modified += other.modified;
        self.removed += other.removed;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.no_change += other.no_change;
    }

    /// Add a result to the summary
    pub fn add_result(&mut self, result: &ApplyResult) {
        match result {
            ApplyResult::NoChange => self.no_change += 1,
            ApplyResult::Created => self.created += 1,
            ApplyResult::Modified => self.modified += 1,
            ApplyResult::Removed => self.removed += 1,
            ApplyResult::Failed { .. } => self.failed += 1,
            ApplyResult::Skipped { .. } => self.skipped += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diff_list_subset_check() {
        let audit = AuditResult::new(
            Component::Bloatware,
            vec![Subject::present("a"), Subject::present("b")],
        );
        let mut diff = DiffList::empty(Component::Bloatware, StrategyKind::Exclusion);
        diff.items.push(DiffItem {
            key: "b".into(),
            name: "b".into(),
            action: DiffAction::Remove,
        });
        assert!(diff.is_subset_of(&audit));

        diff.items.push(DiffItem {
            key: "z".into(),
            name: "z".into(),
            action: DiffAction::Remove,
        });
        assert!(!diff.is_subset_of(&audit));
    }

    #[test]
    fn test_action_describe() {
        assert_eq!(DiffAction::Remove.describe("Solitaire"), "remove Solitaire");
        let set = DiffAction::Set {
            from: None,
            to: "0".into(),
        };
        assert_eq!(set.describe("AllowTelemetry"), "set AllowTelemetry (unset) → 0");
    }

    #[test]
    fn test_outcome_summary_counts_items() {
        let mut outcome = ExecutionOutcome::empty(Component::Telemetry, false, None);
        outcome.items = vec![
            ItemOutcome {
                key: "a".into(),
                result: ApplyResult::Modified,
            },
            ItemOutcome {
                key: "b".into(),
                result: ApplyResult::Failed {
                    error: "denied".into(),
                },
            },
            ItemOutcome {
                key: "c".into(),
                result: ApplyResult::NoChange,
            },
        ];
        let summary = outcome.summary();
        assert_eq!(summary.total(), 3);
        assert_eq!(summary.total_changes(), 1);
        assert!(!summary.is_success());
    }

    #[test]
    fn test_failed_outcome_is_unsuccessful() {
        let outcome = ExecutionOutcome::failed(Component::Optimization, "audit timed out", true, None);
        assert!(!outcome.success);
        assert!(outcome.dry_run);
        assert_eq!(outcome.items_detected, 0);
        assert_eq!(outcome.items_failed, 1);
        assert_eq!(outcome.error.as_deref(), Some("audit timed out"));
    }
}
