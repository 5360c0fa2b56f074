//! Session manifest persisted at `data/session-<timestamp>.json`.

use crate::error::Result;
use crate::session::{Category, Session};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Pipeline phases, in run order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Inventory,
    Safety,
    Reconciliation,
    Reporting,
}

/// How a phase ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Running,
    Completed,
    /// Finished, but at least one component failed or was skipped
    Degraded,
    Failed,
    Skipped,
    Cancelled,
}

impl PhaseStatus {
    /// Whether this status should keep session artifacts for diagnosis
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Degraded | Self::Failed | Self::Cancelled)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub phase: Phase,
    pub status: PhaseStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionManifest {
    pub id: String,
    pub root: PathBuf,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub dry_run: bool,
    #[serde(default)]
    pub phases: Vec<PhaseRecord>,
}

impl SessionManifest {
    pub fn new(session: &Session) -> Self {
        Self {
            id: session.id().to_string(),
            root: session.root().to_path_buf(),
            started_at: session.created_at(),
            ended_at: None,
            dry_run: session.is_dry_run(),
            phases: Vec::new(),
        }
    }

    /// File name under `data/`
    pub fn file_name(&self) -> String {
        format!("session-{}.json", self.started_at.format("%Y%m%d-%H%M%S"))
    }

    /// Record the start of a phase
    pub fn begin_phase(&mut self, phase: Phase) {
        self.phases.push(PhaseRecord {
            phase,
            status: PhaseStatus::Running,
            started_at: Utc::now(),
            ended_at: None,
            detail: None,
        });
    }

    /// Close the most recent record for `phase`, or add a closed one if it never began
    pub fn end_phase(&mut self, phase: Phase, status: PhaseStatus, detail: Option<String>) {
        let now = Utc::now();
        match self.phases.iter_mut().rev().find(|r| r.phase == phase) {
            Some(record) => {
                record.status = status;
                record.ended_at = Some(now);
                record.detail = detail;
            }
            None => self.phases.push(PhaseRecord {
                phase,
                status,
                started_at: now,
                ended_at: Some(now),
                detail,
            }),
        }
    }

    pub fn finish(&mut self) {
        self.ended_at = Some(Utc::now());
    }

    /// Whether any phase ended in a state that warrants keeping artifacts
    pub fn has_failures(&self) -> bool {
        self.phases.iter().any(|r| r.status.is_failure())
    }

    pub fn status_of(&self, phase: Phase) -> Option<PhaseStatus> {
        self.phases
            .iter()
            .rev()
            .find(|r| r.phase == phase)
            .map(|r| r.status)
    }

    /// Write (or overwrite) the manifest into the session's data directory
    pub fn write(&self, session: &Session) -> Result<PathBuf> {
        let path = session.path(Category::Data, &self.file_name())?;
        let content = serde_json::to_string_pretty(self)?;
        fs::write(&path, content)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_phase_lifecycle() {
        let tmp = TempDir::new().unwrap();
        let session = Session::open(tmp.path(), false).unwrap();
        let mut manifest = SessionManifest::new(&session);

        manifest.begin_phase(Phase::Inventory);
        assert_eq!(manifest.status_of(Phase::Inventory), Some(PhaseStatus::Running));
        manifest.end_phase(Phase::Inventory, PhaseStatus::Completed, None);
        manifest.end_phase(
            Phase::Safety,
            PhaseStatus::Skipped,
            Some("dry run".to_string()),
        );

        assert_eq!(manifest.phases.len(), 2);
        assert_eq!(manifest.status_of(Phase::Safety), Some(PhaseStatus::Skipped));
        assert!(!manifest.has_failures());

        manifest.begin_phase(Phase::Reconciliation);
        manifest.end_phase(Phase::Reconciliation, PhaseStatus::Degraded, None);
        assert!(manifest.has_failures());
    }

    #[test]
    fn test_write_lands_in_data_dir() {
        let tmp = TempDir::new().unwrap();
        let session = Session::open(tmp.path(), true).unwrap();
        let mut manifest = SessionManifest::new(&session);
        manifest.finish();

        let path = manifest.write(&session).unwrap();
        assert!(path.starts_with(session.dir(Category::Data)));
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("session-") && name.ends_with(".json"));

        let loaded: SessionManifest =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded.id, session.id());
        assert!(loaded.dry_run);
        assert!(loaded.ended_at.is_some());
    }
}
