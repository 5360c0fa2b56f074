//! Fixed registry of component tags used in log entries and file names.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A short tag identifying who wrote a log entry.
///
/// Infrastructure components come first, maintenance units last. The order
/// of [`Component::UNITS`] is the order units run in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Component {
    Orchestrator,
    Session,
    Logger,
    Diff,
    Restore,
    #[serde(rename = "LOGPROC")]
    LogProcessor,
    Report,
    Bloatware,
    Telemetry,
    Optimization,
}

impl Component {
    /// Every known component.
    pub const ALL: [Component; 10] = [
        Component::Orchestrator,
        Component::Session,
        Component::Logger,
        Component::Diff,
        Component::Restore,
        Component::LogProcessor,
        Component::Report,
        Component::Bloatware,
        Component::Telemetry,
        Component::Optimization,
    ];

    /// Maintenance units, in execution order.
    pub const UNITS: [Component; 3] = [
        Component::Bloatware,
        Component::Telemetry,
        Component::Optimization,
    ];

    /// Upper-case tag written into log lines.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Orchestrator => "ORCHESTRATOR",
            Self::Session => "SESSION",
            Self::Logger => "LOGGER",
            Self::Diff => "DIFF",
            Self::Restore => "RESTORE",
            Self::LogProcessor => "LOGPROC",
            Self::Report => "REPORT",
            Self::Bloatware => "BLOATWARE",
            Self::Telemetry => "TELEMETRY",
            Self::Optimization => "OPTIMIZATION",
        }
    }

    /// Lower-case slug used for per-component file and directory names.
    pub fn slug(&self) -> &'static str {
        match self {
            Self::Orchestrator => "orchestrator",
            Self::Session => "session",
            Self::Logger => "logger",
            Self::Diff => "diff",
            Self::Restore => "restore",
            Self::LogProcessor => "logproc",
            Self::Report => "report",
            Self::Bloatware => "bloatware",
            Self::Telemetry => "telemetry",
            Self::Optimization => "optimization",
        }
    }

    /// Whether this component is a maintenance unit (has audit/execution pair)
    pub fn is_unit(&self) -> bool {
        Self::UNITS.contains(self)
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for Component {
    type Err = String;

    /// Accepts either the tag or the slug, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.tag().eq_ignore_ascii_case(wanted) || c.slug().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| format!("unknown component '{wanted}'"))
    }
}
