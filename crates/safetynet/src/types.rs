//! Core types for restore protection

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Safety net lifecycle
///
/// ```text
/// Unprotected -> Checking -> Adequate -----------------> Verified
///                         \-> Insufficient -> Allocating -> Verified
///                                                       \-> Failed
/// ```
///
/// `Checking` can also end in `Failed` when the allocation cannot be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreState {
    Unprotected,
    Checking,
    Adequate,
    Insufficient,
    Allocating,
    Verified,
    Failed,
}

impl RestoreState {
    /// Whether `next` is a legal successor of `self`
    pub fn can_transition_to(self, next: RestoreState) -> bool {
        use RestoreState::*;
        matches!(
            (self, next),
            (Unprotected, Checking)
                | (Checking, Adequate | Insufficient | Failed)
                | (Adequate, Verified)
                | (Insufficient, Allocating)
                | (Allocating, Verified | Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Verified | Self::Failed)
    }
}

impl fmt::Display for RestoreState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unprotected => "unprotected",
            Self::Checking => "checking",
            Self::Adequate => "adequate",
            Self::Insufficient => "insufficient",
            Self::Allocating => "allocating",
            Self::Verified => "verified",
            Self::Failed => "failed",
        })
    }
}

/// One recorded state change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub from: RestoreState,
    pub to: RestoreState,
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// A restore point taken before reconciliation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreCheckpoint {
    pub drive_letter: String,
    pub allocated_bytes: u64,
    pub created_at: DateTime<Utc>,
    pub description: String,
}

/// Where and how much to protect
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestorePolicy {
    /// Volume letter, e.g. `C:`
    pub drive: String,
    /// Minimum shadow storage allocation in bytes
    pub min_bytes: u64,
    pub description: String,
}

impl RestorePolicy {
    pub fn new(drive: impl Into<String>, min_bytes: u64, description: impl Into<String>) -> Self {
        Self {
            drive: drive.into(),
            min_bytes,
            description: description.into(),
        }
    }
}

/// Everything the safety net did
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyReport {
    pub final_state: RestoreState,
    pub transitions: Vec<Transition>,
    /// Allocation last observed
    pub allocated_bytes: Option<u64>,
    pub checkpoint: Option<RestoreCheckpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SafetyReport {
    /// The machine is protected by a checkpoint
    pub fn is_protected(&self) -> bool {
        self.final_state == RestoreState::Verified && self.checkpoint.is_some()
    }

    /// State sequence including the starting state
    pub fn path(&self) -> Vec<RestoreState> {
        let mut path = vec![RestoreState::Unprotected];
        path.extend(self.transitions.iter().map(|t| t.to));
        path
    }
}
