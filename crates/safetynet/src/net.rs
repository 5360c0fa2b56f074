//! The safety net state machine.
//!
//! Runs once per session before reconciliation. Every failure leaves the
//! machine in `Failed` and the run carries on without a checkpoint.

use crate::backend::RestoreBackend;
use crate::error::{Error, Result};
use crate::types::{RestoreCheckpoint, RestorePolicy, RestoreState, SafetyReport, Transition};
use chrono::Utc;
use serde_json::json;
use session::{Component, Level, Logger};

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Drives a [`RestoreBackend`] through the protection lifecycle
pub struct SafetyNet<B: RestoreBackend> {
    backend: B,
    policy: RestorePolicy,
}

struct Machine<'a> {
    state: RestoreState,
    transitions: Vec<Transition>,
    logger: &'a Logger,
}

impl Machine<'_> {
    fn advance(&mut self, next: RestoreState, detail: Option<String>) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal restore transition {} -> {}",
            self.state,
            next
        );
        self.logger.log_data(
            Level::Debug,
            Component::Restore,
            &format!("Restore state {} -> {}", self.state, next),
            &json!({ "from": self.state, "to": next, "detail": detail }),
        );
        self.transitions.push(Transition {
            from: self.state,
            to: next,
            at: Utc::now(),
            detail,
        });
        self.state = next;
    }
}

impl<B: RestoreBackend> SafetyNet<B> {
    pub fn new(backend: B, policy: RestorePolicy) -> Self {
        Self { backend, policy }
    }

    pub fn policy(&self) -> &RestorePolicy {
        &self.policy
    }

    /// Verify or raise the restore allocation, then take a checkpoint.
    ///
    /// Never fails: errors are reported through [`SafetyReport::error`] and
    /// logged as WARNING under `RESTORE`.
    pub fn run(&self, logger: &Logger) -> SafetyReport {
        let mut machine = Machine {
            state: RestoreState::Unprotected,
            transitions: Vec::new(),
            logger,
        };

        let mut allocated = None;
        let verified = self.secure_allocation(&mut machine, &mut allocated);

        let (checkpoint, error) = match verified {
            Ok(()) => match self.checkpoint(logger) {
                Ok(checkpoint) => (Some(checkpoint), None),
                Err(e) => {
                    logger.warning(Component::Restore, format!("Checkpoint skipped: {e}"));
                    (None, Some(e.to_string()))
                }
            },
            Err(e) => {
                machine.advance(RestoreState::Failed, Some(e.to_string()));
                let hint = if e.is_permission() {
                    " (administrator rights are required)"
                } else {
                    ""
                };
                logger.warning(
                    Component::Restore,
                    format!("Restore protection failed, continuing without a checkpoint: {e}{hint}"),
                );
                (None, Some(e.to_string()))
            }
        };

        SafetyReport {
            final_state: machine.state,
            transitions: machine.transitions,
            allocated_bytes: allocated,
            checkpoint,
            error,
        }
    }

    fn secure_allocation(&self, machine: &mut Machine<'_>, allocated: &mut Option<u64>) -> Result<()> {
        let drive = self.policy.drive.as_str();
        let required = self.policy.min_bytes;

        machine.advance(RestoreState::Checking, None);
        let current = self.backend.allocated_bytes(drive)?;
        *allocated = Some(current);

        if current >= required {
            machine.advance(RestoreState::Adequate, Some(describe(current, required)));
            machine.advance(RestoreState::Verified, None);
            return Ok(());
        }

        machine.advance(RestoreState::Insufficient, Some(describe(current, required)));
        machine
            .logger
            .info(Component::Restore, format!("Raising restore storage on {drive}: {}", describe(current, required)));
        machine.advance(RestoreState::Allocating, None);
        self.backend.allocate(drive, required)?;

        let after = self.backend.allocated_bytes(drive)?;
        *allocated = Some(after);
        if after < required {
            return Err(Error::Unverified {
                drive: drive.to_string(),
                actual: after,
                required,
            });
        }
        machine.advance(RestoreState::Verified, Some(describe(after, required)));
        Ok(())
    }

    fn checkpoint(&self, logger: &Logger) -> Result<RestoreCheckpoint> {
        let checkpoint = self
            .backend
            .create_checkpoint(&self.policy.drive, &self.policy.description)?;
        logger.log_data(
            Level::Success,
            Component::Restore,
            "Restore checkpoint created",
            &checkpoint,
        );
        Ok(checkpoint)
    }
}

fn describe(actual: u64, required: u64) -> String {
    if actual == u64::MAX {
        return "unbounded".to_string();
    }
    format!(
        "{:.1} GB allocated, {:.1} GB required",
        actual as f64 / GIB,
        required as f64 / GIB
    )
}
