//! # Reconcile
//!
//! Audit, diff, apply: the contracts that let a maintenance run touch only
//! what is out of line with its target.
//!
//! ## Core Concepts
//!
//! - **AuditUnit**: read-only inspection producing an [`AuditResult`]
//! - **TargetPolicy**: declared target for one component (exclusion,
//!   setting or threshold)
//! - **DiffList**: ordered, deduplicated actions computed by [`compute_diff`]
//! - **ExecutionUnit**: applies one [`DiffItem`] at a time
//! - **ExecutionOutcome**: the record every apply returns
//!
//! ## Example
//!
//! ```ignore
//! use reconcile::{ApplyContext, ApplyRequest, TargetPolicy, compute_diff, execute};
//!
//! let audit = pair.audit.inspect(&config, &audit_ctx)?;
//! let policy = TargetPolicy::from_config(pair.audit.strategy(), &config)?;
//! let diff = compute_diff(&audit, &policy)?;
//!
//! let ctx = ApplyContext::new(dry_run, logger);
//! let outcome = execute(ApplyRequest::WithDiff(diff), &pair, &config, &audit_ctx, &ctx);
//! assert_eq!(outcome.success, outcome.items_failed == 0);
//! ```
//!
//! Units never see an empty diff and never run during a dry run; the
//! executor handles both.

pub mod context;
pub mod diff;
pub mod error;
pub mod executor;
pub mod pattern;
pub mod types;
pub mod unit;

pub use context::{
    ApplyContext, ApplyProgress, AuditContext, CancelToken, LinkedCancel, NoProgress,
    ProgressCallback, ProgressSnapshot, ResourceClass, ResourceLocks,
};
pub use diff::{TargetPolicy, compute_diff};
pub use error::{ApplyItemError, AuditError, ConfigValueError, DiffError};
pub use executor::{ApplyRequest, apply_auto, apply_with_diff, execute, interrupted};
pub use pattern::{Pattern, PatternSet};
pub use types::{
    ApplyResult, AuditResult, DiffAction, DiffItem, DiffList, ExecuteSummary, ExecutionOutcome,
    ItemOutcome, StrategyKind, Subject, SubjectState,
};
pub use unit::{AuditUnit, ExecutionUnit, UnitConfig, UnitPair};
