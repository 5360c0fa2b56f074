//! # Session
//!
//! Isolation and record-keeping for one maintenance run.
//!
//! - [`Session`]: unique id plus a private `{data,logs,reports,temp,inventory}` tree
//! - [`Logger`]: append-only JSON-lines log with a degraded fallback sink
//! - [`Component`]: the fixed registry of tags every log entry carries
//! - [`SessionManifest`]: phase-by-phase record written into `data/`
//!
//! Nothing here is global: a session and its logger are plain values that
//! callers pass to whoever needs them, so several sessions can coexist in
//! one process (tests do exactly that).

pub mod component;
pub mod error;
pub mod logger;
pub mod manifest;
pub mod session;

pub use component::Component;
pub use error::{Error, Result};
pub use logger::{Level, LogEntry, Logger};
pub use manifest::{Phase, PhaseRecord, PhaseStatus, SessionManifest};
pub use session::{Category, CloseOutcome, RetainReason, Session, join_checked};
