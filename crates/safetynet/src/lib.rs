//! # safetynet
//!
//! Restore checkpoints taken before a maintenance run changes anything.
//!
//! The safety net makes sure the volume has at least a minimum amount of
//! shadow storage reserved, raising the reservation when it is too small,
//! and only then creates a checkpoint. A failure at any step is reported and
//! the run continues unprotected.
//!
//! ## Example
//!
//! ```no_run
//! use safetynet::{RestorePolicy, SafetyNet, default_backend};
//! use session::Logger;
//!
//! let logger = Logger::open("maintenance.log");
//! let policy = RestorePolicy::new("C:", 10 * 1024 * 1024 * 1024, "before maintenance");
//! let report = SafetyNet::new(default_backend(), policy).run(&logger);
//! if !report.is_protected() {
//!     eprintln!("continuing without a restore point");
//! }
//! ```

pub mod backend;
pub mod error;
pub mod net;
pub mod types;

pub use backend::{RestoreBackend, default_backend};
pub use error::{Error, Result};
pub use net::SafetyNet;
pub use types::{RestoreCheckpoint, RestorePolicy, RestoreState, SafetyReport, Transition};
