//! Contexts handed to units, plus cancellation, locking and progress.
//!
//! These are owned, `'static` values so that a unit invocation can run on a
//! worker thread bounded by a timeout.

use crate::types::{ApplyResult, DiffItem};
use serde::{Deserialize, Serialize};
use session::Logger;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Run-level cancellation flag
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing flag (e.g. one registered with a signal handler)
    pub fn from_flag(flag: Arc<AtomicBool>) -> Self {
        Self(flag)
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// A token that is cancelled when either this one or `other` is
    pub fn child(&self) -> LinkedCancel {
        LinkedCancel {
            parent: self.clone(),
            own: CancelToken::new(),
        }
    }
}

/// A cancel token linked to a parent: cancelled if either is cancelled
#[derive(Debug, Clone)]
pub struct LinkedCancel {
    parent: CancelToken,
    own: CancelToken,
}

impl LinkedCancel {
    /// Cancel only this child
    pub fn cancel(&self) {
        self.own.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.parent.is_cancelled() || self.own.is_cancelled()
    }
}

/// Class of system resource an execution unit mutates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceClass {
    /// Installed packages / app store state
    PackageManager,
    /// Registry keys, policy values, kernel tunables
    Settings,
    /// Anything else
    System,
}

/// One mutual-exclusion boundary per resource class
#[derive(Debug, Default)]
pub struct ResourceLocks {
    package_manager: Mutex<()>,
    settings: Mutex<()>,
    system: Mutex<()>,
}

impl ResourceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until no other unit holds `class`
    pub fn acquire(&self, class: ResourceClass) -> MutexGuard<'_, ()> {
        let lock = match class {
            ResourceClass::PackageManager => &self.package_manager,
            ResourceClass::Settings => &self.settings,
            ResourceClass::System => &self.system,
        };
        match lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Counters updated while a diff is applied
///
/// Shared with the orchestrator so an apply that outlives its timeout can
/// still be summarized.
#[derive(Debug, Default)]
pub struct ApplyProgress {
    detected: AtomicUsize,
    processed: AtomicUsize,
    failed: AtomicUsize,
}

/// Point-in-time copy of [`ApplyProgress`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub detected: usize,
    pub processed: usize,
    pub failed: usize,
}

impl ProgressSnapshot {
    /// Items neither processed nor failed yet
    pub fn remaining(&self) -> usize {
        self.detected.saturating_sub(self.processed + self.failed)
    }
}

impl ApplyProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_detected(&self, n: usize) {
        self.detected.store(n, Ordering::SeqCst);
    }

    pub fn record(&self, result: &ApplyResult) {
        if result.is_success() {
            self.processed.fetch_add(1, Ordering::SeqCst);
        } else {
            self.failed.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            detected: self.detected.load(Ordering::SeqCst),
            processed: self.processed.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
        }
    }
}

/// Progress callback for execution operations
///
/// Implement this trait to receive per-item progress updates.
pub trait ProgressCallback: Send + Sync {
    /// Called before an item is applied (or simulated)
    fn on_item_start(&self, item: &DiffItem);

    /// Called when an item completes
    fn on_item_complete(&self, item: &DiffItem, result: &ApplyResult);
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_item_start(&self, _item: &DiffItem) {}
    fn on_item_complete(&self, _item: &DiffItem, _result: &ApplyResult) {}
}

/// Context passed to audit units
#[derive(Clone)]
pub struct AuditContext {
    /// Session `inventory/` directory for caching expensive queries
    inventory_dir: PathBuf,
    pub logger: Arc<Logger>,
}

impl AuditContext {
    pub fn new(inventory_dir: PathBuf, logger: Arc<Logger>) -> Self {
        Self {
            inventory_dir,
            logger,
        }
    }

    /// Cache file `name` under the session inventory
    pub fn inventory_path(&self, name: &str) -> session::Result<PathBuf> {
        session::join_checked(&self.inventory_dir, name)
    }
}

/// Context passed to execution units
#[derive(Clone)]
pub struct ApplyContext {
    /// Simulate: no unit calls, report what would change
    pub dry_run: bool,
    pub logger: Arc<Logger>,
    pub cancel: LinkedCancel,
    pub locks: Arc<ResourceLocks>,
    pub progress: Arc<ApplyProgress>,
    pub callback: Arc<dyn ProgressCallback>,
    /// The unit's own execution log
    pub log_path: Option<PathBuf>,
}

impl ApplyContext {
    /// Create a context with fresh locks, progress and cancellation
    pub fn new(dry_run: bool, logger: Arc<Logger>) -> Self {
        Self {
            dry_run,
            logger,
            cancel: CancelToken::new().child(),
            locks: Arc::new(ResourceLocks::new()),
            progress: Arc::new(ApplyProgress::new()),
            callback: Arc::new(NoProgress),
            log_path: None,
        }
    }

    pub fn with_cancel(mut self, cancel: LinkedCancel) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_locks(mut self, locks: Arc<ResourceLocks>) -> Self {
        self.locks = locks;
        self
    }

    pub fn with_callback(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.callback = callback;
        self
    }

    pub fn with_log_path(mut self, log_path: Option<PathBuf>) -> Self {
        self.log_path = log_path;
        self
    }
}
