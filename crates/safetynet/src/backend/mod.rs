//! Backend abstraction for restore storage and checkpoints.
//!
//! The [`RestoreBackend`] trait lets the state machine run against the real
//! Volume Shadow Copy tooling or against a mock in tests.

pub mod vss;

use crate::error::Result;
use crate::types::RestoreCheckpoint;

/// Backend trait for restore operations.
pub trait RestoreBackend: Send + Sync {
    /// Bytes currently reserved for restore points on `drive`.
    ///
    /// Returns `Ok(0)` when no storage association exists yet.
    fn allocated_bytes(&self, drive: &str) -> Result<u64>;

    /// Raise the reservation on `drive` to at least `bytes`.
    fn allocate(&self, drive: &str, bytes: u64) -> Result<()>;

    /// Take a restore point.
    fn create_checkpoint(&self, drive: &str, description: &str) -> Result<RestoreCheckpoint>;
}

impl<T: RestoreBackend + ?Sized> RestoreBackend for &T {
    fn allocated_bytes(&self, drive: &str) -> Result<u64> {
        (**self).allocated_bytes(drive)
    }

    fn allocate(&self, drive: &str, bytes: u64) -> Result<()> {
        (**self).allocate(drive, bytes)
    }

    fn create_checkpoint(&self, drive: &str, description: &str) -> Result<RestoreCheckpoint> {
        (**self).create_checkpoint(drive, description)
    }
}

/// Get the default backend (vssadmin + PowerShell).
pub fn default_backend() -> vss::VssBackend {
    vss::VssBackend::new()
}
