//! Execution engine for upkeep
//!
//! The engine orchestrates:
//! 1. Inventory - Audit every unit and compute its diff
//! 2. Safety - Secure a restore checkpoint before anything changes
//! 3. Reconciliation - Apply diffs unit by unit under a time budget
//! 4. Reporting - Process the session log and export the report

pub mod differ;
pub mod orchestrator;
pub mod registry;
pub mod timeout;

pub use orchestrator::{
    AutoConfirm, ConfirmCallback, Inventory, Orchestrator, RunObserver,
    RunOptions, RunSummary,
};
