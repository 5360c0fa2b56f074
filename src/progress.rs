//! Progress indicators for the upkeep CLI.

use indicatif::{ProgressBar, ProgressStyle};
use reconcile::{ApplyResult, DiffItem, DiffList, ExecutionOutcome, ProgressCallback};
use session::{Component, Phase, PhaseStatus};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::engine::RunObserver;
use crate::engine::differ;
use crate::ui;

/// Spinner for work of unknown length
pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn item_bar(len: usize) -> ProgressBar {
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-"),
    );
    pb
}

fn phase_title(phase: Phase) -> &'static str {
    match phase {
        Phase::Inventory => "Inventory",
        Phase::Safety => "Restore checkpoint",
        Phase::Reconciliation => "Reconciliation",
        Phase::Reporting => "Report",
    }
}

/// Terminal observer: phase headers, the diff preview and one bar per unit
pub struct TerminalProgress {
    current: Mutex<Option<ProgressBar>>,
}

impl TerminalProgress {
    pub fn new() -> Self {
        Self {
            current: Mutex::new(None),
        }
    }

    fn bar(&self) -> MutexGuard<'_, Option<ProgressBar>> {
        self.current
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Default for TerminalProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl RunObserver for TerminalProgress {
    fn phase_started(&self, phase: Phase) {
        ui::section(phase_title(phase));
    }

    fn phase_finished(&self, phase: Phase, status: PhaseStatus) {
        match status {
            PhaseStatus::Degraded => ui::warn(&format!("{} finished with problems", phase_title(phase))),
            PhaseStatus::Failed => ui::error(&format!("{} failed", phase_title(phase))),
            PhaseStatus::Cancelled => ui::warn(&format!("{} cancelled", phase_title(phase))),
            PhaseStatus::Skipped => ui::dim(&format!("{} skipped", phase_title(phase))),
            PhaseStatus::Running | PhaseStatus::Completed => {}
        }
    }

    fn diffs_ready(&self, diffs: &[DiffList]) {
        differ::display_diff(diffs);
    }

    fn unit_started(&self, component: Component, items: usize) {
        if items == 0 {
            return;
        }
        let pb = item_bar(items);
        pb.set_message(component.slug().to_string());
        if let Some(previous) = self.bar().replace(pb) {
            previous.finish_and_clear();
        }
    }

    fn unit_finished(&self, outcome: &ExecutionOutcome) {
        if let Some(pb) = self.bar().take() {
            pb.finish_and_clear();
        }

        let line = format!(
            "{}: {} of {} processed",
            outcome.component.slug(),
            outcome.items_processed,
            outcome.items_detected
        );
        if outcome.success {
            ui::success(&line);
        } else {
            let reason = outcome.error.as_deref().unwrap_or("some items failed");
            ui::error(&format!("{line}, {} failed ({reason})", outcome.items_failed));
        }
    }
}

impl ProgressCallback for TerminalProgress {
    fn on_item_start(&self, item: &DiffItem) {
        if let Some(pb) = self.bar().as_ref() {
            pb.set_message(ui_name(item));
        }
    }

    fn on_item_complete(&self, item: &DiffItem, result: &ApplyResult) {
        let guard = self.bar();
        let Some(pb) = guard.as_ref() else {
            return;
        };
        if let ApplyResult::Failed { error } = result {
            pb.suspend(|| {
                println!("  {} {} ({})", ui::result_symbol(result), item.name, error);
            });
        }
        pb.inc(1);
    }
}

fn ui_name(item: &DiffItem) -> String {
    let name = &item.name;
    if name.chars().count() > 40 {
        let head: String = name.chars().take(37).collect();
        format!("{head}...")
    } else {
        name.clone()
    }
}
