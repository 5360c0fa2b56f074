use anyhow::{Context as _, Result};
use colored::Colorize;
use reconcile::ExecutionOutcome;
use reportkit::{HealthStatus, LogProcessor, Metrics};
use session::{Component, Level};
use std::path::Path;

use crate::Context;
use crate::ui;

/// Summarize a session log and any outcomes persisted beside it
pub fn run(_ctx: &Context, file: &Path) -> Result<()> {
    let outcomes = sibling_outcomes(file);
    let metrics = LogProcessor::new()
        .process(file, &outcomes)
        .with_context(|| format!("Could not process {}", file.display()))?;

    ui::header("Session Log");
    ui::kv("File", &file.display().to_string());
    ui::kv("Entries", &metrics.total_entries.to_string());
    if let (Some(first), Some(last)) = (metrics.first_entry, metrics.last_entry) {
        ui::kv("Span", &format!("{} .. {}", first.format("%F %T"), last.format("%F %T")));
    }
    let levels: Vec<String> = [Level::Info, Level::Success, Level::Warning, Level::Error, Level::Fatal]
        .iter()
        .map(|level| format!("{} {}", metrics.count(*level), level.as_str()))
        .collect();
    ui::kv("Levels", &levels.join(", "));
    if !metrics.malformed_lines.is_empty() {
        ui::warn(&format!("{} malformed line(s) skipped", metrics.malformed_lines.len()));
    }

    print_health(&metrics);

    if !metrics.errors.is_empty() {
        ui::section("Errors");
        for error in &metrics.errors {
            println!(
                "  {} {} {} {}",
                format!("{:>5}", error.line).dimmed(),
                error.timestamp.format("%T"),
                error.component.tag().red(),
                error.message
            );
        }
    }
    println!();
    Ok(())
}

fn print_health(metrics: &Metrics) {
    ui::section("Components");
    for health in metrics.components.values() {
        let status = match health.status {
            HealthStatus::Healthy => health.status.label().green(),
            HealthStatus::Degraded => health.status.label().yellow(),
            HealthStatus::Failing => health.status.label().red(),
        };
        let items = if health.component.is_unit() {
            format!(
                ", {}/{} items ({:.0}%)",
                health.items_processed,
                health.items_processed + health.items_failed,
                health.success_ratio * 100.0
            )
        } else {
            String::new()
        };
        println!(
            "  {:<14} {:<9} {} entries, {} warnings, {} errors{}",
            health.component.tag(),
            status,
            health.entries,
            health.warnings,
            health.errors,
            items
        );
    }
}

/// `maintenance.log` sits in `logs/`, outcomes in `logs/<unit>/outcome.json`
fn sibling_outcomes(log: &Path) -> Vec<ExecutionOutcome> {
    let Some(dir) = log.parent() else {
        return Vec::new();
    };
    Component::UNITS
        .iter()
        .filter_map(|component| {
            let path = dir.join(component.slug()).join("outcome.json");
            let contents = std::fs::read_to_string(&path).ok()?;
            match serde_json::from_str(&contents) {
                Ok(outcome) => Some(outcome),
                Err(e) => {
                    log::warn!("Ignoring {}: {}", path.display(), e);
                    None
                }
            }
        })
        .collect()
}
