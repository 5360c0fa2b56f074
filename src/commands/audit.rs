use anyhow::{Context as _, Result};
use reconcile::DiffList;
use std::sync::Arc;
use std::time::Duration;

use crate::Context;
use crate::cli::AuditArgs;
use crate::engine::orchestrator::Silent;
use crate::engine::{Inventory, Orchestrator, RunOptions, differ, registry};
use crate::paths;
use crate::progress;
use crate::schema::UpkeepConfig;
use crate::ui;
use crate::units::{CommandRunner, SystemRunner};

/// Audit and diff without touching the machine
pub fn run(ctx: &Context, args: AuditArgs) -> Result<()> {
    let (config, _) = UpkeepConfig::load_default(ctx.config.as_deref())?;
    let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner);
    let units = registry::build(&runner, &args.only);

    let options = RunOptions {
        dry_run: true,
        unit_timeout: Duration::from_secs(config.run.unit_timeout_secs.max(1)),
        audit_jobs: config.run.audit_jobs.max(1),
        ..RunOptions::default()
    };
    let orchestrator = Orchestrator::new(units, options)
        .with_configs(config.unit_configs()?)
        .with_observer(Arc::new(Silent));

    let spinner = (!args.json && !ctx.quiet).then(|| progress::spinner("Auditing..."));
    let preview = orchestrator.preview(&paths::sessions_dir()?);
    if let Some(pb) = spinner {
        pb.finish_and_clear();
    }
    let preview = preview?;

    if args.json {
        let diffs: Vec<&DiffList> = preview.inventory.iter().filter_map(Inventory::diff).collect();
        let json = serde_json::to_string_pretty(&diffs).context("Failed to serialize diff")?;
        println!("{json}");
        return Ok(());
    }

    let diffs: Vec<DiffList> = preview
        .inventory
        .iter()
        .filter_map(Inventory::diff)
        .cloned()
        .collect();
    differ::display_diff(&diffs);

    for entry in &preview.inventory {
        let slug = entry.component().slug();
        match entry {
            Inventory::Ready { .. } => {}
            Inventory::Skipped { reason, .. } => ui::dim(&format!("{slug}: skipped ({reason})")),
            Inventory::Failed { error, .. } => ui::error(&format!("{slug}: {error}")),
        }
    }
    if !ctx.quiet {
        println!();
        ui::kv("Inventory", &preview.session_root.display().to_string());
    }
    Ok(())
}
