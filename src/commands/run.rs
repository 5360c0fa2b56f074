use anyhow::{Context as _, Result};
use colored::Colorize;
use reconcile::CancelToken;
use safetynet::RestorePolicy;
use session::{CloseOutcome, RetainReason};
use std::io::{self, IsTerminal};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use crate::Context;
use crate::cli::RunArgs;
use crate::engine::orchestrator::{AutoDecline, EXIT_CANCELLED, Silent};
use crate::engine::{AutoConfirm, ConfirmCallback, Orchestrator, RunOptions, RunSummary, registry};
use crate::paths;
use crate::progress::TerminalProgress;
use crate::schema::UpkeepConfig;
use crate::ui;
use crate::units::{CommandRunner, SystemRunner};

/// Asks on the terminal
struct PromptConfirm;

impl ConfirmCallback for PromptConfirm {
    fn confirm(&mut self, prompt: &str) -> Result<bool> {
        let confirmed = dialoguer::Confirm::new()
            .with_prompt(prompt)
            .default(true)
            .interact()?;
        Ok(confirmed)
    }
}

pub fn run(ctx: &Context, args: RunArgs) -> Result<ExitCode> {
    let (config, config_path) = UpkeepConfig::load_default(ctx.config.as_deref())?;
    if ctx.verbose > 0 && !ctx.quiet {
        ui::kv("Config", &config_path.display().to_string());
    }

    let options = build_options(&config, &args)?;
    let configs = config.unit_configs()?;
    let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner);
    let units = registry::build(&runner, &args.only);
    if units.is_empty() {
        ui::warn("No maintenance units selected");
        return Ok(ExitCode::SUCCESS);
    }

    let cancel = install_cancel_handler()?;

    if !ctx.quiet {
        ui::header(if options.dry_run {
            "Maintenance Run (dry run)"
        } else {
            "Maintenance Run"
        });
    }

    let mut orchestrator = Orchestrator::new(units, options).with_configs(configs);
    if !ctx.quiet {
        let terminal = Arc::new(TerminalProgress::new());
        orchestrator = orchestrator
            .with_observer(terminal.clone())
            .with_progress(terminal);
    } else {
        orchestrator = orchestrator.with_observer(Arc::new(Silent));
    }
    orchestrator = if args.yes {
        orchestrator.with_confirm(AutoConfirm)
    } else if !io::stdin().is_terminal() {
        ui::warn("No terminal to confirm on; pass --yes to apply changes unattended");
        orchestrator.with_confirm(AutoDecline)
    } else {
        orchestrator.with_confirm(PromptConfirm)
    };

    let sessions = paths::sessions_dir()?;
    let summary = orchestrator.run(&sessions, cancel)?;

    if !ctx.quiet {
        print_summary(&summary);
    }
    Ok(ExitCode::from(summary.exit_code()))
}

fn build_options(config: &UpkeepConfig, args: &RunArgs) -> Result<RunOptions> {
    let min_bytes = match &args.min_restore_space {
        Some(size) => ui::parse_size(size).map_err(|e| anyhow::anyhow!("--min-restore-space: {e}"))?,
        None => config.min_restore_bytes()?,
    };
    let restore = (config.restore.enabled && !args.no_restore).then(|| {
        RestorePolicy::new(
            config.restore.drive.clone(),
            min_bytes,
            config.restore.description.clone(),
        )
    });
    let report_destination = match &args.report_dest {
        Some(dir) => dir.clone(),
        None => config.report_destination()?,
    };

    Ok(RunOptions {
        dry_run: args.dry_run || config.run.dry_run,
        self_audit: args.self_audit,
        keep_session: args.keep_session,
        unit_timeout: Duration::from_secs(args.timeout.unwrap_or(config.run.unit_timeout_secs).max(1)),
        audit_jobs: config.run.audit_jobs.max(1),
        restore,
        report_destination: Some(report_destination),
        template: config.template_path(),
    })
}

/// SIGINT/SIGTERM set the flag; units stop before their next item.
/// A second signal exits immediately.
fn install_cancel_handler() -> Result<CancelToken> {
    let flag = Arc::new(AtomicBool::new(false));
    for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        // The shutdown check must be registered before the flag is set
        signal_hook::flag::register_conditional_shutdown(signal, i32::from(EXIT_CANCELLED), Arc::clone(&flag))
            .and_then(|_| signal_hook::flag::register(signal, Arc::clone(&flag)))
            .with_context(|| format!("Failed to install handler for signal {signal}"))?;
    }
    Ok(CancelToken::from_flag(flag))
}

fn print_summary(summary: &RunSummary) {
    ui::header("Summary");
    ui::kv("Session", &summary.session_id);
    for audit in &summary.audits {
        if let Some(error) = &audit.error {
            ui::kv(audit.component.slug(), &error.dimmed().to_string());
        }
    }

    let totals = summary.totals();
    ui::kv(
        "Changes",
        &format!(
            "{} removed, {} created, {} modified, {} skipped, {} failed",
            totals.removed, totals.created, totals.modified, totals.skipped, totals.failed
        ),
    );

    match &summary.safety {
        Some(report) if report.is_protected() => ui::kv(
            "Restore",
            &format!(
                "{} ({} reserved)",
                "checkpoint created".green(),
                ui::format_size(report.allocated_bytes.unwrap_or(0))
            ),
        ),
        Some(report) => ui::kv(
            "Restore",
            &format!(
                "{} ({})",
                "unprotected".yellow(),
                report.error.as_deref().unwrap_or("no checkpoint")
            ),
        ),
        None => ui::kv("Restore", &"skipped".dimmed().to_string()),
    }

    if let Some(report) = &summary.report {
        let location = report.exported.as_ref().unwrap_or(&report.artifact);
        ui::kv("Report", &location.display().to_string());
        if let Some(error) = &report.error {
            ui::warn(&format!("Report export failed: {error}"));
        }
    }

    match &summary.close {
        Some(CloseOutcome::Removed) => ui::dim("Session files cleaned up"),
        Some(CloseOutcome::Retained { root, reason }) => {
            let why = match reason {
                RetainReason::Requested => "kept",
                RetainReason::ReportNotExported => "kept, report not exported",
            };
            ui::kv("Session files", &format!("{} ({why})", root.display()));
        }
        None => ui::kv("Session files", &summary.session_root.display().to_string()),
    }

    println!();
    if summary.cancelled {
        ui::warn("Run cancelled");
    } else if summary.declined {
        ui::info("Nothing was changed");
    } else if summary.is_success() {
        ui::success(if summary.dry_run {
            "Dry run complete"
        } else {
            "Maintenance complete"
        });
    } else {
        let failed = summary.outcomes.iter().filter(|o| !o.success).count();
        ui::error(&format!("{failed} unit(s) reported failures"));
    }
}
