//! Run orchestration - upkeep's phase sequencer
//!
//! A run goes through fixed phases, each recorded in the session manifest:
//!
//! 1. Inventory - every enabled unit audits (read-only) and its diff is computed
//! 2. Confirmation - skipped for dry runs and empty diffs
//! 3. Safety - restore storage is verified and a checkpoint taken
//! 4. Reconciliation - units apply their diffs one after another
//! 5. Reporting - the log is processed and the report exported
//!
//! A failing unit only affects its own outcome. Session, logger and cancel
//! token travel in a [`RunContext`]; nothing is global.

use anyhow::{Context as AnyhowContext, Result};
use rayon::prelude::*;
use reconcile::{
    ApplyContext, ApplyRequest, AuditContext, AuditError, AuditResult, CancelToken, DiffList,
    ExecuteSummary, ExecutionOutcome, NoProgress, ProgressCallback, ResourceLocks, TargetPolicy,
    UnitConfig, UnitPair, compute_diff, execute, interrupted,
};
use reportkit::{
    AuditSummary, LogProcessor, PublishOutcome, ReportData, ReportRenderer, read_outcomes,
    write_outcome,
};
use safetynet::{RestoreBackend, RestorePolicy, SafetyNet, SafetyReport};
use serde::Serialize;
use serde_json::json;
use session::{
    Category, CloseOutcome, Component, Level, Logger, Phase, PhaseStatus, Session, SessionManifest,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::timeout::{Bounded, run_bounded};

/// Exit code of a run stopped by SIGINT/SIGTERM
pub const EXIT_CANCELLED: u8 = 130;

/// Options for a maintenance run
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Report what would change without changing anything
    pub dry_run: bool,
    /// Units audit again at apply time instead of using the inventory diff
    pub self_audit: bool,
    /// Keep the session tree even after a clean, exported run
    pub keep_session: bool,
    /// Upper bound for one audit or apply invocation
    pub unit_timeout: Duration,
    /// Parallel audits (1 = sequential)
    pub audit_jobs: usize,
    /// Restore checkpoint policy; `None` disables the safety net
    pub restore: Option<RestorePolicy>,
    /// Directory the report is exported to
    pub report_destination: Option<PathBuf>,
    /// Template replacing the built-in report layout
    pub template: Option<PathBuf>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            self_audit: false,
            keep_session: false,
            unit_timeout: Duration::from_secs(600),
            audit_jobs: 1,
            restore: None,
            report_destination: None,
            template: None,
        }
    }
}

/// Confirmation callback for user interaction
pub trait ConfirmCallback: Send {
    /// Ask the user to confirm an action
    fn confirm(&mut self, prompt: &str) -> Result<bool>;
}

/// Auto-confirm callback (always returns true)
pub struct AutoConfirm;

impl ConfirmCallback for AutoConfirm {
    fn confirm(&mut self, _prompt: &str) -> Result<bool> {
        Ok(true)
    }
}

/// Auto-decline callback (always returns false)
pub struct AutoDecline;

impl ConfirmCallback for AutoDecline {
    fn confirm(&mut self, _prompt: &str) -> Result<bool> {
        Ok(false)
    }
}

/// Phase-level notifications for the terminal UI
pub trait RunObserver: Send + Sync {
    fn phase_started(&self, _phase: Phase) {}
    fn phase_finished(&self, _phase: Phase, _status: PhaseStatus) {}
    fn diffs_ready(&self, _diffs: &[DiffList]) {}
    fn unit_started(&self, _component: Component, _items: usize) {}
    fn unit_finished(&self, _outcome: &ExecutionOutcome) {}
}

/// Observer that ignores everything
pub struct Silent;

impl RunObserver for Silent {}

/// Explicit per-run state handed to every phase
pub struct RunContext {
    pub session: Session,
    pub logger: Arc<Logger>,
    pub cancel: CancelToken,
    pub locks: Arc<ResourceLocks>,
    pub manifest: SessionManifest,
}

impl RunContext {
    /// Open a session under `sessions_dir`; failure is fatal for the run
    pub fn open(sessions_dir: &Path, dry_run: bool, cancel: CancelToken) -> Result<Self> {
        let session = Session::open(sessions_dir, dry_run)
            .with_context(|| format!("Failed to create session under {}", sessions_dir.display()))?;
        let logger = Arc::new(Logger::for_session(&session));
        let manifest = SessionManifest::new(&session);
        let ctx = Self {
            session,
            logger,
            cancel,
            locks: Arc::new(ResourceLocks::new()),
            manifest,
        };
        ctx.save_manifest();
        ctx.logger.log_data(
            Level::Info,
            Component::Session,
            "Session opened",
            &json!({ "id": ctx.session.id(), "root": ctx.session.root(), "dry_run": dry_run }),
        );
        Ok(ctx)
    }

    pub fn audit_context(&self) -> AuditContext {
        AuditContext::new(self.session.dir(Category::Inventory), Arc::clone(&self.logger))
    }

    fn save_manifest(&self) {
        if let Err(e) = self.manifest.write(&self.session) {
            self.logger
                .warning(Component::Session, format!("Could not write session manifest: {e}"));
        }
    }

    /// Write `value` as pretty JSON under a session category
    fn persist<T: Serialize>(&self, category: Category, name: &str, value: &T) -> Option<PathBuf> {
        let written = self
            .session
            .path(category, name)
            .map_err(|e| e.to_string())
            .and_then(|path| {
                let content = serde_json::to_string_pretty(value).map_err(|e| e.to_string())?;
                std::fs::write(&path, content).map_err(|e| e.to_string())?;
                Ok(path)
            });
        match written {
            Ok(path) => Some(path),
            Err(e) => {
                self.logger.warning(
                    Component::Session,
                    format!("Could not write {}/{}: {}", category.dir_name(), name, e),
                );
                None
            }
        }
    }

    fn phase_detail(&self, phase: Phase) -> Option<&str> {
        self.manifest
            .phases
            .iter()
            .rev()
            .find(|r| r.phase == phase)
            .and_then(|r| r.detail.as_deref())
    }
}

/// What the inventory phase produced for one unit
#[derive(Debug, Clone)]
pub enum Inventory {
    /// Audited; `diff` is empty when nothing is out of line (or diffing failed)
    Ready { audit: AuditResult, diff: DiffList },
    /// Not audited: disabled or missing configuration
    Skipped { component: Component, reason: String },
    /// Audit failed or timed out
    Failed { component: Component, error: String },
}

impl Inventory {
    pub fn component(&self) -> Component {
        match self {
            Self::Ready { audit, .. } => audit.component,
            Self::Skipped { component, .. } | Self::Failed { component, .. } => *component,
        }
    }

    pub fn diff(&self) -> Option<&DiffList> {
        match self {
            Self::Ready { diff, .. } => Some(diff),
            _ => None,
        }
    }

    pub fn summary(&self) -> AuditSummary {
        match self {
            Self::Ready { audit, diff } => AuditSummary {
                component: audit.component,
                subjects: audit.len(),
                diff_items: Some(diff.len()),
                error: None,
            },
            Self::Skipped { component, reason } => AuditSummary {
                component: *component,
                subjects: 0,
                diff_items: None,
                error: Some(format!("skipped: {reason}")),
            },
            Self::Failed { component, error } => AuditSummary {
                component: *component,
                subjects: 0,
                diff_items: None,
                error: Some(error.clone()),
            },
        }
    }
}

/// Result of an inventory-only run
#[derive(Debug)]
pub struct Preview {
    pub session_root: PathBuf,
    pub inventory: Vec<Inventory>,
}

/// Everything a finished run reports back
#[derive(Debug)]
pub struct RunSummary {
    pub session_id: String,
    pub session_root: PathBuf,
    pub dry_run: bool,
    pub audits: Vec<AuditSummary>,
    pub outcomes: Vec<ExecutionOutcome>,
    pub safety: Option<SafetyReport>,
    pub report: Option<PublishOutcome>,
    /// `None` when the session could not be closed
    pub close: Option<CloseOutcome>,
    pub declined: bool,
    pub cancelled: bool,
}

impl RunSummary {
    /// Every outcome succeeded
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(|o| o.success)
    }

    /// Item counts across all units
    pub fn totals(&self) -> ExecuteSummary {
        let mut totals = ExecuteSummary::default();
        for outcome in &self.outcomes {
            totals.merge(&outcome.summary());
        }
        totals
    }

    /// Process exit code: reflects outcomes only
    pub fn exit_code(&self) -> u8 {
        if self.cancelled {
            EXIT_CANCELLED
        } else if self.is_success() {
            0
        } else {
            1
        }
    }
}

/// Sequences the phases of a maintenance run
pub struct Orchestrator {
    units: Vec<UnitPair>,
    configs: BTreeMap<Component, UnitConfig>,
    options: RunOptions,
    restore: Box<dyn RestoreBackend>,
    confirm: Box<dyn ConfirmCallback>,
    observer: Arc<dyn RunObserver>,
    progress: Arc<dyn ProgressCallback>,
}

impl Orchestrator {
    /// `units` run in the given order
    pub fn new(units: Vec<UnitPair>, options: RunOptions) -> Self {
        Self {
            units,
            configs: BTreeMap::new(),
            options,
            restore: Box::new(safetynet::default_backend()),
            confirm: Box::new(AutoConfirm),
            observer: Arc::new(Silent),
            progress: Arc::new(NoProgress),
        }
    }

    pub fn with_configs(mut self, configs: BTreeMap<Component, UnitConfig>) -> Self {
        self.configs = configs;
        self
    }

    pub fn with_restore_backend(mut self, backend: impl RestoreBackend + 'static) -> Self {
        self.restore = Box::new(backend);
        self
    }

    pub fn with_confirm(mut self, confirm: impl ConfirmCallback + 'static) -> Self {
        self.confirm = Box::new(confirm);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    /// Full run: inventory through reporting, then close the session
    pub fn run(&mut self, sessions_dir: &Path, cancel: CancelToken) -> Result<RunSummary> {
        let mut ctx = RunContext::open(sessions_dir, self.options.dry_run, cancel)?;
        ctx.logger.log_data(
            Level::Info,
            Component::Orchestrator,
            "Maintenance run started",
            &json!({
                "units": self.units.iter().map(|p| p.component().slug()).collect::<Vec<_>>(),
                "self_audit": self.options.self_audit,
                "unit_timeout_secs": self.options.unit_timeout.as_secs(),
            }),
        );

        let inventory = self.inventory(&mut ctx);
        let diffs: Vec<DiffList> = inventory.iter().filter_map(Inventory::diff).cloned().collect();
        self.observer.diffs_ready(&diffs);
        let pending: usize = diffs.iter().map(DiffList::len).sum();

        let declined = self.confirm_changes(&ctx, pending);
        let safety = self.safety(&mut ctx, pending, declined);
        let outcomes = self.reconcile(&mut ctx, &inventory, declined);
        let cancelled = ctx.cancel.is_cancelled();

        let failed = outcomes.iter().filter(|o| !o.success).count();
        ctx.logger.log_data(
            if failed == 0 { Level::Success } else { Level::Warning },
            Component::Orchestrator,
            "Maintenance run finished",
            &json!({ "units": outcomes.len(), "failed": failed, "cancelled": cancelled, "declined": declined }),
        );

        let report = self.report(&mut ctx, &inventory, &outcomes, safety.as_ref());

        ctx.manifest.finish();
        ctx.save_manifest();
        let keep = self.options.keep_session || ctx.manifest.has_failures();

        let RunContext { session, .. } = ctx;
        let session_id = session.id().to_string();
        let session_root = session.root().to_path_buf();
        let close = match session.close(keep) {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                log::warn!("Could not remove session {}: {}", session_root.display(), e);
                None
            }
        };

        Ok(RunSummary {
            session_id,
            session_root,
            dry_run: self.options.dry_run,
            audits: inventory.iter().map(Inventory::summary).collect(),
            outcomes,
            safety,
            report,
            close,
            declined,
            cancelled,
        })
    }

    /// Inventory and diff only; the session is kept for inspection
    pub fn preview(&self, sessions_dir: &Path) -> Result<Preview> {
        let mut ctx = RunContext::open(sessions_dir, true, CancelToken::new())?;
        let inventory = self.inventory(&mut ctx);
        let diffs: Vec<DiffList> = inventory.iter().filter_map(Inventory::diff).cloned().collect();
        self.observer.diffs_ready(&diffs);

        ctx.manifest.finish();
        ctx.save_manifest();
        let session_root = ctx.session.root().to_path_buf();
        ctx.session.close(true)?;
        Ok(Preview {
            session_root,
            inventory,
        })
    }

    fn begin(&self, ctx: &mut RunContext, phase: Phase) {
        ctx.manifest.begin_phase(phase);
        ctx.save_manifest();
        self.observer.phase_started(phase);
    }

    fn end(&self, ctx: &mut RunContext, phase: Phase, status: PhaseStatus, detail: Option<String>) {
        ctx.manifest.end_phase(phase, status, detail);
        ctx.save_manifest();
        self.observer.phase_finished(phase, status);
    }

    fn config_for(&self, component: Component) -> UnitConfig {
        self.configs.get(&component).cloned().unwrap_or_default()
    }

    // ------------------------------------------------------------------------
    // Inventory
    // ------------------------------------------------------------------------

    fn inventory(&self, ctx: &mut RunContext) -> Vec<Inventory> {
        self.begin(ctx, Phase::Inventory);

        let audit_ctx = ctx.audit_context();
        let configs = &self.configs;
        let timeout = self.options.unit_timeout;
        let cancel = &ctx.cancel;
        let audit = |pair: &UnitPair| {
            if cancel.is_cancelled() {
                return Inventory::Skipped {
                    component: pair.component(),
                    reason: "cancelled".to_string(),
                };
            }
            inventory_one(pair, configs, &audit_ctx, timeout)
        };

        let units = &self.units;
        let jobs = self.options.audit_jobs;
        let entries: Vec<Inventory> = if jobs > 1 && units.len() > 1 {
            match rayon::ThreadPoolBuilder::new().num_threads(jobs).build() {
                // collect() keeps table order
                Ok(pool) => pool.install(|| units.par_iter().map(audit).collect()),
                Err(e) => {
                    ctx.logger.warning(
                        Component::Orchestrator,
                        format!("Parallel audit unavailable, auditing sequentially: {e}"),
                    );
                    units.iter().map(audit).collect()
                }
            }
        } else {
            units.iter().map(audit).collect()
        };

        for entry in &entries {
            if let Inventory::Ready { audit, diff } = entry {
                let slug = audit.component.slug();
                ctx.persist(Category::Data, &format!("{slug}-results.json"), audit);
                ctx.persist(Category::Temp, &format!("{slug}-diff.json"), diff);
            }
        }

        let failed = entries
            .iter()
            .filter(|e| matches!(e, Inventory::Failed { .. }))
            .count();
        let audited = entries
            .iter()
            .filter(|e| matches!(e, Inventory::Ready { .. }))
            .count();
        let status = if ctx.cancel.is_cancelled() {
            PhaseStatus::Cancelled
        } else if failed == 0 {
            PhaseStatus::Completed
        } else {
            PhaseStatus::Degraded
        };
        self.end(
            ctx,
            Phase::Inventory,
            status,
            Some(format!("{audited} audited, {failed} failed")),
        );
        entries
    }

    // ------------------------------------------------------------------------
    // Confirmation and safety
    // ------------------------------------------------------------------------

    /// Returns true when the user declined
    fn confirm_changes(&mut self, ctx: &RunContext, pending: usize) -> bool {
        let needed = !self.options.dry_run
            && !ctx.cancel.is_cancelled()
            && (pending > 0 || self.options.self_audit);
        if !needed {
            return false;
        }

        let prompt = if self.options.self_audit {
            "Audit and apply changes?".to_string()
        } else {
            format!("Apply {pending} changes?")
        };
        let confirmed = match self.confirm.confirm(&prompt) {
            Ok(answer) => answer,
            Err(e) => {
                ctx.logger
                    .warning(Component::Orchestrator, format!("Confirmation failed: {e}"));
                false
            }
        };
        if !confirmed {
            ctx.logger.warning(
                Component::Orchestrator,
                "Run declined at confirmation; nothing will be changed",
            );
        }
        !confirmed
    }

    fn safety(&self, ctx: &mut RunContext, pending: usize, declined: bool) -> Option<SafetyReport> {
        let skip = if self.options.dry_run {
            Some((PhaseStatus::Skipped, "dry run"))
        } else if declined {
            Some((PhaseStatus::Skipped, "declined"))
        } else if ctx.cancel.is_cancelled() {
            Some((PhaseStatus::Cancelled, "cancelled"))
        } else if self.options.restore.is_none() {
            Some((PhaseStatus::Skipped, "disabled"))
        } else if pending == 0 && !self.options.self_audit {
            Some((PhaseStatus::Skipped, "nothing to change"))
        } else {
            None
        };

        let policy = match (skip, &self.options.restore) {
            (None, Some(policy)) => policy.clone(),
            (skip, _) => {
                let (status, reason) = skip.unwrap_or((PhaseStatus::Skipped, "disabled"));
                ctx.logger
                    .info(Component::Restore, format!("Safety net skipped: {reason}"));
                self.end(ctx, Phase::Safety, status, Some(reason.to_string()));
                return None;
            }
        };

        self.begin(ctx, Phase::Safety);
        let report = SafetyNet::new(self.restore.as_ref(), policy).run(&ctx.logger);
        let status = if report.is_protected() {
            PhaseStatus::Completed
        } else {
            PhaseStatus::Degraded
        };
        ctx.persist(Category::Data, "restore.json", &report);
        self.end(ctx, Phase::Safety, status, report.error.clone());
        Some(report)
    }

    // ------------------------------------------------------------------------
    // Reconciliation
    // ------------------------------------------------------------------------

    fn reconcile(
        &self,
        ctx: &mut RunContext,
        inventory: &[Inventory],
        declined: bool,
    ) -> Vec<ExecutionOutcome> {
        self.begin(ctx, Phase::Reconciliation);
        let mut outcomes = Vec::new();

        if declined {
            self.end(
                ctx,
                Phase::Reconciliation,
                PhaseStatus::Skipped,
                Some("declined at confirmation".to_string()),
            );
            return outcomes;
        }

        for (pair, entry) in self.units.iter().zip(inventory) {
            let component = pair.component();
            if ctx.cancel.is_cancelled() {
                ctx.logger.warning(
                    Component::Orchestrator,
                    format!("Cancelled; {component} and later units were not started"),
                );
                break;
            }

            let outcome = match entry {
                Inventory::Skipped { .. } => continue,
                Inventory::Failed { error, .. } => ExecutionOutcome::failed(
                    component,
                    format!("audit failed: {error}"),
                    self.options.dry_run,
                    ctx.logger.component_log_path(component),
                ),
                Inventory::Ready { diff, .. } => {
                    self.observer.unit_started(component, diff.len());
                    self.reconcile_one(ctx, pair, diff)
                }
            };

            ctx.logger.log_data(
                if outcome.success { Level::Info } else { Level::Warning },
                Component::Orchestrator,
                &format!("{component} finished"),
                &json!({
                    "success": outcome.success,
                    "processed": outcome.items_processed,
                    "failed": outcome.items_failed,
                    "duration_millis": outcome.duration_millis,
                }),
            );
            if let Err(e) = write_outcome(&ctx.session, &outcome) {
                ctx.logger
                    .warning(Component::Orchestrator, format!("Could not persist {component} outcome: {e}"));
            }
            self.observer.unit_finished(&outcome);
            outcomes.push(outcome);
        }

        let failed = outcomes.iter().filter(|o| !o.success).count();
        let status = if ctx.cancel.is_cancelled() {
            PhaseStatus::Cancelled
        } else if failed == 0 {
            PhaseStatus::Completed
        } else {
            PhaseStatus::Degraded
        };
        self.end(
            ctx,
            Phase::Reconciliation,
            status,
            Some(format!("{} units, {} failed", outcomes.len(), failed)),
        );
        outcomes
    }

    fn reconcile_one(&self, ctx: &RunContext, pair: &UnitPair, diff: &DiffList) -> ExecutionOutcome {
        let component = pair.component();
        let timeout = self.options.unit_timeout;
        let cancel = ctx.cancel.child();
        let apply_ctx = ApplyContext::new(self.options.dry_run, Arc::clone(&ctx.logger))
            .with_cancel(cancel.clone())
            .with_locks(Arc::clone(&ctx.locks))
            .with_callback(Arc::clone(&self.progress))
            .with_log_path(ctx.logger.component_log_path(component));
        let request = if self.options.self_audit {
            ApplyRequest::Auto
        } else {
            ApplyRequest::WithDiff(diff.clone())
        };

        let worker = {
            let pair = pair.clone();
            let config = self.config_for(component);
            let audit_ctx = ctx.audit_context();
            let apply_ctx = apply_ctx.clone();
            move || execute(request, &pair, &config, &audit_ctx, &apply_ctx)
        };

        let started = Instant::now();
        match run_bounded(component.slug(), timeout, worker) {
            Bounded::Finished(outcome) => outcome,
            Bounded::TimedOut => {
                cancel.cancel();
                let reason = format!("apply timed out after {}s", timeout.as_secs());
                ctx.logger
                    .error(component, format!("{reason}; the unit stops after its current item"));
                interrupted(component, &apply_ctx, started.elapsed(), reason)
            }
            Bounded::Aborted(message) => {
                ctx.logger.error(component, format!("Apply aborted: {message}"));
                interrupted(component, &apply_ctx, started.elapsed(), message)
            }
        }
    }

    // ------------------------------------------------------------------------
    // Reporting
    // ------------------------------------------------------------------------

    fn report(
        &self,
        ctx: &mut RunContext,
        inventory: &[Inventory],
        outcomes: &[ExecutionOutcome],
        safety: Option<&SafetyReport>,
    ) -> Option<PublishOutcome> {
        self.begin(ctx, Phase::Reporting);

        // Prefer what was persisted; fall back when a write failed earlier
        let persisted = match read_outcomes(&ctx.session) {
            Ok(read) if read.len() == outcomes.len() => read,
            Ok(_) => outcomes.to_vec(),
            Err(e) => {
                ctx.logger
                    .warning(Component::LogProcessor, format!("Could not read outcomes: {e}"));
                outcomes.to_vec()
            }
        };

        let processor = LogProcessor::new().with_logger(Arc::clone(&ctx.logger));
        let metrics = match processor.process(ctx.logger.path(), &persisted) {
            Ok(metrics) => metrics,
            Err(e) => {
                ctx.logger
                    .error(Component::LogProcessor, format!("Could not process the session log: {e}"));
                self.end(ctx, Phase::Reporting, PhaseStatus::Failed, Some(e.to_string()));
                return None;
            }
        };

        let renderer = self.renderer(ctx);
        let audits: Vec<AuditSummary> = inventory.iter().map(Inventory::summary).collect();
        let mut extra = BTreeMap::new();
        extra.insert("restore_status".to_string(), restore_status(ctx, safety));

        let data = ReportData {
            session_id: ctx.session.id(),
            started_at: ctx.session.created_at(),
            dry_run: self.options.dry_run,
            metrics: &metrics,
            audits: &audits,
            outcomes: &persisted,
            extra,
        };
        let published = renderer.publish(
            &ctx.session,
            &data,
            self.options.report_destination.as_deref(),
            &ctx.logger,
        );

        match published {
            Ok(outcome) => {
                let status = if outcome.error.is_some() {
                    PhaseStatus::Degraded
                } else {
                    PhaseStatus::Completed
                };
                self.end(ctx, Phase::Reporting, status, outcome.error.clone());
                Some(outcome)
            }
            Err(e) => {
                ctx.logger
                    .error(Component::Report, format!("Report could not be written: {e}"));
                self.end(ctx, Phase::Reporting, PhaseStatus::Failed, Some(e.to_string()));
                None
            }
        }
    }

    fn renderer(&self, ctx: &RunContext) -> ReportRenderer {
        let Some(path) = &self.options.template else {
            return ReportRenderer::new();
        };
        match ReportRenderer::from_template_file(path) {
            Ok(renderer) => renderer,
            Err(e) => {
                ctx.logger.warning(
                    Component::Report,
                    format!("Template {} unusable, using the built-in layout: {e}", path.display()),
                );
                ReportRenderer::new()
            }
        }
    }
}

/// Audit one unit within the time budget and compute its diff
fn inventory_one(
    pair: &UnitPair,
    configs: &BTreeMap<Component, UnitConfig>,
    audit_ctx: &AuditContext,
    timeout: Duration,
) -> Inventory {
    let component = pair.component();
    let logger = &audit_ctx.logger;
    let config = configs.get(&component).cloned().unwrap_or_default();

    if !config.is_enabled() {
        logger.info(component, "Disabled in configuration");
        return Inventory::Skipped {
            component,
            reason: "disabled".to_string(),
        };
    }

    let audited = {
        let unit = Arc::clone(&pair.audit);
        let (config, ctx) = (config.clone(), audit_ctx.clone());
        match run_bounded(component.slug(), timeout, move || unit.inspect(&config, &ctx)) {
            Bounded::Finished(result) => result,
            Bounded::TimedOut => Err(AuditError::TimedOut {
                component,
                seconds: timeout.as_secs(),
            }),
            Bounded::Aborted(message) => Err(AuditError::Aborted { component, message }),
        }
    };

    let audit = match audited {
        Ok(audit) if audit.component == component => audit,
        Ok(audit) => {
            let error = format!("audit returned results for {}", audit.component);
            logger.warning(component, format!("Audit rejected: {error}"));
            return Inventory::Failed { component, error };
        }
        Err(AuditError::NotConfigured { message, .. }) => {
            logger.warning(component, format!("Skipped: {message}"));
            return Inventory::Skipped {
                component,
                reason: message,
            };
        }
        Err(e) => {
            logger.warning(component, format!("Audit failed, skipping reconciliation: {e}"));
            return Inventory::Failed {
                component,
                error: e.to_string(),
            };
        }
    };

    let strategy = pair.audit.strategy();
    logger.log_data(
        Level::Info,
        component,
        &format!("Audited {} subjects", audit.len()),
        &json!({ "subjects": audit.len(), "strategy": strategy }),
    );

    let diff = match TargetPolicy::from_config(strategy, &config).and_then(|p| compute_diff(&audit, &p)) {
        Ok(diff) => diff,
        Err(e) => {
            logger.warning(
                Component::Diff,
                format!("{component}: diff failed, nothing will be applied: {e}"),
            );
            DiffList::empty(component, strategy)
        }
    };
    logger.log_data(
        Level::Info,
        Component::Diff,
        &format!("{component}: {} items out of line", diff.len()),
        &json!({ "component": component, "items": diff.keys() }),
    );

    Inventory::Ready { audit, diff }
}

fn restore_status(ctx: &RunContext, safety: Option<&SafetyReport>) -> String {
    match safety {
        Some(report) => match (&report.checkpoint, &report.error) {
            (Some(checkpoint), _) => format!(
                "checkpoint on {} ({})",
                checkpoint.drive_letter, checkpoint.description
            ),
            (None, Some(error)) => format!("unprotected ({}): {}", report.final_state, error),
            (None, None) => format!("unprotected ({})", report.final_state),
        },
        None => format!(
            "skipped ({})",
            ctx.phase_detail(Phase::Safety).unwrap_or("not attempted")
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reconcile::{
        ApplyItemError, ApplyResult, AuditUnit, DiffItem, ExecutionUnit, ResourceClass,
        StrategyKind, Subject,
    };
    use safetynet::{Error as RestoreError, RestoreCheckpoint, RestoreState};
    use session::RetainReason;
    use std::sync::Mutex;
    use tempfile::TempDir;

    const GB: u64 = 1024 * 1024 * 1024;

    /// Package-list style unit whose removals are visible to later audits
    struct MockUnit {
        component: Component,
        installed: Mutex<Vec<String>>,
        fail_keys: Vec<String>,
        audit_error: Option<String>,
        audit_delay: Duration,
        apply_delay: Duration,
        calls: Mutex<Vec<String>>,
        audits: Mutex<usize>,
    }

    impl MockUnit {
        fn new(component: Component, installed: &[&str]) -> Self {
            Self {
                component,
                installed: Mutex::new(installed.iter().map(|s| s.to_string()).collect()),
                fail_keys: Vec::new(),
                audit_error: None,
                audit_delay: Duration::ZERO,
                apply_delay: Duration::ZERO,
                calls: Mutex::new(Vec::new()),
                audits: Mutex::new(0),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn audits(&self) -> usize {
            *self.audits.lock().unwrap()
        }
    }

    impl AuditUnit for MockUnit {
        fn component(&self) -> Component {
            self.component
        }

        fn strategy(&self) -> StrategyKind {
            StrategyKind::Exclusion
        }

        fn inspect(&self, _config: &UnitConfig, _ctx: &AuditContext) -> Result<AuditResult, AuditError> {
            *self.audits.lock().unwrap() += 1;
            std::thread::sleep(self.audit_delay);
            if let Some(message) = &self.audit_error {
                return Err(AuditError::Failed {
                    component: self.component,
                    message: message.clone(),
                });
            }
            let items = self
                .installed
                .lock()
                .unwrap()
                .iter()
                .map(|k| Subject::present(k.as_str()))
                .collect();
            Ok(AuditResult::new(self.component, items))
        }
    }

    impl ExecutionUnit for MockUnit {
        fn component(&self) -> Component {
            self.component
        }

        fn resource_class(&self) -> ResourceClass {
            ResourceClass::PackageManager
        }

        fn apply_item(
            &self,
            item: &DiffItem,
            _config: &UnitConfig,
            _ctx: &ApplyContext,
        ) -> Result<ApplyResult, ApplyItemError> {
            std::thread::sleep(self.apply_delay);
            self.calls.lock().unwrap().push(item.key.clone());
            if self.fail_keys.contains(&item.key) {
                return Err(ApplyItemError::Failed {
                    key: item.key.clone(),
                    message: "access denied".into(),
                });
            }
            self.installed.lock().unwrap().retain(|k| k != &item.key);
            Ok(ApplyResult::Removed)
        }
    }

    struct MockRestore {
        allocated: Mutex<u64>,
        deny_allocation: bool,
    }

    impl MockRestore {
        fn with_allocation(bytes: u64) -> Self {
            Self {
                allocated: Mutex::new(bytes),
                deny_allocation: false,
            }
        }
    }

    impl RestoreBackend for MockRestore {
        fn allocated_bytes(&self, _drive: &str) -> safetynet::Result<u64> {
            Ok(*self.allocated.lock().unwrap())
        }

        fn allocate(&self, drive: &str, bytes: u64) -> safetynet::Result<()> {
            if self.deny_allocation {
                return Err(RestoreError::Command {
                    message: format!("resize on {drive} failed"),
                    stderr: "Error: Access is denied.".into(),
                });
            }
            *self.allocated.lock().unwrap() = bytes;
            Ok(())
        }

        fn create_checkpoint(&self, drive: &str, description: &str) -> safetynet::Result<RestoreCheckpoint> {
            Ok(RestoreCheckpoint {
                drive_letter: drive.to_string(),
                allocated_bytes: *self.allocated.lock().unwrap(),
                created_at: chrono::Utc::now(),
                description: description.to_string(),
            })
        }
    }

    const INSTALLED: [&str; 7] = [
        "Microsoft.WindowsCalculator",
        "king.com.CandyCrushSaga",
        "Microsoft.XboxApp",
        "Microsoft.WindowsStore",
        "Microsoft.ZuneMusic",
        "Microsoft.Paint",
        "Microsoft.Photos",
    ];

    fn deny_config() -> UnitConfig {
        UnitConfig::new().with(
            "deny",
            json!(["*CandyCrush*", "*Xbox*", "*Zune*", "*BingNews*", "*Solitaire*"]),
        )
    }

    struct Fixture {
        tmp: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                tmp: TempDir::new().unwrap(),
            }
        }

        fn sessions(&self) -> PathBuf {
            self.tmp.path().join("sessions")
        }

        fn reports(&self) -> PathBuf {
            self.tmp.path().join("reports")
        }

        fn options(&self) -> RunOptions {
            RunOptions {
                unit_timeout: Duration::from_secs(10),
                restore: Some(RestorePolicy::new("C:", 10 * GB, "test checkpoint")),
                report_destination: Some(self.reports()),
                ..RunOptions::default()
            }
        }

        fn orchestrator(&self, units: &[Arc<MockUnit>], options: RunOptions) -> Orchestrator {
            let pairs = units
                .iter()
                .map(|u| UnitPair::new(u.clone(), u.clone()))
                .collect();
            let configs = units.iter().map(|u| (u.component, deny_config())).collect();
            Orchestrator::new(pairs, options)
                .with_configs(configs)
                .with_restore_backend(MockRestore::with_allocation(20 * GB))
        }
    }

    #[test]
    fn test_clean_run_removes_matches_and_cleans_up() {
        let fx = Fixture::new();
        let unit = Arc::new(MockUnit::new(Component::Bloatware, &INSTALLED));
        let mut orchestrator = fx.orchestrator(&[unit.clone()], fx.options());

        let summary = orchestrator.run(&fx.sessions(), CancelToken::new()).unwrap();

        assert_eq!(
            unit.calls(),
            vec!["king.com.CandyCrushSaga", "Microsoft.XboxApp", "Microsoft.ZuneMusic"]
        );
        let outcome = &summary.outcomes[0];
        assert_eq!(outcome.items_processed, 3);
        assert_eq!(outcome.items_failed, 0);
        assert!(outcome.success);
        assert_eq!(summary.exit_code(), 0);
        assert_eq!(summary.safety.as_ref().unwrap().final_state, RestoreState::Verified);

        let exported = summary.report.unwrap().exported.unwrap();
        assert!(exported.starts_with(fx.reports()));
        let report = std::fs::read_to_string(exported).unwrap();
        assert!(report.contains(&summary.session_id));
        assert!(report.contains("checkpoint on C:"));

        assert_eq!(summary.close, Some(CloseOutcome::Removed));
        assert!(!summary.session_root.exists());
    }

    #[test]
    fn test_second_run_has_nothing_to_do() {
        let fx = Fixture::new();
        let unit = Arc::new(MockUnit::new(Component::Bloatware, &INSTALLED));

        fx.orchestrator(&[unit.clone()], fx.options())
            .run(&fx.sessions(), CancelToken::new())
            .unwrap();
        let second = fx
            .orchestrator(&[unit.clone()], fx.options())
            .run(&fx.sessions(), CancelToken::new())
            .unwrap();

        assert_eq!(unit.calls().len(), 3);
        assert_eq!(second.outcomes[0].items_detected, 0);
        assert!(second.outcomes[0].success);
        // Nothing to change means no checkpoint either
        assert!(second.safety.is_none());
    }

    #[test]
    fn test_dry_run_changes_nothing() {
        let fx = Fixture::new();
        let unit = Arc::new(MockUnit::new(Component::Bloatware, &INSTALLED));
        let options = RunOptions {
            dry_run: true,
            keep_session: true,
            ..fx.options()
        };
        let mut orchestrator = fx
            .orchestrator(&[unit.clone()], options)
            .with_confirm(AutoDecline);

        let summary = orchestrator.run(&fx.sessions(), CancelToken::new()).unwrap();

        assert!(unit.calls().is_empty());
        assert!(summary.safety.is_none());
        let outcome = &summary.outcomes[0];
        assert!(outcome.dry_run);
        assert_eq!(outcome.items_processed, 3);
        assert!(outcome
            .items
            .iter()
            .all(|i| matches!(&i.result, ApplyResult::Skipped { reason } if reason.starts_with("dry run"))));

        let root = &summary.session_root;
        assert!(root.join("data/bloatware-results.json").exists());
        assert!(root.join("temp/bloatware-diff.json").exists());
        assert!(root.join("logs/bloatware/outcome.json").exists());
        assert!(root.join("logs/maintenance.log").exists());
    }

    #[test]
    fn test_failing_unit_does_not_block_the_next_one() {
        let fx = Fixture::new();
        let broken = Arc::new(MockUnit {
            audit_error: Some("package database locked".into()),
            ..MockUnit::new(Component::Bloatware, &INSTALLED)
        });
        let partial = Arc::new(MockUnit {
            fail_keys: vec!["Microsoft.XboxApp".into()],
            ..MockUnit::new(Component::Telemetry, &INSTALLED)
        });
        let mut orchestrator = fx.orchestrator(&[broken.clone(), partial.clone()], fx.options());

        let summary = orchestrator.run(&fx.sessions(), CancelToken::new()).unwrap();

        assert!(broken.calls().is_empty());
        assert_eq!(partial.calls().len(), 3);

        let (audit, apply) = (&summary.outcomes[0], &summary.outcomes[1]);
        assert!(!audit.success);
        assert!(audit.error.as_deref().unwrap().contains("package database locked"));
        assert_eq!(apply.items_processed, 2);
        assert_eq!(apply.items_failed, 1);
        assert_eq!(summary.exit_code(), 1);

        // Failures keep the session for diagnosis
        assert!(matches!(
            summary.close,
            Some(CloseOutcome::Retained {
                reason: RetainReason::Requested,
                ..
            })
        ));
    }

    #[test]
    fn test_slow_audit_times_out() {
        let fx = Fixture::new();
        let slow = Arc::new(MockUnit {
            audit_delay: Duration::from_millis(500),
            ..MockUnit::new(Component::Bloatware, &INSTALLED)
        });
        let options = RunOptions {
            unit_timeout: Duration::from_millis(50),
            ..fx.options()
        };

        let summary = fx
            .orchestrator(&[slow], options)
            .run(&fx.sessions(), CancelToken::new())
            .unwrap();

        assert!(summary.audits[0].error.as_deref().unwrap().contains("timed out"));
        assert!(!summary.outcomes[0].success);
    }

    #[test]
    fn test_slow_apply_is_summarized_from_progress() {
        let fx = Fixture::new();
        let slow = Arc::new(MockUnit {
            apply_delay: Duration::from_millis(300),
            ..MockUnit::new(Component::Bloatware, &INSTALLED)
        });
        let options = RunOptions {
            unit_timeout: Duration::from_millis(100),
            ..fx.options()
        };

        let summary = fx
            .orchestrator(&[slow], options)
            .run(&fx.sessions(), CancelToken::new())
            .unwrap();

        let outcome = &summary.outcomes[0];
        assert!(!outcome.success);
        assert_eq!(outcome.items_detected, 3);
        assert_eq!(outcome.items_processed + outcome.items_failed, 3);
        assert!(outcome.error.as_deref().unwrap().contains("timed out"));
    }

    #[test]
    fn test_declined_run_applies_nothing() {
        let fx = Fixture::new();
        let unit = Arc::new(MockUnit::new(Component::Bloatware, &INSTALLED));
        let mut orchestrator = fx
            .orchestrator(&[unit.clone()], fx.options())
            .with_confirm(AutoDecline);

        let summary = orchestrator.run(&fx.sessions(), CancelToken::new()).unwrap();

        assert!(summary.declined);
        assert!(unit.calls().is_empty());
        assert!(summary.outcomes.is_empty());
        assert!(summary.safety.is_none());
        assert_eq!(summary.exit_code(), 0);
    }

    #[test]
    fn test_cancelled_run_starts_no_unit() {
        let fx = Fixture::new();
        let unit = Arc::new(MockUnit::new(Component::Bloatware, &INSTALLED));
        let cancel = CancelToken::new();
        cancel.cancel();

        let summary = fx
            .orchestrator(&[unit.clone()], fx.options())
            .run(&fx.sessions(), cancel)
            .unwrap();

        assert!(unit.calls().is_empty());
        assert!(summary.cancelled);
        assert_eq!(summary.exit_code(), EXIT_CANCELLED);
        assert!(summary.report.is_some());
    }

    #[test]
    fn test_cancelled_run_starts_no_audit() {
        let fx = Fixture::new();
        let units: Vec<Arc<MockUnit>> = Component::UNITS
            .iter()
            .map(|&c| Arc::new(MockUnit::new(c, &INSTALLED)))
            .collect();

        for jobs in [1, 3] {
            let cancel = CancelToken::new();
            cancel.cancel();
            let options = RunOptions {
                audit_jobs: jobs,
                ..fx.options()
            };

            let summary = fx
                .orchestrator(&units, options)
                .run(&fx.sessions(), cancel)
                .unwrap();

            assert!(summary.cancelled);
            assert!(summary.outcomes.is_empty());
            assert!(
                summary
                    .audits
                    .iter()
                    .all(|a| a.error.as_deref() == Some("skipped: cancelled"))
            );
            let manifest_path = summary
                .session_root
                .join("data")
                .read_dir()
                .unwrap()
                .map(|e| e.unwrap().path())
                .find(|p| p.file_name().unwrap().to_string_lossy().starts_with("session-"))
                .unwrap();
            let manifest: SessionManifest =
                serde_json::from_str(&std::fs::read_to_string(manifest_path).unwrap()).unwrap();
            assert_eq!(manifest.status_of(Phase::Inventory), Some(PhaseStatus::Cancelled));
        }
        assert!(units.iter().all(|u| u.audits() == 0));
    }

    #[test]
    fn test_insufficient_restore_space_continues_unprotected() {
        let fx = Fixture::new();
        let unit = Arc::new(MockUnit::new(Component::Bloatware, &INSTALLED));
        let restore = MockRestore {
            allocated: Mutex::new(GB),
            deny_allocation: true,
        };
        let mut orchestrator = fx
            .orchestrator(&[unit.clone()], fx.options())
            .with_restore_backend(restore);

        let summary = orchestrator.run(&fx.sessions(), CancelToken::new()).unwrap();

        let safety = summary.safety.as_ref().unwrap();
        assert_eq!(safety.final_state, RestoreState::Failed);
        assert!(safety.checkpoint.is_none());
        assert_eq!(unit.calls().len(), 3);
        assert!(summary.outcomes[0].success);
        let report = std::fs::read_to_string(summary.report.unwrap().artifact.clone());
        // Degraded safety keeps the session, so the artifact is still there
        assert!(report.unwrap().contains("unprotected (failed)"));
    }

    #[test]
    fn test_unexported_report_keeps_session() {
        let fx = Fixture::new();
        let unit = Arc::new(MockUnit::new(Component::Bloatware, &INSTALLED));
        let options = RunOptions {
            report_destination: None,
            ..fx.options()
        };

        let summary = fx
            .orchestrator(&[unit], options)
            .run(&fx.sessions(), CancelToken::new())
            .unwrap();

        assert!(matches!(
            summary.close,
            Some(CloseOutcome::Retained {
                reason: RetainReason::ReportNotExported,
                ..
            })
        ));
        assert!(summary.session_root.join("reports").is_dir());
    }

    #[test]
    fn test_parallel_inventory_keeps_table_order() {
        let fx = Fixture::new();
        let first = Arc::new(MockUnit {
            audit_delay: Duration::from_millis(50),
            ..MockUnit::new(Component::Bloatware, &INSTALLED)
        });
        let second = Arc::new(MockUnit::new(Component::Telemetry, &INSTALLED));
        let options = RunOptions {
            audit_jobs: 2,
            ..fx.options()
        };

        let preview = fx
            .orchestrator(&[first, second], options)
            .preview(&fx.sessions())
            .unwrap();

        let components: Vec<Component> = preview.inventory.iter().map(Inventory::component).collect();
        assert_eq!(components, vec![Component::Bloatware, Component::Telemetry]);
        assert!(preview.session_root.join("data/telemetry-results.json").exists());
    }

    #[test]
    fn test_self_audit_applies_the_same_items() {
        let fx = Fixture::new();
        let unit = Arc::new(MockUnit::new(Component::Bloatware, &INSTALLED));
        let options = RunOptions {
            self_audit: true,
            ..fx.options()
        };

        let summary = fx
            .orchestrator(&[unit.clone()], options)
            .run(&fx.sessions(), CancelToken::new())
            .unwrap();

        assert_eq!(unit.calls().len(), 3);
        assert_eq!(summary.outcomes[0].items_processed, 3);
    }
}
