//! Preinstalled app removal
//!
//! Audit lists installed packages, the exclusion strategy picks the ones
//! matching `deny` (minus `allow`), and each is removed individually.

use crate::units::backend::{CommandRunner, CommandTemplate};
use reconcile::{
    ApplyContext, ApplyItemError, ApplyResult, AuditContext, AuditError, AuditResult, AuditUnit,
    DiffAction, DiffItem, ExecutionUnit, ResourceClass, StrategyKind, Subject, UnitConfig,
};
use session::Component;
use std::sync::Arc;

#[cfg(windows)]
const DEFAULT_LIST: Option<&[&str]> = Some(&[
    "powershell",
    "-NoProfile",
    "-NonInteractive",
    "-Command",
    "Get-AppxPackage | ForEach-Object { \"$($_.Name)`t$($_.Publisher)\" }",
]);
#[cfg(not(windows))]
const DEFAULT_LIST: Option<&[&str]> = None;

#[cfg(windows)]
const DEFAULT_REMOVE: Option<&[&str]> = Some(&[
    "powershell",
    "-NoProfile",
    "-NonInteractive",
    "-Command",
    "Get-AppxPackage -Name '{id}' | Remove-AppxPackage -ErrorAction Stop",
]);
#[cfg(not(windows))]
const DEFAULT_REMOVE: Option<&[&str]> = None;

/// Audits and removes unwanted packages
pub struct Bloatware {
    runner: Arc<dyn CommandRunner>,
}

impl Bloatware {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

/// One package per line: `id` or `id<TAB>publisher`
fn parse_listing(stdout: &str) -> Vec<Subject> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|line| {
            let mut parts = line.splitn(2, '\t');
            let id = parts.next().unwrap_or(line).trim();
            let subject = Subject::present(id);
            match parts.next().map(str::trim).filter(|p| !p.is_empty()) {
                Some(publisher) => subject.with_detail("publisher", publisher),
                None => subject,
            }
        })
        .collect()
}

impl AuditUnit for Bloatware {
    fn component(&self) -> Component {
        Component::Bloatware
    }

    fn strategy(&self) -> StrategyKind {
        StrategyKind::Exclusion
    }

    fn inspect(&self, config: &UnitConfig, ctx: &AuditContext) -> Result<AuditResult, AuditError> {
        let list = CommandTemplate::from_config(config, "list_command", DEFAULT_LIST)
            .map_err(|e| e.into_audit(Component::Bloatware))?;
        let captured = list
            .run(self.runner.as_ref(), &[])
            .map_err(|e| e.into_audit(Component::Bloatware))?;

        let cached = ctx
            .inventory_path("bloatware-packages.txt")
            .map_err(|e| e.to_string())
            .and_then(|cache| std::fs::write(&cache, &captured.stdout).map_err(|e| e.to_string()));
        if let Err(e) = cached {
            log::debug!("Could not cache package listing: {e}");
        }

        let items = parse_listing(&captured.stdout);
        ctx.logger
            .info(Component::Bloatware, format!("Found {} installed packages", items.len()));
        Ok(AuditResult::new(Component::Bloatware, items))
    }
}

impl ExecutionUnit for Bloatware {
    fn component(&self) -> Component {
        Component::Bloatware
    }

    fn resource_class(&self) -> ResourceClass {
        ResourceClass::PackageManager
    }

    fn apply_item(
        &self,
        item: &DiffItem,
        config: &UnitConfig,
        _ctx: &ApplyContext,
    ) -> Result<ApplyResult, ApplyItemError> {
        if item.action != DiffAction::Remove {
            return Err(ApplyItemError::Unsupported {
                key: item.key.clone(),
                action: item.action.verb(),
            });
        }

        let remove = CommandTemplate::from_config(config, "remove_command", DEFAULT_REMOVE)
            .map_err(|e| e.into_apply(&item.key))?;
        remove
            .run(self.runner.as_ref(), &[("id", item.key.as_str())])
            .map_err(|e| e.into_apply(&item.key))?;
        Ok(ApplyResult::Removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::backend::testing::ScriptedRunner;
    use reconcile::{ApplyRequest, TargetPolicy, UnitPair, compute_diff, execute};
    use serde_json::json;
    use session::Logger;
    use tempfile::TempDir;

    const LISTING: &str = "Microsoft.WindowsCalculator\tCN=Microsoft\n\
king.com.CandyCrushSaga\tCN=King\n\
Microsoft.XboxApp\tCN=Microsoft\n\
Microsoft.WindowsStore\tCN=Microsoft\n\
Microsoft.ZuneMusic\tCN=Microsoft\n";

    fn config() -> UnitConfig {
        UnitConfig::new()
            .with("list_command", json!(["pkg", "list"]))
            .with("remove_command", json!(["pkg", "remove", "{id}"]))
            .with(
                "deny",
                json!(["*CandyCrush*", "*Xbox*", "*Zune*", "*BingNews*", "*Solitaire*"]),
            )
    }

    #[test]
    fn test_parse_listing() {
        let items = parse_listing(LISTING);
        assert_eq!(items.len(), 5);
        assert_eq!(items[1].key, "king.com.CandyCrushSaga");
        assert_eq!(items[1].details["publisher"], "CN=King");
    }

    #[test]
    fn test_clean_run_removes_exactly_the_matches() {
        let tmp = TempDir::new().unwrap();
        let logger = Arc::new(Logger::open(tmp.path().join("maintenance.log")).with_mirror(false));
        let runner = Arc::new(
            ScriptedRunner::default()
                .respond("pkg list", LISTING)
                .respond("pkg remove king.com.CandyCrushSaga", "")
                .respond("pkg remove Microsoft.XboxApp", "")
                .respond("pkg remove Microsoft.ZuneMusic", ""),
        );
        let unit = Arc::new(Bloatware::new(runner.clone()));
        let pair = UnitPair::new(unit.clone(), unit);
        let audit_ctx = AuditContext::new(tmp.path().to_path_buf(), logger.clone());

        let audit = pair.audit.inspect(&config(), &audit_ctx).unwrap();
        let policy = TargetPolicy::from_config(StrategyKind::Exclusion, &config()).unwrap();
        let diff = compute_diff(&audit, &policy).unwrap();
        assert_eq!(diff.len(), 3);

        let outcome = execute(
            ApplyRequest::WithDiff(diff),
            &pair,
            &config(),
            &audit_ctx,
            &ApplyContext::new(false, logger),
        );

        assert_eq!(outcome.items_processed, 3);
        assert_eq!(outcome.items_failed, 0);
        assert!(outcome.success);
        assert_eq!(runner.calls().len(), 4);
        assert!(tmp.path().join("bloatware-packages.txt").exists());
    }

    #[test]
    fn test_missing_list_command_is_not_configured() {
        let tmp = TempDir::new().unwrap();
        let logger = Arc::new(Logger::open(tmp.path().join("maintenance.log")).with_mirror(false));
        let unit = Bloatware::new(Arc::new(ScriptedRunner::default()));
        let ctx = AuditContext::new(tmp.path().to_path_buf(), logger);

        let result = unit.inspect(&UnitConfig::new().with("list_command", json!([])), &ctx);
        if cfg!(windows) {
            // The default command is unscripted here, so it fails to spawn
            assert!(matches!(result, Err(AuditError::Failed { .. })));
        } else {
            assert!(matches!(result, Err(AuditError::NotConfigured { .. })));
        }
    }
}
