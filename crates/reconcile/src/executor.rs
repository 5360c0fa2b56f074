//! Apply engine - walks a diff list item by item
//!
//! The executor owns the rules every unit shares: empty diffs never reach
//! the unit, dry runs never call `apply_item`, a failing item is counted and
//! the loop moves on, and cancellation is honoured between items only.

use crate::context::{ApplyContext, AuditContext};
use crate::diff::{TargetPolicy, compute_diff};
use crate::error::ApplyItemError;
use crate::types::{ApplyResult, DiffItem, DiffList, ExecutionOutcome, ItemOutcome};
use crate::unit::{ExecutionUnit, UnitConfig, UnitPair};
use serde_json::json;
use session::{Component, Level};
use std::time::{Duration, Instant};

/// How an execution unit receives its work
#[derive(Debug, Clone)]
pub enum ApplyRequest {
    /// Apply a diff computed earlier in the run
    WithDiff(DiffList),
    /// Audit and diff first, then apply
    Auto,
}

/// Dispatch a request to the matching entry point
pub fn execute(
    request: ApplyRequest,
    pair: &UnitPair,
    config: &UnitConfig,
    audit_ctx: &AuditContext,
    ctx: &ApplyContext,
) -> ExecutionOutcome {
    match request {
        ApplyRequest::WithDiff(diff) => apply_with_diff(pair.exec.as_ref(), config, &diff, ctx),
        ApplyRequest::Auto => apply_auto(pair, config, audit_ctx, ctx),
    }
}

/// Apply a precomputed diff
pub fn apply_with_diff(
    unit: &dyn ExecutionUnit,
    config: &UnitConfig,
    diff: &DiffList,
    ctx: &ApplyContext,
) -> ExecutionOutcome {
    let component = unit.component();
    let logger = &ctx.logger;

    if diff.component != component {
        let message = format!("diff for {} handed to the {} unit", diff.component, component);
        logger.error(component, message.clone());
        return ExecutionOutcome::failed(component, message, ctx.dry_run, ctx.log_path.clone());
    }

    if diff.is_empty() {
        logger.info(component, "Nothing to apply");
        return ExecutionOutcome::empty(component, ctx.dry_run, ctx.log_path.clone());
    }

    let started = Instant::now();
    ctx.progress.set_detected(diff.len());

    // Simulation touches nothing, so it needs no exclusion
    let _guard = (!ctx.dry_run).then(|| ctx.locks.acquire(unit.resource_class()));

    logger.log_data(
        Level::Info,
        component,
        if ctx.dry_run {
            "Simulating diff"
        } else {
            "Applying diff"
        },
        &json!({ "items": diff.len(), "strategy": diff.strategy }),
    );

    let mut items = Vec::with_capacity(diff.len());
    for item in &diff.items {
        if ctx.cancel.is_cancelled() {
            let result = ApplyResult::Failed {
                error: "cancelled".to_string(),
            };
            ctx.progress.record(&result);
            ctx.callback.on_item_complete(item, &result);
            items.push(ItemOutcome {
                key: item.key.clone(),
                result,
            });
            continue;
        }

        ctx.callback.on_item_start(item);
        let result = if ctx.dry_run {
            ApplyResult::Skipped {
                reason: format!("dry run: would {}", item.action.describe(&item.name)),
            }
        } else {
            apply_one(unit, item, config, ctx)
        };
        log_item(ctx, component, item, &result);
        ctx.progress.record(&result);
        ctx.callback.on_item_complete(item, &result);
        items.push(ItemOutcome {
            key: item.key.clone(),
            result,
        });
    }

    let failed = items.iter().filter(|i| !i.result.is_success()).count();
    let outcome = ExecutionOutcome {
        component,
        success: failed == 0,
        items_detected: diff.len(),
        items_processed: items.len() - failed,
        items_failed: failed,
        duration_millis: elapsed_millis(started.elapsed()),
        dry_run: ctx.dry_run,
        log_path: ctx.log_path.clone(),
        items,
        error: ctx
            .cancel
            .is_cancelled()
            .then(|| "cancelled before all items were attempted".to_string())
            .filter(|_| failed > 0),
    };

    let message = format!(
        "Processed {} of {} items ({} failed)",
        outcome.items_processed, outcome.items_detected, outcome.items_failed
    );
    if outcome.success {
        logger.success(component, message);
    } else {
        logger.warning(component, message);
    }
    outcome
}

/// Audit, diff and apply in one call.
///
/// Produces the same outcome shape as [`apply_with_diff`]. An audit failure
/// yields a failed outcome; a diff failure is logged and treated as an
/// empty diff.
pub fn apply_auto(
    pair: &UnitPair,
    config: &UnitConfig,
    audit_ctx: &AuditContext,
    ctx: &ApplyContext,
) -> ExecutionOutcome {
    let component = pair.component();
    let started = Instant::now();

    let audit = match pair.audit.inspect(config, audit_ctx) {
        Ok(audit) => audit,
        Err(e) => {
            ctx.logger.warning(component, format!("Audit failed: {e}"));
            let mut outcome =
                ExecutionOutcome::failed(component, e.to_string(), ctx.dry_run, ctx.log_path.clone());
            outcome.duration_millis = elapsed_millis(started.elapsed());
            return outcome;
        }
    };

    let strategy = pair.audit.strategy();
    let diff = match TargetPolicy::from_config(strategy, config).and_then(|p| compute_diff(&audit, &p)) {
        Ok(diff) => diff,
        Err(e) => {
            ctx.logger
                .warning(Component::Diff, format!("{component}: diff failed, nothing will be applied: {e}"));
            DiffList::empty(component, strategy)
        }
    };

    let mut outcome = apply_with_diff(pair.exec.as_ref(), config, &diff, ctx);
    outcome.duration_millis = elapsed_millis(started.elapsed());
    outcome
}

/// Outcome for an apply that was abandoned (timeout, lost worker).
///
/// Built from the shared progress counters; items not yet recorded count as
/// failed.
pub fn interrupted(
    component: Component,
    ctx: &ApplyContext,
    elapsed: Duration,
    reason: impl Into<String>,
) -> ExecutionOutcome {
    let snapshot = ctx.progress.snapshot();
    let reason = reason.into();
    if snapshot.detected == 0 {
        let mut outcome = ExecutionOutcome::failed(component, reason, ctx.dry_run, ctx.log_path.clone());
        outcome.duration_millis = elapsed_millis(elapsed);
        return outcome;
    }

    let failed = snapshot.failed + snapshot.remaining();
    ExecutionOutcome {
        component,
        success: failed == 0,
        items_detected: snapshot.detected,
        items_processed: snapshot.processed,
        items_failed: failed,
        duration_millis: elapsed_millis(elapsed),
        dry_run: ctx.dry_run,
        log_path: ctx.log_path.clone(),
        items: Vec::new(),
        error: Some(reason),
    }
}

fn apply_one(
    unit: &dyn ExecutionUnit,
    item: &DiffItem,
    config: &UnitConfig,
    ctx: &ApplyContext,
) -> ApplyResult {
    match unit.apply_item(item, config, ctx) {
        Ok(result) => result,
        Err(ApplyItemError::Command { message, stderr, .. }) if !stderr.trim().is_empty() => {
            ApplyResult::Failed {
                error: format!("{message}: {}", stderr.trim()),
            }
        }
        Err(e) => ApplyResult::Failed {
            error: e.to_string(),
        },
    }
}

fn log_item(ctx: &ApplyContext, component: Component, item: &DiffItem, result: &ApplyResult) {
    let (level, verb) = match result {
        ApplyResult::Failed { .. } => (Level::Error, "Failed to"),
        ApplyResult::NoChange => (Level::Debug, "Already satisfied:"),
        ApplyResult::Skipped { .. } => (Level::Info, "Skipped:"),
        _ => (Level::Success, "Done:"),
    };
    ctx.logger.log_data(
        level,
        component,
        &format!("{verb} {}", item.action.describe(&item.name)),
        &json!({ "key": item.key, "outcome": result }),
    );
}

fn elapsed_millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ResourceClass;
    use crate::error::AuditError;
    use crate::types::{AuditResult, DiffAction, StrategyKind, Subject};
    use crate::unit::AuditUnit;
    use serde_json::json;
    use session::Logger;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    /// Execution unit that records every call
    #[derive(Default)]
    struct TestUnit {
        calls: Mutex<Vec<String>>,
        fail_on: Option<String>,
        cancel_after: Option<usize>,
    }

    impl TestUnit {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl ExecutionUnit for TestUnit {
        fn component(&self) -> Component {
            Component::Bloatware
        }

        fn resource_class(&self) -> ResourceClass {
            ResourceClass::PackageManager
        }

        fn apply_item(
            &self,
            item: &DiffItem,
            _config: &UnitConfig,
            ctx: &ApplyContext,
        ) -> Result<ApplyResult, ApplyItemError> {
            let mut calls = self.calls.lock().unwrap();
            calls.push(item.key.clone());
            if self.cancel_after == Some(calls.len()) {
                ctx.cancel.cancel();
            }
            if self.fail_on.as_deref() == Some(item.key.as_str()) {
                return Err(ApplyItemError::Command {
                    key: item.key.clone(),
                    message: "remove command exited with 1".into(),
                    stderr: "access denied".into(),
                });
            }
            Ok(ApplyResult::Removed)
        }
    }

    struct TestAudit {
        items: Vec<Subject>,
        fail: bool,
    }

    impl AuditUnit for TestAudit {
        fn component(&self) -> Component {
            Component::Bloatware
        }

        fn strategy(&self) -> StrategyKind {
            StrategyKind::Exclusion
        }

        fn inspect(&self, _config: &UnitConfig, _ctx: &AuditContext) -> Result<AuditResult, AuditError> {
            if self.fail {
                return Err(AuditError::Failed {
                    component: Component::Bloatware,
                    message: "package query failed".into(),
                });
            }
            Ok(AuditResult::new(Component::Bloatware, self.items.clone()))
        }
    }

    fn logger(tmp: &TempDir) -> Arc<Logger> {
        Arc::new(Logger::open(tmp.path().join("maintenance.log")).with_mirror(false))
    }

    fn diff_of(keys: &[&str]) -> DiffList {
        let mut diff = DiffList::empty(Component::Bloatware, StrategyKind::Exclusion);
        diff.items = keys
            .iter()
            .map(|k| DiffItem {
                key: (*k).to_string(),
                name: (*k).to_string(),
                action: DiffAction::Remove,
            })
            .collect();
        diff
    }

    fn deny_config() -> UnitConfig {
        UnitConfig::new().with("deny", json!(["*Candy*", "*Xbox*", "*Zune*"]))
    }

    #[test]
    fn test_empty_diff_makes_no_calls() {
        let tmp = TempDir::new().unwrap();
        let unit = TestUnit::default();
        let ctx = ApplyContext::new(false, logger(&tmp));

        let outcome = apply_with_diff(&unit, &UnitConfig::new(), &diff_of(&[]), &ctx);

        assert!(unit.calls().is_empty());
        assert!(outcome.success);
        assert_eq!(outcome.items_detected, 0);
        assert_eq!(outcome.items_processed, 0);
        assert_eq!(outcome.items_failed, 0);
    }

    #[test]
    fn test_failing_item_does_not_stop_the_loop() {
        let tmp = TempDir::new().unwrap();
        let unit = TestUnit {
            fail_on: Some("b".into()),
            ..Default::default()
        };
        let ctx = ApplyContext::new(false, logger(&tmp));

        let outcome = apply_with_diff(&unit, &UnitConfig::new(), &diff_of(&["a", "b", "c", "d"]), &ctx);

        assert_eq!(unit.calls(), vec!["a", "b", "c", "d"]);
        assert_eq!(outcome.items_detected, 4);
        assert_eq!(outcome.items_processed, 3);
        assert_eq!(outcome.items_failed, 1);
        assert!(!outcome.success);
        assert_eq!(
            outcome.items[1].result,
            ApplyResult::Failed {
                error: "remove command exited with 1: access denied".into()
            }
        );
    }

    #[test]
    fn test_dry_run_simulates_every_item() {
        let tmp = TempDir::new().unwrap();
        let unit = TestUnit::default();
        let ctx = ApplyContext::new(true, logger(&tmp));

        let outcome = apply_with_diff(&unit, &UnitConfig::new(), &diff_of(&["a", "b"]), &ctx);

        assert!(unit.calls().is_empty());
        assert!(outcome.dry_run);
        assert!(outcome.success);
        assert_eq!(outcome.items_processed, 2);
        for item in &outcome.items {
            match &item.result {
                ApplyResult::Skipped { reason } => assert!(reason.starts_with("dry run: would remove")),
                other => panic!("unexpected result {other:?}"),
            }
        }
    }

    #[test]
    fn test_cancellation_stops_between_items() {
        let tmp = TempDir::new().unwrap();
        let unit = TestUnit {
            cancel_after: Some(2),
            ..Default::default()
        };
        let ctx = ApplyContext::new(false, logger(&tmp));

        let outcome = apply_with_diff(&unit, &UnitConfig::new(), &diff_of(&["a", "b", "c", "d"]), &ctx);

        // The item in flight when cancellation arrived still completes
        assert_eq!(unit.calls(), vec!["a", "b"]);
        assert_eq!(outcome.items_processed, 2);
        assert_eq!(outcome.items_failed, 2);
        assert!(!outcome.success);
        assert!(outcome.error.is_some());
    }

    #[test]
    fn test_mismatched_diff_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let unit = TestUnit::default();
        let ctx = ApplyContext::new(false, logger(&tmp));
        let mut diff = diff_of(&["a"]);
        diff.component = Component::Telemetry;

        let outcome = apply_with_diff(&unit, &UnitConfig::new(), &diff, &ctx);

        assert!(unit.calls().is_empty());
        assert!(!outcome.success);
        assert_eq!(outcome.items_failed, 1);
    }

    #[test]
    fn test_auto_matches_with_diff_shape() {
        let tmp = TempDir::new().unwrap();
        let items = vec![
            Subject::present("king.com.CandyCrushSaga"),
            Subject::present("Microsoft.WindowsStore"),
            Subject::present("Microsoft.XboxApp"),
        ];
        let pair = UnitPair::new(
            Arc::new(TestAudit {
                items: items.clone(),
                fail: false,
            }),
            Arc::new(TestUnit::default()),
        );
        let audit_ctx = AuditContext::new(tmp.path().to_path_buf(), logger(&tmp));
        let config = deny_config();

        let auto = execute(
            ApplyRequest::Auto,
            &pair,
            &config,
            &audit_ctx,
            &ApplyContext::new(false, logger(&tmp)),
        );

        let policy = TargetPolicy::from_config(StrategyKind::Exclusion, &config).unwrap();
        let diff = compute_diff(&AuditResult::new(Component::Bloatware, items), &policy).unwrap();
        let direct = execute(
            ApplyRequest::WithDiff(diff),
            &pair,
            &config,
            &audit_ctx,
            &ApplyContext::new(false, logger(&tmp)),
        );

        assert_eq!(auto.items_detected, 2);
        assert_eq!(auto.items_detected, direct.items_detected);
        assert_eq!(auto.items_processed, direct.items_processed);
        assert_eq!(auto.items_failed, direct.items_failed);
        assert_eq!(auto.items, direct.items);
        assert_eq!(auto.success, direct.success);
    }

    #[test]
    fn test_auto_with_failed_audit() {
        let tmp = TempDir::new().unwrap();
        let exec = Arc::new(TestUnit::default());
        let pair = UnitPair::new(
            Arc::new(TestAudit {
                items: vec![],
                fail: true,
            }),
            exec.clone(),
        );
        let audit_ctx = AuditContext::new(tmp.path().to_path_buf(), logger(&tmp));

        let outcome = apply_auto(&pair, &deny_config(), &audit_ctx, &ApplyContext::new(false, logger(&tmp)));

        assert!(exec.calls().is_empty());
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("package query failed"));
    }

    #[test]
    fn test_interrupted_counts_remaining_as_failed() {
        let tmp = TempDir::new().unwrap();
        let ctx = ApplyContext::new(false, logger(&tmp));
        ctx.progress.set_detected(5);
        ctx.progress.record(&ApplyResult::Removed);
        ctx.progress.record(&ApplyResult::Removed);

        let outcome = interrupted(Component::Bloatware, &ctx, Duration::from_secs(3), "timed out");

        assert_eq!(outcome.items_detected, 5);
        assert_eq!(outcome.items_processed, 2);
        assert_eq!(outcome.items_failed, 3);
        assert!(!outcome.success);
        assert_eq!(outcome.duration_millis, 3000);
    }
}
