//! Performance tunables
//!
//! Numeric settings (kernel tunables by default) compared against
//! `targets` with a tolerance. Values that do not parse as numbers are
//! reported as unknown and left alone.

use crate::units::backend::{BackendError, CommandRunner, CommandTemplate};
use crate::units::format_number;
use reconcile::{
    ApplyContext, ApplyItemError, ApplyResult, AuditContext, AuditError, AuditResult, AuditUnit,
    DiffAction, DiffItem, ExecutionUnit, ResourceClass, StrategyKind, Subject, SubjectState,
    UnitConfig,
};
use session::Component;
use std::sync::Arc;

#[cfg(target_os = "linux")]
const DEFAULT_QUERY: Option<&[&str]> = Some(&["sysctl", "-n", "{key}"]);
#[cfg(not(target_os = "linux"))]
const DEFAULT_QUERY: Option<&[&str]> = None;

#[cfg(target_os = "linux")]
const DEFAULT_SET: Option<&[&str]> = Some(&["sysctl", "-w", "{key}={value}"]);
#[cfg(not(target_os = "linux"))]
const DEFAULT_SET: Option<&[&str]> = None;

/// Audits and adjusts numeric tunables
pub struct Optimization {
    runner: Arc<dyn CommandRunner>,
}

impl Optimization {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    fn query(&self, template: &CommandTemplate, key: &str) -> Result<SubjectState, BackendError> {
        match template.run(self.runner.as_ref(), &[("key", key)]) {
            Ok(captured) => Ok(parse_value(captured.text())),
            Err(BackendError::Failed { .. }) => Ok(SubjectState::Absent),
            Err(e) => Err(e),
        }
    }
}

fn parse_value(text: &str) -> SubjectState {
    // Multi-value tunables ("4096 16384 4194304") are not scalar
    match text.parse::<f64>() {
        Ok(value) if value.is_finite() => SubjectState::Numeric { value },
        _ => SubjectState::Unknown,
    }
}

impl AuditUnit for Optimization {
    fn component(&self) -> Component {
        Component::Optimization
    }

    fn strategy(&self) -> StrategyKind {
        StrategyKind::Threshold
    }

    fn inspect(&self, config: &UnitConfig, ctx: &AuditContext) -> Result<AuditResult, AuditError> {
        let targets = config.f64_map("targets")?;
        if targets.is_empty() {
            return Ok(AuditResult::new(Component::Optimization, Vec::new()));
        }
        let query = CommandTemplate::from_config(config, "query_command", DEFAULT_QUERY)
            .map_err(|e| e.into_audit(Component::Optimization))?;

        let mut items = Vec::with_capacity(targets.len());
        for key in targets.keys() {
            let state = self
                .query(&query, key)
                .map_err(|e| e.into_audit(Component::Optimization))?;
            if state == SubjectState::Unknown {
                ctx.logger
                    .warning(Component::Optimization, format!("{key} is not a numeric value"));
            }
            items.push(Subject::new(key.clone(), key.clone(), state));
        }
        Ok(AuditResult::new(Component::Optimization, items))
    }
}

impl ExecutionUnit for Optimization {
    fn component(&self) -> Component {
        Component::Optimization
    }

    fn resource_class(&self) -> ResourceClass {
        ResourceClass::Settings
    }

    fn apply_item(
        &self,
        item: &DiffItem,
        config: &UnitConfig,
        _ctx: &ApplyContext,
    ) -> Result<ApplyResult, ApplyItemError> {
        let DiffAction::Adjust { to, .. } = item.action else {
            return Err(ApplyItemError::Unsupported {
                key: item.key.clone(),
                action: item.action.verb(),
            });
        };

        let set = CommandTemplate::from_config(config, "set_command", DEFAULT_SET)
            .map_err(|e| e.into_apply(&item.key))?;
        let value = format_number(to);
        set.run(self.runner.as_ref(), &[("key", item.key.as_str()), ("value", value.as_str())])
            .map_err(|e| e.into_apply(&item.key))?;

        if config.get("verify").and_then(serde_json::Value::as_bool) == Some(true) {
            let query = CommandTemplate::from_config(config, "query_command", DEFAULT_QUERY)
                .map_err(|e| e.into_apply(&item.key))?;
            match self.query(&query, &item.key).map_err(|e| e.into_apply(&item.key))? {
                SubjectState::Numeric { value } if value == to => {}
                other => {
                    return Err(ApplyItemError::Failed {
                        key: item.key.clone(),
                        message: format!("value did not stick (now {})", describe(&other)),
                    });
                }
            }
        }

        Ok(ApplyResult::Modified)
    }
}

fn describe(state: &SubjectState) -> String {
    match state {
        SubjectState::Numeric { value } => format_number(*value),
        other => other.label().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::backend::testing::ScriptedRunner;
    use reconcile::{TargetPolicy, compute_diff};
    use serde_json::json;
    use session::Logger;
    use tempfile::TempDir;

    fn config() -> UnitConfig {
        UnitConfig::new()
            .with("query_command", json!(["sysctl", "-n", "{key}"]))
            .with("set_command", json!(["sysctl", "-w", "{key}={value}"]))
            .with(
                "targets",
                json!({ "vm.swappiness": 10, "vm.dirty_ratio": 20, "net.ipv4.tcp_rmem": 4096 }),
            )
            .with("tolerance", 2)
    }

    fn runner() -> ScriptedRunner {
        ScriptedRunner::default()
            .respond("sysctl -n vm.swappiness", "60\n")
            .respond("sysctl -n vm.dirty_ratio", "21\n")
            .respond("sysctl -n net.ipv4.tcp_rmem", "4096\t131072\t6291456\n")
    }

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value("60"), SubjectState::Numeric { value: 60.0 });
        assert_eq!(parse_value("0.5"), SubjectState::Numeric { value: 0.5 });
        assert_eq!(parse_value("4096 16384"), SubjectState::Unknown);
        assert_eq!(parse_value("NaN"), SubjectState::Unknown);
    }

    #[test]
    fn test_only_drift_beyond_tolerance_is_adjusted() {
        let tmp = TempDir::new().unwrap();
        let logger = Arc::new(Logger::open(tmp.path().join("maintenance.log")).with_mirror(false));
        let runner = Arc::new(runner().respond("sysctl -w vm.swappiness=10", "vm.swappiness = 10\n"));
        let unit = Optimization::new(runner.clone());
        let audit_ctx = AuditContext::new(tmp.path().to_path_buf(), logger.clone());

        let audit = unit.inspect(&config(), &audit_ctx).unwrap();
        assert_eq!(audit.find("net.ipv4.tcp_rmem").unwrap().state, SubjectState::Unknown);

        let policy = TargetPolicy::from_config(StrategyKind::Threshold, &config()).unwrap();
        let diff = compute_diff(&audit, &policy).unwrap();
        assert_eq!(diff.keys(), vec!["vm.swappiness"]);

        let result = unit
            .apply_item(&diff.items[0], &config(), &ApplyContext::new(false, logger))
            .unwrap();
        assert_eq!(result, ApplyResult::Modified);
        assert!(runner.calls().contains(&"sysctl -w vm.swappiness=10".to_string()));
    }

    #[test]
    fn test_verify_detects_value_that_did_not_stick() {
        let tmp = TempDir::new().unwrap();
        let logger = Arc::new(Logger::open(tmp.path().join("maintenance.log")).with_mirror(false));
        // The query keeps answering 60 after the write
        let runner = Arc::new(runner().respond("sysctl -w vm.swappiness=10", ""));
        let unit = Optimization::new(runner);
        let item = DiffItem {
            key: "vm.swappiness".into(),
            name: "vm.swappiness".into(),
            action: DiffAction::Adjust { from: 60.0, to: 10.0 },
        };

        let err = unit
            .apply_item(&item, &config().with("verify", true), &ApplyContext::new(false, logger))
            .unwrap_err();
        assert!(err.to_string().contains("did not stick (now 60)"));
    }
}
