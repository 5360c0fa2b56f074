//! Privacy and telemetry settings
//!
//! Keys are registry value paths such as
//! `HKLM:\SOFTWARE\Policies\Microsoft\Windows\DataCollection\AllowTelemetry`;
//! the part after the last backslash is the value name. The setting
//! strategy compares each declared key against `desired`.

use crate::units::backend::{BackendError, CommandRunner, CommandTemplate};
use reconcile::{
    ApplyContext, ApplyItemError, ApplyResult, AuditContext, AuditError, AuditResult, AuditUnit,
    DiffAction, DiffItem, ExecutionUnit, ResourceClass, StrategyKind, Subject, SubjectState,
    UnitConfig,
};
use session::Component;
use std::sync::Arc;

#[cfg(windows)]
const DEFAULT_QUERY: Option<&[&str]> = Some(&[
    "powershell",
    "-NoProfile",
    "-NonInteractive",
    "-Command",
    "(Get-ItemProperty -Path '{path}' -Name '{name}' -ErrorAction Stop).'{name}'",
]);
#[cfg(not(windows))]
const DEFAULT_QUERY: Option<&[&str]> = None;

#[cfg(windows)]
const DEFAULT_SET: Option<&[&str]> = Some(&[
    "powershell",
    "-NoProfile",
    "-NonInteractive",
    "-Command",
    "if (-not (Test-Path '{path}')) { New-Item -Path '{path}' -Force | Out-Null }; \
     New-ItemProperty -Path '{path}' -Name '{name}' -Value '{value}' -PropertyType {type} -Force -ErrorAction Stop | Out-Null",
]);
#[cfg(not(windows))]
const DEFAULT_SET: Option<&[&str]> = None;

/// Audits and enforces telemetry-related settings
pub struct Telemetry {
    runner: Arc<dyn CommandRunner>,
}

impl Telemetry {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// Current value, or `None` when the setting does not exist
    fn query(&self, template: &CommandTemplate, key: &str) -> Result<Option<String>, BackendError> {
        let (path, name) = split_key(key);
        let vars = [("key", key), ("path", path), ("name", name)];
        match template.run(self.runner.as_ref(), &vars) {
            Ok(captured) if captured.text().is_empty() => Ok(None),
            Ok(captured) => Ok(Some(captured.text().to_string())),
            // A missing value makes the query exit non-zero
            Err(BackendError::Failed { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Split `path\name` at the last backslash
fn split_key(key: &str) -> (&str, &str) {
    key.rsplit_once('\\').unwrap_or(("", key))
}

impl AuditUnit for Telemetry {
    fn component(&self) -> Component {
        Component::Telemetry
    }

    fn strategy(&self) -> StrategyKind {
        StrategyKind::Setting
    }

    fn inspect(&self, config: &UnitConfig, ctx: &AuditContext) -> Result<AuditResult, AuditError> {
        let desired = config.string_map("desired")?;
        if desired.is_empty() {
            return Ok(AuditResult::new(Component::Telemetry, Vec::new()));
        }
        let query = CommandTemplate::from_config(config, "query_command", DEFAULT_QUERY)
            .map_err(|e| e.into_audit(Component::Telemetry))?;

        let mut items = Vec::with_capacity(desired.len());
        for key in desired.keys() {
            let state = match self
                .query(&query, key)
                .map_err(|e| e.into_audit(Component::Telemetry))?
            {
                Some(value) => SubjectState::Setting { value },
                None => SubjectState::Absent,
            };
            ctx.logger
                .debug(Component::Telemetry, format!("{key} is {}", state.label()));
            let (_, name) = split_key(key);
            items.push(Subject::new(key.clone(), name, state));
        }
        Ok(AuditResult::new(Component::Telemetry, items))
    }
}

impl ExecutionUnit for Telemetry {
    fn component(&self) -> Component {
        Component::Telemetry
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
        let DiffAction::Set { from, to } = &item.action else {
            return Err(ApplyItemError::Unsupported {
                key: item.key.clone(),
                action: item.action.verb(),
            });
        };

        let set = CommandTemplate::from_config(config, "set_command", DEFAULT_SET)
            .map_err(|e| e.into_apply(&item.key))?;
        let value_type = config
            .string("value_type")
            .map_err(|e| ApplyItemError::Failed {
                key: item.key.clone(),
                message: e.to_string(),
            })?
            .unwrap_or_else(|| "DWord".to_string());

        let (path, name) = split_key(&item.key);
        let vars = [
            ("key", item.key.as_str()),
            ("path", path),
            ("name", name),
            ("value", to),
            ("type", value_type.as_str()),
        ];
        set.run(self.runner.as_ref(), &vars)
            .map_err(|e| e.into_apply(&item.key))?;

        if config.get("verify").and_then(serde_json::Value::as_bool) == Some(true) {
            let query = CommandTemplate::from_config(config, "query_command", DEFAULT_QUERY)
                .map_err(|e| e.into_apply(&item.key))?;
            let now = self.query(&query, &item.key).map_err(|e| e.into_apply(&item.key))?;
            if now.as_deref() != Some(to.as_str()) {
                return Err(ApplyItemError::Failed {
                    key: item.key.clone(),
                    message: format!("value is {} after setting {to}", now.as_deref().unwrap_or("(unset)")),
                });
            }
        }

        Ok(if from.is_some() {
            ApplyResult::Modified
        } else {
            ApplyResult::Created
        })
    }
}
