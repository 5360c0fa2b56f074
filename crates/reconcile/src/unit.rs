//! Audit and execution unit contracts
//!
//! A maintenance domain is a pair of units: an [`AuditUnit`] that only
//! reads, and an [`ExecutionUnit`] that applies one diff item at a time.
//! The executor owns looping, dry-run, failure counting and cancellation,
//! so units stay small.

use crate::context::{ApplyContext, AuditContext, ResourceClass};
use crate::error::{ApplyItemError, AuditError, ConfigValueError};
use crate::types::{ApplyResult, AuditResult, DiffItem, StrategyKind};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use session::Component;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Opaque per-component configuration (lists, thresholds, commands)
///
/// The engine only interprets a handful of keys (`enabled`, the diff policy
/// keys); everything else is passed through to the units untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitConfig(Map<String, Value>);

impl UnitConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// Builder-style insert
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// `enabled` key, defaulting to true
    pub fn is_enabled(&self) -> bool {
        self.get("enabled").and_then(Value::as_bool).unwrap_or(true)
    }

    pub fn string(&self, key: &str) -> Result<Option<String>, ConfigValueError> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(_) => Err(invalid(key, "a string")),
        }
    }

    pub fn f64(&self, key: &str) -> Result<Option<f64>, ConfigValueError> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => v.as_f64().map(Some).ok_or_else(|| invalid(key, "a number")),
        }
    }

    /// A list of strings; missing key is an empty list
    pub fn string_list(&self, key: &str) -> Result<Vec<String>, ConfigValueError> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| {
                    v.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| invalid(key, "a list of strings"))
                })
                .collect(),
            Some(_) => Err(invalid(key, "a list of strings")),
        }
    }

    /// A table of scalars rendered as strings (`true`, `0`, `"Basic"`)
    pub fn string_map(&self, key: &str) -> Result<BTreeMap<String, String>, ConfigValueError> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(BTreeMap::new()),
            Some(Value::Object(map)) => map
                .iter()
                .map(|(k, v)| match v {
                    Value::String(s) => Ok((k.clone(), s.clone())),
                    Value::Number(n) => Ok((k.clone(), n.to_string())),
                    Value::Bool(b) => Ok((k.clone(), b.to_string())),
                    _ => Err(invalid(key, "a table of scalar values")),
                })
                .collect(),
            Some(_) => Err(invalid(key, "a table of scalar values")),
        }
    }

    /// A table of numbers
    pub fn f64_map(&self, key: &str) -> Result<BTreeMap<String, f64>, ConfigValueError> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(BTreeMap::new()),
            Some(Value::Object(map)) => map
                .iter()
                .map(|(k, v)| {
                    v.as_f64()
                        .map(|n| (k.clone(), n))
                        .ok_or_else(|| invalid(key, "a table of numbers"))
                })
                .collect(),
            Some(_) => Err(invalid(key, "a table of numbers")),
        }
    }
}

fn invalid(key: &str, expected: &'static str) -> ConfigValueError {
    ConfigValueError {
        key: key.to_string(),
        expected,
    }
}

/// Read-only inspection of one maintenance domain
///
/// Implementations must not mutate anything observable. They may write
/// cache files under [`AuditContext::inventory_path`].
pub trait AuditUnit: Send + Sync {
    fn component(&self) -> Component;

    /// Diff strategy applied to this unit's results
    fn strategy(&self) -> StrategyKind;

    /// Inspect live state
    fn inspect(&self, config: &UnitConfig, ctx: &AuditContext) -> Result<AuditResult, AuditError>;
}

/// Mutating half of a maintenance domain
pub trait ExecutionUnit: Send + Sync {
    fn component(&self) -> Component;

    /// Resource class held while this unit applies a diff
    fn resource_class(&self) -> ResourceClass {
        ResourceClass::System
    }

    /// Apply a single item.
    ///
    /// Never called in dry-run mode. Return `Ok(ApplyResult::NoChange)` if
    /// the item is already in its target state.
    fn apply_item(
        &self,
        item: &DiffItem,
        config: &UnitConfig,
        ctx: &ApplyContext,
    ) -> Result<ApplyResult, ApplyItemError>;
}

/// An audit unit and the execution unit that consumes its diffs
#[derive(Clone)]
pub struct UnitPair {
    pub audit: Arc<dyn AuditUnit>,
    pub exec: Arc<dyn ExecutionUnit>,
}

impl UnitPair {
    pub fn new(audit: Arc<dyn AuditUnit>, exec: Arc<dyn ExecutionUnit>) -> Self {
        Self { audit, exec }
    }

    pub fn component(&self) -> Component {
        self.audit.component()
    }
}

impl fmt::Debug for UnitPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitPair")
            .field("component", &self.component())
            .field("strategy", &self.audit.strategy())
            .finish()
    }
}
