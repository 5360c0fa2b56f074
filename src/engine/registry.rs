//! Compile-time table of maintenance units
//!
//! Maps each unit [`Component`] to a constructor for its audit/execution
//! pair. Table order is execution order.

use crate::units::{Bloatware, CommandRunner, Optimization, Telemetry};
use reconcile::{AuditUnit, ExecutionUnit, UnitPair};
use session::Component;
use std::sync::Arc;

/// One registered unit
pub struct UnitSpec {
    pub component: Component,
    pub description: &'static str,
    build: fn(Arc<dyn CommandRunner>) -> UnitPair,
}

impl UnitSpec {
    pub fn build(&self, runner: Arc<dyn CommandRunner>) -> UnitPair {
        (self.build)(runner)
    }
}

pub const UNITS: [UnitSpec; 3] = [
    UnitSpec {
        component: Component::Bloatware,
        description: "Remove preinstalled apps matching deny patterns",
        build: bloatware,
    },
    UnitSpec {
        component: Component::Telemetry,
        description: "Enforce privacy and telemetry settings",
        build: telemetry,
    },
    UnitSpec {
        component: Component::Optimization,
        description: "Keep performance tunables within tolerance of their targets",
        build: optimization,
    },
];

fn pair<U>(unit: U) -> UnitPair
where
    U: AuditUnit + ExecutionUnit + 'static,
{
    let unit = Arc::new(unit);
    UnitPair::new(unit.clone(), unit)
}

fn bloatware(runner: Arc<dyn CommandRunner>) -> UnitPair {
    pair(Bloatware::new(runner))
}

fn telemetry(runner: Arc<dyn CommandRunner>) -> UnitPair {
    pair(Telemetry::new(runner))
}

fn optimization(runner: Arc<dyn CommandRunner>) -> UnitPair {
    pair(Optimization::new(runner))
}

/// Build the pairs for `selected` components (all when empty), in table order
pub fn build(runner: &Arc<dyn CommandRunner>, selected: &[Component]) -> Vec<UnitPair> {
    UNITS
        .iter()
        .filter(|spec| selected.is_empty() || selected.contains(&spec.component))
        .map(|spec| spec.build(Arc::clone(runner)))
        .collect()
}
