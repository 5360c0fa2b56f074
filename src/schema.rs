//! Configuration schema for upkeep
//!
//! ```toml
//! [run]
//! min_restore_space = "10GB"
//! unit_timeout_secs = 600
//!
//! [restore]
//! drive = "C:"
//!
//! [report]
//! destination = "~/Desktop"
//!
//! [components.bloatware]
//! deny = ["*CandyCrush*", "*Xbox*"]
//! ```
//!
//! Component tables are not interpreted here: they are converted to JSON
//! maps and handed to the units as [`UnitConfig`].

use anyhow::{Context, Result, bail};
use reconcile::UnitConfig;
use serde::{Deserialize, Serialize};
use session::Component;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::paths;
use crate::ui;

// ============================================================================
// Main Config Schema
// ============================================================================

/// The upkeep configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpkeepConfig {
    #[serde(default)]
    pub run: RunConfig,

    #[serde(default)]
    pub restore: RestoreConfig,

    #[serde(default)]
    pub report: ReportConfig,

    /// Per-unit settings keyed by slug (`bloatware`, `telemetry`, ...)
    #[serde(default)]
    pub components: BTreeMap<String, toml::Table>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Simulate by default
    pub dry_run: bool,
    /// Minimum restore storage, e.g. `10GB`
    pub min_restore_space: String,
    /// Upper bound for a single unit invocation
    pub unit_timeout_secs: u64,
    /// Parallel audits (1 = sequential)
    pub audit_jobs: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            min_restore_space: "10GB".to_string(),
            unit_timeout_secs: 600,
            audit_jobs: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RestoreConfig {
    pub enabled: bool,
    pub drive: String,
    pub description: String,
}

impl Default for RestoreConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            drive: "C:".to_string(),
            description: "upkeep pre-maintenance checkpoint".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Directory the report is exported to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    /// Template file replacing the built-in layout
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
}

impl UpkeepConfig {
    /// Load a config file; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Could not read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Invalid TOML format in {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `--config` or the default location
    pub fn load_default(explicit: Option<&Path>) -> Result<(Self, PathBuf)> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => paths::config_file()?,
        };
        let config = Self::load(&path)?;
        Ok((config, path))
    }

    pub fn validate(&self) -> Result<()> {
        for slug in self.components.keys() {
            match slug.parse::<Component>() {
                Ok(component) if component.is_unit() => {}
                _ => bail!(
                    "Unknown component '{}' in [components]; expected one of: {}",
                    slug,
                    Component::UNITS.map(|c| c.slug()).join(", ")
                ),
            }
        }
        self.min_restore_bytes()?;
        if self.run.unit_timeout_secs == 0 {
            bail!("run.unit_timeout_secs must be greater than zero");
        }
        Ok(())
    }

    pub fn min_restore_bytes(&self) -> Result<u64> {
        ui::parse_size(&self.run.min_restore_space)
            .map_err(|e| anyhow::anyhow!("run.min_restore_space: {e}"))
    }

    /// Opaque settings for one unit
    pub fn unit_config(&self, component: Component) -> Result<UnitConfig> {
        let Some(table) = self.components.get(component.slug()) else {
            return Ok(UnitConfig::new());
        };
        match serde_json::to_value(table)
            .with_context(|| format!("Could not convert [components.{}]", component.slug()))?
        {
            serde_json::Value::Object(map) => Ok(UnitConfig::from_map(map)),
            _ => bail!("[components.{}] must be a table", component.slug()),
        }
    }

    /// Settings for every unit, keyed by component
    pub fn unit_configs(&self) -> Result<BTreeMap<Component, UnitConfig>> {
        let mut configs = BTreeMap::new();
        for component in Component::UNITS {
            configs.insert(component, self.unit_config(component)?);
        }
        Ok(configs)
    }

    pub fn report_destination(&self) -> Result<PathBuf> {
        match &self.report.destination {
            Some(dir) => Ok(paths::expand(dir)),
            None => paths::default_report_dir(),
        }
    }

    pub fn template_path(&self) -> Option<PathBuf> {
        self.report.template.as_deref().map(paths::expand)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config")
    }
}

// ============================================================================
// Tests
// ============================================================================
