use anyhow::Result;
use colored::Colorize;

use crate::Context;
use crate::engine::registry::UNITS;
use crate::schema::UpkeepConfig;
use crate::ui;

/// List registered units in execution order
pub fn run(ctx: &Context) -> Result<()> {
    let (config, _) = UpkeepConfig::load_default(ctx.config.as_deref())?;

    ui::header("Maintenance Units");
    for (index, spec) in UNITS.iter().enumerate() {
        let unit_config = config.unit_config(spec.component)?;
        let state = if unit_config.is_enabled() {
            "enabled".green()
        } else {
            "disabled".dimmed()
        };
        println!(
            "  {} {:<14} {:<10} {}",
            format!("{}.", index + 1).dimmed(),
            spec.component.slug().bold(),
            state,
            spec.description
        );
    }
    println!();
    Ok(())
}
