use anyhow::Result;

use crate::Context;
use crate::cli::ConfigCommand;
use crate::paths;
use crate::schema::UpkeepConfig;
use crate::ui;

pub fn run(ctx: &Context, cmd: ConfigCommand) -> Result<()> {
    match cmd {
        ConfigCommand::Show => show(ctx),
        ConfigCommand::Path => path(ctx),
    }
}

fn show(ctx: &Context) -> Result<()> {
    let (config, path) = UpkeepConfig::load_default(ctx.config.as_deref())?;
    if !ctx.quiet {
        if path.exists() {
            ui::dim(&format!("# {}", path.display()));
        } else {
            ui::dim(&format!("# {} not found, showing defaults", path.display()));
        }
    }
    print!("{}", config.to_toml()?);
    Ok(())
}

fn path(ctx: &Context) -> Result<()> {
    let path = match &ctx.config {
        Some(path) => path.clone(),
        None => paths::config_file()?,
    };
    println!("{}", path.display());
    Ok(())
}
