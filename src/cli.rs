use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use session::Component;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "upkeep")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Audit, diff and apply machine maintenance", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file (default: ~/.config/upkeep/config.toml)
    #[arg(long, global = true, env = "UPKEEP_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run maintenance: audit, confirm, checkpoint, apply, report
    Run(RunArgs),

    /// Audit and show the diff without changing anything
    Audit(AuditArgs),

    /// Summarize an existing session log
    Logs {
        /// Path to a maintenance.log file
        file: PathBuf,
    },

    /// List maintenance units and whether they are enabled
    Components,

    /// Inspect the configuration
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args)]
pub struct RunArgs {
    /// Show what would change without applying anything
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Minimum restore storage, e.g. 10GB (overrides run.min_restore_space)
    #[arg(long, value_name = "SIZE")]
    pub min_restore_space: Option<String>,

    /// Skip the restore checkpoint
    #[arg(long)]
    pub no_restore: bool,

    /// Only run these units (comma-separated): bloatware, telemetry, optimization
    #[arg(long, value_delimiter = ',')]
    pub only: Vec<Component>,

    /// Directory the report is exported to
    #[arg(long, value_name = "DIR")]
    pub report_dest: Option<PathBuf>,

    /// Keep the session directory even after a clean run
    #[arg(long)]
    pub keep_session: bool,

    /// Let each unit audit again right before applying
    #[arg(long)]
    pub self_audit: bool,

    /// Per-unit time budget in seconds (overrides run.unit_timeout_secs)
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Don't ask for confirmation
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Args)]
pub struct AuditArgs {
    /// Only audit these units (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub only: Vec<Component>,

    /// Print the diff as JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Print the effective configuration as TOML
    Show,

    /// Print the config file location
    Path,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_only_accepts_slugs_and_tags() {
        let cli = Cli::parse_from(["upkeep", "run", "--only", "bloatware,TELEMETRY", "-n"]);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert!(args.dry_run);
        assert_eq!(args.only, vec![Component::Bloatware, Component::Telemetry]);
    }

    #[test]
    fn test_unknown_component_is_rejected() {
        assert!(Cli::try_parse_from(["upkeep", "audit", "--only", "winget"]).is_err());
    }
}
