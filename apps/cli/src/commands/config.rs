//! Configuration inspection.

use anyhow::Result;
use clap::Subcommand;
use lothelper_monitor::RetrainConfig;

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the effective configuration with defaults filled in
    Show {
        /// Output as JSON instead of TOML
        #[arg(long)]
        json: bool,
    },
    /// Print the config file locations that are searched
    Path,
}

/// Execute config command
pub fn execute(cmd: ConfigCommand, config: &RetrainConfig) -> Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            let resolved = config.resolved()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&resolved)?);
            } else {
                print!("{}", toml::to_string_pretty(&resolved)?);
            }
        }
        ConfigCommand::Path => {
            for path in [RetrainConfig::default_global_path(), RetrainConfig::default_local_path()] {
                let marker = if path.exists() { "found" } else { "absent" };
                println!("{} ({})", path.display(), marker);
            }
        }
    }
    Ok(())
}
