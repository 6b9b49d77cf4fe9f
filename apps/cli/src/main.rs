//! LotHelper CLI - control plane for model retraining
//!
//! This CLI provides an `lh` command for running the retraining monitor,
//! triggering a training run by hand, and managing model backups.

mod commands;
mod config;

use anyhow::Result;
use clap::{Parser, Subcommand};
use lothelper_monitor::init_logging;
use std::path::PathBuf;

use commands::{backup, config as config_cmd, gate, monitor, train};
use commands::{BackupCommand, ConfigCommand, GateCommand, MonitorCommand};

/// LotHelper model retraining
///
/// Watches the metadata cache for new training data, retrains the price
/// models, and keeps production safe with versioned backups and rollback.
#[derive(Parser, Debug)]
#[command(
    name = "lh",
    author,
    version,
    about = "LotHelper - model retraining control plane",
    long_about = "LotHelper (lh) retrains the price models when enough new data has arrived.\nEvery run is preceded by a backup and rolled back if validation fails."
)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Config file (skips ~/.lothelper/retrain.toml and ./.lothelperrc)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// State directory holding the PID file, log and cursor
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    /// Production model directory
    #[arg(long, global = true)]
    model_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run, stop or inspect the retraining monitor
    #[command(subcommand)]
    Monitor(MonitorCommand),

    /// Run the training pipeline once
    ///
    /// Backs up production, runs every stage, validates the result and
    /// either commits or rolls back.
    Train {
        /// Output the run record as JSON
        #[arg(long)]
        json: bool,
    },

    /// Create, list, restore and prune model backups
    #[command(subcommand)]
    Backup(BackupCommand),

    /// Inspect the training data gate
    #[command(subcommand)]
    Gate(GateCommand),

    /// Show the effective configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = config::load_config(
        args.config.as_deref(),
        config::Overrides { model_dir: args.model_dir, state_dir: args.state_dir },
    )?;

    // Commands that change production or run the loop append to the shared
    // log file; read-only commands only log to the console.
    let (log_file, console) = match &args.command {
        Command::Monitor(MonitorCommand::Start { daemon: false, detached }) => {
            (Some(config.log_file()), !*detached)
        }
        Command::Train { .. } | Command::Backup(BackupCommand::Create { .. } | BackupCommand::Restore { .. }) => {
            (Some(config.log_file()), true)
        }
        Command::Backup(BackupCommand::Prune { dry_run: false, .. }) => (Some(config.log_file()), true),
        _ => (None, true),
    };
    init_logging(&args.log_level, log_file.as_deref(), console)?;

    match args.command {
        Command::Monitor(cmd) => monitor::execute(cmd, &config).await?,
        Command::Train { json } => train::execute(&config, json).await?,
        Command::Backup(cmd) => backup::execute(cmd, &config).await?,
        Command::Gate(cmd) => gate::execute(cmd, &config)?,
        Command::Config(cmd) => config_cmd::execute(cmd, &config)?,
    }

    Ok(())
}
