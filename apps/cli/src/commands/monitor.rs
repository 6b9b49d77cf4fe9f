//! Monitor commands: start (foreground or detached), stop and status.

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use lothelper_monitor::{
    control, detach_session, run_foreground, spawn_detached, MonitorError, MonitorState, RetrainConfig, StopOutcome,
};
use std::ffi::OsString;
use std::time::Duration;

/// How long `start --daemon` waits for the background monitor to come up.
const STARTUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Monitor subcommands
#[derive(Subcommand, Debug)]
pub enum MonitorCommand {
    /// Start the monitor loop
    Start {
        /// Detach from the terminal and log to the monitor log file
        #[arg(long)]
        daemon: bool,
        /// Set on the re-launched background process
        #[arg(long, hide = true)]
        detached: bool,
    },
    /// Stop a running monitor (SIGTERM, then SIGKILL after the grace period)
    Stop {
        /// Seconds to wait before SIGKILL (default from config)
        #[arg(long)]
        grace_secs: Option<u64>,
    },
    /// Show whether the monitor is running and the end of its log
    Status {
        /// Number of log lines to show
        #[arg(short = 'n', long, default_value_t = 20)]
        lines: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Execute monitor command
pub async fn execute(cmd: MonitorCommand, config: &RetrainConfig) -> Result<()> {
    match cmd {
        MonitorCommand::Start { daemon: true, detached: false } => start_daemon(config).await,
        MonitorCommand::Start { detached: true, .. } => {
            detach_session()?;
            start_foreground(config).await
        }
        MonitorCommand::Start { .. } => start_foreground(config).await,
        MonitorCommand::Stop { grace_secs } => stop_command(config, grace_secs).await,
        MonitorCommand::Status { lines, json } => status_command(config, lines, json),
    }
}

async fn start_foreground(config: &RetrainConfig) -> Result<()> {
    match run_foreground(config).await {
        Err(MonitorError::SingleInstance { pid }) => {
            anyhow::bail!("Monitor already running (PID {})", pid)
        }
        other => other.context("Monitor stopped with an error"),
    }
}

async fn start_daemon(config: &RetrainConfig) -> Result<()> {
    if let MonitorState::Running { pid } = control::state(&config.pid_file())? {
        anyhow::bail!("Monitor already running (PID {})", pid);
    }
    // Fail here, not in the background, on a bad config.
    config.settings()?;
    config.pipeline()?;

    let program = std::env::current_exe().context("Cannot locate the lh executable")?;
    let mut args: Vec<OsString> = std::env::args_os().skip(1).filter(|a| a != "--daemon").collect();
    args.push("--detached".into());

    let pid = spawn_detached(&program, &args, &config.log_file(), &config.pid_file(), STARTUP_TIMEOUT)
        .await
        .context("Failed to start monitor in the background")?;

    println!("{} Monitor started (PID {})", "✓".green(), pid);
    println!("  Log: {}", config.log_file().display());
    Ok(())
}

async fn stop_command(config: &RetrainConfig, grace_secs: Option<u64>) -> Result<()> {
    let grace = grace_secs.map_or_else(|| config.stop_grace(), Duration::from_secs);
    let outcome = control::stop(&config.pid_file(), grace).await?;

    match outcome {
        StopOutcome::NotRunning => println!("Monitor is not running"),
        StopOutcome::StalePidFile { pid: Some(pid) } => {
            println!("{} Monitor was not running (removed stale PID file for {})", "!".yellow(), pid);
        }
        StopOutcome::StalePidFile { pid: None } => {
            println!("{} Monitor was not running (removed unreadable PID file)", "!".yellow());
        }
        StopOutcome::Terminated { pid } => println!("{} Monitor stopped (PID {})", "✓".green(), pid),
        StopOutcome::Killed { pid } => {
            println!("{} Monitor killed after {}s grace period (PID {})", "!".yellow(), grace.as_secs(), pid);
        }
    }
    Ok(())
}

fn status_command(config: &RetrainConfig, lines: usize, json: bool) -> Result<()> {
    let report = control::status(&config.pid_file(), &config.log_file(), lines)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    match report.state {
        MonitorState::Running { pid } => println!("{} Monitor is running (PID {})", "●".green(), pid),
        MonitorState::Stale { pid: Some(pid) } => {
            println!("{} Monitor is not running (stale PID file for {})", "●".yellow(), pid);
        }
        MonitorState::Stale { pid: None } => {
            println!("{} Monitor is not running (unreadable PID file)", "●".yellow());
        }
        MonitorState::NotRunning => println!("{} Monitor is not running", "●".red()),
    }
    println!("  PID file: {}", report.pid_file.display());
    println!("  Log file: {}", report.log_file.display());

    if !report.log_tail.is_empty() {
        println!();
        println!("{}", format!("Last {} log lines:", report.log_tail.len()).bold());
        for line in &report.log_tail {
            println!("  {}", line);
        }
    }
    Ok(())
}
