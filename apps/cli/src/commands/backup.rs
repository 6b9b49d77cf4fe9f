//! Backup commands: create, list, restore and prune.

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use lothelper_monitor::RetrainConfig;
use lothelper_training::ArtifactStore;
use serde_json::json;
use tracing::warn;

use super::ensure_monitor_idle;

const MANUAL_REASON: &str = "manual";
const PRE_RESTORE_REASON: &str = "pre-restore";

/// Backup subcommands
#[derive(Subcommand, Debug)]
pub enum BackupCommand {
    /// Snapshot the production model directory
    Create {
        /// Reason recorded in the snapshot manifest
        #[arg(long, default_value = MANUAL_REASON)]
        reason: String,
    },
    /// List backups, newest first
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Restore a backup over the production model directory
    Restore {
        /// Version id (e.g. 20250111_143022)
        version: String,
        /// Skip the safety snapshot of the current models
        #[arg(long)]
        no_backup: bool,
    },
    /// Delete backups that fall outside the retention policy
    Prune {
        /// Show what would be deleted without deleting
        #[arg(long)]
        dry_run: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Execute backup command
pub async fn execute(cmd: BackupCommand, config: &RetrainConfig) -> Result<()> {
    let store = ArtifactStore::new(config.artifact_layout());
    // Snapshot and restore are blocking file copies.
    tokio::task::spawn_blocking({
        let config = config.clone();
        move || match cmd {
            BackupCommand::Create { reason } => create_command(&store, &config, &reason),
            BackupCommand::List { json } => list_command(&store, json),
            BackupCommand::Restore { version, no_backup } => restore_command(&store, &config, &version, no_backup),
            BackupCommand::Prune { dry_run, json } => prune_command(&store, &config, dry_run, json),
        }
    })
    .await?
}

fn create_command(store: &ArtifactStore, config: &RetrainConfig, reason: &str) -> Result<()> {
    ensure_monitor_idle(config)?;
    let version = store.snapshot(reason).context("Failed to create backup")?;
    println!("{} Created backup {}", "✓".green(), version.bold());
    println!("  Path: {}", store.layout().version_dir(&version).display());
    Ok(())
}

fn list_command(store: &ArtifactStore, json: bool) -> Result<()> {
    let snapshots = store.list()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshots)?);
        return Ok(());
    }

    if snapshots.is_empty() {
        println!("No backups found in {}", store.layout().backup_dir().display());
        return Ok(());
    }

    println!("{:<20} {:<20} {:<13} {:>10} {:>9}", "Version", "Created", "Reason", "Size", "Test MAE");
    println!("{}", "-".repeat(76));
    for snapshot in &snapshots {
        let mae = snapshot.metrics.test_mae.map_or_else(|| "-".to_string(), |m| format!("{m:.2}"));
        println!(
            "{:<20} {:<20} {:<13} {:>10} {:>9}",
            snapshot.version,
            snapshot.created_at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S"),
            snapshot.reason.as_deref().unwrap_or("-"),
            format_size(snapshot.size),
            mae
        );
    }
    println!();
    println!("{} backup(s)", snapshots.len());
    Ok(())
}

fn restore_command(store: &ArtifactStore, config: &RetrainConfig, version: &str, no_backup: bool) -> Result<()> {
    ensure_monitor_idle(config)?;

    if !no_backup && store.layout().model_dir().is_dir() {
        let safety = store.snapshot(PRE_RESTORE_REASON).context("Failed to back up current models")?;
        println!("  Current models saved as {}", safety);
    }

    warn!(version, "Restoring backup over production models");
    store.restore(version).with_context(|| format!("Failed to restore backup {}", version))?;
    println!("{} Restored backup {}", "✓".green(), version.bold());
    Ok(())
}

fn prune_command(store: &ArtifactStore, config: &RetrainConfig, dry_run: bool, json: bool) -> Result<()> {
    let (keep, delete) = if dry_run {
        let plan = store.plan_sweep()?;
        (plan.keep, plan.delete)
    } else {
        ensure_monitor_idle(config)?;
        let report = store.sweep()?;
        (report.kept, report.deleted)
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&json!({ "dry_run": dry_run, "kept": keep, "deleted": delete }))?);
        return Ok(());
    }

    let verb = if dry_run { "Would delete" } else { "Deleted" };
    if delete.is_empty() {
        println!("Nothing to prune ({} backup(s) kept)", keep.len());
    } else {
        println!("{} {} backup(s), kept {}", verb, delete.len(), keep.len());
        for version in &delete {
            println!("  - {}", version.red());
        }
    }
    Ok(())
}

fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 { format!("{} B", bytes) } else { format!("{:.1} {}", size, UNITS[unit]) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MB");
    }
}
