//! Manual training run.

use anyhow::{bail, Context, Result};
use chrono::Local;
use colored::Colorize;
use lothelper_monitor::{RetrainConfig, SqliteGate, TrainingDataGate};
use lothelper_training::{ArtifactStore, Disposition, StageStatus, TrainingOrchestrator, TrainingRun};
use tracing::info;

use super::ensure_monitor_idle;

pub async fn execute(config: &RetrainConfig, json: bool) -> Result<()> {
    ensure_monitor_idle(config)?;

    let pipeline = config.pipeline().context("Invalid pipeline configuration")?;
    let store = ArtifactStore::new(config.artifact_layout());
    let orchestrator = TrainingOrchestrator::new(store, pipeline)?;

    info!("Manual training run requested");
    let run = orchestrator.run().await.context("Training run could not be rolled back")?;

    let cursor = if run.is_committed() {
        SqliteGate::new(config.database(), config.cursor_file()).mark_consumed(Local::now())
    } else {
        Ok(())
    };

    // The run summary is shown even when the cursor could not be advanced.
    if json {
        println!("{}", serde_json::to_string_pretty(&run)?);
    } else {
        print_summary(&run);
    }
    cursor.context("Models committed, but the training data cursor could not be advanced")?;

    match run.disposition {
        Disposition::Committed => Ok(()),
        Disposition::RolledBack => bail!("Training run rolled back"),
        Disposition::FailedNoBackup => bail!("Backup failed, training not attempted"),
    }
}

fn print_summary(run: &TrainingRun) {
    println!("{}", format!("Training run {}", run.id).bold());
    if let Some(version) = &run.backup_version {
        println!("  Backup: {}", version);
    }
    if let Some(error) = &run.error {
        println!("  Error:  {}", error.red());
    }

    if !run.stages.is_empty() {
        println!();
        println!("  {:<12} {:<11} {:>9} {:>9}  {}", "Stage", "Kind", "Metric", "Elapsed", "Status");
        println!("  {}", "-".repeat(56));
        for stage in &run.stages {
            let metric = stage.metric.map_or_else(|| "-".to_string(), |m| format!("{m:.2}"));
            let status = match &stage.status {
                StageStatus::Exited { code: 0 } => "ok".green(),
                StageStatus::Exited { code } => format!("exit {code}").red(),
                StageStatus::Killed => "killed".red(),
                StageStatus::TimedOut => "timed out".red(),
                StageStatus::SpawnFailed { .. } => "spawn failed".red(),
            };
            println!(
                "  {:<12} {:<11} {:>9} {:>8.1}s  {}",
                stage.name,
                format!("{:?}", stage.kind).to_lowercase(),
                metric,
                stage.elapsed.as_secs_f64(),
                status
            );
        }
    }

    if !run.issues.is_empty() {
        println!();
        println!("  {}", "Validation issues:".yellow().bold());
        for issue in &run.issues {
            println!("    - {}", issue);
        }
    }

    println!();
    let disposition = match run.disposition {
        Disposition::Committed => run.disposition.to_string().green().bold(),
        Disposition::RolledBack => run.disposition.to_string().yellow().bold(),
        Disposition::FailedNoBackup => run.disposition.to_string().red().bold(),
    };
    println!("  Disposition: {} ({}s)", disposition, run.elapsed().as_secs());
}
