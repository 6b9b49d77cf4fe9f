//! Training data gate inspection.

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use lothelper_monitor::{RetrainConfig, SqliteGate, TrainingDataGate};
use serde_json::json;

/// Gate subcommands
#[derive(Subcommand, Debug)]
pub enum GateCommand {
    /// Show training data statistics and whether the next cycle would train
    Stats {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Execute gate command
pub fn execute(cmd: GateCommand, config: &RetrainConfig) -> Result<()> {
    match cmd {
        GateCommand::Stats { json } => stats_command(config, json),
    }
}

fn stats_command(config: &RetrainConfig, json: bool) -> Result<()> {
    let settings = config.settings()?;
    let gate = SqliteGate::new(config.database(), config.cursor_file());
    let stats = gate
        .statistics()
        .with_context(|| format!("Failed to read metadata cache {}", config.database().display()))?;
    let qualifying = gate.count_new(settings.min_quality_score)?;
    let would_train = qualifying >= settings.min_new_records;

    if json {
        let out = json!({
            "statistics": stats,
            "qualifying_new": qualifying,
            "min_quality_score": settings.min_quality_score,
            "min_new_records": settings.min_new_records,
            "would_train": would_train,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("{}", "Training data".bold());
    println!("  Eligible records:  {}", stats.total_eligible);
    println!("    excellent (>=0.8): {}", stats.excellent.to_string().green());
    println!("    good (>=0.6):      {}", stats.good.to_string().cyan());
    println!("    fair (>=0.4):      {}", stats.fair.to_string().yellow());
    println!("    poor:              {}", stats.poor.to_string().red());
    println!();
    println!("  Last training:     {}", stats.cursor.format("%Y-%m-%d %H:%M:%S"));
    println!("  New since then:    {}", stats.new_since_cursor);
    println!(
        "  Qualifying (>= {:.2}): {} / {} needed",
        settings.min_quality_score, qualifying, settings.min_new_records
    );
    if would_train {
        println!("  {}", "Next cycle would trigger retraining".green());
    } else {
        println!("  {}", "Not enough new data to retrain".yellow());
    }
    Ok(())
}
