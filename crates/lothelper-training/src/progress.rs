use crate::pipeline::StageKind;
use crate::run::{Disposition, StageResult, TrainingRunId, ValidationIssue};
use serde::Serialize;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Started { run_id: TrainingRunId },
    BackedUp { run_id: TrainingRunId, version: String },
    BackupFailed { run_id: TrainingRunId, reason: String },
    StageStarted { run_id: TrainingRunId, stage: String, kind: StageKind },
    StageFinished { run_id: TrainingRunId, result: Box<StageResult> },
    Validated { run_id: TrainingRunId, issues: Vec<ValidationIssue> },
    Finished { run_id: TrainingRunId, disposition: Disposition },
}

pub trait ProgressSink: Send + Sync {
    fn on_event(&self, event: ProgressEvent);
}

/// Forwards progress to the log.
#[derive(Debug, Default)]
pub struct TracingProgressSink;

impl ProgressSink for TracingProgressSink {
    fn on_event(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Started { run_id } => info!(run = %run_id, "Training run started"),
            ProgressEvent::BackedUp { run_id, version } => {
                info!(run = %run_id, version = %version, "Backed up production models");
            }
            ProgressEvent::BackupFailed { run_id, reason } => {
                error!(run = %run_id, reason = %reason, "Backup failed, training not attempted");
            }
            ProgressEvent::StageStarted { run_id, stage, kind } => {
                info!(run = %run_id, stage = %stage, kind = ?kind, "Stage started");
            }
            ProgressEvent::StageFinished { run_id, result } => {
                let metric = result.metric.map_or_else(|| "n/a".to_string(), |m| format!("{m:.2}"));
                info!(
                    run = %run_id,
                    stage = %result.name,
                    success = result.success,
                    metric = %metric,
                    "Stage finished"
                );
            }
            ProgressEvent::Validated { run_id, issues } => {
                if issues.is_empty() {
                    info!(run = %run_id, "Validation passed");
                } else {
                    for issue in &issues {
                        warn!(run = %run_id, issue = %issue, "Validation issue");
                    }
                }
            }
            ProgressEvent::Finished { run_id, disposition } => {
                info!(run = %run_id, disposition = %disposition, "Training run finished");
            }
        }
    }
}
