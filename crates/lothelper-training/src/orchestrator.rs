//! Backup, retrain, validate, then commit or roll back.
//!
//! One call to [`TrainingOrchestrator::run`] walks
//! `backing_up -> running_stages -> validating -> committing | rolling_back`.
//! When it returns, the production model directory holds either the complete
//! new generation or exactly what it held before the call.

use crate::artifacts::ArtifactStore;
use crate::error::{TrainingError, TrainingResult};
use crate::pipeline::{PipelineSpec, StageKind, StageSpec};
use crate::progress::{ProgressEvent, ProgressSink, TracingProgressSink};
use crate::run::{Disposition, StageResult, TrainingRun, TrainingRunId, ValidationIssue};
use crate::stage::{ProcessStageRunner, StageExecutor};
use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::error;

pub const PRE_TRAINING_REASON: &str = "pre-training";

/// Something that performs one complete retraining attempt.
#[async_trait]
pub trait Retrainer: Send + Sync {
    async fn retrain(&self) -> TrainingResult<TrainingRun>;
}

pub struct TrainingOrchestrator {
    store: ArtifactStore,
    pipeline: PipelineSpec,
    executor: Arc<dyn StageExecutor>,
    progress: Arc<dyn ProgressSink>,
}

impl TrainingOrchestrator {
    pub fn new(store: ArtifactStore, pipeline: PipelineSpec) -> TrainingResult<Self> {
        pipeline.validate()?;
        let executor = Arc::new(ProcessStageRunner::from_pipeline(&pipeline));
        Ok(Self { store, pipeline, executor, progress: Arc::new(TracingProgressSink) })
    }

    #[must_use]
    pub fn with_executor(mut self, executor: Arc<dyn StageExecutor>) -> Self {
        self.executor = executor;
        self
    }

    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    #[must_use]
    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    #[must_use]
    pub fn pipeline(&self) -> &PipelineSpec {
        &self.pipeline
    }

    /// Run the full pipeline once.
    ///
    /// Returns `Err` only for [`TrainingError::Rollback`]: validation failed
    /// and the pre-run snapshot could not be put back.
    pub async fn run(&self) -> TrainingResult<TrainingRun> {
        let run_id = TrainingRunId::new();
        let started_at = Utc::now();
        self.progress.on_event(ProgressEvent::Started { run_id: run_id.clone() });

        let store = self.store.clone();
        let version = match blocking(move || store.snapshot(PRE_TRAINING_REASON)).await {
            Ok(version) => version,
            Err(e) => {
                self.progress.on_event(ProgressEvent::BackupFailed { run_id: run_id.clone(), reason: e.to_string() });
                self.progress.on_event(ProgressEvent::Finished {
                    run_id: run_id.clone(),
                    disposition: Disposition::FailedNoBackup,
                });
                return Ok(TrainingRun {
                    id: run_id,
                    started_at,
                    finished_at: Utc::now(),
                    backup_version: None,
                    stages: Vec::new(),
                    issues: Vec::new(),
                    disposition: Disposition::FailedNoBackup,
                    error: Some(e.to_string()),
                });
            }
        };
        self.progress.on_event(ProgressEvent::BackedUp { run_id: run_id.clone(), version: version.clone() });

        let stages = self.run_stages(&run_id).await;

        let issues = self.validate(&stages);
        self.progress.on_event(ProgressEvent::Validated { run_id: run_id.clone(), issues: issues.clone() });

        let disposition = if issues.is_empty() {
            Disposition::Committed
        } else {
            let store = self.store.clone();
            let target = version.clone();
            if let Err(e) = blocking(move || store.restore(&target)).await {
                error!(run = %run_id, version = %version, error = %e, "Rollback failed");
                return Err(TrainingError::Rollback { version, reason: e.to_string() });
            }
            Disposition::RolledBack
        };

        self.progress.on_event(ProgressEvent::Finished { run_id: run_id.clone(), disposition });

        Ok(TrainingRun {
            id: run_id,
            started_at,
            finished_at: Utc::now(),
            backup_version: Some(version),
            stages,
            issues,
            disposition,
            error: None,
        })
    }

    /// Every stage runs regardless of earlier failures.
    async fn run_stages(&self, run_id: &TrainingRunId) -> Vec<StageResult> {
        let mut results = Vec::new();
        results.push(self.run_stage(run_id, StageKind::Main, &self.pipeline.main).await);
        results.extend(self.run_specialists(run_id).await);
        results.push(self.run_stage(run_id, StageKind::Aggregate, &self.pipeline.aggregate).await);
        results.push(self.run_stage(run_id, StageKind::Combiner, &self.pipeline.combiner).await);
        results
    }

    /// Specialists are independent; run up to `max_parallel` at once and
    /// report them in declaration order.
    async fn run_specialists(&self, run_id: &TrainingRunId) -> Vec<StageResult> {
        let semaphore = Semaphore::new(self.pipeline.max_parallel.max(1));
        let semaphore = &semaphore;
        let tasks = self.pipeline.specialists.iter().map(|spec| async move {
            let _permit = semaphore.acquire().await.ok();
            self.run_stage(run_id, StageKind::Specialist, spec).await
        });
        join_all(tasks).await
    }

    async fn run_stage(&self, run_id: &TrainingRunId, kind: StageKind, spec: &StageSpec) -> StageResult {
        self.progress.on_event(ProgressEvent::StageStarted {
            run_id: run_id.clone(),
            stage: spec.name.clone(),
            kind,
        });
        let result = self.executor.execute(kind, spec).await;
        self.progress.on_event(ProgressEvent::StageFinished {
            run_id: run_id.clone(),
            result: Box::new(result.clone()),
        });
        result
    }

    /// Collect every reason the new generation must not be kept.
    fn validate(&self, stages: &[StageResult]) -> Vec<ValidationIssue> {
        let mut issues: Vec<ValidationIssue> = stages
            .iter()
            .filter(|s| !s.success)
            .map(|s| ValidationIssue::StageFailed { stage: s.name.clone() })
            .collect();

        let model_dir = self.store.layout().model_dir();
        issues.extend(
            self.pipeline
                .required_artifacts()
                .into_iter()
                .filter(|path| !model_dir.join(path).is_file())
                .map(|path| ValidationIssue::MissingArtifact { path }),
        );

        let ceiling = self.pipeline.max_main_metric;
        if let Some(main) = stages.iter().find(|s| s.kind == StageKind::Main && s.success) {
            match main.metric {
                None => issues.push(ValidationIssue::MainMetricMissing),
                Some(metric) if metric >= ceiling => {
                    issues.push(ValidationIssue::MainMetricAboveCeiling { metric, ceiling });
                }
                Some(_) => {}
            }
        }

        issues
    }
}

#[async_trait]
impl Retrainer for TrainingOrchestrator {
    async fn retrain(&self) -> TrainingResult<TrainingRun> {
        self.run().await
    }
}

async fn blocking<T, F>(f: F) -> TrainingResult<T>
where
    F: FnOnce() -> TrainingResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| TrainingError::Storage(format!("storage task failed: {e}")))?
}
