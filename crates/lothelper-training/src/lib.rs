//! LotHelper Training
//!
//! Control plane for retraining the price models:
//! - Versioned backup and restore of the production model directory (`ArtifactStore`)
//! - Tiered retention of backups
//! - Running pipeline stages as child processes (`StageExecutor`)
//! - Orchestrating backup, training, validation and commit/rollback (`TrainingOrchestrator`)

pub mod artifacts;
pub mod error;
pub mod layout;
pub mod metric;
pub mod orchestrator;
pub mod pipeline;
pub mod progress;
pub mod retention;
pub mod run;
pub mod stage;

pub use artifacts::{sha256_file, ArtifactStore, SnapshotInfo, SnapshotManifest, SweepReport, TrainingMetrics};
pub use error::{TrainingError, TrainingResult};
pub use layout::ArtifactLayout;
pub use metric::extract_metric;
pub use orchestrator::{Retrainer, TrainingOrchestrator, PRE_TRAINING_REASON};
pub use pipeline::{PipelineSpec, PlannedStage, StageKind, StageSpec};
pub use progress::{ProgressEvent, ProgressSink, TracingProgressSink};
pub use retention::{RetentionCandidate, RetentionPlan, RetentionPolicy};
pub use run::{Disposition, StageResult, StageStatus, TrainingRun, TrainingRunId, ValidationIssue};
pub use stage::{ProcessStageRunner, StageExecutor};
