use crate::pipeline::StageKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

/// Identifier for one orchestration attempt.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrainingRunId(pub String);

impl TrainingRunId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for TrainingRunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TrainingRunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// How a stage process ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StageStatus {
    Exited { code: i32 },
    /// Terminated by a signal before it could exit.
    Killed,
    /// Exceeded the per-stage timeout and was killed.
    TimedOut,
    /// The process could not be started at all.
    SpawnFailed { reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    pub name: String,
    pub kind: StageKind,
    pub success: bool,
    #[serde(with = "duration_secs")]
    pub elapsed: Duration,
    pub metric: Option<f64>,
    pub status: StageStatus,
    /// Tail of the combined stdout and stderr.
    pub output: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ValidationIssue {
    StageFailed { stage: String },
    MissingArtifact { path: PathBuf },
    MainMetricMissing,
    MainMetricAboveCeiling { metric: f64, ceiling: f64 },
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StageFailed { stage } => write!(f, "stage '{stage}' failed"),
            Self::MissingArtifact { path } => write!(f, "missing artifact {}", path.display()),
            Self::MainMetricMissing => write!(f, "main stage reported no metric"),
            Self::MainMetricAboveCeiling { metric, ceiling } => {
                write!(f, "main metric {metric:.2} exceeds ceiling {ceiling:.2}")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    Committed,
    RolledBack,
    FailedNoBackup,
}

impl std::fmt::Display for Disposition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Committed => "committed",
            Self::RolledBack => "rolled_back",
            Self::FailedNoBackup => "failed_no_backup",
        };
        f.write_str(s)
    }
}

/// Outcome of one orchestration attempt. Built by the orchestrator and
/// not modified once returned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingRun {
    pub id: TrainingRunId,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Snapshot taken before any stage ran.
    pub backup_version: Option<String>,
    pub stages: Vec<StageResult>,
    pub issues: Vec<ValidationIssue>,
    pub disposition: Disposition,
    /// Why the pre-run snapshot failed, for `FailedNoBackup`.
    pub error: Option<String>,
}

impl TrainingRun {
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        (self.finished_at - self.started_at).to_std().unwrap_or_default()
    }

    #[must_use]
    pub fn is_committed(&self) -> bool {
        self.disposition == Disposition::Committed
    }

    #[must_use]
    pub fn stage(&self, name: &str) -> Option<&StageResult> {
        self.stages.iter().find(|s| s.name == name)
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Ok(Duration::from_secs_f64(secs.max(0.0)))
    }
}
