use thiserror::Error;

pub type TrainingResult<T> = std::result::Result<T, TrainingError>;

#[derive(Debug, Error)]
pub enum TrainingError {
    /// Snapshot or restore I/O failed; the operation was aborted.
    #[error("storage error: {0}")]
    Storage(String),

    #[error("backup version not found: {0}")]
    VersionNotFound(String),

    /// Validation failed and the pre-run snapshot could not be restored.
    /// Production state is of unknown integrity.
    #[error("rollback to {version} failed, production models need manual repair: {reason}")]
    Rollback { version: String, reason: String },

    #[error("invalid pipeline spec: {0}")]
    InvalidSpec(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
