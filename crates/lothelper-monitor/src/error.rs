use lothelper_training::TrainingError;
use thiserror::Error;

pub type MonitorResult<T> = std::result::Result<T, MonitorError>;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error(transparent)]
    Training(#[from] TrainingError),

    #[error("training data gate error: {0}")]
    Gate(#[from] rusqlite::Error),

    #[error("configuration error: {0}")]
    Config(String),

    /// Another live monitor owns the PID file.
    #[error("monitor already running (PID {pid})")]
    SingleInstance { pid: u32 },

    #[error("failed to start monitor in the background: {0}")]
    Daemonize(String),

    #[error("signal error: {0}")]
    Signal(#[from] nix::errno::Errno),

    /// A pre-training backup could not be taken. The monitor stops rather
    /// than keep retrying without a safety net.
    #[error("backup before training failed, monitor halted: {0}")]
    SafetyNetLost(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
