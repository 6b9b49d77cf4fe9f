//! Command implementations for the LotHelper CLI.

pub mod backup;
pub mod config;
pub mod gate;
pub mod monitor;
pub mod train;

pub use backup::BackupCommand;
pub use config::ConfigCommand;
pub use gate::GateCommand;
pub use monitor::MonitorCommand;

use anyhow::{bail, Result};
use lothelper_monitor::{control, MonitorState, RetrainConfig};

/// Refuse to touch the model directory while the monitor owns it.
pub(crate) fn ensure_monitor_idle(config: &RetrainConfig) -> Result<()> {
    if let MonitorState::Running { pid } = control::state(&config.pid_file())? {
        bail!("Monitor is running (PID {}); stop it first with 'lh monitor stop'", pid);
    }
    Ok(())
}
