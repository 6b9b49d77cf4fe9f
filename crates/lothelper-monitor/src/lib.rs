//! LotHelper Monitor
//!
//! Long-running driver for automatic retraining:
//! - `TrainingDataGate`: how much new, good-quality data has arrived
//! - `RetrainMonitor`: poll loop that triggers the orchestrator
//! - PID-file single-instance guard, detach, status and stop
//! - Configuration file and logging setup shared with the CLI

pub mod config;
pub mod control;
pub mod daemon;
pub mod error;
pub mod gate;
pub mod logging;
pub mod monitor;
pub mod pidfile;

pub use config::{MonitorConfig, PathsConfig, RetrainConfig};
pub use control::{status, stop, MonitorState, StatusReport, StopOutcome};
pub use daemon::{detach_session, spawn_detached};
pub use error::{MonitorError, MonitorResult};
pub use gate::{GateStatistics, SqliteGate, TrainingDataGate};
pub use logging::init_logging;
pub use monitor::{run_foreground, spawn_shutdown_listener, CycleOutcome, MonitorSettings, RetrainMonitor, SCHEDULED_REASON};
pub use pidfile::{inspect, is_alive, read_pid, PidFile, PidFileEntry};
