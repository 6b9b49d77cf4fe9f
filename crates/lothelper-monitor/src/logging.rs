//! Tracing setup for the monitor and the CLI.
//!
//! The log file is append-only with timestamped, non-ANSI lines; it is the
//! audit trail for every run disposition and retention sweep.

use crate::error::{MonitorError, MonitorResult};
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber.
///
/// `RUST_LOG` wins over `level`. With `log_file` set, events are appended
/// there; `console` adds a stderr layer so stdout stays free for command
/// output. A detached monitor already has stderr pointed at the log file and
/// passes `console = false`.
pub fn init_logging(level: &str, log_file: Option<&Path>, console: bool) -> MonitorResult<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let file_layer = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(fmt::layer().with_writer(Mutex::new(file)).with_ansi(false).with_target(false))
        }
        None => None,
    };
    let console_layer = console.then(|| fmt::layer().with_writer(std::io::stderr).with_target(false));

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|e| MonitorError::Config(format!("failed to initialise logging: {e}")))
}
