//! Detaching the monitor from the controlling terminal.
//!
//! The current executable is re-launched with stdin closed and
//! stdout/stderr appended to the log file. The child calls
//! [`detach_session`] before it takes the PID file, and the parent returns
//! once that file names the child.

use crate::error::{MonitorError, MonitorResult};
use crate::pidfile::read_pid;
use std::ffi::OsString;
use std::fs::OpenOptions;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use nix::unistd::setsid;
use tracing::info;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Start `program args` in the background and wait until it owns `pid_file`.
pub async fn spawn_detached(
    program: &Path,
    args: &[OsString],
    log_file: &Path,
    pid_file: &Path,
    startup_timeout: Duration,
) -> MonitorResult<u32> {
    if let Some(parent) = log_file.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
        .map_err(|e| MonitorError::Daemonize(format!("cannot open log file {}: {e}", log_file.display())))?;
    let log_err = log.try_clone()?;

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(log)
        .stderr(log_err)
        .spawn()
        .map_err(|e| MonitorError::Daemonize(format!("cannot launch {}: {e}", program.display())))?;
    let pid = child.id();

    let deadline = Instant::now() + startup_timeout;
    loop {
        if matches!(read_pid(pid_file), Ok(Some(owner)) if owner == pid) {
            info!(pid, log_file = %log_file.display(), "Monitor started in background");
            return Ok(pid);
        }
        if let Some(status) = child.try_wait()? {
            return Err(MonitorError::Daemonize(format!(
                "monitor exited during startup ({status}), see {}",
                log_file.display()
            )));
        }
        if Instant::now() >= deadline {
            return Err(MonitorError::Daemonize(format!(
                "monitor (PID {pid}) did not write {} within {}s",
                pid_file.display(),
                startup_timeout.as_secs()
            )));
        }
        sleep(POLL_INTERVAL).await;
    }
}

/// Leave the caller's session and controlling terminal.
///
/// Must run before the PID file is written. A process group leader cannot
/// start a new session, so the launcher does not give the child its own
/// group.
pub fn detach_session() -> MonitorResult<()> {
    let sid = setsid().map_err(|e| MonitorError::Daemonize(format!("cannot start a new session: {e}")))?;
    info!(sid = sid.as_raw(), "Detached from controlling terminal");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sh(script: String) -> Vec<OsString> {
        vec!["-c".into(), script.into()]
    }

    #[tokio::test]
    async fn test_returns_once_pid_file_written() {
        let temp = TempDir::new().unwrap();
        let pid_file = temp.path().join("training_monitor.pid");
        let log_file = temp.path().join("logs/training_monitor.log");
        let script = format!("echo started; echo $$ > {}; sleep 1", pid_file.display());

        let pid = spawn_detached(Path::new("/bin/sh"), &sh(script), &log_file, &pid_file, Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(read_pid(&pid_file).unwrap(), Some(pid));
        sleep(Duration::from_millis(200)).await;
        assert!(std::fs::read_to_string(&log_file).unwrap().contains("started"));
    }

    #[tokio::test]
    async fn test_early_exit_is_reported() {
        let temp = TempDir::new().unwrap();
        let pid_file = temp.path().join("training_monitor.pid");
        let log_file = temp.path().join("training_monitor.log");

        let err = spawn_detached(
            Path::new("/bin/sh"),
            &sh("echo 'monitor already running' >&2; exit 1".to_string()),
            &log_file,
            &pid_file,
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, MonitorError::Daemonize(_)));
        assert!(std::fs::read_to_string(&log_file).unwrap().contains("already running"));
    }
}
