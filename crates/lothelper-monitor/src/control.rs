//! Out-of-process control of a running monitor: status and stop.
//!
//! Both operate purely on the PID file, the log file and signals.

use crate::error::MonitorResult;
use crate::pidfile::{inspect, is_alive, PidFileEntry};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use serde::Serialize;
use std::collections::VecDeque;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const KILL_WAIT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum MonitorState {
    Running { pid: u32 },
    /// The PID file names a process that no longer exists, or holds no
    /// readable PID at all.
    Stale { pid: Option<u32> },
    NotRunning,
}

impl MonitorState {
    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub state: MonitorState,
    pub pid_file: PathBuf,
    pub log_file: PathBuf,
    pub log_tail: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StopOutcome {
    NotRunning,
    StalePidFile { pid: Option<u32> },
    /// Exited within the grace period after SIGTERM.
    Terminated { pid: u32 },
    /// Needed SIGKILL.
    Killed { pid: u32 },
}

pub fn state(pid_file: &Path) -> MonitorResult<MonitorState> {
    Ok(match inspect(pid_file)? {
        PidFileEntry::Missing => MonitorState::NotRunning,
        PidFileEntry::Pid(pid) if is_alive(pid) => MonitorState::Running { pid },
        PidFileEntry::Pid(pid) => MonitorState::Stale { pid: Some(pid) },
        PidFileEntry::Corrupt => MonitorState::Stale { pid: None },
    })
}

pub fn status(pid_file: &Path, log_file: &Path, lines: usize) -> MonitorResult<StatusReport> {
    Ok(StatusReport {
        state: state(pid_file)?,
        pid_file: pid_file.to_path_buf(),
        log_file: log_file.to_path_buf(),
        log_tail: tail_lines(log_file, lines)?,
    })
}

/// Terminate the recorded monitor, escalating to SIGKILL after `grace`.
pub async fn stop(pid_file: &Path, grace: Duration) -> MonitorResult<StopOutcome> {
    let pid = match state(pid_file)? {
        MonitorState::NotRunning => return Ok(StopOutcome::NotRunning),
        MonitorState::Stale { pid } => {
            warn!(pid = ?pid, "Monitor not running, removing stale PID file");
            remove_pid_file(pid_file)?;
            return Ok(StopOutcome::StalePidFile { pid });
        }
        MonitorState::Running { pid } => pid,
    };

    let target = Pid::from_raw(i32::try_from(pid).unwrap_or(0));
    info!(pid, grace_secs = grace.as_secs(), "Sending SIGTERM to monitor");
    kill(target, Signal::SIGTERM)?;

    let outcome = if wait_for_exit(pid, grace).await {
        StopOutcome::Terminated { pid }
    } else {
        warn!(pid, "Monitor did not exit within grace period, sending SIGKILL");
        kill(target, Signal::SIGKILL)?;
        wait_for_exit(pid, KILL_WAIT).await;
        StopOutcome::Killed { pid }
    };

    // A clean shutdown removes its own PID file; a killed one cannot.
    remove_pid_file(pid_file)?;
    Ok(outcome)
}

async fn wait_for_exit(pid: u32, limit: Duration) -> bool {
    let deadline = Instant::now() + limit;
    loop {
        if !is_alive(pid) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        sleep(POLL_INTERVAL).await;
    }
}

fn remove_pid_file(path: &Path) -> MonitorResult<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
        _ => Ok(()),
    }
}

/// Last `n` lines of `path`; empty when the file does not exist.
pub fn tail_lines(path: &Path, n: usize) -> MonitorResult<Vec<String>> {
    let file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut tail = VecDeque::with_capacity(n);
    for line in BufReader::new(file).lines() {
        if tail.len() == n {
            tail.pop_front();
        }
        if n > 0 {
            tail.push_back(line?);
        }
    }
    Ok(tail.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::{Child, Command};
    use tempfile::TempDir;

    /// Reap the child in the background so it does not linger as a zombie.
    fn reap(mut child: Child) {
        std::thread::spawn(move || {
            let _ = child.wait();
        });
    }

    fn wait_for_file(path: &Path) {
        for _ in 0..100 {
            if path.exists() {
                return;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        panic!("{} never appeared", path.display());
    }

    #[test]
    fn test_status_without_pid_file() {
        let temp = TempDir::new().unwrap();
        let log = temp.path().join("training_monitor.log");
        std::fs::write(&log, "one\ntwo\nthree\n").unwrap();

        let report = status(&temp.path().join("absent.pid"), &log, 2).unwrap();
        assert_eq!(report.state, MonitorState::NotRunning);
        assert_eq!(report.log_tail, vec!["two", "three"]);
    }

    #[test]
    fn test_status_running() {
        let temp = TempDir::new().unwrap();
        let pid_file = temp.path().join("training_monitor.pid");
        std::fs::write(&pid_file, format!("{}\n", std::process::id())).unwrap();

        let report = status(&pid_file, &temp.path().join("missing.log"), 20).unwrap();
        assert_eq!(report.state, MonitorState::Running { pid: std::process::id() });
        assert!(report.log_tail.is_empty());
    }

    #[tokio::test]
    async fn test_stop_not_running_and_stale() {
        let temp = TempDir::new().unwrap();
        let pid_file = temp.path().join("training_monitor.pid");

        assert_eq!(stop(&pid_file, Duration::from_secs(1)).await.unwrap(), StopOutcome::NotRunning);

        std::fs::write(&pid_file, "4000000\n").unwrap();
        assert_eq!(
            stop(&pid_file, Duration::from_secs(1)).await.unwrap(),
            StopOutcome::StalePidFile { pid: Some(4_000_000) }
        );
        assert!(!pid_file.exists());
    }

    #[tokio::test]
    async fn test_unreadable_pid_file_is_stale() {
        let temp = TempDir::new().unwrap();
        let pid_file = temp.path().join("training_monitor.pid");
        std::fs::write(&pid_file, "").unwrap();

        assert_eq!(state(&pid_file).unwrap(), MonitorState::Stale { pid: None });
        let report = status(&pid_file, &temp.path().join("missing.log"), 5).unwrap();
        assert_eq!(report.state, MonitorState::Stale { pid: None });

        assert_eq!(stop(&pid_file, Duration::from_secs(1)).await.unwrap(), StopOutcome::StalePidFile { pid: None });
        assert!(!pid_file.exists());
    }

    #[tokio::test]
    async fn test_stop_terminates_gracefully() {
        let temp = TempDir::new().unwrap();
        let pid_file = temp.path().join("training_monitor.pid");
        let child = Command::new("sleep").arg("30").spawn().unwrap();
        let pid = child.id();
        std::fs::write(&pid_file, format!("{pid}\n")).unwrap();
        reap(child);

        let outcome = stop(&pid_file, Duration::from_secs(5)).await.unwrap();

        assert_eq!(outcome, StopOutcome::Terminated { pid });
        assert!(!pid_file.exists());
        assert!(!is_alive(pid));
    }

    #[tokio::test]
    async fn test_stop_escalates_to_kill() {
        let temp = TempDir::new().unwrap();
        let pid_file = temp.path().join("training_monitor.pid");
        let ready = temp.path().join("ready");
        let child = Command::new("sh")
            .arg("-c")
            .arg(format!("trap '' TERM; touch {}; exec sleep 30", ready.display()))
            .spawn()
            .unwrap();
        let pid = child.id();
        std::fs::write(&pid_file, format!("{pid}\n")).unwrap();
        reap(child);
        wait_for_file(&ready);

        let outcome = stop(&pid_file, Duration::from_millis(300)).await.unwrap();

        assert_eq!(outcome, StopOutcome::Killed { pid });
        assert!(!pid_file.exists());
    }
}
