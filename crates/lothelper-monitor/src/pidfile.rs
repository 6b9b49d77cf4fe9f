//! Single-instance guard backed by a PID file.

use crate::error::{MonitorError, MonitorResult};
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Holds the PID file for as long as it lives; dropping it removes the file.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
    pid: u32,
}

impl PidFile {
    /// Record the current process as the running monitor.
    ///
    /// Fails with [`MonitorError::SingleInstance`] when another live process
    /// owns the file. A file left behind by a dead process is replaced.
    pub fn acquire(path: &Path) -> MonitorResult<Self> {
        let pid = std::process::id();
        match inspect(path)? {
            PidFileEntry::Missing => {}
            PidFileEntry::Pid(owner) if owner != pid && is_alive(owner) => {
                return Err(MonitorError::SingleInstance { pid: owner });
            }
            PidFileEntry::Pid(owner) => {
                if owner != pid {
                    warn!(pid = owner, path = %path.display(), "Removing stale PID file");
                }
                std::fs::remove_file(path)?;
            }
            PidFileEntry::Corrupt => {
                warn!(path = %path.display(), "Replacing unreadable PID file");
                std::fs::remove_file(path)?;
            }
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, format!("{pid}\n"))?;
        debug!(pid, path = %path.display(), "Acquired PID file");
        Ok(Self { path: path.to_path_buf(), pid })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn pid(&self) -> u32 {
        self.pid
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        // Only remove the file if it still names us.
        if matches!(read_pid(&self.path), Ok(Some(pid)) if pid == self.pid) {
            if let Err(e) = std::fs::remove_file(&self.path) {
                warn!(path = %self.path.display(), error = %e, "Failed to remove PID file");
            }
        }
    }
}

/// What a PID file on disk holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PidFileEntry {
    Missing,
    Pid(u32),
    /// Empty or garbage, e.g. left by a crash mid-write. Never owned by a
    /// live monitor.
    Corrupt,
}

pub fn inspect(path: &Path) -> MonitorResult<PidFileEntry> {
    match std::fs::read_to_string(path) {
        Ok(raw) => Ok(raw.trim().parse::<u32>().map_or(PidFileEntry::Corrupt, PidFileEntry::Pid)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(PidFileEntry::Missing),
        Err(e) => Err(e.into()),
    }
}

/// PID recorded in `path`; `None` when the file is missing or unreadable.
pub fn read_pid(path: &Path) -> MonitorResult<Option<u32>> {
    Ok(match inspect(path)? {
        PidFileEntry::Pid(pid) => Some(pid),
        PidFileEntry::Missing | PidFileEntry::Corrupt => None,
    })
}

/// Zero-signal liveness check. A process we may not signal still exists.
#[must_use]
pub fn is_alive(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }
    match kill(Pid::from_raw(raw), None) {
        Ok(()) => !is_zombie(pid),
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// An exited process nobody has reaped yet still answers the zero signal.
#[cfg(target_os = "linux")]
fn is_zombie(pid: u32) -> bool {
    // Field 3 of /proc/<pid>/stat, after the parenthesised command name.
    std::fs::read_to_string(format!("/proc/{pid}/stat"))
        .ok()
        .and_then(|stat| stat.rsplit_once(')').map(|(_, rest)| rest.trim_start().starts_with('Z')))
        .unwrap_or(false)
}

#[cfg(not(target_os = "linux"))]
fn is_zombie(_pid: u32) -> bool {
    false
}
