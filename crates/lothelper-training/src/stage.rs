//! Execution of a single pipeline stage as a child process.

use crate::metric::extract_metric;
use crate::pipeline::{PipelineSpec, StageKind, StageSpec};
use crate::run::{StageResult, StageStatus};
use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// How long output readers may keep draining after the stage is gone.
const DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Runs one stage to completion. Failures are reported in the returned
/// [`StageResult`], never as an error.
#[async_trait]
pub trait StageExecutor: Send + Sync {
    async fn execute(&self, kind: StageKind, stage: &StageSpec) -> StageResult;
}

/// Launches stages as isolated child processes with a per-stage timeout.
#[derive(Debug, Clone)]
pub struct ProcessStageRunner {
    workdir: PathBuf,
    timeout: Duration,
    max_output_bytes: usize,
}

impl ProcessStageRunner {
    #[must_use]
    pub fn new(workdir: PathBuf, timeout: Duration) -> Self {
        Self { workdir, timeout, max_output_bytes: 8192 }
    }

    #[must_use]
    pub fn from_pipeline(spec: &PipelineSpec) -> Self {
        Self::new(spec.workdir.clone(), spec.stage_timeout()).with_max_output_bytes(spec.max_output_bytes)
    }

    #[must_use]
    pub fn with_max_output_bytes(mut self, max: usize) -> Self {
        self.max_output_bytes = max;
        self
    }

    fn result(
        &self,
        kind: StageKind,
        stage: &StageSpec,
        started: Instant,
        status: StageStatus,
        output: &str,
    ) -> StageResult {
        let success = status == StageStatus::Exited { code: 0 };
        StageResult {
            name: stage.name.clone(),
            kind,
            success,
            elapsed: started.elapsed(),
            metric: extract_metric(output),
            status,
            output: tail(output, self.max_output_bytes).to_string(),
        }
    }
}

#[async_trait]
impl StageExecutor for ProcessStageRunner {
    async fn execute(&self, kind: StageKind, stage: &StageSpec) -> StageResult {
        let started = Instant::now();
        let Some((program, args)) = stage.command.split_first() else {
            let status = StageStatus::SpawnFailed { reason: "empty command".to_string() };
            return self.result(kind, stage, started, status, "");
        };

        debug!(stage = %stage.name, program = %program, "Starting stage");

        // The stage leads its own process group so everything it starts can
        // be killed with it.
        let child = Command::new(program)
            .args(args)
            .current_dir(&self.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true)
            .spawn();

        let mut child = match child {
            Ok(child) => child,
            Err(e) => {
                warn!(stage = %stage.name, error = %e, "Failed to start stage");
                let status = StageStatus::SpawnFailed { reason: e.to_string() };
                return self.result(kind, stage, started, status, "");
            }
        };

        let stdout = Capture::start(child.stdout.take());
        let stderr = Capture::start(child.stderr.take());
        let group = child.id().and_then(|id| i32::try_from(id).ok()).map(Pid::from_raw);

        let status = match timeout(self.timeout, child.wait()).await {
            Ok(Ok(exit)) => match exit.code() {
                Some(code) => StageStatus::Exited { code },
                None => StageStatus::Killed,
            },
            Ok(Err(e)) => StageStatus::SpawnFailed { reason: format!("failed to wait for stage: {e}") },
            Err(_) => StageStatus::TimedOut,
        };

        // Nothing the stage started may keep writing once it is over.
        if let Some(group) = group {
            kill_group(&stage.name, group);
        }
        if status == StageStatus::TimedOut {
            if let Err(e) = child.kill().await {
                warn!(stage = %stage.name, error = %e, "Failed to kill timed out stage");
            }
        }

        let mut combined = stdout.finish().await;
        combined.push_str(&stderr.finish().await);
        let result = self.result(kind, stage, started, status, &combined);

        if result.success {
            info!(
                stage = %result.name,
                metric = ?result.metric,
                elapsed_secs = result.elapsed.as_secs_f64(),
                "Stage succeeded"
            );
        } else {
            warn!(
                stage = %result.name,
                status = ?result.status,
                elapsed_secs = result.elapsed.as_secs_f64(),
                "Stage failed"
            );
        }
        result
    }
}

fn kill_group(stage: &str, group: Pid) {
    match killpg(group, Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => warn!(stage, error = %e, "Failed to kill stage process group"),
    }
}

/// Output read from one pipe as it arrives, so a stage that never finishes
/// still leaves its output behind.
struct Capture {
    buffer: Arc<Mutex<Vec<u8>>>,
    task: Option<JoinHandle<()>>,
}

impl Capture {
    fn start<R>(reader: Option<R>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let task = reader.map(|mut reader| {
            let buffer = Arc::clone(&buffer);
            tokio::spawn(async move {
                let mut chunk = [0u8; 4096];
                loop {
                    match reader.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => buffer.lock().await.extend_from_slice(&chunk[..n]),
                    }
                }
            })
        });
        Self { buffer, task }
    }

    /// Wait briefly for the pipe to close, then take what was read.
    async fn finish(self) -> String {
        if let Some(task) = self.task {
            if timeout(DRAIN_GRACE, task).await.is_err() {
                debug!("Stage output still open, keeping what was read");
            }
        }
        String::from_utf8_lossy(&self.buffer.lock().await).into_owned()
    }
}

/// Last `max` bytes of `s`, cut on a char boundary.
fn tail(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}
