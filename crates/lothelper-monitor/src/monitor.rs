//! The retraining poll loop.
//!
//! Each cycle goes `checking_gate -> idle | triggering -> logging`, then the
//! loop sleeps for the poll interval. A shutdown request is honoured between
//! cycles and during the sleep, never in the middle of a training run.

use crate::config::RetrainConfig;
use crate::error::{MonitorError, MonitorResult};
use crate::gate::{SqliteGate, TrainingDataGate};
use crate::pidfile::PidFile;
use chrono::{Local, Utc};
use lothelper_training::{ArtifactStore, Disposition, Retrainer, TrainingOrchestrator, TrainingRun};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub const SCHEDULED_REASON: &str = "scheduled";

#[derive(Debug, Clone, PartialEq)]
pub struct MonitorSettings {
    pub interval: Duration,
    pub min_quality_score: f64,
    pub min_new_records: u64,
    /// Age after which a fresh disaster-recovery snapshot is taken.
    pub scheduled_backup_every: Option<Duration>,
}

#[derive(Debug)]
pub enum CycleOutcome {
    Idle { new_records: u64 },
    Triggered(Box<TrainingRun>),
    /// The gate could not be queried; retried next cycle.
    GateUnavailable { reason: String },
}

pub struct RetrainMonitor {
    settings: MonitorSettings,
    gate: Arc<dyn TrainingDataGate>,
    retrainer: Arc<dyn Retrainer>,
    store: Option<ArtifactStore>,
    cycles: u64,
    runs: u64,
}

impl RetrainMonitor {
    pub fn new(settings: MonitorSettings, gate: Arc<dyn TrainingDataGate>, retrainer: Arc<dyn Retrainer>) -> Self {
        Self { settings, gate, retrainer, store: None, cycles: 0, runs: 0 }
    }

    /// Enables scheduled snapshots of `store`.
    #[must_use]
    pub fn with_store(mut self, store: ArtifactStore) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn settings(&self) -> &MonitorSettings {
        &self.settings
    }

    #[must_use]
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    #[must_use]
    pub fn runs(&self) -> u64 {
        self.runs
    }

    /// Poll until `shutdown` is cancelled.
    ///
    /// Returns `Err` only when the safety net is gone: a pre-training backup
    /// failed, or a rollback could not restore production.
    pub async fn run(&mut self, shutdown: &CancellationToken) -> MonitorResult<()> {
        info!(
            interval_secs = self.settings.interval.as_secs(),
            min_new_records = self.settings.min_new_records,
            min_quality_score = self.settings.min_quality_score,
            "Training monitor started"
        );

        while !shutdown.is_cancelled() {
            self.run_cycle().await?;

            tokio::select! {
                () = shutdown.cancelled() => {}
                () = tokio::time::sleep(self.settings.interval) => {}
            }
        }

        info!(cycles = self.cycles, runs = self.runs, "Training monitor stopped");
        Ok(())
    }

    pub async fn run_cycle(&mut self) -> MonitorResult<CycleOutcome> {
        self.cycles += 1;
        self.scheduled_backup().await;

        let new_records = match self.gate.count_new(self.settings.min_quality_score) {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "Training data gate unavailable");
                return Ok(CycleOutcome::GateUnavailable { reason: e.to_string() });
            }
        };

        if new_records < self.settings.min_new_records {
            info!(
                new_records,
                threshold = self.settings.min_new_records,
                "Not enough new training data"
            );
            return Ok(CycleOutcome::Idle { new_records });
        }

        info!(new_records, "Triggering retraining");
        self.runs += 1;
        let run = self.retrainer.retrain().await?;

        info!(
            run = %run.id,
            disposition = %run.disposition,
            backup = run.backup_version.as_deref().unwrap_or("none"),
            elapsed_secs = run.elapsed().as_secs(),
            stages = run.stages.len(),
            issues = run.issues.len(),
            "Training run complete"
        );

        match run.disposition {
            Disposition::Committed => {
                if let Err(e) = self.gate.mark_consumed(Local::now()) {
                    error!(error = %e, "Failed to advance training data cursor");
                }
            }
            Disposition::RolledBack => {
                warn!(run = %run.id, "New models rejected, production restored");
            }
            Disposition::FailedNoBackup => {
                let reason = run.error.clone().unwrap_or_else(|| "unknown".to_string());
                error!(run = %run.id, reason = %reason, "Pre-training backup failed, halting monitor");
                return Err(MonitorError::SafetyNetLost(reason));
            }
        }

        Ok(CycleOutcome::Triggered(Box::new(run)))
    }

    /// Take a `scheduled` snapshot when the newest one is older than the
    /// configured age. Failures are logged; they do not stop the monitor.
    async fn scheduled_backup(&self) {
        let (Some(store), Some(every)) = (self.store.clone(), self.settings.scheduled_backup_every) else {
            return;
        };

        let result = tokio::task::spawn_blocking(move || -> MonitorResult<Option<String>> {
            let newest = store
                .list()?
                .into_iter()
                .filter(|s| s.reason.as_deref() == Some(SCHEDULED_REASON))
                .map(|s| s.created_at)
                .max();
            let due = newest.is_none_or(|at| (Utc::now() - at).to_std().unwrap_or_default() >= every);
            if !due || !store.layout().model_dir().is_dir() {
                return Ok(None);
            }
            Ok(Some(store.snapshot(SCHEDULED_REASON)?))
        })
        .await;

        match result {
            Ok(Ok(Some(version))) => info!(version = %version, "Scheduled backup taken"),
            Ok(Ok(None)) => {}
            Ok(Err(e)) => warn!(error = %e, "Scheduled backup failed"),
            Err(e) => warn!(error = %e, "Scheduled backup task failed"),
        }
    }
}

/// Cancel `token` on SIGTERM or SIGINT.
pub fn spawn_shutdown_listener(token: CancellationToken) -> MonitorResult<JoinHandle<()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    Ok(tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM, stopping after current cycle"),
            _ = sigint.recv() => info!("Received SIGINT, stopping after current cycle"),
            () = token.cancelled() => return,
        }
        token.cancel();
    }))
}

/// Run the monitor in this process until a shutdown signal arrives.
///
/// The PID file is held for the whole loop and removed on the way out,
/// including when the loop halts with an error.
pub async fn run_foreground(config: &RetrainConfig) -> MonitorResult<()> {
    let settings = config.settings()?;
    let pipeline = config.pipeline()?;
    let store = ArtifactStore::new(config.artifact_layout());
    let orchestrator = TrainingOrchestrator::new(store.clone(), pipeline)?;
    let gate = SqliteGate::new(config.database(), config.cursor_file());

    // Handlers go in before the PID file is visible to `stop`.
    let shutdown = CancellationToken::new();
    let listener = spawn_shutdown_listener(shutdown.clone())?;

    let guard = PidFile::acquire(&config.pid_file())?;
    info!(pid = guard.pid(), model_dir = %config.model_dir().display(), "Monitor owns PID file");

    let mut monitor = RetrainMonitor::new(settings, Arc::new(gate), Arc::new(orchestrator)).with_store(store);
    let result = monitor.run(&shutdown).await;

    shutdown.cancel();
    let _ = listener.await;
    drop(guard);
    if let Err(e) = &result {
        error!(error = %e, "Monitor halted");
    }
    result
}
