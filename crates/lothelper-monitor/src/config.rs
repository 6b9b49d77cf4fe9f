//! Retraining configuration file support.
//!
//! Configuration precedence:
//! 1. CLI arguments (applied by the caller)
//! 2. Local config file (`./.lothelperrc`)
//! 3. Global config file (`~/.lothelper/retrain.toml`)
//! 4. Defaults

use crate::error::{MonitorError, MonitorResult};
use crate::monitor::MonitorSettings;
use lothelper_training::{ArtifactLayout, PipelineSpec};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const STATE_DIR_NAME: &str = ".lothelper";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrainConfig {
    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Pipeline definition; the standard pipeline when absent.
    #[serde(default)]
    pub pipeline: Option<PipelineSpec>,
}

/// File locations. Unset entries fall back to the state directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
    #[serde(default)]
    pub model_dir: Option<PathBuf>,
    #[serde(default)]
    pub backup_dir: Option<PathBuf>,
    #[serde(default)]
    pub database: Option<PathBuf>,
    #[serde(default)]
    pub pid_file: Option<PathBuf>,
    #[serde(default)]
    pub log_file: Option<PathBuf>,
    #[serde(default)]
    pub cursor_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default)]
    pub interval_secs: Option<u64>,
    #[serde(default)]
    pub min_quality_score: Option<f64>,
    #[serde(default)]
    pub min_new_records: Option<u64>,
    #[serde(default)]
    pub stop_grace_secs: Option<u64>,
    /// Hours between scheduled disaster-recovery snapshots, 0 disables.
    #[serde(default)]
    pub scheduled_backup_hours: Option<u64>,
}

impl RetrainConfig {
    /// Load configuration from a TOML file.
    pub fn load_from_file(path: &Path) -> MonitorResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| MonitorError::Config(format!("{}: {}", path.display(), e)))?;
        toml::from_str(&content).map_err(|e| MonitorError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn save_to_file(&self, path: &Path) -> MonitorResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| MonitorError::Config(format!("failed to serialize: {e}")))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    #[must_use]
    pub fn default_global_path() -> PathBuf {
        default_state_dir().join("retrain.toml")
    }

    #[must_use]
    pub fn default_local_path() -> PathBuf {
        PathBuf::from(".lothelperrc")
    }

    /// Global config overlaid with the local one. Missing files are skipped,
    /// unreadable ones are an error.
    pub fn discover_and_load() -> MonitorResult<Self> {
        let mut config = Self::default();
        for path in [Self::default_global_path(), Self::default_local_path()] {
            if path.exists() {
                config.merge(Self::load_from_file(&path)?);
            }
        }
        Ok(config)
    }

    /// Values set in `other` override values in `self`.
    pub fn merge(&mut self, other: Self) {
        let p = other.paths;
        merge_opt(&mut self.paths.state_dir, p.state_dir);
        merge_opt(&mut self.paths.model_dir, p.model_dir);
        merge_opt(&mut self.paths.backup_dir, p.backup_dir);
        merge_opt(&mut self.paths.database, p.database);
        merge_opt(&mut self.paths.pid_file, p.pid_file);
        merge_opt(&mut self.paths.log_file, p.log_file);
        merge_opt(&mut self.paths.cursor_file, p.cursor_file);

        let m = other.monitor;
        merge_opt(&mut self.monitor.interval_secs, m.interval_secs);
        merge_opt(&mut self.monitor.min_quality_score, m.min_quality_score);
        merge_opt(&mut self.monitor.min_new_records, m.min_new_records);
        merge_opt(&mut self.monitor.stop_grace_secs, m.stop_grace_secs);
        merge_opt(&mut self.monitor.scheduled_backup_hours, m.scheduled_backup_hours);

        merge_opt(&mut self.pipeline, other.pipeline);
    }

    #[must_use]
    pub fn state_dir(&self) -> PathBuf {
        self.paths.state_dir.clone().unwrap_or_else(default_state_dir)
    }

    #[must_use]
    pub fn model_dir(&self) -> PathBuf {
        self.paths.model_dir.clone().unwrap_or_else(|| self.state_dir().join("models"))
    }

    #[must_use]
    pub fn artifact_layout(&self) -> ArtifactLayout {
        let model_dir = self.model_dir();
        match &self.paths.backup_dir {
            Some(backup_dir) => ArtifactLayout::new(model_dir, backup_dir.clone()),
            None => ArtifactLayout::for_model_dir(&model_dir),
        }
    }

    #[must_use]
    pub fn database(&self) -> PathBuf {
        self.paths.database.clone().unwrap_or_else(|| self.state_dir().join("metadata_cache.db"))
    }

    #[must_use]
    pub fn pid_file(&self) -> PathBuf {
        self.paths.pid_file.clone().unwrap_or_else(|| self.state_dir().join("training_monitor.pid"))
    }

    #[must_use]
    pub fn log_file(&self) -> PathBuf {
        self.paths.log_file.clone().unwrap_or_else(|| self.state_dir().join("training_monitor.log"))
    }

    #[must_use]
    pub fn cursor_file(&self) -> PathBuf {
        self.paths.cursor_file.clone().unwrap_or_else(|| self.state_dir().join("last_training_state.txt"))
    }

    #[must_use]
    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.monitor.stop_grace_secs.unwrap_or(10))
    }

    /// The configured pipeline, or the standard one run from the current
    /// directory.
    pub fn pipeline(&self) -> MonitorResult<PipelineSpec> {
        let spec = match &self.pipeline {
            Some(spec) => spec.clone(),
            None => PipelineSpec::standard(std::env::current_dir()?),
        };
        spec.validate()?;
        Ok(spec)
    }

    /// The effective configuration with every default filled in.
    pub fn resolved(&self) -> MonitorResult<Self> {
        let settings = self.settings()?;
        let layout = self.artifact_layout();
        Ok(Self {
            paths: PathsConfig {
                state_dir: Some(self.state_dir()),
                model_dir: Some(layout.model_dir().to_path_buf()),
                backup_dir: Some(layout.backup_dir().to_path_buf()),
                database: Some(self.database()),
                pid_file: Some(self.pid_file()),
                log_file: Some(self.log_file()),
                cursor_file: Some(self.cursor_file()),
            },
            monitor: MonitorConfig {
                interval_secs: Some(settings.interval.as_secs()),
                min_quality_score: Some(settings.min_quality_score),
                min_new_records: Some(settings.min_new_records),
                stop_grace_secs: Some(self.stop_grace().as_secs()),
                scheduled_backup_hours: Some(settings.scheduled_backup_every.map_or(0, |d| d.as_secs() / 3600)),
            },
            pipeline: Some(self.pipeline()?),
        })
    }

    pub fn settings(&self) -> MonitorResult<MonitorSettings> {
        let m = &self.monitor;
        let settings = MonitorSettings {
            interval: Duration::from_secs(m.interval_secs.unwrap_or(600)),
            min_quality_score: m.min_quality_score.unwrap_or(0.6),
            min_new_records: m.min_new_records.unwrap_or(1),
            scheduled_backup_every: match m.scheduled_backup_hours.unwrap_or(24) {
                0 => None,
                hours => Some(Duration::from_secs(hours * 3600)),
            },
        };
        if settings.interval.is_zero() {
            return Err(MonitorError::Config("monitor.interval_secs must be >= 1".to_string()));
        }
        if !(0.0..=1.0).contains(&settings.min_quality_score) {
            return Err(MonitorError::Config("monitor.min_quality_score must be within 0..=1".to_string()));
        }
        Ok(settings)
    }
}

fn merge_opt<T>(slot: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *slot = value;
    }
}

fn default_state_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(STATE_DIR_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("retrain.toml");

        let config_content = r#"
[paths]
state_dir = "/var/lib/lothelper"
model_dir = "/srv/models"

[monitor]
interval_secs = 120
min_quality_score = 0.7
min_new_records = 5
scheduled_backup_hours = 0

[pipeline]
workdir = "/srv/lothelper"
max_parallel = 3

[pipeline.main]
name = "price"
command = ["python3", "scripts/train_price_model.py"]
outputs = ["price_v1.pkl", "metadata.json"]

[[pipeline.specialists]]
name = "ebay"
command = ["python3", "scripts/stacking/train_ebay_model.py"]
outputs = ["stacking/ebay_model.pkl"]

[pipeline.aggregate]
name = "lot"
command = ["python3", "scripts/stacking/train_lot_model.py"]

[pipeline.combiner]
name = "meta"
command = ["python3", "scripts/stacking/train_meta_model.py"]
"#;
        std::fs::write(&config_path, config_content).unwrap();

        let config = RetrainConfig::load_from_file(&config_path).unwrap();
        assert_eq!(config.model_dir(), PathBuf::from("/srv/models"));
        assert_eq!(config.pid_file(), PathBuf::from("/var/lib/lothelper/training_monitor.pid"));
        assert_eq!(config.artifact_layout().backup_dir(), Path::new("/srv/models/backups"));

        let settings = config.settings().unwrap();
        assert_eq!(settings.interval, Duration::from_secs(120));
        assert_eq!(settings.min_new_records, 5);
        assert!(settings.scheduled_backup_every.is_none());

        let pipeline = config.pipeline().unwrap();
        assert_eq!(pipeline.max_parallel, 3);
        assert_eq!(pipeline.stage_timeout_secs, 600);
        assert_eq!(pipeline.specialists.len(), 1);
    }

    #[test]
    fn test_merge_overrides_only_set_values() {
        let mut base = RetrainConfig::default();
        base.monitor.interval_secs = Some(600);
        base.monitor.min_new_records = Some(1);

        let mut local = RetrainConfig::default();
        local.monitor.min_new_records = Some(10);
        local.paths.model_dir = Some(PathBuf::from("/tmp/models"));

        base.merge(local);
        assert_eq!(base.monitor.interval_secs, Some(600));
        assert_eq!(base.monitor.min_new_records, Some(10));
        assert_eq!(base.model_dir(), PathBuf::from("/tmp/models"));
    }

    #[test]
    fn test_defaults() {
        let config = RetrainConfig {
            paths: PathsConfig { state_dir: Some(PathBuf::from("/state")), ..Default::default() },
            ..Default::default()
        };
        let settings = config.settings().unwrap();

        assert_eq!(settings.interval, Duration::from_secs(600));
        assert!((settings.min_quality_score - 0.6).abs() < f64::EPSILON);
        assert_eq!(settings.scheduled_backup_every, Some(Duration::from_secs(24 * 3600)));
        assert_eq!(config.log_file(), PathBuf::from("/state/training_monitor.log"));
        assert_eq!(config.cursor_file(), PathBuf::from("/state/last_training_state.txt"));
        assert_eq!(config.stop_grace(), Duration::from_secs(10));
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested/retrain.toml");
        let mut config = RetrainConfig::default();
        config.monitor.min_new_records = Some(5);

        config.save_to_file(&path).unwrap();
        let loaded = RetrainConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.monitor.min_new_records, Some(5));
    }

    #[test]
    fn test_resolved_fills_every_default() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = RetrainConfig::default();
        config.paths.state_dir = Some(temp_dir.path().to_path_buf());

        let resolved = config.resolved().unwrap();
        assert_eq!(resolved.paths.model_dir, Some(temp_dir.path().join("models")));
        assert_eq!(resolved.paths.backup_dir, Some(temp_dir.path().join("models/backups")));
        assert_eq!(resolved.monitor.scheduled_backup_hours, Some(24));
        assert_eq!(resolved.pipeline.as_ref().unwrap().specialists.len(), 6);
        assert!(toml::to_string_pretty(&resolved).is_ok());
    }

    #[test]
    fn test_invalid_quality_rejected() {
        let mut config = RetrainConfig::default();
        config.monitor.min_quality_score = Some(1.5);
        assert!(config.settings().is_err());
    }
}
