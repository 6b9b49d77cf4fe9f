//! Versioned backup and restore of the production model directory.

use crate::error::{TrainingError, TrainingResult};
use crate::layout::{ArtifactLayout, METADATA_FILE, SNAPSHOT_MANIFEST};
use crate::retention::{RetentionCandidate, RetentionPlan, RetentionPolicy};
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

const VERSION_FORMAT: &str = "%Y%m%d_%H%M%S";

/// One file captured in a snapshot, relative to the model directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotFile {
    pub path: PathBuf,
    pub size: u64,
    pub sha256: String,
}

/// Manifest written next to the copied files of every backup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotManifest {
    pub version: String,
    pub created_at: DateTime<Utc>,
    pub reason: String,
    pub files: Vec<SnapshotFile>,
}

impl SnapshotManifest {
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }
}

/// Training metrics carried by a model generation's `metadata.json`.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct TrainingMetrics {
    #[serde(default)]
    pub test_mae: Option<f64>,
    #[serde(default)]
    pub train_date: Option<String>,
    #[serde(flatten)]
    pub other: BTreeMap<String, serde_json::Value>,
}

impl TrainingMetrics {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.test_mae.is_none() && self.train_date.is_none() && self.other.is_empty()
    }
}

/// Entry returned by [`ArtifactStore::list`].
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotInfo {
    pub version: String,
    pub created_at: DateTime<Utc>,
    pub reason: Option<String>,
    pub size: u64,
    pub path: PathBuf,
    pub metrics: TrainingMetrics,
}

/// Result of a retention sweep.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub kept: Vec<String>,
    pub deleted: Vec<String>,
}

/// Owns the production model directory and its timestamped backups.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    layout: ArtifactLayout,
    retention: RetentionPolicy,
}

impl ArtifactStore {
    #[must_use]
    pub fn new(layout: ArtifactLayout) -> Self {
        Self { layout, retention: RetentionPolicy::default() }
    }

    #[must_use]
    pub fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }

    #[must_use]
    pub fn layout(&self) -> &ArtifactLayout {
        &self.layout
    }

    /// Copy every production file into a new backup and return its version id.
    ///
    /// The copy is assembled in a staging directory and only renamed into
    /// place once every file has been copied, so a failed snapshot leaves no
    /// partial backup behind. A retention sweep runs afterwards.
    pub fn snapshot(&self, reason: &str) -> TrainingResult<String> {
        let model_dir = self.layout.model_dir();
        if !model_dir.is_dir() {
            return Err(TrainingError::Storage(format!(
                "production model directory not found: {}",
                model_dir.display()
            )));
        }

        fs::create_dir_all(self.layout.backup_dir()).map_err(|e| storage_err("create backup dir", &e))?;

        let created_at = Utc::now();
        let version = self.next_version(created_at);
        let staging = self.layout.staging_dir(&version);

        let manifest = match self.copy_into_staging(&staging, &version, created_at, reason) {
            Ok(manifest) => manifest,
            Err(e) => {
                if let Err(cleanup) = fs::remove_dir_all(&staging) {
                    warn!(path = %staging.display(), error = %cleanup, "Failed to discard partial snapshot");
                }
                return Err(e);
            }
        };

        fs::rename(&staging, self.layout.version_dir(&version)).map_err(|e| {
            let _ = fs::remove_dir_all(&staging);
            storage_err("finalize snapshot", &e)
        })?;

        info!(
            version = %version,
            reason,
            files = manifest.files.len(),
            bytes = manifest.total_size(),
            "Snapshot created"
        );

        if let Err(e) = self.sweep() {
            warn!(error = %e, "Retention sweep failed");
        }

        Ok(version)
    }

    /// Copy a backup back over the production directory.
    ///
    /// Each restored file is verified against the digest recorded at snapshot
    /// time. Production files that are not part of the snapshot are removed,
    /// so the result is identical to the snapshot. Restoring the same version
    /// twice yields the same directory.
    pub fn restore(&self, version: &str) -> TrainingResult<()> {
        let version_dir = self.layout.version_dir(version);
        if !version_dir.is_dir() {
            return Err(TrainingError::VersionNotFound(version.to_string()));
        }

        let files = self.snapshot_files(version)?;
        let model_dir = self.layout.model_dir();
        fs::create_dir_all(model_dir).map_err(|e| storage_err("create model dir", &e))?;

        for (path, sha256) in &files {
            let source = version_dir.join(path);
            let dest = model_dir.join(path);
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent).map_err(|e| storage_err("create parent dir", &e))?;
            }
            fs::copy(&source, &dest).map_err(|e| storage_err(&format!("restore {}", path.display()), &e))?;

            if let Some(expected) = sha256 {
                if sha256_file(&dest)? != *expected {
                    return Err(TrainingError::Storage(format!(
                        "restored file {} does not match snapshot digest",
                        path.display()
                    )));
                }
            }
        }

        let expected: BTreeSet<&Path> = files.iter().map(|(path, _)| path.as_path()).collect();
        for stray in self.production_files()? {
            if !expected.contains(stray.as_path()) {
                fs::remove_file(model_dir.join(&stray))
                    .map_err(|e| storage_err(&format!("remove {}", stray.display()), &e))?;
                debug!(path = %stray.display(), "Removed file not present in snapshot");
            }
        }

        info!(version, files = files.len(), "Restored snapshot");
        Ok(())
    }

    /// Files of a backup paired with their recorded digest.
    ///
    /// Backups written by older tooling carry no manifest; their files are
    /// taken as found and restored without digest checks.
    fn snapshot_files(&self, version: &str) -> TrainingResult<Vec<(PathBuf, Option<String>)>> {
        if self.layout.manifest_path(version).exists() {
            let manifest = self.read_manifest(version)?;
            return Ok(manifest.files.into_iter().map(|f| (f.path, Some(f.sha256))).collect());
        }
        warn!(version, "Backup has no manifest, restoring without digest checks");
        let files = relative_files(&self.layout.version_dir(version), |_| false)?;
        Ok(files.into_iter().map(|path| (path, None)).collect())
    }

    /// All backups, newest first.
    pub fn list(&self) -> TrainingResult<Vec<SnapshotInfo>> {
        let dir = match fs::read_dir(self.layout.backup_dir()) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut out = Vec::new();
        for entry in dir {
            let entry = entry?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let Some(version) = name.to_str().and_then(ArtifactLayout::version_from_dir_name) else {
                continue;
            };

            let info = match self.read_manifest(version) {
                Ok(manifest) => SnapshotInfo {
                    version: version.to_string(),
                    created_at: manifest.created_at,
                    reason: Some(manifest.reason.clone()),
                    size: manifest.total_size(),
                    path: path.clone(),
                    metrics: read_metrics(&path.join(METADATA_FILE)),
                },
                // Backups written by older tooling carry no manifest.
                Err(_) => SnapshotInfo {
                    version: version.to_string(),
                    created_at: created_at_from_version(version)
                        .or_else(|| modified_at(&path))
                        .unwrap_or_else(Utc::now),
                    reason: None,
                    size: dir_size(&path),
                    path: path.clone(),
                    metrics: read_metrics(&path.join(METADATA_FILE)),
                },
            };
            out.push(info);
        }

        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.version.cmp(&a.version)));
        Ok(out)
    }

    /// What a sweep run now would keep and delete.
    pub fn plan_sweep(&self) -> TrainingResult<RetentionPlan> {
        let candidates: Vec<RetentionCandidate> = self
            .list()?
            .into_iter()
            .map(|s| RetentionCandidate { version: s.version, created_at: s.created_at })
            .collect();
        Ok(self.retention.plan(Utc::now(), &candidates))
    }

    /// Apply the retention policy, deleting backups that fall out of it.
    pub fn sweep(&self) -> TrainingResult<SweepReport> {
        let plan = self.plan_sweep()?;
        for version in &plan.delete {
            let dir = self.layout.version_dir(version);
            fs::remove_dir_all(&dir).map_err(|e| storage_err(&format!("delete backup {version}"), &e))?;
            debug!(version = %version, "Deleted backup");
        }
        info!(kept = plan.keep.len(), deleted = ?plan.delete, "Retention sweep completed");
        Ok(SweepReport { kept: plan.keep, deleted: plan.delete })
    }

    /// Production files relative to the model directory, backups excluded.
    fn production_files(&self) -> TrainingResult<Vec<PathBuf>> {
        relative_files(self.layout.model_dir(), |path| self.layout.is_backup_path(path))
    }

    fn copy_into_staging(
        &self,
        staging: &Path,
        version: &str,
        created_at: DateTime<Utc>,
        reason: &str,
    ) -> TrainingResult<SnapshotManifest> {
        fs::create_dir_all(staging).map_err(|e| storage_err("create staging dir", &e))?;

        let mut files = Vec::new();
        for rel in self.production_files()? {
            let source = self.layout.model_dir().join(&rel);
            let dest = staging.join(&rel);
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent).map_err(|e| storage_err("create parent dir", &e))?;
            }
            let size = fs::copy(&source, &dest)
                .map_err(|e| storage_err(&format!("copy {}", rel.display()), &e))?;
            files.push(SnapshotFile { sha256: sha256_file(&dest)?, path: rel, size });
        }

        let manifest = SnapshotManifest {
            version: version.to_string(),
            created_at,
            reason: reason.to_string(),
            files,
        };
        fs::write(staging.join(SNAPSHOT_MANIFEST), serde_json::to_vec_pretty(&manifest)?)
            .map_err(|e| storage_err("write manifest", &e))?;
        Ok(manifest)
    }

    fn read_manifest(&self, version: &str) -> TrainingResult<SnapshotManifest> {
        let path = self.layout.manifest_path(version);
        let bytes = fs::read(&path).map_err(|e| storage_err(&format!("read {}", path.display()), &e))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Timestamp-derived version id, suffixed when the second is already taken.
    fn next_version(&self, created_at: DateTime<Utc>) -> String {
        let base = created_at.with_timezone(&Local).format(VERSION_FORMAT).to_string();
        let mut version = base.clone();
        let mut n = 1;
        while self.layout.version_dir(&version).exists() || self.layout.staging_dir(&version).exists() {
            version = format!("{base}-{n}");
            n += 1;
        }
        version
    }
}

pub fn sha256_file(path: &Path) -> TrainingResult<String> {
    let bytes = fs::read(path).map_err(|e| storage_err(&format!("hash {}", path.display()), &e))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

/// Regular files under `root`, relative to it and sorted by name. Subtrees
/// for which `skip` holds are not entered.
fn relative_files(root: &Path, skip: impl Fn(&Path) -> bool) -> TrainingResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !skip(e.path()));

    for entry in walker {
        let entry = entry.map_err(|e| TrainingError::Storage(format!("walk {}: {e}", root.display())))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| TrainingError::Storage(e.to_string()))?;
        files.push(rel.to_path_buf());
    }
    Ok(files)
}

fn storage_err(action: &str, e: &std::io::Error) -> TrainingError {
    TrainingError::Storage(format!("{action}: {e}"))
}

fn read_metrics(path: &Path) -> TrainingMetrics {
    fs::read(path)
        .ok()
        .and_then(|bytes| serde_json::from_slice(&bytes).ok())
        .unwrap_or_default()
}

fn created_at_from_version(version: &str) -> Option<DateTime<Utc>> {
    let stamp = version.get(..15)?;
    let naive = NaiveDateTime::parse_from_str(stamp, VERSION_FORMAT).ok()?;
    Local.from_local_datetime(&naive).earliest().map(|dt| dt.with_timezone(&Utc))
}

fn modified_at(path: &Path) -> Option<DateTime<Utc>> {
    fs::metadata(path).and_then(|m| m.modified()).ok().map(DateTime::<Utc>::from)
}

fn dir_size(path: &Path) -> u64 {
    WalkDir::new(path)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}
