use std::path::{Path, PathBuf};

/// Name of the manifest written into every backup directory. Never copied
/// back into production.
pub const SNAPSHOT_MANIFEST: &str = ".snapshot.json";

/// Structured metadata record of the main estimator, read by `list`.
pub const METADATA_FILE: &str = "metadata.json";

const VERSION_PREFIX: &str = "v_";
const STAGING_PREFIX: &str = ".staging-";

/// Filesystem layout of the production model directory and its backups.
///
/// Default layout keeps backups under `<model_dir>/backups/v_<version>/...`,
/// mirroring the production file tree.
#[derive(Debug, Clone)]
pub struct ArtifactLayout {
    model_dir: PathBuf,
    backup_dir: PathBuf,
}

impl ArtifactLayout {
    /// Relative paths are anchored at the current directory so production
    /// walks and backup paths always compare in the same form.
    #[must_use]
    pub fn new(model_dir: PathBuf, backup_dir: PathBuf) -> Self {
        Self { model_dir: anchored(model_dir), backup_dir: anchored(backup_dir) }
    }

    /// Layout with the backup directory nested in the model directory.
    #[must_use]
    pub fn for_model_dir(model_dir: &Path) -> Self {
        Self::new(model_dir.to_path_buf(), model_dir.join("backups"))
    }

    #[must_use]
    pub fn model_dir(&self) -> &Path {
        &self.model_dir
    }

    #[must_use]
    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    #[must_use]
    pub fn version_dir(&self, version: &str) -> PathBuf {
        self.backup_dir.join(format!("{VERSION_PREFIX}{version}"))
    }

    #[must_use]
    pub fn manifest_path(&self, version: &str) -> PathBuf {
        self.version_dir(version).join(SNAPSHOT_MANIFEST)
    }

    /// Scratch directory a snapshot is assembled in before it is renamed
    /// into place.
    #[must_use]
    pub fn staging_dir(&self, version: &str) -> PathBuf {
        self.backup_dir.join(format!("{STAGING_PREFIX}{version}"))
    }

    /// True when `path` lies inside the backup tree and must be skipped while
    /// walking production files.
    #[must_use]
    pub fn is_backup_path(&self, path: &Path) -> bool {
        path.starts_with(&self.backup_dir)
    }

    /// Extract the version id from a backup directory name.
    #[must_use]
    pub fn version_from_dir_name(name: &str) -> Option<&str> {
        name.strip_prefix(VERSION_PREFIX).filter(|v| !v.is_empty())
    }
}

fn anchored(path: PathBuf) -> PathBuf {
    std::path::absolute(&path).unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_layout_paths() {
        let temp = TempDir::new().unwrap();
        let layout = ArtifactLayout::for_model_dir(temp.path());

        assert!(layout.version_dir("20250111_143022").ends_with("backups/v_20250111_143022"));
        assert!(layout.is_backup_path(&layout.manifest_path("20250111_143022")));
        assert!(!layout.is_backup_path(&temp.path().join("price_v1.pkl")));
    }

    #[test]
    fn test_relative_backup_dir_is_recognised_under_absolute_model_dir() {
        let model_dir = std::env::current_dir().unwrap().join("models");
        let layout = ArtifactLayout::new(model_dir.clone(), PathBuf::from("models/backups"));

        assert!(layout.backup_dir().is_absolute());
        assert!(layout.is_backup_path(&model_dir.join("backups/v_20250111_143022/price_v1.pkl")));
        assert!(!layout.is_backup_path(&model_dir.join("price_v1.pkl")));
    }

    #[test]
    fn test_version_from_dir_name() {
        assert_eq!(ArtifactLayout::version_from_dir_name("v_20250111_143022"), Some("20250111_143022"));
        assert_eq!(ArtifactLayout::version_from_dir_name("v_"), None);
        assert_eq!(ArtifactLayout::version_from_dir_name(".staging-x"), None);
    }
}
