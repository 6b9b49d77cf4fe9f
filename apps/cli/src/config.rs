//! CLI configuration loading and merging.

use anyhow::{Context, Result};
use lothelper_monitor::RetrainConfig;
use std::path::{Path, PathBuf};

/// Values given on the command line.
#[derive(Debug, Default)]
pub struct Overrides {
    pub model_dir: Option<PathBuf>,
    pub state_dir: Option<PathBuf>,
}

/// Load and merge configuration.
///
/// Configuration precedence:
/// 1. CLI arguments
/// 2. `--config FILE` if given, otherwise:
/// 3. Local config file (./.lothelperrc)
/// 4. Global config file (~/.lothelper/retrain.toml)
/// 5. Defaults
pub fn load_config(explicit: Option<&Path>, overrides: Overrides) -> Result<RetrainConfig> {
    let mut config = match explicit {
        Some(path) => RetrainConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config file {}", path.display()))?,
        None => RetrainConfig::discover_and_load().context("Failed to load configuration")?,
    };

    if overrides.state_dir.is_some() {
        config.paths.state_dir = overrides.state_dir;
    }
    if overrides.model_dir.is_some() {
        config.paths.model_dir = overrides.model_dir;
    }
    Ok(config)
}
