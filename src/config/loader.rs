// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::Result;

/// Load a pipeline file and return the raw, unvalidated `RawConfigFile`.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let config: RawConfigFile = toml::from_str(&contents)?;
    debug!(path = %path.display(), operations = config.operation.len(), "config loaded");

    Ok(config)
}

/// Load a pipeline file and validate it.
///
/// Checks for:
/// - at least one enabled operation,
/// - `max_concurrency >= 1`,
/// - unknown or self `after` references,
/// - dependency cycles.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let raw_config = load_from_path(&path)?;
    let config = ConfigFile::try_from(raw_config)?;
    Ok(config)
}

/// `Buildpipe.toml` in the current working directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("Buildpipe.toml")
}
