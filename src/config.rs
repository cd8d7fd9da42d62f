//! Tree configuration
//!
//! Loaded from JSON. Missing fields take their defaults, and a missing file
//! means an all-default configuration.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const CONFIG_DIR: &str = "iavl";
const CONFIG_FILE: &str = "config.json";

/// Tuning knobs for a [`crate::MutableTree`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeConfig {
    /// Maximum number of decoded nodes kept in memory; 0 disables the cache
    pub cache_size: usize,
    /// Version assigned to the first commit of an empty store
    pub initial_version: i64,
    /// Whether `commit` succeeds when nothing changed since the last one
    pub allow_empty_commits: bool,
    /// Flush the store to disk after every commit and prune
    pub sync_on_commit: bool,
}

impl Default for TreeConfig {
    fn default() -> Self {
        TreeConfig {
            cache_size: 10_000,
            initial_version: 1,
            allow_empty_commits: true,
            sync_on_commit: true,
        }
    }
}

impl TreeConfig {
    /// Load from `path`, using defaults if the file does not exist
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(TreeConfig::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: TreeConfig = serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the per-user config directory
    pub fn load_default() -> Result<Self> {
        match Self::default_path() {
            Some(path) => Self::load(path),
            None => Ok(TreeConfig::default()),
        }
    }

    /// `<config dir>/iavl/config.json`, if the platform has a config dir
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.initial_version < 1 {
            return Err(Error::Config(format!(
                "initial_version must be at least 1, got {}",
                self.initial_version
            )));
        }
        Ok(())
    }
}
