//! Engine configuration.
//!
//! Settings are resolved in layers, later layers overriding earlier ones key
//! by key:
//!
//! 1. built-in defaults
//! 2. the user file, `<config dir>/shelfmark/config.toml`
//! 3. the project file, `.shelfmark/config.toml` under the project root, or
//!    an explicit path given by the caller
//!
//! ```toml
//! [history]
//! max_entries = 200   # 0 keeps every entry
//!
//! [store]
//! root_folders = true
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ErrorCode;

/// A config file that exists but is not valid TOML for these keys.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid config file {}: {message}", path.display())]
pub struct ConfigError {
    pub path: PathBuf,
    pub message: String,
}

impl ConfigError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        ErrorCode::ConfigParseError
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Cap on retained entries; the oldest are evicted first. 0 = unlimited.
    #[serde(default)]
    pub max_entries: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Seed the memory store with the menu, toolbar and unfiled roots.
    #[serde(default = "default_true")]
    pub root_folders: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root_folders: default_true(),
        }
    }
}

// ---------------------------------------------------------------------------
// Layers
// ---------------------------------------------------------------------------

/// One config file. Absent keys leave the lower layer untouched.
#[derive(Debug, Default, Deserialize)]
struct ConfigLayer {
    #[serde(default)]
    history: HistoryLayer,
    #[serde(default)]
    store: StoreLayer,
}

#[derive(Debug, Default, Deserialize)]
struct HistoryLayer {
    max_entries: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct StoreLayer {
    root_folders: Option<bool>,
}

impl EngineConfig {
    fn merge(&mut self, layer: ConfigLayer) {
        if let Some(max) = layer.history.max_entries {
            self.history.max_entries = max;
        }
        if let Some(roots) = layer.store.root_folders {
            self.store.root_folders = roots;
        }
    }

    /// Overlay the file at `path` onto `self`. Missing files are skipped.
    ///
    /// Returns whether the file existed.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be read or does not parse; the parse error
    /// is a [`ConfigError`] in the chain.
    pub fn overlay_file(&mut self, path: &Path) -> Result<bool> {
        if !path.exists() {
            return Ok(false);
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let layer = toml::from_str::<ConfigLayer>(&content)
            .map_err(|e| ConfigError {
                path: path.to_path_buf(),
                message: e.message().to_string(),
            })
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        self.merge(layer);
        debug!(path = %path.display(), "config layer applied");
        Ok(true)
    }
}

/// `<config dir>/shelfmark/config.toml`, when the platform has a config dir.
#[must_use]
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("shelfmark/config.toml"))
}

/// `.shelfmark/config.toml` under `project_root`.
#[must_use]
pub fn project_config_path(project_root: &Path) -> PathBuf {
    project_root.join(".shelfmark/config.toml")
}

/// Resolve the effective configuration.
///
/// `explicit` replaces the project file and must exist.
///
/// # Errors
///
/// Fails when a present file cannot be read or parsed, or when `explicit`
/// does not exist.
pub fn load_engine_config(project_root: &Path, explicit: Option<&Path>) -> Result<EngineConfig> {
    let mut config = EngineConfig::default();
    if let Some(user) = user_config_path() {
        config.overlay_file(&user)?;
    }
    match explicit {
        Some(path) => {
            if !config.overlay_file(path)? {
                anyhow::bail!("config file {} does not exist", path.display());
            }
        }
        None => {
            config.overlay_file(&project_config_path(project_root))?;
        }
    }
    Ok(config)
}

const fn default_true() -> bool {
    true
}
