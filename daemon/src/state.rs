use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// What survives a restart: last cycle time, shown wallpapers and history.
///
/// Wallpapers are stored by image path and resolved against the library
/// again on load.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    #[serde(default)]
    pub last_cycle: Option<DateTime<Local>>,

    #[serde(default)]
    pub active_multiscreen: Option<PathBuf>,

    #[serde(default)]
    pub active_per_screen: Vec<Option<PathBuf>>,

    /// Oldest first
    #[serde(default)]
    pub history: Vec<PathBuf>,
}

impl SessionState {
    /// Get the default state file path
    pub fn default_path() -> Result<PathBuf> {
        Ok(dirs::cache_dir()
            .context("Failed to get cache directory")?
            .join("wallcycle")
            .join("state.json"))
    }

    /// Load state, falling back to an empty state when no file exists
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read state file: {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse state file: {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write state file: {}", path.display()))
    }
}
