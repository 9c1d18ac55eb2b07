use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use snapsync::SyncConfig;

/// Daemon configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub daemon: DaemonSettings,
    /// One `[[dir]]` table per synced directory.
    #[serde(default, rename = "dir")]
    pub dirs: Vec<SyncDirConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonSettings {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Optional log file; stderr when absent.
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncDirConfig {
    /// Root of the snapshot store backing this directory.
    pub store_path: PathBuf,
    #[serde(flatten)]
    pub sync: SyncConfig,
}

impl DaemonConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file '{}'", path.display()))?;
        let config: DaemonConfig = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file '{}'", path.display()))?;
        Ok(config)
    }

    /// `$XDG_CONFIG_HOME/snapsync/daemon.toml` (or the platform equivalent).
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("snapsync")
            .join("daemon.toml")
    }

    pub fn validate(&self) -> Result<()> {
        if self.dirs.is_empty() {
            anyhow::bail!("no [[dir]] entries configured; nothing to sync");
        }
        for dir in &self.dirs {
            dir.sync.validate().with_context(|| {
                format!("invalid settings for '{}'", dir.sync.local_dir.display())
            })?;
            if dir.store_path.starts_with(&dir.sync.local_dir) {
                anyhow::bail!(
                    "store '{}' must not live inside the synced directory '{}'",
                    dir.store_path.display(),
                    dir.sync.local_dir.display()
                );
            }
        }
        Ok(())
    }
}
