use crate::CoreError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_PROVIDER: &str = "registry";

/// User configuration, read from `~/.config/burrow/config.toml`.
///
/// Every field is optional in the file; accessors fill in defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: Option<PathBuf>,
    pub registry: Option<PathBuf>,
    pub provider: Option<String>,
    pub workers: Option<usize>,
    pub timeout_secs: Option<u64>,
}

impl Config {
    /// Load `path`, or the default location when `None`. A missing file
    /// yields the defaults. `BURROW_STORE` overrides the file's `store`.
    pub fn load(path: Option<&Path>) -> Result<Self, CoreError> {
        let mut config = match path.map(Path::to_path_buf).or_else(default_config_path) {
            Some(path) if path.exists() => {
                let content = std::fs::read_to_string(&path)?;
                toml::from_str(&content).map_err(|e| CoreError::Config {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })?
            }
            Some(path) => {
                debug!("no config at {}, using defaults", path.display());
                Self::default()
            }
            None => Self::default(),
        };
        if let Some(store) = std::env::var_os("BURROW_STORE").filter(|v| !v.is_empty()) {
            config.store = Some(PathBuf::from(store));
        }
        Ok(config)
    }

    /// Store root, defaulting to `~/.local/share/burrow`.
    pub fn store_root(&self) -> PathBuf {
        self.store.clone().unwrap_or_else(default_store_path)
    }

    pub fn registry_root(&self) -> PathBuf {
        self.registry
            .clone()
            .unwrap_or_else(|| self.store_root().join("registry"))
    }

    pub fn provider(&self) -> &str {
        self.provider.as_deref().unwrap_or(DEFAULT_PROVIDER)
    }

    pub fn workers(&self) -> usize {
        self.workers.unwrap_or(DEFAULT_WORKERS).max(1)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

fn default_config_path() -> Option<PathBuf> {
    if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        return Some(PathBuf::from(xdg).join("burrow/config.toml"));
    }
    home_dir().map(|h| h.join(".config/burrow/config.toml"))
}

fn default_store_path() -> PathBuf {
    match home_dir() {
        Some(home) => home.join(".local/share/burrow"),
        None => PathBuf::from("/tmp/burrow"),
    }
}
