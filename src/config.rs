//! Configuration loading and management.

use crate::service::RefreshPolicy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Project-local config file, checked before the user config directory.
pub const PROJECT_CONFIG_PATH: &str = ".tasktrack/config.yaml";

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub workers: WorkersConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    /// User acting when `--user` is not given.
    #[serde(default)]
    pub default_user: Option<i64>,
}

/// Database location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from(".tasktrack/tasks.db")
}

/// Background worker pool sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkersConfig {
    #[serde(default = "default_worker_count")]
    pub count: usize,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            count: default_worker_count(),
        }
    }
}

fn default_worker_count() -> usize {
    4
}

/// Read cache behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Schedule a background refresh on every list cache hit.
    #[serde(default = "default_true")]
    pub refresh_list_on_hit: bool,

    /// Schedule a background refresh on every single-task cache hit.
    #[serde(default)]
    pub refresh_task_on_hit: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            refresh_list_on_hit: true,
            refresh_task_on_hit: false,
        }
    }
}

impl CacheConfig {
    pub fn refresh_policy(&self) -> RefreshPolicy {
        RefreshPolicy {
            list_on_hit: self.refresh_list_on_hit,
            task_on_hit: self.refresh_task_on_hit,
        }
    }
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.normalize();
        Ok(config)
    }

    /// Load from `explicit` if given (errors are fatal), otherwise from the
    /// project config, then the user config directory, then defaults.
    /// Environment overrides are applied last.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::load(path)?,
            None => Self::discover(),
        };
        config.apply_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    fn discover() -> Self {
        let mut candidates = vec![PathBuf::from(PROJECT_CONFIG_PATH)];
        if let Some(dir) = dirs::config_dir() {
            candidates.push(dir.join("tasktrack").join("config.yaml"));
        }

        for path in candidates {
            if !path.exists() {
                continue;
            }
            match Self::load(&path) {
                Ok(config) => {
                    debug!(path = %path.display(), "Loaded config");
                    return config;
                }
                Err(e) => debug!(path = %path.display(), error = %e, "Ignoring unreadable config"),
            }
        }

        Self::default()
    }

    /// Apply `TASKTRACK_*` overrides, reading variables through `var`.
    pub fn apply_overrides<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(db_path) = var("TASKTRACK_DB_PATH") {
            self.database.path = PathBuf::from(db_path);
        }

        if let Some(count) = var("TASKTRACK_WORKERS") {
            if let Ok(count) = count.parse() {
                self.workers.count = count;
            }
        }

        if let Some(user) = var("TASKTRACK_USER") {
            if let Ok(user) = user.parse() {
                self.default_user = Some(user);
            }
        }

        if let Some(cache) = var("TASKTRACK_CACHE") {
            self.cache.enabled = !matches!(cache.as_str(), "0" | "false" | "off");
        }

        self.normalize();
    }

    fn normalize(&mut self) {
        self.workers.count = self.workers.count.max(1);
    }

    /// Ensure the database directory exists.
    pub fn ensure_db_dir(&self) -> Result<()> {
        if let Some(parent) = self.database.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }
}
