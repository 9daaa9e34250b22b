//! Configuration for the extraction queue

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Environment variable overriding the idle poll interval (milliseconds)
pub const ENV_POLL_MS: &str = "EXTRACT_QUEUE_POLL_MS";
/// Environment variable overriding the SQLite database path
pub const ENV_DATABASE: &str = "EXTRACT_QUEUE_DB";

/// Main queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Upper bound on how long the idle worker sleeps before re-checking
    /// the FIFO (default: 500ms)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Age after which finished tasks may be evicted from the registry.
    /// `None` keeps them for the process lifetime.
    #[serde(default)]
    pub finished_task_ttl_secs: Option<u64>,
    /// Run the interrupted-document scan before accepting submissions
    #[serde(default = "default_recover_on_startup")]
    pub recover_on_startup: bool,
    /// Durable storage configuration
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Durable storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite file holding page checkpoints and document status
    pub database_path: PathBuf,
}

fn default_poll_interval_ms() -> u64 { 500 }
fn default_recover_on_startup() -> bool { true }

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            finished_task_ttl_secs: None,
            recover_on_startup: true,
            storage: StorageConfig::default(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("extract-queue.db"),
        }
    }
}

impl QueueConfig {
    /// Parse configuration from a TOML document
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&raw)
    }

    /// Apply `EXTRACT_QUEUE_*` environment overrides
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(value) = std::env::var(ENV_POLL_MS) {
            self.poll_interval_ms = value.trim().parse().map_err(|_| {
                Error::Config(format!("{} must be an integer, got '{}'", ENV_POLL_MS, value))
            })?;
        }
        if let Ok(value) = std::env::var(ENV_DATABASE) {
            self.storage.database_path = PathBuf::from(value);
        }
        self.validate()?;
        Ok(self)
    }

    /// Idle poll interval as a `Duration`
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Eviction cutoff for finished tasks, if configured
    pub fn finished_task_ttl(&self) -> Option<chrono::Duration> {
        self.finished_task_ttl_secs
            .and_then(|secs| i64::try_from(secs).ok())
            .map(chrono::Duration::seconds)
    }

    fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(Error::Config(
                "poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
