//! Worker pool configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

/// Pool-wide limits and worker launch settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Upper bound on simultaneous workers per protocol
    pub max_workers: usize,
    /// Upper bound on concurrent jobs per host within a protocol
    pub max_workers_per_host: usize,
    /// Seconds to wait for a launched worker process to connect back
    pub launch_timeout_secs: u64,
    /// Worker executable; defaults to re-invoking the current binary
    pub worker_command: Option<PathBuf>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_workers: 5,
            max_workers_per_host: 2,
            launch_timeout_secs: 10,
            worker_command: None,
        }
    }
}

impl PoolConfig {
    pub fn launch_timeout(&self) -> Duration {
        Duration::from_secs(self.launch_timeout_secs)
    }

    /// Load configuration from a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Self = serde_yaml::from_str(&text).context("Failed to parse config")?;
        Ok(config)
    }
}
