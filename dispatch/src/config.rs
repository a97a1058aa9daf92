//! Dispatcher configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

/// Well-known master endpoint under the runtime directory
pub fn default_endpoint() -> PathBuf {
    dirs::runtime_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("fm-dispatch")
        .join("master.sock")
}

/// Master-side timing and retry policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MasterConfig {
    /// Socket path; `None` means the well-known endpoint
    pub endpoint: Option<PathBuf>,
    /// How often slave health is checked
    pub health_check_interval_ms: u64,
    /// A slave without a heartbeat for this long is unhealthy
    pub heartbeat_timeout_ms: u64,
    /// Retry cap applied to tasks that do not carry their own
    pub default_max_retries: u32,
    /// Actor request channel depth
    pub channel_buffer: usize,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            health_check_interval_ms: 5_000,
            heartbeat_timeout_ms: 10_000,
            default_max_retries: 3,
            channel_buffer: 64,
        }
    }
}

impl MasterConfig {
    pub fn endpoint(&self) -> PathBuf {
        self.endpoint.clone().unwrap_or_else(default_endpoint)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| format!("Failed to read config {}", path.display()))?;
        serde_yaml::from_str(&text).context("Failed to parse config")
    }
}

/// Slave-side timing policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlaveConfig {
    /// Socket path; `None` means the well-known endpoint
    pub endpoint: Option<PathBuf>,
    /// Heartbeat cadence while connected
    pub heartbeat_interval_ms: u64,
    /// Delay before reconnecting after a lost connection
    pub reconnect_backoff_ms: u64,
}

impl Default for SlaveConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            heartbeat_interval_ms: 3_000,
            reconnect_backoff_ms: 5_000,
        }
    }
}

impl SlaveConfig {
    pub fn endpoint(&self) -> PathBuf {
        self.endpoint.clone().unwrap_or_else(default_endpoint)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| format!("Failed to read config {}", path.display()))?;
        serde_yaml::from_str(&text).context("Failed to parse config")
    }
}
