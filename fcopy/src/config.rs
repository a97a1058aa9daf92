//! Copy engine configuration
//!
//! Covers the chunk-size tiering used by the durability-biased algorithm and
//! the default algorithm selection for the CLI. Loadable from YAML.

use std::path::Path;

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

const KIB: u64 = 1024;
const MIB: u64 = 1024 * 1024;

/// Chunk-size tiers for the sync algorithm, keyed by total file size.
///
/// Small files take small chunks so a pause lands quickly; very large files
/// take larger chunks to amortize the synchronous write cost. Chunks are
/// clamped to [floor, ceiling] whatever the tier table says.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChunkTiers {
    /// Files up to this size use `small_chunk`
    pub small_file_limit: u64,
    pub small_chunk: u64,
    /// Files up to this size use `medium_chunk`; larger ones use `large_chunk`
    pub medium_file_limit: u64,
    pub medium_chunk: u64,
    pub large_chunk: u64,
    pub floor: u64,
    pub ceiling: u64,
}

impl Default for ChunkTiers {
    fn default() -> Self {
        Self {
            small_file_limit: 8 * MIB,
            small_chunk: 64 * KIB,
            medium_file_limit: 256 * MIB,
            medium_chunk: MIB,
            large_chunk: 4 * MIB,
            floor: 64 * KIB,
            ceiling: 4 * MIB,
        }
    }
}

impl ChunkTiers {
    /// Pick the chunk size for a file of `total_size` bytes
    pub fn chunk_size_for(&self, total_size: u64) -> usize {
        let tier = if total_size <= self.small_file_limit {
            self.small_chunk
        } else if total_size <= self.medium_file_limit {
            self.medium_chunk
        } else {
            self.large_chunk
        };
        let clamped = tier.clamp(self.floor, self.ceiling);
        debug!(total_size, chunk = clamped, "ChunkTiers::chunk_size_for");
        clamped as usize
    }
}

/// Top-level configuration for the copy engine CLI
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CopyConfig {
    /// Algorithm used when the caller does not name one
    pub default_algorithm: Option<String>,
    pub chunk_tiers: ChunkTiers,
}

impl CopyConfig {
    /// Load configuration from a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Self = serde_yaml::from_str(&text).context("Failed to parse config")?;
        Ok(config)
    }
}
