//! Runtime configuration for tile-quota.
//!
//! Configuration is loaded from a JSON file or constructed programmatically.
//! Store location, page sizing and quota limits live here.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};

use crate::model::{Quota, StorageUnit};

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "tile-quota", about = "Tile cache disk-quota store")]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Print per-layer and global usage against the configured limits.
    Report,

    /// Reconcile the store with the layer catalog and exit.
    Reconcile,

    /// Print the next page the given policy would expire.
    Candidate {
        #[arg(long, value_enum, default_value = "lru")]
        policy: ExpirationPolicy,

        /// Layers to consider (all catalog layers when omitted).
        #[arg(long = "layer")]
        layers: Vec<String>,
    },
}

/// Which page statistic drives expiration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ExpirationPolicy {
    /// Least recently used.
    Lru,
    /// Least frequently used.
    Lfu,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,

    pub paging: PagingConfig,

    pub quota: QuotaConfig,

    /// Path to the JSON layer catalog used by the CLI.
    pub catalog: PathBuf,
}

/// Persistence backend for the page store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Embedded sled tree.
    Sled,
    /// In-memory map, snapshotted to disk on flush.
    Memory,
}

/// Store location and worker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Store root directory (holds the version marker and engine files).
    pub root: PathBuf,

    pub backend: Backend,

    /// Serial workers for asynchronous hit updates; pages are sharded
    /// across them by key.
    pub stats_workers: usize,

    /// When false, `start_up` leaves the store closed.
    pub enabled: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/tmp/tile-quota"),
            backend: Backend::Sled,
            stats_workers: 2,
            enabled: true,
        }
    }
}

/// How tiles are grouped into pages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PagingStrategy {
    /// `ceil(n / log_base(n))` tiles per page edge for an axis of `n` tiles.
    Logarithmic { base: f64 },
    /// Constant page edge.
    Fixed { tiles_per_edge: u32 },
}

impl Default for PagingStrategy {
    fn default() -> Self {
        PagingStrategy::Logarithmic { base: 1.1 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PagingConfig {
    pub strategy: PagingStrategy,
}

/// A size limit such as `{ "value": 500, "unit": "MiB" }`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LimitConfig {
    pub value: f64,
    pub unit: StorageUnit,
}

impl LimitConfig {
    pub fn quota(&self) -> Quota {
        Quota::from_units(self.value, self.unit)
    }
}

/// Per-layer limit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerQuotaConfig {
    pub layer: String,
    pub limit: LimitConfig,
    #[serde(default = "default_policy")]
    pub policy: ExpirationPolicy,
}

/// Limits enforced by the cleaner.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    /// Limit over every layer without its own entry.
    pub global_limit: Option<LimitConfig>,

    pub global_policy: ExpirationPolicy,

    pub layers: Vec<LayerQuotaConfig>,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            global_limit: Some(LimitConfig {
                value: 500.0,
                unit: StorageUnit::MiB,
            }),
            global_policy: default_policy(),
            layers: Vec::new(),
        }
    }
}

fn default_policy() -> ExpirationPolicy {
    ExpirationPolicy::Lfu
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults for missing fields.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if path.exists() {
            let data = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&data)?;
            Ok(config)
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Ok(Config::default())
        }
    }

    /// Configuration rooted at `root`, everything else default.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        let mut config = Config::default();
        config.store.root = root.into();
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.store.stats_workers, 2);
        assert_eq!(cfg.store.backend, Backend::Sled);
        assert_eq!(cfg.paging.strategy, PagingStrategy::Logarithmic { base: 1.1 });
        assert_eq!(
            cfg.quota.global_limit.map(|l| l.quota()),
            Some(Quota::from_units(500.0, StorageUnit::MiB))
        );
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let json = r#"{
            "store": { "backend": "memory", "stats_workers": 4 },
            "paging": { "strategy": { "fixed": { "tiles_per_edge": 16 } } },
            "quota": {
                "global_policy": "lru",
                "layers": [ { "layer": "roads", "limit": { "value": 2, "unit": "GiB" } } ]
            }
        }"#;
        let cfg: Config = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.store.backend, Backend::Memory);
        assert_eq!(cfg.store.stats_workers, 4);
        assert!(cfg.store.enabled);
        assert_eq!(cfg.paging.strategy, PagingStrategy::Fixed { tiles_per_edge: 16 });
        assert_eq!(cfg.quota.global_policy, ExpirationPolicy::Lru);
        assert_eq!(cfg.quota.layers[0].policy, ExpirationPolicy::Lfu);
        assert_eq!(cfg.quota.layers[0].limit.quota().bytes(), 2 * StorageUnit::GiB.bytes());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let cfg = Config::load(std::path::Path::new("/nonexistent/tile-quota.json")).unwrap();
        assert!(cfg.store.enabled);
    }
}
