//! Prometheus metrics for the quota store.

use prometheus::{Encoder, Gauge, IntCounter, Registry, TextEncoder};

use crate::error::Result;
use crate::model::Quota;

pub struct QuotaMetrics {
    registry: Registry,
    /// Committed `add_to_quota_and_tile_counts` transactions.
    pub quota_commits: IntCounter,
    /// Committed asynchronous hit batches.
    pub stats_batches: IntCounter,
    pub stats_batch_failures: IntCounter,
    /// TileSets removed by deletes and startup reconciliation.
    pub tile_sets_purged: IntCounter,
    pub global_quota_bytes: Gauge,
}

impl QuotaMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new_custom(Some("tile_quota".to_string()), None)?;

        let quota_commits = IntCounter::new("quota_commits_total", "Committed quota/tile-count updates")?;
        let stats_batches = IntCounter::new("stats_batches_total", "Committed hit-statistics batches")?;
        let stats_batch_failures =
            IntCounter::new("stats_batch_failures_total", "Failed hit-statistics batches")?;
        let tile_sets_purged = IntCounter::new("tile_sets_purged_total", "TileSets removed from the store")?;
        let global_quota_bytes = Gauge::new("global_quota_bytes", "Globally used quota in bytes")?;

        registry.register(Box::new(quota_commits.clone()))?;
        registry.register(Box::new(stats_batches.clone()))?;
        registry.register(Box::new(stats_batch_failures.clone()))?;
        registry.register(Box::new(tile_sets_purged.clone()))?;
        registry.register(Box::new(global_quota_bytes.clone()))?;

        Ok(Self {
            registry,
            quota_commits,
            stats_batches,
            stats_batch_failures,
            tile_sets_purged,
            global_quota_bytes,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn set_global_quota(&self, quota: Quota) {
        self.global_quota_bytes.set(quota.bytes() as f64);
    }

    /// Text exposition format of every registered metric.
    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}
