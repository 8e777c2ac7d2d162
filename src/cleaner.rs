//! Quota enforcement: expire pages until usage fits the limit.
//!
//! The cleaner decides and records; the host's [`PageTruncator`] performs
//! the actual tile deletion and reports how many bytes it freed.

use std::collections::BTreeSet;

use tracing::{debug, info, warn};

use crate::catalog::TileRange;
pub use crate::config::ExpirationPolicy;
use crate::config::QuotaConfig;
use crate::error::Result;
use crate::model::{Quota, TilePage, TileSet};
use crate::store::QuotaStore;

/// Limit, current usage and policy for one enforcement scope.
pub trait QuotaResolver {
    fn limit(&self) -> Quota;

    fn used(&self, store: &QuotaStore) -> Result<Quota>;

    fn policy(&self) -> ExpirationPolicy;
}

/// Enforces a limit on the global total.
#[derive(Debug, Clone)]
pub struct GlobalQuotaResolver {
    pub limit: Quota,
    pub policy: ExpirationPolicy,
}

impl QuotaResolver for GlobalQuotaResolver {
    fn limit(&self) -> Quota {
        self.limit
    }

    fn used(&self, store: &QuotaStore) -> Result<Quota> {
        store.globally_used_quota()
    }

    fn policy(&self) -> ExpirationPolicy {
        self.policy
    }
}

/// Enforces a limit on one layer.
#[derive(Debug, Clone)]
pub struct LayerQuotaResolver {
    pub layer: String,
    pub limit: Quota,
    pub policy: ExpirationPolicy,
}

impl QuotaResolver for LayerQuotaResolver {
    fn limit(&self) -> Quota {
        self.limit
    }

    fn used(&self, store: &QuotaStore) -> Result<Quota> {
        store.used_quota_by_layer_name(&self.layer)
    }

    fn policy(&self) -> ExpirationPolicy {
        self.policy
    }
}

/// Resolvers described by the quota configuration: one per configured
/// layer, and a global one when a global limit is set.
pub fn resolvers_from_config(config: &QuotaConfig) -> (Option<GlobalQuotaResolver>, Vec<LayerQuotaResolver>) {
    let global = config.global_limit.map(|limit| GlobalQuotaResolver {
        limit: limit.quota(),
        policy: config.global_policy,
    });
    let layers = config
        .layers
        .iter()
        .map(|layer| LayerQuotaResolver {
            layer: layer.layer.clone(),
            limit: layer.limit.quota(),
            policy: layer.policy,
        })
        .collect();
    (global, layers)
}

/// Host-side deletion of a page's tiles.
pub trait PageTruncator {
    /// Deletes the tiles of `page` within `bounds` and returns the bytes freed.
    fn truncate(&self, tile_set: &TileSet, page: &TilePage, bounds: TileRange) -> Result<Quota>;
}

/// Outcome of one enforcement run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CleanupReport {
    pub pages_expired: usize,
    pub bytes_freed: Quota,
    /// Usage after the run.
    pub used: Quota,
    /// Whether usage ended at or under the limit.
    pub within_limit: bool,
}

pub struct QuotaCleaner<'a> {
    store: &'a QuotaStore,
}

impl<'a> QuotaCleaner<'a> {
    pub fn new(store: &'a QuotaStore) -> Self {
        Self { store }
    }

    /// Expires pages of `layer_names` until `resolver` reports usage within
    /// its limit or no candidate page remains.
    pub fn expire_by_layer_names(
        &self,
        layer_names: &BTreeSet<String>,
        resolver: &dyn QuotaResolver,
        truncator: &dyn PageTruncator,
    ) -> Result<CleanupReport> {
        let limit = resolver.limit();
        let mut report = CleanupReport::default();

        loop {
            let used = resolver.used(self.store)?;
            report.used = used;
            if used <= limit {
                report.within_limit = true;
                break;
            }

            let Some(page) = self.store.expiration_candidate(resolver.policy(), layer_names)? else {
                warn!(
                    used = %used,
                    limit = %limit,
                    "Quota exceeded but no page left to expire"
                );
                break;
            };

            let tile_set = self.store.tile_set_by_id(page.tile_set_id())?;
            let bounds = self.store.tiles_for_page(&page)?;
            let freed = truncator.truncate(&tile_set, &page, bounds)?;

            self.store.set_truncated(&page)?;
            self.store
                .add_to_quota_and_tile_counts(&tile_set, -(freed.bytes() as i128), &[])?;

            report.pages_expired += 1;
            report.bytes_freed.add(&freed);
            debug!(
                page = %page,
                freed = %freed,
                excess = %Quota::from_bytes(used.bytes() - limit.bytes()),
                "Page expired"
            );
        }

        info!(
            layers = layer_names.len(),
            pages = report.pages_expired,
            freed = %report.bytes_freed,
            used = %report.used,
            limit = %limit,
            "Quota enforcement finished"
        );
        Ok(report)
    }
}
