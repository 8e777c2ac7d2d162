//! Synchronous quota and tile-count accounting.

use tracing::debug;

use super::{records, QuotaStore};
use crate::error::{QuotaError, Result};
use crate::model::{PageStats, PageStatsPayload, Quota, TileSet};
use crate::storage::keys::GLOBAL_QUOTA_ID;

impl QuotaStore {
    /// Applies `quota_delta` bytes to `tile_set` and to the global total, and
    /// each payload's tile-count delta to its page, in one transaction.
    ///
    /// The TileSet is registered on first use if the catalog knows its
    /// layer and gridset. Returns the global quota after the commit.
    pub fn add_to_quota_and_tile_counts(
        &self,
        tile_set: &TileSet,
        quota_delta: i128,
        payloads: &[PageStatsPayload],
    ) -> Result<Quota> {
        let storage = self.storage()?;

        let mut capacities = Vec::with_capacity(payloads.len());
        if !payloads.is_empty() {
            let pyramid = self.calculator.pyramid(tile_set)?;
            for payload in payloads {
                let page = &payload.page;
                if page.tile_set_id() != tile_set.id() {
                    return Err(QuotaError::IllegalArgument(format!(
                        "page {page} does not belong to {tile_set}"
                    )));
                }
                capacities.push(pyramid.page_capacity(
                    page.page_x(),
                    page.page_y(),
                    page.zoom_level(),
                )?);
            }
        }

        let now = self.clock.now_minutes();
        let global = storage.transaction(|tx| {
            if records::tile_set(tx, tile_set.id())?.is_none() {
                self.calculator.check_known(tile_set)?;
                records::create_tile_set(tx, tile_set)?;
                debug!(tile_set = %tile_set, "TileSet created");
            }

            let (_, applied) = records::add_quota(tx, tile_set.id(), quota_delta)?;
            let (global, _) = records::add_quota(tx, GLOBAL_QUOTA_ID, applied)?;

            for (payload, capacity) in payloads.iter().zip(&capacities) {
                if payload.num_tiles == 0 {
                    continue;
                }
                let previous = records::page_stats(tx, &payload.page)?;
                let mut stats = previous.clone().unwrap_or_else(|| PageStats::new(now));
                stats.add_tiles(payload.num_tiles, *capacity);
                records::put_page(tx, &payload.page, previous.as_ref(), &stats)?;
            }
            Ok(global)
        })?;

        self.metrics.quota_commits.inc();
        self.metrics.set_global_quota(global);
        debug!(
            tile_set = %tile_set,
            delta = quota_delta,
            pages = payloads.len(),
            "Quota committed"
        );
        Ok(global)
    }

    /// Quota used by one TileSet. Fails with `NotFound` for an unknown id.
    pub fn used_quota_by_tile_set_id(&self, tile_set_id: &str) -> Result<Quota> {
        self.storage()?.read(|view| {
            records::quota(view, tile_set_id)?
                .filter(|_| tile_set_id != GLOBAL_QUOTA_ID)
                .ok_or_else(|| QuotaError::NotFound(format!("no TileSet with id {tile_set_id}")))
        })
    }

    /// Sum over every TileSet of the layer; zero for an unknown layer.
    pub fn used_quota_by_layer_name(&self, layer_name: &str) -> Result<Quota> {
        self.storage()?.read(|view| {
            let mut total = Quota::ZERO;
            for tile_set in records::tile_sets_of_layer(view, layer_name)? {
                if let Some(quota) = records::quota(view, tile_set.id())? {
                    total.add(&quota);
                }
            }
            Ok(total)
        })
    }

    pub fn globally_used_quota(&self) -> Result<Quota> {
        self.storage()?
            .read(|view| Ok(records::quota(view, GLOBAL_QUOTA_ID)?.unwrap_or(Quota::ZERO)))
    }
}
