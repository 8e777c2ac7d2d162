//! Open/close, startup reconciliation and cascading layer operations.

use std::collections::BTreeSet;
use std::ops::ControlFlow;
use std::path::Path;
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use super::usage::{HitRecorder, StatsWorkers};
use super::{records, OpenStore, QuotaStore};
use crate::error::{QuotaError, Result};
use crate::model::{validate_component, PageStats, Quota, TileSet};
use crate::storage::keys::{self, GLOBAL_QUOTA_ID};
use crate::storage::{Storage, Transaction};

/// Layout version written to [`VERSION_FILE`] in the store root.
pub const STORE_VERSION: &str = "1.1";

pub const VERSION_FILE: &str = "version.txt";

/// Engine directory inside the store root.
const PAGE_STORE_DIR: &str = "page_store";

/// Checks the store root's version marker, writing it into an empty root.
fn check_version(root: &Path) -> Result<()> {
    std::fs::create_dir_all(root)?;
    let marker = root.join(VERSION_FILE);
    if marker.exists() {
        let found = std::fs::read_to_string(&marker)?;
        let found = found.trim();
        if found != STORE_VERSION {
            return Err(QuotaError::Configuration(format!(
                "store at {} has version {found}, expected {STORE_VERSION}",
                root.display()
            )));
        }
        return Ok(());
    }
    if std::fs::read_dir(root)?.next().is_some() {
        return Err(QuotaError::Configuration(format!(
            "{} is not empty and has no {VERSION_FILE}",
            root.display()
        )));
    }
    std::fs::write(&marker, STORE_VERSION)?;
    Ok(())
}

fn as_delta(quota: Quota) -> i128 {
    i128::try_from(quota.bytes()).unwrap_or(i128::MAX)
}

/// Removes the layer's TileSets matching `predicate` with their pages and
/// quotas. The global total is reduced by the freed bytes when
/// `subtract_global` is set.
fn delete_matching(
    tx: &mut Transaction<'_>,
    layer_name: &str,
    subtract_global: bool,
    predicate: impl Fn(&TileSet) -> bool,
) -> Result<(Vec<TileSet>, Quota)> {
    let mut removed = Vec::new();
    let mut freed = Quota::ZERO;
    for tile_set in records::tile_sets_of_layer(tx, layer_name)? {
        if !predicate(&tile_set) {
            continue;
        }
        freed.add(&records::remove_tile_set(tx, &tile_set)?);
        removed.push(tile_set);
    }
    if subtract_global && freed > Quota::ZERO {
        records::add_quota(tx, GLOBAL_QUOTA_ID, -as_delta(freed))?;
    }
    Ok((removed, freed))
}

/// Capacity implied by a page's stored tile count and fill factor.
fn implied_capacity(stats: &PageStats) -> Option<u64> {
    if stats.tile_count == 0 || stats.fill_factor <= 0.0 {
        return None;
    }
    Some((stats.tile_count as f64 / f64::from(stats.fill_factor)).round() as u64)
}

/// Folds the stats of a moved page into the page already at its target.
/// With a known `capacity` the tile count is capped and the fill factor
/// recomputed from it.
fn merge_stats(target: &PageStats, moved: &PageStats, capacity: Option<u64>) -> PageStats {
    let mut merged = target.clone();
    let tiles = target.tile_count.saturating_add(moved.tile_count);
    match capacity.filter(|c| *c > 0) {
        Some(capacity) => {
            merged.tile_count = tiles.min(capacity);
            merged.fill_factor = (merged.tile_count as f64 / capacity as f64) as f32;
        }
        None => {
            merged.tile_count = tiles;
            merged.fill_factor = (target.fill_factor + moved.fill_factor).min(1.0);
        }
    }
    if merged.fill_factor <= 0.0 && (target.fill_factor > 0.0 || moved.fill_factor > 0.0) {
        merged.fill_factor = f32::MIN_POSITIVE;
    }
    merged.num_hits = target.num_hits.saturating_add(moved.num_hits);
    merged.creation_time_minutes = target.creation_time_minutes.min(moved.creation_time_minutes);
    merged.last_access_time_minutes = target
        .last_access_time_minutes
        .max(moved.last_access_time_minutes);
    let elapsed = 1 + (merged.last_access_time_minutes - merged.creation_time_minutes) as u64;
    merged.frequency_of_use_per_minute = (merged.num_hits as f64 / elapsed as f64) as f32;
    merged
}

impl QuotaStore {
    /// Opens persistence and reconciles stored TileSets with the catalog.
    ///
    /// TileSets of layers the catalog no longer has are purged; every
    /// TileSet the catalog declares is registered. Calling it again while
    /// open only repeats the reconciliation.
    pub fn start_up(&self) -> Result<()> {
        if !self.config.store.enabled {
            info!("Disk quota is disabled, store stays closed");
            return Ok(());
        }

        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        let (open, fresh) = match state.as_ref() {
            Some(open) => (open.clone(), false),
            None => (Arc::new(self.open_persistence()?), true),
        };

        match self.reconcile(&open.storage) {
            Ok(()) => {
                *state = Some(open);
                Ok(())
            }
            Err(e) => {
                if fresh {
                    if let Err(close_err) = open.shutdown() {
                        warn!(error = %close_err, "Failed to release store after a failed startup");
                    }
                }
                Err(e)
            }
        }
    }

    fn open_persistence(&self) -> Result<OpenStore> {
        let root = &self.config.store.root;
        check_version(root)?;
        let storage = Arc::new(Storage::open(
            self.config.store.backend,
            &root.join(PAGE_STORE_DIR),
        )?);
        let recorder = Arc::new(HitRecorder::new(
            storage.clone(),
            self.clock.clone(),
            self.metrics.clone(),
        ));
        let workers = StatsWorkers::spawn(self.config.store.stats_workers, recorder)?;
        info!(root = %root.display(), backend = ?self.config.store.backend, "Quota store opened");
        Ok(OpenStore {
            storage,
            workers: Mutex::new(Some(workers)),
        })
    }

    fn reconcile(&self, storage: &Storage) -> Result<()> {
        let catalog_layers = self.calculator.layer_names();
        let (purged, created, global) = storage.transaction(|tx| {
            if records::quota(tx, GLOBAL_QUOTA_ID)?.is_none() {
                tx.put(keys::global_quota(), keys::encode_quota(0));
            }

            let mut purged = 0;
            for layer in records::stored_layer_names(tx)? {
                if catalog_layers.contains(&layer) {
                    continue;
                }
                let (removed, freed) = delete_matching(tx, &layer, true, |_| true)?;
                info!(
                    layer = %layer,
                    tile_sets = removed.len(),
                    freed = %freed,
                    "Purged layer no longer in the catalog"
                );
                purged += removed.len();
            }

            let mut created = 0;
            for layer in &catalog_layers {
                let tile_sets = match self.calculator.tile_sets_for(layer) {
                    Ok(tile_sets) => tile_sets,
                    Err(e) => {
                        warn!(layer = %layer, error = %e, "Skipping catalog layer");
                        continue;
                    }
                };
                for tile_set in &tile_sets {
                    if records::create_tile_set(tx, tile_set)? {
                        created += 1;
                    }
                }
            }

            let global = records::quota(tx, GLOBAL_QUOTA_ID)?.unwrap_or(Quota::ZERO);
            Ok((purged, created, global))
        })?;

        self.metrics.tile_sets_purged.inc_by(purged as u64);
        self.metrics.set_global_quota(global);
        info!(
            layers = catalog_layers.len(),
            purged,
            created,
            global = %global,
            "Quota store reconciled with the layer catalog"
        );
        Ok(())
    }

    /// Flushes pending hit updates and persistence, then closes the store.
    pub fn close(&self) -> Result<()> {
        let open = self.state.write().unwrap_or_else(|e| e.into_inner()).take();
        let Some(open) = open else {
            return Ok(());
        };
        open.shutdown()?;
        info!("Quota store closed");
        Ok(())
    }

    /// Registers every catalog TileSet of `layer_name` with a zero quota.
    pub fn create_layer(&self, layer_name: &str) -> Result<usize> {
        validate_component("layer name", layer_name)?;
        let storage = self.storage()?;
        let tile_sets = self.calculator.tile_sets_for(layer_name)?;
        let created = storage.transaction(|tx| {
            let mut created = 0;
            for tile_set in &tile_sets {
                if records::create_tile_set(tx, tile_set)? {
                    created += 1;
                }
            }
            Ok(created)
        })?;
        debug!(layer = layer_name, created, "Layer registered");
        Ok(created)
    }

    /// Every stored TileSet.
    pub fn tile_sets(&self) -> Result<BTreeSet<TileSet>> {
        self.storage()?
            .read(|view| Ok(records::all_tile_sets(view)?.into_iter().collect()))
    }

    pub fn tile_sets_for_layer(&self, layer_name: &str) -> Result<BTreeSet<TileSet>> {
        self.storage()?.read(|view| {
            Ok(records::tile_sets_of_layer(view, layer_name)?
                .into_iter()
                .collect())
        })
    }

    /// Calls `visitor` with each stored TileSet and its quota, in id order,
    /// until it breaks. The visitor runs outside the store's locks and may
    /// call back into the store.
    pub fn accept(&self, mut visitor: impl FnMut(&TileSet, Quota) -> ControlFlow<()>) -> Result<()> {
        let entries = self.storage()?.read(|view| {
            let mut entries = Vec::new();
            for tile_set in records::all_tile_sets(view)? {
                let quota = records::quota(view, tile_set.id())?.unwrap_or(Quota::ZERO);
                entries.push((tile_set, quota));
            }
            Ok(entries)
        })?;
        for (tile_set, quota) in &entries {
            if visitor(tile_set, *quota).is_break() {
                break;
            }
        }
        Ok(())
    }

    /// Removes every TileSet of the layer. Returns the bytes freed.
    pub fn delete_layer(&self, layer_name: &str) -> Result<Quota> {
        validate_component("layer name", layer_name)?;
        self.delete_scope(layer_name, |_| true)
    }

    /// Removes the layer's TileSets on one gridset.
    pub fn delete_grid_subset(&self, layer_name: &str, gridset_id: &str) -> Result<Quota> {
        validate_component("layer name", layer_name)?;
        validate_component("gridset id", gridset_id)?;
        self.delete_scope(layer_name, |ts| ts.gridset_id() == gridset_id)
    }

    /// Removes the layer's TileSets cached under one parameters id.
    pub fn delete_parameters(&self, layer_name: &str, parameters_id: &str) -> Result<Quota> {
        validate_component("layer name", layer_name)?;
        validate_component("parameters id", parameters_id)?;
        self.delete_scope(layer_name, |ts| ts.parameters_id() == Some(parameters_id))
    }

    fn delete_scope(&self, layer_name: &str, predicate: impl Fn(&TileSet) -> bool) -> Result<Quota> {
        let storage = self.storage()?;
        let (removed, freed, global) = storage.transaction(|tx| {
            let (removed, freed) = delete_matching(tx, layer_name, true, &predicate)?;
            let global = records::quota(tx, GLOBAL_QUOTA_ID)?.unwrap_or(Quota::ZERO);
            Ok((removed, freed, global))
        })?;

        self.metrics.tile_sets_purged.inc_by(removed.len() as u64);
        self.metrics.set_global_quota(global);
        info!(
            layer = layer_name,
            tile_sets = removed.len(),
            freed = %freed,
            "Deleted TileSets"
        );
        Ok(freed)
    }

    /// Moves every TileSet, page and quota of `old_name` to `new_name`.
    ///
    /// The global total is unchanged. TileSets or pages already present
    /// under the new name absorb the moved ones.
    pub fn rename_layer(&self, old_name: &str, new_name: &str) -> Result<()> {
        validate_component("layer name", old_name)?;
        validate_component("layer name", new_name)?;
        if old_name == new_name {
            return Ok(());
        }

        let storage = self.storage()?;
        let (moved_sets, moved_bytes) = storage.transaction(|tx| {
            let mut moved_sets = 0usize;
            let mut moved_bytes = Quota::ZERO;
            for tile_set in records::tile_sets_of_layer(tx, old_name)? {
                let target = tile_set.with_layer_name(new_name)?;
                records::create_tile_set(tx, &target)?;

                let quota = records::quota(tx, tile_set.id())?.unwrap_or(Quota::ZERO);
                records::add_quota(tx, target.id(), as_delta(quota))?;
                moved_bytes.add(&quota);

                for record in records::pages_of(tx, tile_set.id())? {
                    let page = record.page.with_tile_set_id(target.id());
                    let existing = records::page_stats(tx, &page)?;
                    let stats = match &existing {
                        Some(existing) => {
                            let capacity = self
                                .calculator
                                .page_capacity(&tile_set, &record.page)
                                .ok()
                                .or_else(|| implied_capacity(existing))
                                .or_else(|| implied_capacity(&record.stats));
                            merge_stats(existing, &record.stats, capacity)
                        }
                        None => record.stats.clone(),
                    };
                    records::put_page(tx, &page, existing.as_ref(), &stats)?;
                }

                records::remove_tile_set(tx, &tile_set)?;
                moved_sets += 1;
            }
            Ok((moved_sets, moved_bytes))
        })?;

        info!(
            from = old_name,
            to = new_name,
            tile_sets = moved_sets,
            bytes = %moved_bytes,
            "Renamed layer"
        );
        Ok(())
    }
}
