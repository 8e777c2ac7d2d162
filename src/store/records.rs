//! Transactional helpers over the key layout in [`crate::storage::keys`].

use std::ops::ControlFlow;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{QuotaError, Result};
use crate::model::{PageStats, Quota, TilePage, TileSet};
use crate::storage::{decode, keys, Transaction};

/// Persisted page: coordinates plus statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct PageRecord {
    pub page: TilePage,
    pub stats: PageStats,
}

pub(crate) fn tile_set(tx: &Transaction<'_>, id: &str) -> Result<Option<TileSet>> {
    tx.get_json(&keys::tile_set(id))
}

/// Registers `tile_set` with a zero quota. Returns `false` if it existed.
pub(crate) fn create_tile_set(tx: &mut Transaction<'_>, tile_set: &TileSet) -> Result<bool> {
    if tx.get(&keys::tile_set(tile_set.id()))?.is_some() {
        return Ok(false);
    }
    tx.put_json(keys::tile_set(tile_set.id()), tile_set)?;
    tx.put(keys::layer_entry(tile_set.layer_name(), tile_set.id()), Vec::new());
    tx.put(keys::quota(tile_set.id()), keys::encode_quota(0));
    Ok(true)
}

pub(crate) fn all_tile_sets(tx: &Transaction<'_>) -> Result<Vec<TileSet>> {
    tx.scan_prefix(keys::TILE_SET_PREFIX)?
        .iter()
        .map(|(_, raw)| decode(raw))
        .collect()
}

pub(crate) fn tile_sets_of_layer(tx: &Transaction<'_>, layer: &str) -> Result<Vec<TileSet>> {
    let mut sets = Vec::new();
    for (key, _) in tx.scan_prefix(&keys::layer_prefix(layer))? {
        let Some(id) = keys::tile_set_id_of_layer_entry(&key) else {
            continue;
        };
        match tile_set(tx, id)? {
            Some(ts) => sets.push(ts),
            None => warn!(layer, tile_set = id, "Layer index points at a missing TileSet"),
        }
    }
    Ok(sets)
}

/// Layer names with at least one stored TileSet.
pub(crate) fn stored_layer_names(tx: &Transaction<'_>) -> Result<Vec<String>> {
    let mut names: Vec<String> = Vec::new();
    for (key, _) in tx.scan_prefix(keys::LAYER_PREFIX)? {
        if let Some(layer) = keys::layer_of_layer_entry(&key) {
            if names.last().map(String::as_str) != Some(layer) {
                names.push(layer.to_string());
            }
        }
    }
    Ok(names)
}

pub(crate) fn quota(tx: &Transaction<'_>, id: &str) -> Result<Option<Quota>> {
    match tx.get(&keys::quota(id))? {
        Some(raw) => keys::decode_quota(&raw)
            .map(|bytes| Some(Quota::from_bytes(bytes)))
            .ok_or_else(|| QuotaError::Storage(format!("corrupt quota record for {id}"))),
        None => Ok(None),
    }
}

/// Applies `delta` to the quota stored under `id`, clamping at zero.
/// Returns the new quota and the delta actually applied.
pub(crate) fn add_quota(tx: &mut Transaction<'_>, id: &str, delta: i128) -> Result<(Quota, i128)> {
    let previous = quota(tx, id)?.unwrap_or(Quota::ZERO);
    if delta == 0 {
        return Ok((previous, 0));
    }
    let mut current = previous;
    if !current.add_delta(delta) {
        warn!(tile_set = id, delta, "Quota would go negative, clamping at zero");
    }
    tx.put(keys::quota(id), keys::encode_quota(current.bytes()));
    Ok((current, current.difference(&previous)))
}

pub(crate) fn page_stats(tx: &Transaction<'_>, page: &TilePage) -> Result<Option<PageStats>> {
    let record: Option<PageRecord> = tx.get_json(&keys::page(page))?;
    Ok(record.map(|r| r.stats))
}

/// Writes `stats` for `page`, moving its LRU/LFU index entries from `previous`.
pub(crate) fn put_page(
    tx: &mut Transaction<'_>,
    page: &TilePage,
    previous: Option<&PageStats>,
    stats: &PageStats,
) -> Result<()> {
    if let Some(previous) = previous {
        unindex_page(tx, page, previous);
    }
    let record = PageRecord {
        page: page.clone(),
        stats: stats.clone(),
    };
    tx.put_json(keys::page(page), &record)?;
    if stats.fill_factor > 0.0 {
        tx.put_json(keys::lru_entry(page, stats), page)?;
        tx.put_json(keys::lfu_entry(page, stats), page)?;
    }
    Ok(())
}

fn unindex_page(tx: &mut Transaction<'_>, page: &TilePage, stats: &PageStats) {
    tx.delete(keys::lru_entry(page, stats));
    tx.delete(keys::lfu_entry(page, stats));
}

pub(crate) fn pages_of(tx: &Transaction<'_>, tile_set_id: &str) -> Result<Vec<PageRecord>> {
    tx.scan_prefix(&keys::pages_of(tile_set_id))?
        .iter()
        .map(|(_, raw)| decode(raw))
        .collect()
}

/// Removes the TileSet, its quota, its layer-index entry and all its pages.
/// Returns the quota it held.
pub(crate) fn remove_tile_set(tx: &mut Transaction<'_>, tile_set: &TileSet) -> Result<Quota> {
    let freed = quota(tx, tile_set.id())?.unwrap_or(Quota::ZERO);
    for record in pages_of(tx, tile_set.id())? {
        unindex_page(tx, &record.page, &record.stats);
        tx.delete(keys::page(&record.page));
    }
    tx.delete(keys::quota(tile_set.id()));
    tx.delete(keys::layer_entry(tile_set.layer_name(), tile_set.id()));
    tx.delete(keys::tile_set(tile_set.id()));
    Ok(freed)
}

/// First indexed page under `index_prefix` whose TileSet is in `tile_set_ids`.
pub(crate) fn first_indexed_page(
    tx: &Transaction<'_>,
    index_prefix: &[u8],
    tile_set_ids: &std::collections::HashSet<String>,
) -> Result<Option<TilePage>> {
    let mut found = None;
    tx.visit_prefix(index_prefix, &mut |_, raw| {
        let page: TilePage = decode(raw)?;
        if tile_set_ids.contains(page.tile_set_id()) {
            found = Some(page);
            return Ok(ControlFlow::Break(()));
        }
        Ok(ControlFlow::Continue(()))
    })?;
    Ok(found)
}
