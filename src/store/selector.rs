//! LRU / LFU expiration candidates.
//!
//! Both queries walk an ordered index (`metric ‖ page key`) and return the
//! first page whose TileSet belongs to one of the requested layers. Ties
//! on the metric resolve by ascending page key. Only pages with a positive
//! fill factor are indexed, so truncated pages are never proposed.

use std::collections::HashSet;

use super::{records, QuotaStore};
use crate::config::ExpirationPolicy;
use crate::error::Result;
use crate::model::TilePage;
use crate::storage::keys;

impl QuotaStore {
    /// The page with the oldest last access among `layer_names`.
    pub fn least_recently_used_page<I, S>(&self, layer_names: I) -> Result<Option<TilePage>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.first_candidate(keys::LRU_PREFIX, layer_names)
    }

    /// The page with the lowest use frequency among `layer_names`.
    pub fn least_frequently_used_page<I, S>(&self, layer_names: I) -> Result<Option<TilePage>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.first_candidate(keys::LFU_PREFIX, layer_names)
    }

    pub fn expiration_candidate<I, S>(
        &self,
        policy: ExpirationPolicy,
        layer_names: I,
    ) -> Result<Option<TilePage>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        match policy {
            ExpirationPolicy::Lru => self.least_recently_used_page(layer_names),
            ExpirationPolicy::Lfu => self.least_frequently_used_page(layer_names),
        }
    }

    fn first_candidate<I, S>(&self, index_prefix: &[u8], layer_names: I) -> Result<Option<TilePage>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let storage = self.storage()?;
        storage.read(|view| {
            let mut tile_set_ids = HashSet::new();
            for layer in layer_names {
                for tile_set in records::tile_sets_of_layer(view, layer.as_ref())? {
                    tile_set_ids.insert(tile_set.id().to_string());
                }
            }
            if tile_set_ids.is_empty() {
                return Ok(None);
            }
            records::first_indexed_page(view, index_prefix, &tile_set_ids)
        })
    }
}
