//! Key layout of the page store.
//!
//! ```text
//! t\0{tile_set_id}                      -> TileSet (json)
//! l\0{layer}\0{tile_set_id}             -> empty, layer index
//! q\0{tile_set_id | GLOBAL_QUOTA_ID}    -> u128 big-endian bytes
//! p\0{tile_set_id}\0{x},{y},{z}         -> PageRecord (json)
//! r\0{minutes:u32 be}{page key}         -> TilePage (json), LRU index
//! f\0{frequency:f32 be}{page key}       -> TilePage (json), LFU index
//! ```
//!
//! Only pages with a positive fill factor appear in the two indexes.

use crate::model::{PageStats, TilePage};

/// Quota key of the global total. Cannot collide with a TileSet id,
/// which always contains `#`.
pub const GLOBAL_QUOTA_ID: &str = "___GLOBAL_QUOTA___";

pub const TILE_SET_PREFIX: &[u8] = b"t\0";
pub const LAYER_PREFIX: &[u8] = b"l\0";
pub const QUOTA_PREFIX: &[u8] = b"q\0";
pub const PAGE_PREFIX: &[u8] = b"p\0";
pub const LRU_PREFIX: &[u8] = b"r\0";
pub const LFU_PREFIX: &[u8] = b"f\0";

fn join(prefix: &[u8], parts: &[&[u8]]) -> Vec<u8> {
    let len = prefix.len() + parts.iter().map(|p| p.len()).sum::<usize>();
    let mut key = Vec::with_capacity(len);
    key.extend_from_slice(prefix);
    for part in parts {
        key.extend_from_slice(part);
    }
    key
}

pub fn tile_set(id: &str) -> Vec<u8> {
    join(TILE_SET_PREFIX, &[id.as_bytes()])
}

pub fn layer_prefix(layer: &str) -> Vec<u8> {
    join(LAYER_PREFIX, &[layer.as_bytes(), b"\0"])
}

pub fn layer_entry(layer: &str, tile_set_id: &str) -> Vec<u8> {
    join(LAYER_PREFIX, &[layer.as_bytes(), b"\0", tile_set_id.as_bytes()])
}

/// The TileSet id in a layer-index key.
pub fn tile_set_id_of_layer_entry(key: &[u8]) -> Option<&str> {
    let rest = key.strip_prefix(LAYER_PREFIX)?;
    let split = rest.iter().position(|b| *b == 0)?;
    std::str::from_utf8(&rest[split + 1..]).ok()
}

/// The layer name in a layer-index key.
pub fn layer_of_layer_entry(key: &[u8]) -> Option<&str> {
    let rest = key.strip_prefix(LAYER_PREFIX)?;
    let split = rest.iter().position(|b| *b == 0)?;
    std::str::from_utf8(&rest[..split]).ok()
}

pub fn quota(id: &str) -> Vec<u8> {
    join(QUOTA_PREFIX, &[id.as_bytes()])
}

pub fn global_quota() -> Vec<u8> {
    quota(GLOBAL_QUOTA_ID)
}

pub fn pages_of(tile_set_id: &str) -> Vec<u8> {
    join(PAGE_PREFIX, &[tile_set_id.as_bytes(), b"\0"])
}

pub fn page(page: &TilePage) -> Vec<u8> {
    let coords = format!("{},{},{}", page.page_x(), page.page_y(), page.zoom_level());
    join(
        PAGE_PREFIX,
        &[page.tile_set_id().as_bytes(), b"\0", coords.as_bytes()],
    )
}

pub fn lru_entry(page: &TilePage, stats: &PageStats) -> Vec<u8> {
    let minutes = stats.last_access_time_minutes.to_be_bytes();
    join(LRU_PREFIX, &[&minutes, page.key().as_bytes()])
}

pub fn lfu_entry(page: &TilePage, stats: &PageStats) -> Vec<u8> {
    let frequency = ordered_f32_bits(stats.frequency_of_use_per_minute).to_be_bytes();
    join(LFU_PREFIX, &[&frequency, page.key().as_bytes()])
}

/// Bit pattern of `value` whose unsigned order matches the float order.
fn ordered_f32_bits(value: f32) -> u32 {
    let bits = value.to_bits();
    if bits & 0x8000_0000 != 0 {
        !bits
    } else {
        bits | 0x8000_0000
    }
}

pub fn encode_quota(bytes: u128) -> Vec<u8> {
    bytes.to_be_bytes().to_vec()
}

pub fn decode_quota(value: &[u8]) -> Option<u128> {
    let raw: [u8; 16] = value.try_into().ok()?;
    Some(u128::from_be_bytes(raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layer_entry_parsing() {
        let key = layer_entry("topp:states", "topp:states#EPSG:4326#image/png");
        assert!(key.starts_with(&layer_prefix("topp:states")));
        assert_eq!(layer_of_layer_entry(&key), Some("topp:states"));
        assert_eq!(
            tile_set_id_of_layer_entry(&key),
            Some("topp:states#EPSG:4326#image/png")
        );
    }

    #[test]
    fn test_layer_prefix_does_not_match_longer_names() {
        let key = layer_entry("roads_2", "roads_2#g#f");
        assert!(!key.starts_with(&layer_prefix("roads")));
    }

    #[test]
    fn test_index_keys_sort_by_metric() {
        let page_a = TilePage::new("ts", 0, 0, 0);
        let page_b = TilePage::new("ts", 1, 0, 0);
        let mut older = PageStats::new(0);
        older.last_access_time_minutes = 5;
        older.frequency_of_use_per_minute = 2.5;
        let mut newer = PageStats::new(0);
        newer.last_access_time_minutes = 300;
        newer.frequency_of_use_per_minute = 10.0;

        assert!(lru_entry(&page_b, &older) < lru_entry(&page_a, &newer));
        assert!(lfu_entry(&page_b, &older) < lfu_entry(&page_a, &newer));
        // Equal metrics fall back to page key order.
        assert!(lfu_entry(&page_a, &older) < lfu_entry(&page_b, &older));
    }

    #[test]
    fn test_quota_codec() {
        let value = encode_quota(u128::MAX - 7);
        assert_eq!(decode_quota(&value), Some(u128::MAX - 7));
        assert_eq!(decode_quota(b"short"), None);
    }
}
