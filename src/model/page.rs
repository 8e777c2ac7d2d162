//! Tile pages and their usage statistics.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A rectangular block of tiles at one zoom level of one TileSet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TilePage {
    tile_set_id: String,
    page_x: u32,
    page_y: u32,
    zoom_level: u8,
}

impl TilePage {
    pub fn new(tile_set_id: impl Into<String>, page_x: u32, page_y: u32, zoom_level: u8) -> Self {
        Self {
            tile_set_id: tile_set_id.into(),
            page_x,
            page_y,
            zoom_level,
        }
    }

    pub fn tile_set_id(&self) -> &str {
        &self.tile_set_id
    }

    pub fn page_x(&self) -> u32 {
        self.page_x
    }

    pub fn page_y(&self) -> u32 {
        self.page_y
    }

    pub fn zoom_level(&self) -> u8 {
        self.zoom_level
    }

    /// Stable identity: `tileSetId@x,y,z`.
    pub fn key(&self) -> String {
        format!(
            "{}@{},{},{}",
            self.tile_set_id, self.page_x, self.page_y, self.zoom_level
        )
    }

    /// The same page coordinates under another TileSet.
    pub fn with_tile_set_id(&self, tile_set_id: &str) -> Self {
        Self {
            tile_set_id: tile_set_id.to_string(),
            ..self.clone()
        }
    }
}

impl fmt::Display for TilePage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// Usage statistics for one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageStats {
    /// Fraction of the page's tile capacity currently stored, in `[0, 1]`.
    pub fill_factor: f32,
    pub last_access_time_minutes: u32,
    pub frequency_of_use_per_minute: f32,
    pub num_hits: u64,
    /// Tiles currently stored for the page.
    pub tile_count: u64,
    pub creation_time_minutes: u32,
}

impl PageStats {
    pub fn new(creation_time_minutes: u32) -> Self {
        Self {
            fill_factor: 0.0,
            last_access_time_minutes: creation_time_minutes,
            frequency_of_use_per_minute: 0.0,
            num_hits: 0,
            tile_count: 0,
            creation_time_minutes,
        }
    }

    /// Applies a signed tile-count delta against a page holding at most
    /// `capacity` tiles, recomputing the fill factor.
    pub fn add_tiles(&mut self, delta: i64, capacity: u64) {
        let count = (self.tile_count as i128 + delta as i128).max(0) as u64;
        self.tile_count = count.min(capacity);
        self.fill_factor = if capacity == 0 {
            0.0
        } else {
            (self.tile_count as f64 / capacity as f64).clamp(0.0, 1.0) as f32
        };
    }

    /// Accumulates hits and moves the last access time.
    ///
    /// Access minutes before the page's creation are treated as the creation
    /// minute. Frequency is hits per minute since creation, counting the
    /// creation minute itself.
    pub fn add_hits_and_access_time(&mut self, hits: u64, access_minute: u32) {
        let access = access_minute.max(self.creation_time_minutes);
        if self.fill_factor <= 0.0 {
            // A hit proves at least one tile exists.
            self.fill_factor = f32::MIN_POSITIVE;
        }
        self.num_hits = self.num_hits.saturating_add(hits);
        let elapsed = 1 + (access - self.creation_time_minutes) as u64;
        self.frequency_of_use_per_minute = (self.num_hits as f64 / elapsed as f64) as f32;
        self.last_access_time_minutes = access;
    }

    /// Marks the page as emptied by an expiration.
    pub fn truncate(&mut self) {
        self.tile_count = 0;
        self.fill_factor = 0.0;
    }
}

/// One unit of usage-change input: hit and tile-count deltas for a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageStatsPayload {
    pub page: TilePage,
    pub num_hits: u64,
    /// Signed change to the number of tiles stored in the page.
    pub num_tiles: i64,
    /// Epoch millis of the access; `0` means "now".
    pub last_access_time: u64,
}

impl PageStatsPayload {
    pub fn new(page: TilePage) -> Self {
        Self {
            page,
            num_hits: 0,
            num_tiles: 0,
            last_access_time: 0,
        }
    }

    pub fn with_hits(mut self, hits: u64) -> Self {
        self.num_hits = hits;
        self
    }

    pub fn with_tiles(mut self, tiles: i64) -> Self {
        self.num_tiles = tiles;
        self
    }

    pub fn with_access_time(mut self, millis: u64) -> Self {
        self.last_access_time = millis;
        self
    }

    /// Folds a later payload for the same page into this one.
    pub fn merge(&mut self, other: &PageStatsPayload) {
        self.num_hits = self.num_hits.saturating_add(other.num_hits);
        self.num_tiles = self.num_tiles.saturating_add(other.num_tiles);
        self.last_access_time = self.last_access_time.max(other.last_access_time);
    }
}
