//! tile-quota: disk-quota accounting and page expiration for tile caches.
//!
//! Tracks bytes used per TileSet (layer × gridset × format × parameters)
//! and globally, aggregates tiles into pages with hit and recency
//! statistics, and answers which page to expire next under an LRU or LFU
//! policy. Layer renames and deletions cascade through quotas and pages
//! atomically.

pub mod catalog;
pub mod cleaner;
pub mod clock;
pub mod config;
pub mod error;
pub mod metrics;
pub mod model;
pub mod paging;
pub mod storage;
pub mod store;

pub use catalog::{GridSubset, LayerCatalog, LayerInfo, StaticCatalog};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, ExpirationPolicy};
pub use error::{QuotaError, Result};
pub use model::{PageStats, PageStatsPayload, Quota, StorageUnit, TilePage, TileSet};
pub use store::{QuotaStore, StatsUpdate, UsageAggregator};
