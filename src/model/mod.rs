//! Domain values shared by the store, the pager and the cleaner.

mod page;
mod quota;
mod tile_set;

pub use page::{PageStats, PageStatsPayload, TilePage};
pub use quota::{Quota, StorageUnit};
pub use tile_set::{validate_component, TileSet};
