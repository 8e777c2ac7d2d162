//! Page grid for one gridset subset.

use crate::catalog::{GridSubset, TileRange};
use crate::config::PagingStrategy;
use crate::error::{QuotaError, Result};

/// Page layout of a single zoom level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageLevelInfo {
    pub coverage: TileRange,
    pub tiles_per_page_x: u64,
    pub tiles_per_page_y: u64,
    pub pages_x: u64,
    pub pages_y: u64,
}

impl PageLevelInfo {
    fn new(coverage: TileRange, strategy: &PagingStrategy) -> Self {
        let width = coverage[2] - coverage[0] + 1;
        let height = coverage[3] - coverage[1] + 1;
        let tiles_per_page_x = tiles_per_page(width, strategy);
        let tiles_per_page_y = tiles_per_page(height, strategy);
        Self {
            coverage,
            tiles_per_page_x,
            tiles_per_page_y,
            pages_x: width.div_ceil(tiles_per_page_x),
            pages_y: height.div_ceil(tiles_per_page_y),
        }
    }

    pub fn total_pages(&self) -> u64 {
        self.pages_x * self.pages_y
    }
}

/// Tiles along one page edge for an axis `n` tiles wide.
///
/// The logarithmic strategy grows pages with the level size so deep levels
/// don't explode into millions of pages.
pub fn tiles_per_page(n: u64, strategy: &PagingStrategy) -> u64 {
    match *strategy {
        PagingStrategy::Logarithmic { base } => {
            if n <= 1 || base <= 1.0 {
                return 1;
            }
            let n = n as f64;
            let log = n.ln() / base.ln();
            ((n / log).ceil() as u64).max(1)
        }
        PagingStrategy::Fixed { tiles_per_edge } => u64::from(tiles_per_edge.max(1)),
    }
}

/// Maps tiles of one grid subset to pages and back.
#[derive(Debug, Clone)]
pub struct PagePyramid {
    subset: GridSubset,
    strategy: PagingStrategy,
}

impl PagePyramid {
    pub fn new(subset: GridSubset, strategy: PagingStrategy) -> Self {
        Self { subset, strategy }
    }

    pub fn gridset_id(&self) -> &str {
        &self.subset.gridset_id
    }

    pub fn level(&self, zoom: u8) -> Result<PageLevelInfo> {
        let coverage = self.subset.coverage(zoom).ok_or_else(|| {
            QuotaError::IllegalArgument(format!(
                "zoom level {zoom} outside {} [{}, {}]",
                self.subset.gridset_id,
                self.subset.zoom_start,
                self.subset.zoom_stop()
            ))
        })?;
        if coverage[0] > coverage[2] || coverage[1] > coverage[3] {
            return Err(QuotaError::Configuration(format!(
                "empty coverage at level {zoom} of {}",
                self.subset.gridset_id
            )));
        }
        Ok(PageLevelInfo::new(coverage, &self.strategy))
    }

    /// Page coordinates `(page_x, page_y)` holding tile `(x, y)` at `zoom`.
    pub fn to_page(&self, x: u64, y: u64, zoom: u8) -> Result<(u32, u32)> {
        let level = self.level(zoom)?;
        let [min_x, min_y, max_x, max_y] = level.coverage;
        if x < min_x || x > max_x || y < min_y || y > max_y {
            return Err(QuotaError::IllegalArgument(format!(
                "tile {x},{y},{zoom} outside coverage {:?}",
                level.coverage
            )));
        }
        let page_x = (x - min_x) / level.tiles_per_page_x;
        let page_y = (y - min_y) / level.tiles_per_page_y;
        match (u32::try_from(page_x), u32::try_from(page_y)) {
            (Ok(page_x), Ok(page_y)) => Ok((page_x, page_y)),
            _ => Err(QuotaError::IllegalArgument(format!(
                "page {page_x},{page_y} of tile {x},{y},{zoom} exceeds the page index range"
            ))),
        }
    }

    /// Inclusive tile range of a page, clipped to the level's coverage.
    pub fn to_tile_bounds(&self, page_x: u32, page_y: u32, zoom: u8) -> Result<TileRange> {
        let level = self.level(zoom)?;
        let (page_x, page_y) = (u64::from(page_x), u64::from(page_y));
        if page_x >= level.pages_x || page_y >= level.pages_y {
            return Err(QuotaError::IllegalArgument(format!(
                "page {page_x},{page_y},{zoom} outside {}x{} page grid",
                level.pages_x, level.pages_y
            )));
        }
        let [min_x, min_y, max_x, max_y] = level.coverage;
        let lo_x = min_x + page_x * level.tiles_per_page_x;
        let lo_y = min_y + page_y * level.tiles_per_page_y;
        let hi_x = (lo_x + level.tiles_per_page_x - 1).min(max_x);
        let hi_y = (lo_y + level.tiles_per_page_y - 1).min(max_y);
        Ok([lo_x, lo_y, hi_x, hi_y])
    }

    /// Number of tiles the page covers.
    pub fn page_capacity(&self, page_x: u32, page_y: u32, zoom: u8) -> Result<u64> {
        let [lo_x, lo_y, hi_x, hi_y] = self.to_tile_bounds(page_x, page_y, zoom)?;
        Ok((hi_x - lo_x + 1) * (hi_y - lo_y + 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log_strategy() -> PagingStrategy {
        PagingStrategy::Logarithmic { base: 1.1 }
    }

    #[test]
    fn test_tiles_per_page_progression() {
        let s = log_strategy();
        assert_eq!(tiles_per_page(1, &s), 1);
        assert_eq!(tiles_per_page(2, &s), 1);
        // log_1.1(1024) ~= 72.7 -> ceil(1024 / 72.7) = 15
        assert_eq!(tiles_per_page(1024, &s), 15);
        assert_eq!(tiles_per_page(1024, &PagingStrategy::Fixed { tiles_per_edge: 8 }), 8);
    }

    #[test]
    fn test_page_roundtrip_at_fixed_size() {
        let pyramid = PagePyramid::new(
            GridSubset::quad_tree("g", 1, 1, 6),
            PagingStrategy::Fixed { tiles_per_edge: 8 },
        );
        assert_eq!(pyramid.to_page(0, 0, 5).unwrap(), (0, 0));
        assert_eq!(pyramid.to_page(17, 9, 5).unwrap(), (2, 1));
        assert_eq!(pyramid.to_tile_bounds(2, 1, 5).unwrap(), [16, 8, 23, 15]);
        assert_eq!(pyramid.page_capacity(2, 1, 5).unwrap(), 64);
    }

    #[test]
    fn test_edge_pages_are_clipped() {
        let subset = GridSubset {
            gridset_id: "g".to_string(),
            zoom_start: 3,
            coverages: vec![[10, 20, 29, 24]],
        };
        let pyramid = PagePyramid::new(subset, PagingStrategy::Fixed { tiles_per_edge: 8 });
        let level = pyramid.level(3).unwrap();
        assert_eq!((level.pages_x, level.pages_y), (3, 1));
        assert_eq!(pyramid.to_page(29, 24, 3).unwrap(), (2, 0));
        assert_eq!(pyramid.to_tile_bounds(2, 0, 3).unwrap(), [26, 20, 29, 24]);
        assert_eq!(pyramid.page_capacity(2, 0, 3).unwrap(), 4 * 5);
    }

    #[test]
    fn test_page_index_overflow_is_rejected() {
        let subset = GridSubset {
            gridset_id: "g".to_string(),
            zoom_start: 0,
            coverages: vec![[0, 0, 1 << 40, 0]],
        };
        let pyramid = PagePyramid::new(subset, PagingStrategy::Fixed { tiles_per_edge: 1 });
        assert_eq!(pyramid.to_page(u32::MAX as u64, 0, 0).unwrap(), (u32::MAX, 0));
        assert!(matches!(
            pyramid.to_page(1 << 33, 0, 0),
            Err(QuotaError::IllegalArgument(_))
        ));
    }

    #[test]
    fn test_out_of_range_requests_are_rejected() {
        let pyramid = PagePyramid::new(GridSubset::quad_tree("g", 2, 1, 3), log_strategy());
        assert!(matches!(pyramid.level(3), Err(QuotaError::IllegalArgument(_))));
        assert!(matches!(pyramid.to_page(2, 0, 0), Err(QuotaError::IllegalArgument(_))));
        assert!(matches!(
            pyramid.to_tile_bounds(5, 0, 0),
            Err(QuotaError::IllegalArgument(_))
        ));
    }
}
