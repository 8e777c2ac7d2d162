//! Tile ↔ page coordinate mapping.
//!
//! Pages are fixed per zoom level and clipped to the layer's real coverage,
//! so the capacity of an edge page is smaller than that of an inner one.

mod pyramid;

pub use pyramid::{tiles_per_page, PageLevelInfo, PagePyramid};

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::catalog::{LayerCatalog, LayerInfo, TileRange};
use crate::config::PagingStrategy;
use crate::error::{QuotaError, Result};
use crate::model::{TilePage, TileSet};

/// Resolves TileSets against the catalog and applies the page pyramid.
pub struct TilePageCalculator {
    catalog: Arc<dyn LayerCatalog>,
    strategy: PagingStrategy,
}

impl TilePageCalculator {
    pub fn new(catalog: Arc<dyn LayerCatalog>, strategy: PagingStrategy) -> Self {
        Self { catalog, strategy }
    }

    pub fn catalog(&self) -> &Arc<dyn LayerCatalog> {
        &self.catalog
    }

    pub fn layer_names(&self) -> BTreeSet<String> {
        self.catalog.layer_names()
    }

    fn layer(&self, name: &str) -> Result<LayerInfo> {
        self.catalog
            .layer(name)
            .ok_or_else(|| QuotaError::NotFound(format!("layer {name} is not in the catalog")))
    }

    /// Every TileSet the catalog declares for `layer_name`.
    pub fn tile_sets_for(&self, layer_name: &str) -> Result<BTreeSet<TileSet>> {
        self.layer(layer_name)?.tile_sets()
    }

    /// Page pyramid for the TileSet's layer and gridset.
    pub fn pyramid(&self, tile_set: &TileSet) -> Result<PagePyramid> {
        let layer = self.layer(tile_set.layer_name())?;
        let subset = layer.grid_subset(tile_set.gridset_id()).ok_or_else(|| {
            QuotaError::NotFound(format!(
                "gridset {} is not published for layer {}",
                tile_set.gridset_id(),
                tile_set.layer_name()
            ))
        })?;
        Ok(PagePyramid::new(subset.clone(), self.strategy.clone()))
    }

    /// Fails with `NotFound` unless the TileSet's layer and gridset exist.
    pub fn check_known(&self, tile_set: &TileSet) -> Result<()> {
        self.pyramid(tile_set).map(|_| ())
    }

    pub fn to_page(&self, tile_set: &TileSet, x: u64, y: u64, zoom: u8) -> Result<TilePage> {
        let (page_x, page_y) = self.pyramid(tile_set)?.to_page(x, y, zoom)?;
        Ok(TilePage::new(tile_set.id(), page_x, page_y, zoom))
    }

    pub fn to_tile_bounds(&self, tile_set: &TileSet, page: &TilePage) -> Result<TileRange> {
        self.pyramid(tile_set)?
            .to_tile_bounds(page.page_x(), page.page_y(), page.zoom_level())
    }

    pub fn page_capacity(&self, tile_set: &TileSet, page: &TilePage) -> Result<u64> {
        self.pyramid(tile_set)?
            .page_capacity(page.page_x(), page.page_y(), page.zoom_level())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{GridSubset, StaticCatalog};

    fn calculator() -> TilePageCalculator {
        let catalog = StaticCatalog::new([LayerInfo {
            name: "roads".to_string(),
            grid_subsets: vec![GridSubset::quad_tree("EPSG:4326", 2, 1, 8)],
            mime_formats: vec!["image/png".to_string()],
            parameter_ids: vec![],
        }]);
        TilePageCalculator::new(Arc::new(catalog), PagingStrategy::Fixed { tiles_per_edge: 4 })
    }

    #[test]
    fn test_to_page_uses_tile_set_id() {
        let calc = calculator();
        let ts = TileSet::new("roads", "EPSG:4326", "image/png", None).unwrap();
        let page = calc.to_page(&ts, 5, 6, 3).unwrap();
        assert_eq!(page, TilePage::new(ts.id(), 1, 1, 3));
        assert_eq!(calc.to_tile_bounds(&ts, &page).unwrap(), [4, 4, 7, 7]);
        assert_eq!(calc.page_capacity(&ts, &page).unwrap(), 16);
    }

    #[test]
    fn test_unknown_layer_or_gridset() {
        let calc = calculator();
        let missing_layer = TileSet::new("rivers", "EPSG:4326", "image/png", None).unwrap();
        let missing_grid = TileSet::new("roads", "EPSG:3857", "image/png", None).unwrap();
        assert!(matches!(calc.check_known(&missing_layer), Err(QuotaError::NotFound(_))));
        assert!(matches!(calc.check_known(&missing_grid), Err(QuotaError::NotFound(_))));
        assert_eq!(calc.tile_sets_for("roads").unwrap().len(), 1);
    }
}
