//! Layer catalog: the live set of layers the store reconciles against.
//!
//! The catalog is owned by the host. The store only asks it which layers
//! exist, which gridsets and formats each layer serves, and which
//! parameter ids have been cached for it.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::error::{QuotaError, Result};
use crate::model::TileSet;

/// Tile coverage of one gridset at one zoom level, inclusive:
/// `[min_x, min_y, max_x, max_y]`.
pub type TileRange = [u64; 4];

/// The subset of a gridset a layer is published on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridSubset {
    pub gridset_id: String,
    /// Zoom level of the first coverage entry.
    #[serde(default)]
    pub zoom_start: u8,
    /// One coverage per level, starting at `zoom_start`.
    pub coverages: Vec<TileRange>,
}

impl GridSubset {
    /// Full coverage of a quad-tree gridset that is `width × height` tiles
    /// at its first level and doubles per level. Levels whose tile counts
    /// would overflow `u64` are left out.
    pub fn quad_tree(gridset_id: &str, width: u64, height: u64, levels: u8) -> Self {
        let coverages = (0..u32::from(levels))
            .map_while(|z| {
                let scale = 1u64.checked_shl(z)?;
                let max_x = width.checked_mul(scale)?.checked_sub(1)?;
                let max_y = height.checked_mul(scale)?.checked_sub(1)?;
                Some([0, 0, max_x, max_y])
            })
            .collect();
        Self {
            gridset_id: gridset_id.to_string(),
            zoom_start: 0,
            coverages,
        }
    }

    pub fn zoom_stop(&self) -> u8 {
        let levels = self.coverages.len().max(1) as u16;
        (self.zoom_start as u16 + levels - 1).min(u8::MAX as u16) as u8
    }

    pub fn coverage(&self, zoom: u8) -> Option<TileRange> {
        let index = zoom.checked_sub(self.zoom_start)? as usize;
        self.coverages.get(index).copied()
    }
}

/// What the catalog knows about one layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerInfo {
    pub name: String,
    pub grid_subsets: Vec<GridSubset>,
    pub mime_formats: Vec<String>,
    /// Parameter ids with tiles in the cache. Empty means only the
    /// default parameter set.
    #[serde(default)]
    pub parameter_ids: Vec<String>,
}

impl LayerInfo {
    pub fn grid_subset(&self, gridset_id: &str) -> Option<&GridSubset> {
        self.grid_subsets.iter().find(|g| g.gridset_id == gridset_id)
    }

    /// Every TileSet the layer can produce: gridsets × formats × parameter ids.
    pub fn tile_sets(&self) -> Result<BTreeSet<TileSet>> {
        let mut params: Vec<Option<&str>> = self.parameter_ids.iter().map(|p| Some(p.as_str())).collect();
        if params.is_empty() {
            params.push(None);
        }

        let mut sets = BTreeSet::new();
        for subset in &self.grid_subsets {
            for format in &self.mime_formats {
                for param in &params {
                    sets.insert(TileSet::new(&self.name, &subset.gridset_id, format, *param)?);
                }
            }
        }
        Ok(sets)
    }
}

/// Live layer catalog consulted at startup and on lazy TileSet creation.
pub trait LayerCatalog: Send + Sync {
    fn layer_names(&self) -> BTreeSet<String>;

    fn layer(&self, name: &str) -> Option<LayerInfo>;

    fn contains(&self, name: &str) -> bool {
        self.layer(name).is_some()
    }
}

/// In-memory catalog, optionally loaded from a JSON file.
#[derive(Debug, Default)]
pub struct StaticCatalog {
    layers: RwLock<BTreeMap<String, LayerInfo>>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CatalogFile {
    layers: Vec<LayerInfo>,
}

impl StaticCatalog {
    pub fn new(layers: impl IntoIterator<Item = LayerInfo>) -> Self {
        let catalog = Self::default();
        for layer in layers {
            catalog.add_layer(layer);
        }
        catalog
    }

    /// Loads `{ "layers": [ ... ] }` from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let file: CatalogFile = serde_json::from_str(&data)
            .map_err(|e| QuotaError::Configuration(format!("catalog {}: {e}", path.display())))?;
        Ok(Self::new(file.layers))
    }

    pub fn add_layer(&self, layer: LayerInfo) {
        let mut layers = self.layers.write().unwrap_or_else(|e| e.into_inner());
        layers.insert(layer.name.clone(), layer);
    }

    pub fn remove_layer(&self, name: &str) -> Option<LayerInfo> {
        let mut layers = self.layers.write().unwrap_or_else(|e| e.into_inner());
        layers.remove(name)
    }
}

impl LayerCatalog for StaticCatalog {
    fn layer_names(&self) -> BTreeSet<String> {
        let layers = self.layers.read().unwrap_or_else(|e| e.into_inner());
        layers.keys().cloned().collect()
    }

    fn layer(&self, name: &str) -> Option<LayerInfo> {
        let layers = self.layers.read().unwrap_or_else(|e| e.into_inner());
        layers.get(name).cloned()
    }
}
