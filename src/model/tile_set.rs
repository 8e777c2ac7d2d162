//! TileSet identity: the quota/stat bookkeeping unit.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{QuotaError, Result};

/// Separator used to build TileSet ids; forbidden inside id components.
const ID_SEPARATOR: char = '#';

/// One (layer, gridset, format, parameters) combination.
///
/// Immutable once built. `parameters_id == None` is the default parameter set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileSet {
    id: String,
    layer_name: String,
    gridset_id: String,
    blob_format: String,
    parameters_id: Option<String>,
}

impl TileSet {
    pub fn new(
        layer_name: &str,
        gridset_id: &str,
        blob_format: &str,
        parameters_id: Option<&str>,
    ) -> Result<Self> {
        validate_component("layer name", layer_name)?;
        validate_component("gridset id", gridset_id)?;
        validate_component("blob format", blob_format)?;
        if let Some(params) = parameters_id {
            validate_component("parameters id", params)?;
        }

        let mut id = format!("{layer_name}{ID_SEPARATOR}{gridset_id}{ID_SEPARATOR}{blob_format}");
        if let Some(params) = parameters_id {
            id.push(ID_SEPARATOR);
            id.push_str(params);
        }

        Ok(Self {
            id,
            layer_name: layer_name.to_string(),
            gridset_id: gridset_id.to_string(),
            blob_format: blob_format.to_string(),
            parameters_id: parameters_id.map(str::to_string),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn layer_name(&self) -> &str {
        &self.layer_name
    }

    pub fn gridset_id(&self) -> &str {
        &self.gridset_id
    }

    pub fn blob_format(&self) -> &str {
        &self.blob_format
    }

    pub fn parameters_id(&self) -> Option<&str> {
        self.parameters_id.as_deref()
    }

    /// Same gridset/format/parameters under another layer name.
    pub fn with_layer_name(&self, layer_name: &str) -> Result<Self> {
        Self::new(
            layer_name,
            &self.gridset_id,
            &self.blob_format,
            self.parameters_id.as_deref(),
        )
    }
}

impl fmt::Display for TileSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// Checks a layer name (or other id component) is usable as a store key.
pub fn validate_component(what: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(QuotaError::IllegalArgument(format!("{what} must not be empty")));
    }
    if value.contains(ID_SEPARATOR) || value.contains('\0') {
        return Err(QuotaError::IllegalArgument(format!(
            "{what} contains a reserved character: {value:?}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_includes_parameters_only_when_present() {
        let default = TileSet::new("topp:states", "EPSG:4326", "image/png", None).unwrap();
        assert_eq!(default.id(), "topp:states#EPSG:4326#image/png");

        let styled = TileSet::new("topp:states", "EPSG:4326", "image/png", Some("abc123")).unwrap();
        assert_eq!(styled.id(), "topp:states#EPSG:4326#image/png#abc123");
        assert_ne!(default, styled);
    }

    #[test]
    fn test_rejects_malformed_components() {
        assert!(matches!(
            TileSet::new("", "EPSG:4326", "image/png", None),
            Err(QuotaError::IllegalArgument(_))
        ));
        assert!(matches!(
            TileSet::new("a#b", "EPSG:4326", "image/png", None),
            Err(QuotaError::IllegalArgument(_))
        ));
        assert!(matches!(
            TileSet::new("layer", "EPSG:4326", "image/png", Some("")),
            Err(QuotaError::IllegalArgument(_))
        ));
    }

    #[test]
    fn test_with_layer_name_keeps_the_rest() {
        let ts = TileSet::new("old", "EPSG:900913", "image/jpeg", Some("p1")).unwrap();
        let renamed = ts.with_layer_name("new").unwrap();
        assert_eq!(renamed.layer_name(), "new");
        assert_eq!(renamed.gridset_id(), "EPSG:900913");
        assert_eq!(renamed.blob_format(), "image/jpeg");
        assert_eq!(renamed.parameters_id(), Some("p1"));
    }
}
