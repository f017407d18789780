//! Family-specific resource definitions and their diff rules.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::Changed;
use crate::error::{MapproxyError, Result};

/// Raster output format of TMS tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RasterFormat {
    #[default]
    Jpg,
    Png,
}

impl RasterFormat {
    pub fn extension(self) -> &'static str {
        match self {
            RasterFormat::Jpg => "jpg",
            RasterFormat::Png => "png",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            RasterFormat::Jpg => "image/jpeg",
            RasterFormat::Png => "image/png",
        }
    }
}

impl fmt::Display for RasterFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for RasterFormat {
    type Err = MapproxyError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "jpg" => Ok(RasterFormat::Jpg),
            "png" => Ok(RasterFormat::Png),
            _ => Err(MapproxyError::not_found(format!(
                "Unknown raster format <{}>.",
                s
            ))),
        }
    }
}

/// Resampling filter used when warping rasters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resampling {
    Nearest,
    Bilinear,
}

/// TMS tiles warped from a raster dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TmsRasterDefinition {
    pub dataset: String,
    #[serde(default)]
    pub mask: Option<String>,
    #[serde(default)]
    pub format: RasterFormat,
    #[serde(default)]
    pub transparent: bool,
    #[serde(default)]
    pub resampling: Option<Resampling>,
}

impl TmsRasterDefinition {
    /// Format actually produced: transparent layers are always PNG.
    pub fn effective_format(&self) -> RasterFormat {
        if self.transparent {
            RasterFormat::Png
        } else {
            self.format
        }
    }

    fn changed(&self, other: &Self) -> Changed {
        // every field shows up in served bytes
        [
            Changed::bump_if(&self.dataset, &other.dataset),
            Changed::bump_if(&self.mask, &other.mask),
            Changed::bump_if(&self.format, &other.format),
            Changed::bump_if(&self.transparent, &other.transparent),
            Changed::bump_if(&self.resampling, &other.resampling),
        ]
        .into_iter()
        .max()
        .unwrap_or(Changed::No)
    }
}

/// TMS layer served by a remote imagery provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TmsRemoteDefinition {
    pub metadata_url: String,
}

/// Elevation dataset with an optional geoid grid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DemDataset {
    pub dataset: String,
    #[serde(default)]
    pub geoid_grid: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurfaceIntrospection {
    /// Bound layers shown on top of the surface in the browser.
    #[serde(default)]
    pub tms: Vec<String>,
    #[serde(default)]
    pub position: Option<serde_json::Value>,
}

/// Terrain surface derived from a DEM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurfaceDemDefinition {
    #[serde(flatten)]
    pub dem: DemDataset,
    #[serde(default)]
    pub mask: Option<String>,
    #[serde(default)]
    pub texture_layer_id: Option<u32>,
    #[serde(default)]
    pub heightcoding_alias: Option<String>,
    #[serde(default)]
    pub introspection: SurfaceIntrospection,
}

impl SurfaceDemDefinition {
    fn changed(&self, other: &Self) -> Changed {
        [
            Changed::bump_if(&self.dem, &other.dem),
            Changed::bump_if(&self.mask, &other.mask),
            Changed::bump_if(&self.texture_layer_id, &other.texture_layer_id),
            Changed::safe_if(&self.heightcoding_alias, &other.heightcoding_alias),
            Changed::safe_if(&self.introspection, &other.introspection),
        ]
        .into_iter()
        .max()
        .unwrap_or(Changed::No)
    }
}

/// Vector output format of geodata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GeodataFormat {
    #[default]
    GeodataJson,
    Geojson,
}

impl GeodataFormat {
    pub fn content_type(self) -> &'static str {
        match self {
            GeodataFormat::GeodataJson => "application/json; charset=utf-8",
            GeodataFormat::Geojson => "application/geo+json",
        }
    }
}

/// When vertex heights are taken from the DEM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HeightcodingMode {
    #[default]
    Auto,
    Always,
    Never,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeodataIntrospection {
    /// Surface shown under the geodata in the browser.
    #[serde(default)]
    pub surface: Option<String>,
    #[serde(default)]
    pub browser_options: Option<serde_json::Value>,
}

fn default_display_size() -> u32 {
    256
}

/// Vector geodata, optionally tiled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeodataDefinition {
    pub dataset: String,
    pub dem: DemDataset,
    #[serde(default)]
    pub layers: Option<Vec<String>>,
    #[serde(default)]
    pub clip_layers: Option<Vec<String>>,
    #[serde(default)]
    pub format: GeodataFormat,
    #[serde(default)]
    pub mode: HeightcodingMode,
    #[serde(default = "default_display_size")]
    pub display_size: u32,
    #[serde(default)]
    pub style_url: String,
    #[serde(default)]
    pub introspection: GeodataIntrospection,
}

impl GeodataDefinition {
    fn changed(&self, other: &Self) -> Changed {
        [
            Changed::bump_if(&self.dataset, &other.dataset),
            Changed::bump_if(&self.dem, &other.dem),
            Changed::bump_if(&self.layers, &other.layers),
            Changed::bump_if(&self.clip_layers, &other.clip_layers),
            Changed::bump_if(&self.format, &other.format),
            Changed::bump_if(&self.mode, &other.mode),
            Changed::safe_if(&self.display_size, &other.display_size),
            Changed::safe_if(&self.style_url, &other.style_url),
            Changed::safe_if(&self.introspection, &other.introspection),
        ]
        .into_iter()
        .max()
        .unwrap_or(Changed::No)
    }
}

/// Closed set of generator-specific definitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Definition {
    TmsRaster(TmsRasterDefinition),
    TmsRemote(TmsRemoteDefinition),
    SurfaceDem(SurfaceDemDefinition),
    GeodataVector(GeodataDefinition),
}

impl Definition {
    /// Parses the definition of a resource handled by `driver`.
    ///
    /// # Errors
    ///
    /// `Format` for unknown drivers or malformed definitions.
    pub fn parse(driver: &str, value: serde_json::Value) -> Result<Definition> {
        let definition = match driver {
            "tms-raster" => Definition::TmsRaster(serde_json::from_value(value)?),
            "tms-bing" => Definition::TmsRemote(serde_json::from_value(value)?),
            "surface-dem" => Definition::SurfaceDem(serde_json::from_value(value)?),
            "geodata-vector" | "geodata-vector-tiled" => {
                let mut def: GeodataDefinition = serde_json::from_value(value)?;
                // layer order does not affect output
                if let Some(layers) = def.layers.as_mut() {
                    layers.sort();
                }
                if let Some(layers) = def.clip_layers.as_mut() {
                    layers.sort();
                }
                Definition::GeodataVector(def)
            }
            _ => {
                return Err(MapproxyError::format(format!(
                    "unknown generator driver <{}>",
                    driver
                )))
            }
        };
        Ok(definition)
    }

    /// Classifies the difference between two definitions.
    pub fn changed(&self, other: &Definition) -> Changed {
        match (self, other) {
            (Definition::TmsRaster(a), Definition::TmsRaster(b)) => a.changed(b),
            // the metadata URL is not part of the served identity
            (Definition::TmsRemote(_), Definition::TmsRemote(_)) => Changed::No,
            (Definition::SurfaceDem(a), Definition::SurfaceDem(b)) => a.changed(b),
            (Definition::GeodataVector(a), Definition::GeodataVector(b)) => a.changed(b),
            _ => Changed::RevisionBump,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn geodata() -> GeodataDefinition {
        let value = json!({
            "dataset": "/data/roads.shp",
            "dem": {"dataset": "/data/dem.tif"},
            "layers": ["roads", "buildings"]
        });
        match Definition::parse("geodata-vector-tiled", value).unwrap() {
            Definition::GeodataVector(def) => def,
            other => panic!("unexpected definition {:?}", other),
        }
    }

    #[test]
    fn test_parse_tms_raster_defaults() {
        let def = Definition::parse("tms-raster", json!({"dataset": "ortho.tif"})).unwrap();
        match def {
            Definition::TmsRaster(d) => {
                assert_eq!(d.format, RasterFormat::Jpg);
                assert!(!d.transparent);
                assert_eq!(d.effective_format(), RasterFormat::Jpg);
            }
            other => panic!("unexpected definition {:?}", other),
        }
    }

    #[test]
    fn test_parse_unknown_driver() {
        let err = Definition::parse("surface-spheroid", json!({})).unwrap_err();
        assert!(matches!(err, MapproxyError::Format(_)));
    }

    #[test]
    fn test_parse_malformed_definition() {
        let err = Definition::parse("tms-raster", json!({"format": "jpg"})).unwrap_err();
        assert!(matches!(err, MapproxyError::Format(_)));
    }

    #[test]
    fn test_geodata_layers_sorted() {
        assert_eq!(
            geodata().layers,
            Some(vec!["buildings".to_string(), "roads".to_string()])
        );
    }

    #[test]
    fn test_geodata_display_size_is_safe() {
        let a = geodata();
        let mut b = a.clone();
        b.display_size = 512;
        b.style_url = "file:/styles/roads.json".to_string();
        assert_eq!(
            Definition::GeodataVector(a).changed(&Definition::GeodataVector(b)),
            Changed::Safe
        );
    }

    #[test]
    fn test_geodata_dataset_bumps() {
        let a = geodata();
        let mut b = a.clone();
        b.dataset = "/data/rails.shp".to_string();
        b.display_size = 512;
        assert_eq!(
            Definition::GeodataVector(a).changed(&Definition::GeodataVector(b)),
            Changed::RevisionBump
        );
    }

    #[test]
    fn test_remote_definition_never_changes() {
        let a = Definition::TmsRemote(TmsRemoteDefinition {
            metadata_url: "http://a".to_string(),
        });
        let b = Definition::TmsRemote(TmsRemoteDefinition {
            metadata_url: "http://b".to_string(),
        });
        assert_eq!(a.changed(&b), Changed::No);
    }

    #[test]
    fn test_surface_introspection_is_safe() {
        let value = json!({"dataset": "/data/dem", "textureLayerId": 3});
        let a = match Definition::parse("surface-dem", value).unwrap() {
            Definition::SurfaceDem(d) => d,
            other => panic!("unexpected definition {:?}", other),
        };
        assert_eq!(a.texture_layer_id, Some(3));

        let mut b = a.clone();
        b.introspection.tms.push("rf1-ortho".to_string());
        assert_eq!(a.changed(&b), Changed::Safe);

        let mut c = a.clone();
        c.dem.geoid_grid = Some("egm96".to_string());
        assert_eq!(a.changed(&c), Changed::RevisionBump);
    }

    #[test]
    fn test_family_switch_bumps() {
        let a = Definition::parse("tms-raster", json!({"dataset": "a"})).unwrap();
        let b = Definition::parse("tms-bing", json!({"metadataUrl": "u"})).unwrap();
        assert_eq!(a.changed(&b), Changed::RevisionBump);
    }
}
