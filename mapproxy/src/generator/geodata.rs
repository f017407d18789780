//! Vector geodata, flat (`geodata-vector`) or tiled (`geodata-vector-tiled`).

use std::sync::{Arc, OnceLock};

use serde_json::Value;

use super::surface_dem::build_tile_index;
use super::tile_index::TileIndex;
use super::{inline_credits, Generator, GeneratorCore, GeneratorParams, MapConfig, Reply};
use crate::arsenal::{Arsenal, GeodataRequest};
use crate::dataset::RasterRequest;
use crate::error::{MapproxyError, Result};
use crate::metatile::{metatile_blocks, InvalidNodes};
use crate::path::file_kind::{GeodataFile, FREE_LAYER, GEO, STYLE, TILESET_INDEX};
use crate::path::FileInfo;
use crate::resource::{Definition, GeodataDefinition, Resource};
use crate::sink::SinkFileInfo;
use crate::tile::TileId;

/// Style served when the definition names none.
const DEFAULT_STYLE: &str = r#"{
    "layers": {
        "features": {
            "line": true,
            "line-width": 2,
            "line-color": [255, 0, 255, 255],
            "point": true,
            "point-radius": 5,
            "point-color": [0, 255, 255, 255]
        }
    }
}
"#;

/// Prefix of style URLs pointing into the resource root.
const FILE_STYLE_PREFIX: &str = "file:";

const META_SAMPLES_PER_TILE: u32 = 8;

pub struct GeodataVector {
    core: GeneratorCore,
    tiled: bool,
    index: OnceLock<Arc<TileIndex>>,
}

impl GeodataVector {
    pub fn new(params: GeneratorParams, tiled: bool) -> Result<Self> {
        definition(&params.resource)?;
        let generator = Self {
            core: GeneratorCore::new(params),
            tiled,
            index: OnceLock::new(),
        };

        generator.core.try_fast_path(|| {
            if generator.tiled {
                let index = TileIndex::load(&generator.core.store_path(TILESET_INDEX))?;
                let _ = generator.index.set(Arc::new(index));
            }
            Ok(())
        });
        Ok(generator)
    }

    fn index(&self) -> Result<&Arc<TileIndex>> {
        self.index
            .get()
            .ok_or_else(|| MapproxyError::unavailable(format!("Resource <{}> not ready.", self.core.id())))
    }

    /// URL of the style as seen by clients.
    fn style_url(def: &GeodataDefinition) -> &str {
        if def.style_url.is_empty() || def.style_url.starts_with(FILE_STYLE_PREFIX) {
            STYLE
        } else {
            &def.style_url
        }
    }

    fn free_layer(&self, resource: &Resource, def: &GeodataDefinition) -> Value {
        if !self.tiled {
            return serde_json::json!({
                "id": resource.id.full_id(),
                "type": "geodata",
                "geodata": GEO,
                "style": Self::style_url(def),
                "credits": inline_credits(resource),
            });
        }
        serde_json::json!({
            "id": resource.id.full_id(),
            "type": "geodata-tiles",
            "metaUrl": "{lod}-{x}-{y}.meta",
            "geodataUrl": "{lod}-{x}-{y}.geo",
            "style": Self::style_url(def),
            "displaySize": def.display_size,
            "lodRange": [resource.lod_range.min, resource.lod_range.max],
            "tileRange": [
                [resource.tile_range.ll.0, resource.tile_range.ll.1],
                [resource.tile_range.ur.0, resource.tile_range.ur.1]
            ],
            "credits": inline_credits(resource),
        })
    }

    fn style(&self, def: &GeodataDefinition, info: SinkFileInfo) -> Result<Reply> {
        if def.style_url.is_empty() {
            return Ok(Reply::content(DEFAULT_STYLE.as_bytes().to_vec(), info));
        }
        match def.style_url.strip_prefix(FILE_STYLE_PREFIX) {
            Some(path) => {
                let path = self.core.config().absolute_dataset(path);
                let data = std::fs::read(&path).map_err(|e| {
                    MapproxyError::not_found(format!("Unable to read style {}: {}", path.display(), e))
                })?;
                Ok(Reply::content(data, info))
            }
            None => Ok(Reply::Redirect(def.style_url.clone())),
        }
    }

    fn geo(&self, tile: Option<TileId>, def: GeodataDefinition, info: SinkFileInfo) -> Result<Reply> {
        let Some(tile) = tile else {
            return Ok(Reply::deferred("geodata", move |sink, arsenal| {
                let request = GeodataRequest {
                    definition: &def,
                    tile: None,
                    srs: None,
                    extents: None,
                };
                let data = arsenal.geodata()?.geodata(&request)?;
                sink.check_aborted()?;
                sink.content(data.into(), info);
                Ok(())
            }));
        };

        if !self.core.resource().check_ranges(tile) {
            return Err(MapproxyError::not_found("TileId outside of configured range."));
        }
        let node = self.core.reference_frame().find_subtree(tile);
        if !node.valid() {
            return Err(MapproxyError::not_found(
                "TileId outside of valid reference frame tree.",
            ));
        }

        Ok(Reply::deferred(format!("geodata {}", tile), move |sink, arsenal| {
            let request = GeodataRequest {
                definition: &def,
                tile: Some(tile),
                srs: Some(node.srs()),
                extents: Some(node.extents()),
            };
            let data = arsenal.geodata()?.geodata(&request)?;
            sink.check_aborted()?;
            sink.content(data.into(), info);
            Ok(())
        }))
    }

    fn metatile(&self, tile: TileId, def: GeodataDefinition, info: SinkFileInfo) -> Result<Reply> {
        if !self.tiled {
            return Err(MapproxyError::not_found(
                "Metatiles not supported by non-tiled driver.",
            ));
        }
        let resource = self.core.resource();
        if tile.lod > resource.lod_range.max {
            return Err(MapproxyError::not_found("TileId outside of configured range."));
        }

        let rf = self.core.reference_frame();
        let order = rf.meta_binary_order();
        let blocks = metatile_blocks(rf, tile, order, &resource.tile_range_at(tile.lod), InvalidNodes::Skip)?;
        if blocks.is_empty() {
            return Err(MapproxyError::not_found(
                "Metatile completely outside of configured range.",
            ));
        }
        let index = Arc::clone(self.index()?);

        Ok(Reply::deferred(format!("geodata metatile {}", tile), move |sink, arsenal| {
            let mut nodes = Vec::new();
            for block in blocks.iter().filter(|block| block.valid()) {
                sink.check_aborted()?;

                for (x, y) in block.view.tiles() {
                    let id = TileId::new(tile.lod, x, y);
                    if !index.real(id) {
                        nodes.push(serde_json::json!({ "id": id, "geometry": false }));
                        continue;
                    }

                    let extents = block.tile_extents(x, y);
                    let request = RasterRequest::new(
                        &def.dem.dataset,
                        &block.srs,
                        extents,
                        (META_SAMPLES_PER_TILE, META_SAMPLES_PER_TILE),
                    );
                    let height_range = arsenal.warper.height_range(&request)?;
                    nodes.push(serde_json::json!({
                        "id": id,
                        "geometry": height_range.is_some(),
                        "displaySize": def.display_size,
                        "heightRange": height_range,
                    }));
                }
            }

            let metatile = serde_json::json!({
                "origin": tile,
                "binaryOrder": order,
                "nodes": nodes,
            });
            sink.check_aborted()?;
            sink.content(serde_json::to_vec(&metatile)?.into(), info);
            Ok(())
        }))
    }
}

fn definition(resource: &Resource) -> Result<GeodataDefinition> {
    match &resource.definition {
        Definition::GeodataVector(def) => Ok(def.clone()),
        _ => Err(MapproxyError::format(format!(
            "Resource <{}> has no geodata definition.",
            resource.id
        ))),
    }
}

impl Generator for GeodataVector {
    fn core(&self) -> &GeneratorCore {
        &self.core
    }

    fn prepare_impl(&self, arsenal: &Arsenal) -> Result<()> {
        let resource = self.core.resource();
        let def = definition(&resource)?;

        let dataset = self.core.config().absolute_dataset(&def.dataset);
        std::fs::metadata(&dataset).map_err(|e| {
            MapproxyError::from(crate::error::DatasetError::new(dataset.clone(), e.to_string()))
        })?;
        arsenal.warper.check(&def.dem.dataset)?;

        if self.tiled {
            let index = build_tile_index(self.core.reference_frame(), &resource)?;
            index.save(&self.core.store_path(TILESET_INDEX))?;
            let _ = self.index.set(Arc::new(index));
        }
        Ok(())
    }

    fn map_config(&self) -> Result<MapConfig> {
        let resource = self.core.resource();
        let def = definition(&resource)?;

        let mut config = MapConfig::new(&resource, self.core.reference_frame())
            .with_free_layer(resource.id.full_id(), FREE_LAYER);
        if let Some(surface) = &def.introspection.surface {
            config.view.surfaces.insert(surface.clone(), Vec::new());
        }
        config.browser_options = def.introspection.browser_options.clone();
        Ok(config)
    }

    fn generate_file(&self, fi: &FileInfo) -> Result<Reply> {
        let resource = self.core.resource();
        let def = definition(&resource)?;
        let file = GeodataFile::classify(fi, self.tiled, &self.core.config().extra);
        let Some(info) = file.sink_file_info(def.format.content_type()) else {
            return Err(MapproxyError::not_found("Unrecognized filename."));
        };
        let info = self.core.file_info(info);

        match file {
            GeodataFile::Geo(tile) => self.geo(tile, def, info),
            GeodataFile::Metatile(tile) => self.metatile(tile, def, info),
            GeodataFile::Config => Reply::json(&self.map_config()?, info),
            GeodataFile::Definition => Reply::json(&self.free_layer(&resource, &def), info),
            GeodataFile::Style => self.style(&def, info),
            GeodataFile::Support(support) => Ok(Reply::support(support)),
            GeodataFile::DataFile(file) => Reply::data_file(&file),
            GeodataFile::Unknown => Err(MapproxyError::not_found("Unrecognized filename.")),
        }
    }
}
