//! Terrain surface derived from a DEM (`surface-dem`).
//!
//! Preparation walks every LOD up to the resource's maximum as one huge
//! metatile and records per-block flags in a [`TileIndex`]: metatiles exist
//! everywhere, meshes and navtiles only in valid blocks inside the resource
//! ranges. The index and a small tileset config are persisted; a restart with
//! an unchanged resource serves straight from them.

use std::collections::BTreeSet;
use std::sync::{Arc, OnceLock};

use image::DynamicImage;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::tile_index::{TileFlags, TileIndex, META2D_BINARY_ORDER};
use super::{encode_image, inline_credits, Generator, GeneratorCore, GeneratorParams, MapConfig, Reply};
use crate::arsenal::{Arsenal, TerrainRequest};
use crate::coverage::{generate_coverage, CoverageType};
use crate::dataset::RasterRequest;
use crate::error::{MapproxyError, Result};
use crate::mask_tree::MaskTree;
use crate::metatile::{metatile_blocks, InvalidNodes};
use crate::path::file_kind::{
    FileFlavor, SurfaceFile, TileFileKind, FREE_LAYER, TILESET_CONFIG, TILESET_INDEX,
};
use crate::path::FileInfo;
use crate::reference_frame::{NodeInfo, ReferenceFrame};
use crate::resource::{Definition, RasterFormat, Resource, SurfaceDemDefinition};
use crate::sink::SinkFileInfo;
use crate::tile::{LodRange, TileId, TileRange};

/// Height samples per tile edge in metatiles. Changing it changes served data.
const META_SAMPLES_PER_TILE: u32 = 8;

/// Grid cells per tile edge handed to the terrain sampler.
const TERRAIN_GRID_SIZE: u32 = 32;

const MASK_SIZE: u32 = 256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SurfaceTileset {
    id: String,
    reference_frame: String,
    revision: u32,
    lod_range: LodRange,
    tile_range: TileRange,
    credits: BTreeSet<String>,
    bound_layers: Vec<u32>,
}

impl SurfaceTileset {
    fn new(resource: &Resource, def: &SurfaceDemDefinition) -> Self {
        Self {
            id: resource.id.full_id(),
            reference_frame: resource.id.reference_frame.clone(),
            revision: resource.revision,
            lod_range: resource.lod_range,
            tile_range: resource.tile_range,
            credits: resource.credits.clone(),
            bound_layers: def.texture_layer_id.into_iter().collect(),
        }
    }
}

#[derive(Debug)]
struct Prepared {
    index: Arc<TileIndex>,
    mask_tree: Option<Arc<MaskTree>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MetaNode {
    id: TileId,
    geometry: bool,
    navtile: bool,
    watertight: bool,
    height_range: Option<(f64, f64)>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Metatile {
    origin: TileId,
    binary_order: u8,
    nodes: Vec<MetaNode>,
}

pub struct SurfaceDem {
    core: GeneratorCore,
    prepared: OnceLock<Prepared>,
}

impl SurfaceDem {
    pub fn new(params: GeneratorParams) -> Result<Self> {
        definition(&params.resource)?;
        let generator = Self {
            core: GeneratorCore::new(params),
            prepared: OnceLock::new(),
        };

        generator.core.try_fast_path(|| {
            let _: SurfaceTileset = generator.core.load_json(TILESET_CONFIG)?;
            let index = TileIndex::load(&generator.core.store_path(TILESET_INDEX))?;
            let mask_tree = generator.load_mask_tree(&definition(&generator.core.resource())?)?;
            let _ = generator.prepared.set(Prepared {
                index: Arc::new(index),
                mask_tree,
            });
            Ok(())
        });
        Ok(generator)
    }

    fn load_mask_tree(&self, def: &SurfaceDemDefinition) -> Result<Option<Arc<MaskTree>>> {
        def.mask
            .as_deref()
            .map(|mask| Ok(Arc::new(MaskTree::load(&self.core.config().absolute_dataset(mask))?)))
            .transpose()
    }

    fn prepared(&self) -> Result<&Prepared> {
        self.prepared
            .get()
            .ok_or_else(|| MapproxyError::unavailable(format!("Resource <{}> not ready.", self.core.id())))
    }

    fn surface_entry(resource: &Resource, def: &SurfaceDemDefinition) -> Value {
        let mut surface = serde_json::json!({
            "id": resource.id.full_id(),
            "revision": resource.revision,
            "lodRange": [resource.lod_range.min, resource.lod_range.max],
            "tileRange": [
                [resource.tile_range.ll.0, resource.tile_range.ll.1],
                [resource.tile_range.ur.0, resource.tile_range.ur.1]
            ],
            "metaUrl": "{lod}-{x}-{y}.meta",
            "meshUrl": "{lod}-{x}-{y}.bin",
            "maskUrl": "{lod}-{x}-{y}.mask",
            "navUrl": "{lod}-{x}-{y}.nav",
            "credits": resource.credits.iter().collect::<Vec<_>>(),
        });
        if let Some(layer) = def.texture_layer_id {
            surface["textureLayer"] = Value::from(layer);
        }
        surface
    }

    /// Camera looking straight down at the whole frame.
    fn default_position(rf: &ReferenceFrame) -> Value {
        let extents = rf.find_subtree(TileId::new(0, 0, 0)).extents();
        let (cx, cy) = extents.center();
        serde_json::json!(["obj", cx, cy, "fix", 0.0, 0.0, -90.0, 0.0, extents.height(), 90.0])
    }

    fn free_layer(resource: &Resource) -> Value {
        serde_json::json!({
            "id": resource.id.full_id(),
            "type": "mesh-tiled",
            "metaUrl": "{lod}-{x}-{y}.meta",
            "meshUrl": "{lod}-{x}-{y}.bin",
            "lodRange": [resource.lod_range.min, resource.lod_range.max],
            "tileRange": [
                [resource.tile_range.ll.0, resource.tile_range.ll.1],
                [resource.tile_range.ur.0, resource.tile_range.ur.1]
            ],
            "credits": inline_credits(resource),
        })
    }

    fn checked_node(&self, tile: TileId) -> Result<NodeInfo> {
        let node = self.core.reference_frame().find_subtree(tile);
        if !node.valid() {
            return Err(MapproxyError::not_found(
                "TileId outside of valid reference frame tree.",
            ));
        }
        Ok(node)
    }

    fn metatile(&self, tile: TileId, info: SinkFileInfo) -> Result<Reply> {
        let resource = self.core.resource();
        let def = definition(&resource)?;
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
        let index = Arc::clone(&self.prepared()?.index);

        Ok(Reply::deferred(format!("surface metatile {}", tile), move |sink, arsenal| {
            let mut nodes = Vec::new();

            for block in blocks.iter().filter(|block| block.valid()) {
                sink.check_aborted()?;
                tracing::trace!(tile = %tile, ancestor = %block.common_ancestor.node_id(), view = %block.view, "Processing metatile block");

                for (x, y) in block.view.tiles() {
                    let id = TileId::new(tile.lod, x, y);
                    let flags = index.get(id);
                    let geometry = flags & TileFlags::MESH != 0;

                    let height_range = if geometry {
                        let extents = block.tile_extents(x, y);
                        let request = RasterRequest::new(
                            &def.dem.dataset,
                            &block.srs,
                            extents,
                            (META_SAMPLES_PER_TILE, META_SAMPLES_PER_TILE),
                        );
                        arsenal.warper.height_range(&request)?
                    } else {
                        None
                    };

                    nodes.push(MetaNode {
                        id,
                        geometry: geometry && height_range.is_some(),
                        navtile: flags & TileFlags::NAVTILE != 0 && height_range.is_some(),
                        watertight: flags & TileFlags::WATERTIGHT != 0,
                        height_range,
                    });
                }
            }

            let metatile = Metatile {
                origin: tile,
                binary_order: order,
                nodes,
            };
            sink.check_aborted()?;
            sink.content(serde_json::to_vec(&metatile)?.into(), info);
            Ok(())
        }))
    }

    fn terrain(&self, tile: TileId, kind: TileFileKind, flavor: FileFlavor, info: SinkFileInfo) -> Result<Reply> {
        let prepared = self.prepared()?;
        match kind {
            TileFileKind::Navtile if !prepared.index.navtile(tile) => {
                return Err(MapproxyError::not_found("No navtile for this tile."));
            }
            _ if !prepared.index.real(tile) => {
                return Err(MapproxyError::not_found("No mesh for this tile."));
            }
            _ => {}
        }
        let node = self.checked_node(tile)?;
        let def = definition(&self.core.resource())?;
        let mask_tree = prepared.mask_tree.clone();

        Ok(Reply::deferred(format!("surface terrain {}", tile), move |sink, arsenal| {
            let sampler = arsenal.terrain()?;
            let coverage = generate_coverage(TERRAIN_GRID_SIZE, &node, mask_tree.as_deref(), CoverageType::Grid);
            sink.check_aborted()?;

            let request = TerrainRequest {
                dem: &def.dem,
                tile,
                srs: node.srs(),
                extents: node.extents(),
                coverage: &coverage,
                raw: flavor == FileFlavor::Raw,
            };
            let data = match kind {
                TileFileKind::Navtile => sampler.navtile(&request)?,
                _ => sampler.mesh(&request)?,
            };
            sink.check_aborted()?;
            sink.content(data.into(), info);
            Ok(())
        }))
    }

    fn mask(&self, tile: TileId, info: SinkFileInfo) -> Result<Reply> {
        let prepared = self.prepared()?;
        if !prepared.index.real(tile) {
            return Err(MapproxyError::not_found("No mesh for this tile."));
        }
        let node = self.checked_node(tile)?;
        let mask_tree = prepared.mask_tree.clone();

        Ok(Reply::deferred(format!("surface mask {}", tile), move |sink, _| {
            let coverage = generate_coverage(MASK_SIZE, &node, mask_tree.as_deref(), CoverageType::Pixel);
            sink.check_aborted()?;
            let data = encode_image(DynamicImage::ImageLuma8(coverage.to_gray_image()), RasterFormat::Png)?;
            sink.content(data, info);
            Ok(())
        }))
    }

    fn tile_file(&self, tile: TileId, kind: TileFileKind, flavor: FileFlavor, info: SinkFileInfo) -> Result<Reply> {
        match (kind, flavor) {
            (TileFileKind::Meta, FileFlavor::Debug) => {
                let node = self.core.reference_frame().find_subtree(tile);
                let flags = self.prepared()?.index.get(tile);
                Reply::json(
                    &serde_json::json!({
                        "tile": tile,
                        "flags": flags,
                        "srs": node.srs(),
                        "extents": node.extents(),
                        "valid": node.valid(),
                        "partial": node.partial(),
                    }),
                    info,
                )
            }
            (TileFileKind::Meta, _) => self.metatile(tile, info),
            (TileFileKind::Mesh, _) | (TileFileKind::Navtile, _) => self.terrain(tile, kind, flavor, info),
            (TileFileKind::Mask, _) => self.mask(tile, info),
            (TileFileKind::Meta2d, _) => {
                let step = 1u32 << META2D_BINARY_ORDER;
                if tile.x % step != 0 || tile.y % step != 0 {
                    return Err(MapproxyError::not_found(
                        "TileId doesn't point to metatile origin.",
                    ));
                }
                let image = self.prepared()?.index.meta2d(tile);
                let data = encode_image(DynamicImage::ImageLuma8(image), RasterFormat::Png)?;
                Ok(Reply::content(data, info))
            }
            (TileFileKind::Credits, _) => {
                let resource = self.core.resource();
                Reply::json(&serde_json::json!({ "credits": inline_credits(&resource) }), info)
            }
            (TileFileKind::Atlas, _) => Err(MapproxyError::not_found("No internal texture present.")),
            (TileFileKind::Ortho, _) => Err(MapproxyError::not_found("No orthophoto present.")),
        }
    }
}

fn definition(resource: &Resource) -> Result<SurfaceDemDefinition> {
    match &resource.definition {
        Definition::SurfaceDem(def) => Ok(def.clone()),
        _ => Err(MapproxyError::format(format!(
            "Resource <{}> has no surface-dem definition.",
            resource.id
        ))),
    }
}

/// Builds the tile index of all LODs up to `resource.lod_range.max`.
///
/// Every LOD is treated as one metatile covering the whole level.
pub(crate) fn build_tile_index(rf: &ReferenceFrame, resource: &Resource) -> Result<TileIndex> {
    let parts = (0..=resource.lod_range.max)
        .into_par_iter()
        .map(|lod| {
            let mut index = TileIndex::new();
            let in_lods = resource.lod_range.contains(lod);
            let range = resource.tile_range_at(lod);

            for block in metatile_blocks(rf, TileId::lod_origin(lod), lod, &TileRange::full(lod), InvalidNodes::Include)? {
                tracing::debug!(lod, ancestor = %block.common_ancestor.node_id(), view = %block.view, "Indexing block");
                index.set(lod, block.view, TileFlags::META);

                if !(block.valid() && in_lods) {
                    continue;
                }
                let Some(view) = block.view.intersect(&range) else {
                    continue;
                };
                let mut flags = TileFlags::META | TileFlags::MESH | TileFlags::NAVTILE;
                if !block.partial() {
                    flags |= TileFlags::WATERTIGHT;
                }
                index.set(lod, view, flags);
            }
            Ok(index)
        })
        .collect::<Result<Vec<_>>>()?;

    let mut index = TileIndex::new();
    for part in parts {
        index.extend(part);
    }
    Ok(index)
}

impl Generator for SurfaceDem {
    fn core(&self) -> &GeneratorCore {
        &self.core
    }

    fn prepare_impl(&self, arsenal: &Arsenal) -> Result<()> {
        let resource = self.core.resource();
        let def = definition(&resource)?;

        let info = arsenal.warper.check(&def.dem.dataset)?;
        if let Some(grid) = def.dem.geoid_grid.as_deref() {
            std::fs::metadata(self.core.config().absolute_dataset(grid))?;
        }
        let mask_tree = self.load_mask_tree(&def)?;
        tracing::debug!(resource = %resource.id, srs = %info.srs, "Opened DEM");

        let index = build_tile_index(self.core.reference_frame(), &resource)?;
        index.save(&self.core.store_path(TILESET_INDEX))?;
        self.core.save_json(TILESET_CONFIG, &SurfaceTileset::new(&resource, &def))?;

        let _ = self.prepared.set(Prepared {
            index: Arc::new(index),
            mask_tree,
        });
        Ok(())
    }

    fn map_config(&self) -> Result<MapConfig> {
        let resource = self.core.resource();
        let def = definition(&resource)?;
        let rf = self.core.reference_frame();

        let mut config = MapConfig::new(&resource, rf).with_surface(
            Self::surface_entry(&resource, &def),
            resource.id.full_id(),
            def.introspection.tms.clone(),
        );
        config.position = Some(
            def.introspection
                .position
                .clone()
                .unwrap_or_else(|| Self::default_position(rf)),
        );
        Ok(config)
    }

    fn generate_file(&self, fi: &FileInfo) -> Result<Reply> {
        let file = SurfaceFile::classify(fi, &self.core.config().extra);
        let Some(info) = file.sink_file_info() else {
            return Err(MapproxyError::not_found("Unrecognized filename."));
        };
        let info = self.core.file_info(info);

        match file {
            SurfaceFile::Tile { tile, kind, flavor } => self.tile_file(tile, kind, flavor, info),
            SurfaceFile::Config => Reply::json(&self.map_config()?, info),
            SurfaceFile::Definition => Reply::json(&Self::free_layer(&self.core.resource()), info),
            SurfaceFile::RawConfig => Reply::store_file(&self.core, TILESET_CONFIG, info),
            SurfaceFile::TileIndex => Reply::store_file(&self.core, TILESET_INDEX, info),
            SurfaceFile::Registry => {
                let resource = self.core.resource();
                let def = definition(&resource)?;
                Reply::json(
                    &serde_json::json!({
                        "credits": inline_credits(&resource),
                        "boundLayers": def.texture_layer_id.into_iter().collect::<Vec<_>>(),
                    }),
                    info,
                )
            }
            SurfaceFile::DebugConfig => {
                let resource = self.core.resource();
                Reply::json(
                    &serde_json::json!({
                        "meta": "{lod}-{x}-{y}.debug",
                        "mask": "{lod}-{x}-{y}.mask",
                        "lodRange": [0, resource.lod_range.max],
                        "lods": self.prepared()?.index.lods().collect::<Vec<_>>(),
                    }),
                    info,
                )
            }
            SurfaceFile::Support(support) => Ok(Reply::support(support)),
            SurfaceFile::DataFile(file) => Reply::data_file(&file),
            SurfaceFile::Service(service) => Ok(Reply::content(service.generate(&fi.query)?, info)),
            SurfaceFile::Unknown => Err(MapproxyError::not_found("Unrecognized filename.")),
        }
    }
}
