//! TMS bound layer warped from a raster dataset (`tms-raster`).
//!
//! Preparation opens the dataset, loads the optional mask tree and records
//! whether the layer needs metatiles. A layer needs them when parts of it are
//! missing: either a mask tree carves holes into it or the dataset itself has
//! nodata.

use std::sync::{Arc, OnceLock};

use image::{DynamicImage, GrayImage, Luma};
use serde::{Deserialize, Serialize};

use super::tile_index::{MetaFlags, META2D_BINARY_ORDER};
use super::{encode_image, inline_credits, Generator, GeneratorCore, GeneratorParams, MapConfig, Reply};
use crate::arsenal::Arsenal;
use crate::coverage::{generate_coverage, CoverageType};
use crate::dataset::{DatasetInfo, RasterRequest};
use crate::error::{MapproxyError, Result};
use crate::mask_tree::{MaskTree, Quad};
use crate::metatile::{metatile_blocks, InvalidNodes};
use crate::path::file_kind::{TmsFile, BOUND_LAYER};
use crate::path::FileInfo;
use crate::reference_frame::{NodeInfo, ReferenceFrame};
use crate::resource::{Definition, RasterFormat, Resampling, Resource, TmsRasterDefinition};
use crate::sink::SinkFileInfo;
use crate::tile::TileId;

/// Tile size in pixels.
const TILE_SIZE: u32 = 256;

/// Samples per axis when probing the dataset for nodata.
const SAMPLE_SIZE: u32 = 64;

const TILESET_CONFIG: &str = "tileset.conf";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RasterTileset {
    has_metatiles: bool,
    srs: String,
}

#[derive(Debug)]
struct Prepared {
    mask_tree: Option<Arc<MaskTree>>,
    has_metatiles: bool,
}

pub struct TmsRaster {
    core: GeneratorCore,
    prepared: OnceLock<Prepared>,
}

impl TmsRaster {
    pub fn new(params: GeneratorParams) -> Result<Self> {
        definition(&params.resource)?;
        let generator = Self {
            core: GeneratorCore::new(params),
            prepared: OnceLock::new(),
        };

        generator.core.try_fast_path(|| {
            let tileset: RasterTileset = generator.core.load_json(TILESET_CONFIG)?;
            let mask_tree = generator.load_mask_tree(&definition(&generator.core.resource())?)?;
            let _ = generator.prepared.set(Prepared {
                mask_tree,
                has_metatiles: tileset.has_metatiles,
            });
            Ok(())
        });
        Ok(generator)
    }

    fn load_mask_tree(&self, def: &TmsRasterDefinition) -> Result<Option<Arc<MaskTree>>> {
        let Some(mask) = def.mask.as_deref() else {
            return Ok(None);
        };
        let path = self.core.config().absolute_dataset(mask);
        let tree = MaskTree::load(&path)?;
        tracing::debug!(path = %path.display(), depth = tree.depth(), "Loaded mask tree");
        Ok(Some(Arc::new(tree)))
    }

    fn prepared(&self) -> Result<&Prepared> {
        self.prepared
            .get()
            .ok_or_else(|| MapproxyError::unavailable(format!("Resource <{}> not ready.", self.core.id())))
    }

    fn bound_layer(&self, resource: &Resource, def: &TmsRasterDefinition) -> Result<serde_json::Value> {
        let prepared = self.prepared()?;
        let ext = def.effective_format().extension();

        let mut layer = serde_json::json!({
            "id": resource.id.full_id(),
            "type": "raster",
            "url": format!("{{lod}}-{{x}}-{{y}}.{}", ext),
            "maskUrl": "{lod}-{x}-{y}.mask",
            "lodRange": [resource.lod_range.min, resource.lod_range.max],
            "tileRange": [
                [resource.tile_range.ll.0, resource.tile_range.ll.1],
                [resource.tile_range.ur.0, resource.tile_range.ur.1]
            ],
            "credits": inline_credits(resource),
            "isTransparent": def.transparent,
        });
        if prepared.has_metatiles {
            layer["metaUrl"] = serde_json::Value::String("{lod}-{x}-{y}.meta".to_string());
        }
        Ok(layer)
    }

    fn check_node(rf: &ReferenceFrame, tile: TileId) -> Result<NodeInfo> {
        let node = rf.find_subtree(tile);
        if !node.valid() {
            return Err(MapproxyError::not_found(
                "TileId outside of valid reference frame tree.",
            ));
        }
        Ok(node)
    }

    fn image(&self, tile: TileId, format: RasterFormat, info: SinkFileInfo) -> Result<Reply> {
        let def = definition(&self.core.resource())?;
        let effective = def.effective_format();
        if format != effective {
            return Err(MapproxyError::not_found(format!(
                "Format <{}> is not supported by this resource ({}).",
                format, effective
            )));
        }

        let rf = Arc::clone(self.core.reference_frame());
        let mask_tree = self.prepared()?.mask_tree.clone();
        let resampling = def.resampling.unwrap_or(Resampling::Bilinear);

        Ok(Reply::deferred(format!("tms image {}", tile), move |sink, arsenal| {
            sink.check_aborted()?;
            let node = Self::check_node(&rf, tile)?;

            let request = RasterRequest::new(&def.dataset, node.srs(), node.extents(), (TILE_SIZE, TILE_SIZE))
                .with_resampling(resampling);
            let mut image = arsenal.warper.image(&request)?;
            sink.check_aborted()?;

            if mask_tree.is_some() || node.partial() {
                let coverage = generate_coverage(TILE_SIZE, &node, mask_tree.as_deref(), CoverageType::Pixel);
                for (x, y, pixel) in image.enumerate_pixels_mut() {
                    if !coverage.get(x, y) {
                        pixel[3] = 0;
                    }
                }
            }

            let data = encode_image(DynamicImage::ImageRgba8(image), format)?;
            sink.content(data, info);
            Ok(())
        }))
    }

    fn mask(&self, tile: TileId, info: SinkFileInfo) -> Result<Reply> {
        let def = definition(&self.core.resource())?;
        let rf = Arc::clone(self.core.reference_frame());
        let mask_tree = self.prepared()?.mask_tree.clone();

        Ok(Reply::deferred(format!("tms mask {}", tile), move |sink, arsenal| {
            sink.check_aborted()?;
            let node = Self::check_node(&rf, tile)?;

            let coverage = match mask_tree.as_deref() {
                Some(tree) => generate_coverage(TILE_SIZE, &node, Some(tree), CoverageType::Pixel),
                None => {
                    let request = RasterRequest::new(&def.dataset, node.srs(), node.extents(), (TILE_SIZE, TILE_SIZE));
                    let mut mask = arsenal.warper.mask(&request)?;
                    let base = generate_coverage(TILE_SIZE, &node, None, CoverageType::Pixel);
                    for y in 0..TILE_SIZE {
                        for x in 0..TILE_SIZE {
                            if !base.get(x, y) {
                                mask.set(x, y, false);
                            }
                        }
                    }
                    mask
                }
            };
            sink.check_aborted()?;

            let data = encode_image(DynamicImage::ImageLuma8(coverage.to_gray_image()), RasterFormat::Png)?;
            sink.content(data, info);
            Ok(())
        }))
    }

    fn metatile(&self, tile: TileId, info: SinkFileInfo) -> Result<Reply> {
        let resource = self.core.resource();
        let def = definition(&resource)?;
        let prepared = self.prepared()?;
        if !prepared.has_metatiles {
            return Err(MapproxyError::not_found("This dataset doesn't provide metatiles."));
        }
        if !resource.lod_range.contains(tile.lod) {
            return Err(MapproxyError::not_found("TileId outside of configured range."));
        }

        let blocks = metatile_blocks(
            self.core.reference_frame(),
            tile,
            META2D_BINARY_ORDER,
            &resource.tile_range_at(tile.lod),
            InvalidNodes::Skip,
        )?;
        if blocks.is_empty() {
            return Err(MapproxyError::not_found(
                "Metatile completely outside of configured range.",
            ));
        }
        let mask_tree = prepared.mask_tree.clone();

        Ok(Reply::deferred(format!("tms metatile {}", tile), move |sink, arsenal| {
            let size = 1u32 << META2D_BINARY_ORDER;
            let mut metatile = GrayImage::from_pixel(size, size, Luma([MetaFlags::UNAVAILABLE]));

            for block in &blocks {
                sink.check_aborted()?;
                if !block.valid() {
                    continue;
                }
                let view = block.view;

                match mask_tree.as_deref() {
                    // detailed mask: full cells are watertight
                    Some(tree) => {
                        for (x, y) in view.tiles() {
                            let flags = match tree.classify(TileId::new(tile.lod, x, y)) {
                                Quad::In => MetaFlags::WATERTIGHT,
                                Quad::Mixed => MetaFlags::AVAILABLE,
                                Quad::Out => MetaFlags::UNAVAILABLE,
                            };
                            metatile.put_pixel(x - tile.x, y - tile.y, Luma([flags]));
                        }
                    }
                    None => {
                        let (w, h) = (view.width() as u32, view.height() as u32);
                        let request = RasterRequest::new(&def.dataset, &block.srs, block.extents, (w, h));
                        let detail = arsenal.warper.detail_mask(&request)?;
                        for (i, j, value) in detail.enumerate_pixels() {
                            if value[0] > 0 {
                                metatile.put_pixel(
                                    view.ll.0 - tile.x + i,
                                    view.ll.1 - tile.y + j,
                                    Luma([MetaFlags::AVAILABLE]),
                                );
                            }
                        }
                    }
                }
            }

            let data = encode_image(DynamicImage::ImageLuma8(metatile), RasterFormat::Png)?;
            sink.content(data, info);
            Ok(())
        }))
    }
}

fn definition(resource: &Resource) -> Result<TmsRasterDefinition> {
    match &resource.definition {
        Definition::TmsRaster(def) => Ok(def.clone()),
        _ => Err(MapproxyError::format(format!(
            "Resource <{}> has no tms-raster definition.",
            resource.id
        ))),
    }
}

/// Returns true if the dataset has data everywhere within its extents.
fn dataset_complete(arsenal: &Arsenal, def: &TmsRasterDefinition, info: &DatasetInfo) -> Result<bool> {
    let request = RasterRequest::new(&def.dataset, &info.srs, info.extents, (SAMPLE_SIZE, SAMPLE_SIZE));
    let detail = arsenal.warper.detail_mask(&request)?;
    Ok(detail.pixels().all(|p| p[0] == u8::MAX))
}

impl Generator for TmsRaster {
    fn core(&self) -> &GeneratorCore {
        &self.core
    }

    fn prepare_impl(&self, arsenal: &Arsenal) -> Result<()> {
        let def = definition(&self.core.resource())?;
        let info = arsenal.warper.check(&def.dataset)?;
        let mask_tree = self.load_mask_tree(&def)?;

        let has_metatiles = mask_tree.is_some() || !dataset_complete(arsenal, &def, &info)?;
        tracing::debug!(resource = %self.core.id(), srs = %info.srs, has_metatiles, "Sampled raster dataset");

        self.core.save_json(
            TILESET_CONFIG,
            &RasterTileset {
                has_metatiles,
                srs: info.srs,
            },
        )?;
        let _ = self.prepared.set(Prepared {
            mask_tree,
            has_metatiles,
        });
        Ok(())
    }

    fn map_config(&self) -> Result<MapConfig> {
        let resource = self.core.resource();
        Ok(MapConfig::new(&resource, self.core.reference_frame())
            .with_bound_layer(resource.id.full_id(), BOUND_LAYER))
    }

    fn generate_file(&self, fi: &FileInfo) -> Result<Reply> {
        let file = TmsFile::classify(fi);
        let resource = self.core.resource();

        match &file {
            TmsFile::Image { tile, .. } | TmsFile::Mask(tile) if !resource.check_ranges(*tile) => {
                return Err(MapproxyError::not_found("TileId outside of configured range."));
            }
            _ => {}
        }

        let Some(info) = file.sink_file_info() else {
            return Err(MapproxyError::not_found("Unrecognized filename."));
        };
        let info = self.core.file_info(info);

        match file {
            TmsFile::Config => Reply::json(&self.map_config()?, info),
            TmsFile::Definition => {
                Reply::json(&self.bound_layer(&resource, &definition(&resource)?)?, info)
            }
            TmsFile::Support(support) => Ok(Reply::support(support)),
            TmsFile::Image { tile, format } => self.image(tile, format, info),
            TmsFile::Mask(tile) => self.mask(tile, info),
            TmsFile::Metatile(tile) => self.metatile(tile, info),
            TmsFile::Unknown => Err(MapproxyError::not_found("Unrecognized filename.")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arsenal::tests::test_arsenal;
    use crate::dataset::tests::write_half_dataset;
    use crate::generator::tests::{test_file_info, test_params};
    use crate::resource::tests::tms_resource;
    use crate::sink::BufferSink;
    use std::path::Path;

    fn file_info(filename: &str) -> FileInfo {
        test_file_info(&format!("/rf1/tms/grp/layer1/{}", filename))
    }

    fn prepared(dir: &Path, resource: Resource) -> (TmsRaster, Arsenal) {
        write_half_dataset(dir, "ortho.png", "local", 64);
        let arsenal = test_arsenal(dir);
        let generator = TmsRaster::new(test_params(dir, resource)).unwrap();
        generator.prepare(&arsenal).unwrap();
        (generator, arsenal)
    }

    fn run(reply: Reply, arsenal: &Arsenal) -> std::result::Result<(bytes::Bytes, SinkFileInfo), MapproxyError> {
        match reply {
            Reply::Deferred(task) => {
                let mut sink = BufferSink::default();
                arsenal.execute(task, &mut sink);
                sink.output.unwrap()
            }
            Reply::Content { data, info } => Ok((data, info)),
            Reply::Redirect(location) => panic!("unexpected redirect to {}", location),
        }
    }

    #[test]
    fn test_prepare_detects_nodata() {
        let dir = tempfile::TempDir::new().unwrap();
        let (generator, _) = prepared(dir.path(), tms_resource("ortho.png"));
        assert!(generator.core().is_ready());
        assert!(generator.prepared().unwrap().has_metatiles);

        let layer = generator
            .bound_layer(&generator.core.resource(), &definition(&generator.core.resource()).unwrap())
            .unwrap();
        assert_eq!(layer["metaUrl"], "{lod}-{x}-{y}.meta");
        assert_eq!(layer["url"], "{lod}-{x}-{y}.jpg");
    }

    #[test]
    fn test_prepare_fails_without_dataset() {
        let dir = tempfile::TempDir::new().unwrap();
        let arsenal = test_arsenal(dir.path());
        let generator = TmsRaster::new(test_params(dir.path(), tms_resource("missing.png"))).unwrap();
        assert!(matches!(generator.prepare(&arsenal), Err(MapproxyError::Dataset(_))));
        assert!(!generator.core().is_ready());
    }

    #[test]
    fn test_fast_path_on_restart() {
        let dir = tempfile::TempDir::new().unwrap();
        prepared(dir.path(), tms_resource("ortho.png"));

        let restarted = TmsRaster::new(test_params(dir.path(), tms_resource("ortho.png"))).unwrap();
        assert!(restarted.core().is_ready());
        assert!(restarted.prepared().unwrap().has_metatiles);
    }

    #[test]
    fn test_image_checks() {
        let dir = tempfile::TempDir::new().unwrap();
        let (generator, _) = prepared(dir.path(), tms_resource("ortho.png"));

        let err = generator.generate_file(&file_info("5-3-2.png")).unwrap_err();
        assert!(err.to_string().contains("Format <png> is not supported"));

        let err = generator.generate_file(&file_info("1-0-0.jpg")).unwrap_err();
        assert!(err.to_string().contains("outside of configured range"));

        let err = generator.generate_file(&file_info("what.txt")).unwrap_err();
        assert!(matches!(err, MapproxyError::NotFound(_)));
    }

    #[test]
    fn test_image_is_jpeg() {
        let dir = tempfile::TempDir::new().unwrap();
        let (generator, arsenal) = prepared(dir.path(), tms_resource("ortho.png"));

        let reply = generator.generate_file(&file_info("2-0-0.jpg")).unwrap();
        assert!(matches!(reply, Reply::Deferred(_)));
        let (data, info) = run(reply, &arsenal).unwrap();
        assert_eq!(&data[..2], &[0xff, 0xd8]);
        assert_eq!(info.content_type, "image/jpeg");
    }

    #[test]
    fn test_mask_follows_dataset() {
        let dir = tempfile::TempDir::new().unwrap();
        let (generator, arsenal) = prepared(dir.path(), tms_resource("ortho.png"));

        // tile 2-0-0 covers the left quarter, all of it has data
        let (data, _) = run(generator.generate_file(&file_info("2-0-0.mask")).unwrap(), &arsenal).unwrap();
        let mask = image::load_from_memory(&data).unwrap().to_luma8();
        assert!(mask.pixels().all(|p| p[0] == 255));

        // tile 2-3-0 covers the right quarter, none of it has data
        let (data, _) = run(generator.generate_file(&file_info("2-3-0.mask")).unwrap(), &arsenal).unwrap();
        let mask = image::load_from_memory(&data).unwrap().to_luma8();
        assert!(mask.pixels().all(|p| p[0] == 0));
    }

    #[test]
    fn test_metatile_from_dataset() {
        let dir = tempfile::TempDir::new().unwrap();
        let (generator, arsenal) = prepared(dir.path(), tms_resource("ortho.png"));

        let (data, info) = run(generator.generate_file(&file_info("2-0-0.meta")).unwrap(), &arsenal).unwrap();
        assert_eq!(info.content_type, "image/png");
        let meta = image::load_from_memory(&data).unwrap().to_luma8();
        assert_eq!(meta.dimensions(), (256, 256));
        assert_eq!(meta.get_pixel(0, 0)[0], MetaFlags::AVAILABLE);
        assert_eq!(meta.get_pixel(1, 3)[0], MetaFlags::AVAILABLE);
        assert_eq!(meta.get_pixel(3, 0)[0], MetaFlags::UNAVAILABLE);
        assert_eq!(meta.get_pixel(4, 0)[0], MetaFlags::UNAVAILABLE);
    }

    #[test]
    fn test_metatile_from_mask_tree() {
        let dir = tempfile::TempDir::new().unwrap();
        // tree at depth 2 keeping only tile (0, 0)
        MaskTree::from_tiles(2, [(0, 0)]).save(&dir.path().join("ortho.mask")).unwrap();

        let mut resource = tms_resource("ortho.png");
        if let Definition::TmsRaster(def) = &mut resource.definition {
            def.mask = Some("ortho.mask".to_string());
        }
        let (generator, arsenal) = prepared(dir.path(), resource);

        let (data, _) = run(generator.generate_file(&file_info("2-0-0.meta")).unwrap(), &arsenal).unwrap();
        let meta = image::load_from_memory(&data).unwrap().to_luma8();
        assert_eq!(meta.get_pixel(0, 0)[0], MetaFlags::WATERTIGHT);
        assert_eq!(meta.get_pixel(1, 0)[0], MetaFlags::UNAVAILABLE);
    }

    #[test]
    fn test_metatile_over_dead_region_is_empty() {
        use crate::reference_frame::RfNode;
        use crate::tile::Extents2;

        let dir = tempfile::TempDir::new().unwrap();
        write_half_dataset(dir.path(), "ortho.png", "local", 64);
        let arsenal = test_arsenal(dir.path());

        // only the left quarter of the frame is valid
        let clipped = ReferenceFrame::new(
            "rf1",
            5,
            vec![RfNode::bisection(TileId::new(0, 0, 0), "local", Extents2::new(0.0, 0.0, 1.0, 1.0))
                .with_valid_extents(Extents2::new(0.0, 0.0, 0.25, 1.0))],
        )
        .unwrap();
        let mut params = test_params(dir.path(), tms_resource("ortho.png"));
        params.reference_frame = Arc::new(clipped);
        let generator = TmsRaster::new(params).unwrap();
        generator.prepare(&arsenal).unwrap();

        let (data, _) = run(generator.generate_file(&file_info("10-768-0.meta")).unwrap(), &arsenal).unwrap();
        let meta = image::load_from_memory(&data).unwrap().to_luma8();
        assert_eq!(meta.dimensions(), (256, 256));
        assert!(meta.pixels().all(|p| p[0] == MetaFlags::UNAVAILABLE));
    }

    #[test]
    fn test_metatile_misaligned() {
        let dir = tempfile::TempDir::new().unwrap();
        let (generator, _) = prepared(dir.path(), tms_resource("ortho.png"));
        let err = generator.generate_file(&file_info("2-1-0.meta")).unwrap_err();
        assert!(matches!(err, MapproxyError::NotFound(_)));
    }

    #[test]
    fn test_config_and_definition() {
        let dir = tempfile::TempDir::new().unwrap();
        let (generator, _) = prepared(dir.path(), tms_resource("ortho.png"));

        let (data, _) = run(generator.generate_file(&file_info("mapConfig.json")).unwrap(), &test_arsenal(dir.path())).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&data).unwrap();
        assert_eq!(value["boundLayers"]["grp-layer1"], "boundlayer.json");

        match generator.generate_file(&file_info("boundlayer.json")).unwrap() {
            Reply::Content { data, info } => {
                let value: serde_json::Value = serde_json::from_slice(&data).unwrap();
                assert_eq!(value["id"], "grp-layer1");
                assert_eq!(value["lodRange"], serde_json::json!([2, 10]));
                assert!(info.last_modified.is_some());
            }
            other => panic!("unexpected reply {:?}", other),
        }
    }
}
