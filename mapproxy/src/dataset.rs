//! Source datasets and the warper that samples them.
//!
//! A dataset is a georeferenced raster opened through a [`DatasetSource`].
//! Opened handles are kept in a [`DatasetCache`] so that requests for the same
//! resource share them; opens of one path are serialized while distinct paths
//! open concurrently.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use image::{GrayImage, Luma, Rgba, RgbaImage};
use parking_lot::Mutex;
use serde::Deserialize;

use crate::coverage::CoverageMask;
use crate::error::{DatasetError, MapproxyError, Result};
use crate::resource::Resampling;
use crate::tile::Extents2;

/// An open georeferenced raster.
pub trait Dataset: Send + Sync + fmt::Debug {
    fn path(&self) -> &Path;

    fn srs(&self) -> &str;

    fn extents(&self) -> Extents2;

    /// Color at a point in the dataset srs; `None` outside or on nodata.
    fn sample(&self, x: f64, y: f64, resampling: Resampling) -> Option<Rgba<u8>>;

    /// Elevation at a point in the dataset srs; `None` outside or on nodata.
    fn height(&self, x: f64, y: f64) -> Option<f64>;
}

/// Opens datasets by path.
pub trait DatasetSource: Send + Sync {
    fn open(&self, path: &Path) -> std::result::Result<Arc<dyn Dataset>, DatasetError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Georeference {
    srs: String,
    extents: Extents2,
    #[serde(default = "default_height_scale")]
    height_scale: f64,
    #[serde(default)]
    height_offset: f64,
}

fn default_height_scale() -> f64 {
    1.0
}

/// Raster image with a JSON georeference sidecar (`<file>.json`).
///
/// ```json
/// {"srs": "pseudomerc", "extents": {"ll": [0, 0], "ur": [100, 100]}}
/// ```
///
/// Fully transparent pixels are nodata. Heights are read from the red
/// channel as `red * heightScale + heightOffset`.
#[derive(Debug)]
pub struct ImageDataset {
    path: PathBuf,
    image: RgbaImage,
    georef: Georeference,
}

impl ImageDataset {
    fn pixel(&self, px: i64, py: i64) -> Option<Rgba<u8>> {
        if px < 0 || py < 0 || px >= i64::from(self.image.width()) || py >= i64::from(self.image.height()) {
            return None;
        }
        let pixel = *self.image.get_pixel(px as u32, py as u32);
        if pixel[3] == 0 {
            None
        } else {
            Some(pixel)
        }
    }

    /// Continuous pixel coordinates of a point (pixel centers at `.5`).
    fn to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        let e = &self.georef.extents;
        (
            (x - e.ll.0) / e.width() * f64::from(self.image.width()),
            (e.ur.1 - y) / e.height() * f64::from(self.image.height()),
        )
    }

    fn nearest(&self, x: f64, y: f64) -> Option<Rgba<u8>> {
        let (px, py) = self.to_pixel(x, y);
        self.pixel(px.floor() as i64, py.floor() as i64)
    }

    fn bilinear(&self, x: f64, y: f64) -> Option<Rgba<u8>> {
        let (px, py) = self.to_pixel(x, y);
        let (fx, fy) = (px - 0.5, py - 0.5);
        let (x0, y0) = (fx.floor() as i64, fy.floor() as i64);
        let (tx, ty) = (fx - fx.floor(), fy - fy.floor());

        let corners = [
            self.pixel(x0, y0),
            self.pixel(x0 + 1, y0),
            self.pixel(x0, y0 + 1),
            self.pixel(x0 + 1, y0 + 1),
        ];
        let [Some(a), Some(b), Some(c), Some(d)] = corners else {
            // at nodata borders fall back to the nearest pixel
            return self.nearest(x, y);
        };

        let mut out = [0u8; 4];
        for (i, channel) in out.iter_mut().enumerate() {
            let top = f64::from(a[i]) * (1.0 - tx) + f64::from(b[i]) * tx;
            let bottom = f64::from(c[i]) * (1.0 - tx) + f64::from(d[i]) * tx;
            *channel = (top * (1.0 - ty) + bottom * ty).round().clamp(0.0, 255.0) as u8;
        }
        Some(Rgba(out))
    }
}

impl Dataset for ImageDataset {
    fn path(&self) -> &Path {
        &self.path
    }

    fn srs(&self) -> &str {
        &self.georef.srs
    }

    fn extents(&self) -> Extents2 {
        self.georef.extents
    }

    fn sample(&self, x: f64, y: f64, resampling: Resampling) -> Option<Rgba<u8>> {
        match resampling {
            Resampling::Nearest => self.nearest(x, y),
            Resampling::Bilinear => self.bilinear(x, y),
        }
    }

    fn height(&self, x: f64, y: f64) -> Option<f64> {
        self.nearest(x, y)
            .map(|p| f64::from(p[0]) * self.georef.height_scale + self.georef.height_offset)
    }
}

/// Opens [`ImageDataset`]s from disk.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageDatasetSource;

impl ImageDatasetSource {
    fn sidecar_path(path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_os_string();
        name.push(".json");
        PathBuf::from(name)
    }
}

impl DatasetSource for ImageDatasetSource {
    fn open(&self, path: &Path) -> std::result::Result<Arc<dyn Dataset>, DatasetError> {
        let sidecar = Self::sidecar_path(path);
        let georef_data = std::fs::read_to_string(&sidecar).map_err(|e| {
            DatasetError::new(path, format!("cannot read georeference {}: {}", sidecar.display(), e))
        })?;
        let georef: Georeference = serde_json::from_str(&georef_data)
            .map_err(|e| DatasetError::new(path, format!("invalid georeference: {}", e)))?;

        if georef.extents.width() <= 0.0 || georef.extents.height() <= 0.0 {
            return Err(DatasetError::new(path, "georeference has empty extents"));
        }

        let image = image::open(path)
            .map_err(|e| DatasetError::new(path, e.to_string()))?
            .to_rgba8();

        tracing::debug!(
            path = %path.display(),
            srs = %georef.srs,
            width = image.width(),
            height = image.height(),
            "Opened dataset"
        );

        Ok(Arc::new(ImageDataset {
            path: path.to_path_buf(),
            image,
            georef,
        }))
    }
}

type Slot = Arc<Mutex<Option<Arc<dyn Dataset>>>>;

/// Shared cache of open datasets keyed by path.
pub struct DatasetCache {
    source: Arc<dyn DatasetSource>,
    slots: DashMap<PathBuf, Slot>,
}

impl DatasetCache {
    pub fn new(source: Arc<dyn DatasetSource>) -> Self {
        Self {
            source,
            slots: DashMap::new(),
        }
    }

    /// Returns the cached handle, opening the dataset on first use.
    ///
    /// Failed opens are not cached.
    pub fn open(&self, path: &Path) -> Result<Arc<dyn Dataset>> {
        // clone the slot out so the map shard is not held during the open
        let slot: Slot = self.slots.entry(path.to_path_buf()).or_default().clone();

        let mut guard = slot.lock();
        if let Some(dataset) = guard.as_ref() {
            return Ok(Arc::clone(dataset));
        }
        let dataset = self.source.open(path)?;
        *guard = Some(Arc::clone(&dataset));
        Ok(dataset)
    }

    /// Drops a cached handle so the next open rereads the file.
    pub fn evict(&self, path: &Path) {
        self.slots.remove(path);
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl fmt::Debug for DatasetCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatasetCache")
            .field("slots", &self.slots.len())
            .finish()
    }
}

/// Raster request in a target srs.
#[derive(Debug, Clone)]
pub struct RasterRequest<'a> {
    /// Dataset path, relative to the warper's resource root.
    pub dataset: &'a str,
    pub srs: &'a str,
    pub extents: Extents2,
    pub size: (u32, u32),
    pub resampling: Resampling,
}

impl<'a> RasterRequest<'a> {
    pub fn new(dataset: &'a str, srs: &'a str, extents: Extents2, size: (u32, u32)) -> Self {
        Self {
            dataset,
            srs,
            extents,
            size,
            resampling: Resampling::Nearest,
        }
    }

    pub fn with_resampling(mut self, resampling: Resampling) -> Self {
        self.resampling = resampling;
        self
    }

    /// Center of sample `(i, j)`; rows grow downward.
    fn sample_point(&self, i: f64, j: f64) -> (f64, f64) {
        let e = &self.extents;
        (
            e.ll.0 + i * e.width() / f64::from(self.size.0.max(1)),
            e.ur.1 - j * e.height() / f64::from(self.size.1.max(1)),
        )
    }
}

/// Basic facts about a dataset, checked during preparation.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetInfo {
    pub srs: String,
    pub extents: Extents2,
}

/// Raster operations on source datasets.
pub trait Warper: Send + Sync {
    /// Opens the dataset and reports its georeference.
    fn check(&self, dataset: &str) -> Result<DatasetInfo>;

    /// Color image; nodata samples are transparent.
    fn image(&self, request: &RasterRequest<'_>) -> Result<RgbaImage>;

    /// Per-sample data presence.
    fn mask(&self, request: &RasterRequest<'_>) -> Result<CoverageMask>;

    /// Per-cell coverage fraction, 0 (no data) to 255 (fully covered).
    fn detail_mask(&self, request: &RasterRequest<'_>) -> Result<GrayImage>;

    /// Min and max elevation over the request, `None` when nothing is covered.
    fn height_range(&self, request: &RasterRequest<'_>) -> Result<Option<(f64, f64)>>;
}

/// Sub-samples per cell axis used by [`Warper::detail_mask`].
const DETAIL_SAMPLES: u32 = 4;

/// [`Warper`] over cached datasets in their own srs.
#[derive(Debug)]
pub struct DatasetWarper {
    cache: DatasetCache,
    root: PathBuf,
}

impl DatasetWarper {
    pub fn new(source: Arc<dyn DatasetSource>, root: impl Into<PathBuf>) -> Self {
        Self {
            cache: DatasetCache::new(source),
            root: root.into(),
        }
    }

    pub fn cache(&self) -> &DatasetCache {
        &self.cache
    }

    fn open(&self, request: &RasterRequest<'_>) -> Result<Arc<dyn Dataset>> {
        let dataset = self.cache.open(&self.root.join(request.dataset))?;
        if dataset.srs() != request.srs {
            return Err(DatasetError::new(
                dataset.path(),
                format!(
                    "cannot warp from <{}> to <{}>",
                    dataset.srs(),
                    request.srs
                ),
            )
            .into());
        }
        Ok(dataset)
    }
}

impl Warper for DatasetWarper {
    fn check(&self, dataset: &str) -> Result<DatasetInfo> {
        let ds = self.cache.open(&self.root.join(dataset))?;
        Ok(DatasetInfo {
            srs: ds.srs().to_string(),
            extents: ds.extents(),
        })
    }

    fn image(&self, request: &RasterRequest<'_>) -> Result<RgbaImage> {
        let dataset = self.open(request)?;
        let (w, h) = request.size;
        Ok(RgbaImage::from_fn(w, h, |i, j| {
            let (x, y) = request.sample_point(f64::from(i) + 0.5, f64::from(j) + 0.5);
            dataset
                .sample(x, y, request.resampling)
                .unwrap_or(Rgba([0, 0, 0, 0]))
        }))
    }

    fn mask(&self, request: &RasterRequest<'_>) -> Result<CoverageMask> {
        let dataset = self.open(request)?;
        let (w, h) = request.size;
        let mut mask = CoverageMask::new(w, h, false);
        for j in 0..h {
            for i in 0..w {
                let (x, y) = request.sample_point(f64::from(i) + 0.5, f64::from(j) + 0.5);
                if dataset.sample(x, y, Resampling::Nearest).is_some() {
                    mask.set(i, j, true);
                }
            }
        }
        Ok(mask)
    }

    fn detail_mask(&self, request: &RasterRequest<'_>) -> Result<GrayImage> {
        let dataset = self.open(request)?;
        let (w, h) = request.size;
        let total = DETAIL_SAMPLES * DETAIL_SAMPLES;
        let step = 1.0 / f64::from(DETAIL_SAMPLES);

        Ok(GrayImage::from_fn(w, h, |i, j| {
            let mut hits = 0;
            for sj in 0..DETAIL_SAMPLES {
                for si in 0..DETAIL_SAMPLES {
                    let (x, y) = request.sample_point(
                        f64::from(i) + (f64::from(si) + 0.5) * step,
                        f64::from(j) + (f64::from(sj) + 0.5) * step,
                    );
                    if dataset.sample(x, y, Resampling::Nearest).is_some() {
                        hits += 1;
                    }
                }
            }
            Luma([(hits * 255 / total) as u8])
        }))
    }

    fn height_range(&self, request: &RasterRequest<'_>) -> Result<Option<(f64, f64)>> {
        let dataset = self.open(request)?;
        let (w, h) = request.size;
        let mut range: Option<(f64, f64)> = None;
        // grid sampling: corners included
        for j in 0..=h {
            for i in 0..=w {
                let (x, y) = request.sample_point(f64::from(i), f64::from(j));
                if let Some(z) = dataset.height(x, y) {
                    range = Some(match range {
                        Some((lo, hi)) => (lo.min(z), hi.max(z)),
                        None => (z, z),
                    });
                }
            }
        }
        Ok(range)
    }
}
