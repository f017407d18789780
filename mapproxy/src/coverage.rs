//! Coverage rasterization.
//!
//! Coverage tells which samples of a tile contribute content. The base comes
//! from the reference frame node (its subtree's valid extents, dilated by one
//! sample); a resource's [`MaskTree`] can only carve holes into it.
//!
//! # Architecture
//!
//! ```text
//! NodeInfo ──coverage_mask(dilation 1)──► base CoverageMask
//!                                              │
//! MaskTree ──rasterize (ws + 2·margin)²───►  local raster
//!                                              │
//!                    exact pixel match ── intersect ──┐
//!                    otherwise ───── box-kernel scan ─┴─► CoverageMask ⊆ base
//! ```

use serde::{Deserialize, Serialize};

use crate::mask_tree::{MaskTree, Quad, Window};
use crate::reference_frame::NodeInfo;

/// Sample layout of a coverage grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoverageType {
    /// One sample per pixel center: `size × size`.
    Pixel,
    /// One sample per pixel corner: `(size + 1) × (size + 1)`.
    Grid,
}

impl CoverageType {
    /// Samples along one axis for a tile `size` pixels wide.
    pub fn samples(self, size: u32) -> u32 {
        match self {
            CoverageType::Pixel => size,
            CoverageType::Grid => size + 1,
        }
    }
}

/// Boolean sample grid, row-major with row 0 at the top.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverageMask {
    width: u32,
    height: u32,
    cells: Vec<bool>,
}

impl CoverageMask {
    pub fn new(width: u32, height: u32, value: bool) -> Self {
        Self {
            width,
            height,
            cells: vec![value; width as usize * height as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn get(&self, x: u32, y: u32) -> bool {
        self.cells[(y * self.width + x) as usize]
    }

    pub fn set(&mut self, x: u32, y: u32, value: bool) {
        self.cells[(y * self.width + x) as usize] = value;
    }

    /// Number of samples set.
    pub fn count(&self) -> usize {
        self.cells.iter().filter(|c| **c).count()
    }

    pub fn is_empty(&self) -> bool {
        !self.cells.iter().any(|c| *c)
    }

    pub fn is_full(&self) -> bool {
        self.cells.iter().all(|c| *c)
    }

    /// Returns true if every sample set here is also set in `other`.
    pub fn is_subset_of(&self, other: &CoverageMask) -> bool {
        self.width == other.width
            && self.height == other.height
            && self
                .cells
                .iter()
                .zip(&other.cells)
                .all(|(a, b)| !*a || *b)
    }

    /// Renders the mask as an 8-bit gray image (255 = covered).
    pub fn to_gray_image(&self) -> image::GrayImage {
        image::GrayImage::from_fn(self.width, self.height, |x, y| {
            image::Luma([if self.get(x, y) { 0xff } else { 0x00 }])
        })
    }
}

/// Square 8-bit raster used while rasterizing the mask tree.
struct LocalRaster {
    size: i64,
    pixels: Vec<bool>,
}

impl LocalRaster {
    fn new(size: i64) -> Self {
        Self {
            size,
            pixels: vec![false; (size * size) as usize],
        }
    }

    /// Fills the half-open rectangle, clipped to the raster.
    fn fill(&mut self, x1: i64, y1: i64, x2: i64, y2: i64) {
        let (x1, x2) = (x1.max(0), x2.min(self.size));
        let (y1, y2) = (y1.max(0), y2.min(self.size));
        for y in y1..y2 {
            let row = (y * self.size) as usize;
            for x in x1..x2 {
                self.pixels[row + x as usize] = true;
            }
        }
    }

    fn at(&self, x: i64, y: i64) -> bool {
        self.pixels[(y * self.size + x) as usize]
    }
}

/// Computes the coverage of `node` at `size` pixels, refined by `mask_tree`.
///
/// # Arguments
///
/// * `size` - tile size in pixels (must be at least 1)
/// * `node` - resolved reference frame node of the tile
/// * `mask_tree` - optional exclusion quadtree of the resource
/// * `kind` - pixel or grid sampling
///
/// # Returns
///
/// A mask that is always a subset of the node's dilated base coverage.
pub fn generate_coverage(
    size: u32,
    node: &NodeInfo,
    mask_tree: Option<&MaskTree>,
    kind: CoverageType,
) -> CoverageMask {
    let size = size.max(1);
    let mut coverage = node.coverage_mask(kind, size, 1);

    let tree = match mask_tree {
        Some(tree) => tree,
        None => return coverage,
    };
    if coverage.is_empty() {
        return coverage;
    }

    let detail = ceil_log2(size);
    let ws: i64 = 1 << detail;
    let margin: i64 = if kind == CoverageType::Pixel && i64::from(size) == ws {
        0
    } else {
        2
    };
    let ts = ws + 2 * margin;

    let tile = node.node_id();
    let detailed_lod = u32::from(tile.lod) + detail;
    let origin_x = (i64::from(tile.x) << detail) - margin;
    let origin_y = (i64::from(tile.y) << detail) - margin;

    let depth = detailed_lod.min(u32::from(tree.depth())) as u8;
    let scale = ws as f64 / f64::from(size);

    let window = Window {
        lod: detailed_lod,
        x0: origin_x,
        y0: origin_y,
        x1: origin_x + ts,
        y1: origin_y + ts,
    };

    let mut raster = LocalRaster::new(ts);
    tree.for_each_quad(depth, &window, |id, quad| {
        if quad != Quad::In {
            return;
        }
        let (x0, y0, x1, y1) = window.span(id);
        // dilate by one destination pixel
        let rx1 = ((x0 - origin_x) as f64 - scale).round() as i64;
        let ry1 = ((y0 - origin_y) as f64 - scale).round() as i64;
        let rx2 = ((x1 - origin_x) as f64 + scale).round() as i64;
        let ry2 = ((y1 - origin_y) as f64 + scale).round() as i64;
        raster.fill(rx1, ry1, rx2, ry2);
    });

    let samples = kind.samples(size);

    if margin == 0 {
        for j in 0..samples {
            for i in 0..samples {
                if !raster.at(i64::from(i), i64::from(j)) {
                    coverage.set(i, j, false);
                }
            }
        }
        return coverage;
    }

    let shift = match kind {
        CoverageType::Pixel => margin as f64,
        CoverageType::Grid => -0.5 * scale + margin as f64,
    };
    let clamp = |v: f64| -> i64 { (v as i64).clamp(0, ts - 1) };
    let kr = scale / 2.0;
    let trans = |p: u32| scale * f64::from(p) + shift;

    let scan = |px: f64, py: f64| -> bool {
        for y in clamp((py - kr).floor())..=clamp((py + kr).ceil()) {
            for x in clamp((px - kr).floor())..=clamp((px + kr).ceil()) {
                if !raster.at(x, y) {
                    return false;
                }
            }
        }
        true
    };

    for j in 0..samples {
        let jj = trans(j);
        for i in 0..samples {
            if coverage.get(i, j) && !scan(trans(i), jj) {
                coverage.set(i, j, false);
            }
        }
    }

    coverage
}

/// Smallest `d` with `2^d >= value`.
fn ceil_log2(value: u32) -> u32 {
    if value <= 1 {
        0
    } else {
        32 - (value - 1).leading_zeros()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference_frame::{ReferenceFrame, RfNode};
    use crate::tile::{Extents2, TileId};

    fn frame(valid: Option<Extents2>) -> ReferenceFrame {
        let mut root = RfNode::bisection(
            TileId::new(0, 0, 0),
            "plane",
            Extents2::new(0.0, 0.0, 256.0, 256.0),
        );
        root.valid_extents = valid;
        ReferenceFrame::new("plane", 5, vec![root]).unwrap()
    }

    #[test]
    fn test_ceil_log2() {
        assert_eq!(ceil_log2(1), 0);
        assert_eq!(ceil_log2(2), 1);
        assert_eq!(ceil_log2(3), 2);
        assert_eq!(ceil_log2(256), 8);
        assert_eq!(ceil_log2(257), 9);
    }

    #[test]
    fn test_without_mask_tree_returns_base() {
        let rf = frame(Some(Extents2::new(0.0, 0.0, 100.0, 256.0)));
        let node = rf.find_subtree(TileId::new(1, 0, 0));
        let coverage = generate_coverage(16, &node, None, CoverageType::Grid);
        assert_eq!(coverage, node.coverage_mask(CoverageType::Grid, 16, 1));
    }

    #[test]
    fn test_full_mask_tree_keeps_everything() {
        let rf = frame(None);
        let node = rf.find_subtree(TileId::new(2, 1, 1));
        let tree = MaskTree::full(6);
        let coverage = generate_coverage(8, &node, Some(&tree), CoverageType::Pixel);
        assert!(coverage.is_full());
    }

    #[test]
    fn test_empty_mask_tree_clears_everything() {
        let rf = frame(None);
        let node = rf.find_subtree(TileId::new(2, 1, 1));
        let tree = MaskTree::from_tiles(4, std::iter::empty());
        let coverage = generate_coverage(8, &node, Some(&tree), CoverageType::Grid);
        assert!(coverage.is_empty());
    }

    #[test]
    fn test_exact_pixel_match_carves_quadrant() {
        // tile (1,0,0) at 4 pixels = level 3; leaves at level 3 cover x 0..1
        let rf = frame(None);
        let node = rf.find_subtree(TileId::new(1, 0, 0));
        let tree = MaskTree::from_tiles(3, [(0, 0), (0, 1), (0, 2), (0, 3)]);

        let coverage = generate_coverage(4, &node, Some(&tree), CoverageType::Pixel);
        // column 0 is in; dilation by one pixel keeps column 1
        assert!(coverage.get(0, 0));
        assert!(coverage.get(1, 2));
        assert!(!coverage.get(2, 0));
        assert!(!coverage.get(3, 3));
    }

    #[test]
    fn test_mixed_quads_stay_black() {
        // tree is deeper than the sampling depth: everything is mixed
        let rf = frame(None);
        let node = rf.find_subtree(TileId::new(0, 0, 0));
        let tree = MaskTree::from_tiles(10, [(0, 0)]);
        let coverage = generate_coverage(2, &node, Some(&tree), CoverageType::Pixel);
        assert!(coverage.is_empty());
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn test_mask_only_removes_coverage(
                leaves in proptest::collection::vec((0u32..16, 0u32..16), 0..40),
                size in 1u32..20,
                lod in 0u8..4,
                grid in any::<bool>(),
                valid_x in 1.0..256.0_f64,
            ) {
                let rf = frame(Some(Extents2::new(0.0, 0.0, valid_x, 256.0)));
                let max = crate::tile::max_tile_index(lod);
                let node = rf.find_subtree(TileId::new(lod, max / 2, max));
                let tree = MaskTree::from_tiles(4, leaves);
                let kind = if grid { CoverageType::Grid } else { CoverageType::Pixel };

                let base = node.coverage_mask(kind, size, 1);
                let refined = generate_coverage(size, &node, Some(&tree), kind);
                prop_assert!(refined.is_subset_of(&base));
            }
        }
    }
}
