//! Tile index value types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Deepest level of detail addressable by a [`TileId`].
pub const MAX_LOD: u8 = 31;

/// Address of one tile in the tile-index space.
///
/// `x` grows eastward, `y` grows downward (row index).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileId {
    pub lod: u8,
    pub x: u32,
    pub y: u32,
}

impl TileId {
    pub const fn new(lod: u8, x: u32, y: u32) -> Self {
        Self { lod, x, y }
    }

    /// Origin tile of a whole level.
    pub const fn lod_origin(lod: u8) -> Self {
        Self { lod, x: 0, y: 0 }
    }

    /// Parent tile, or `None` for the root.
    pub fn parent(&self) -> Option<TileId> {
        if self.lod == 0 {
            return None;
        }
        Some(TileId::new(self.lod - 1, self.x >> 1, self.y >> 1))
    }

    /// Ancestor at a shallower (or equal) level.
    ///
    /// Returns `self` when `lod >= self.lod`.
    pub fn ancestor_at(&self, lod: u8) -> TileId {
        if lod >= self.lod {
            return *self;
        }
        let shift = self.lod - lod;
        TileId::new(lod, self.x >> shift, self.y >> shift)
    }

    /// Returns true if `self` is `other` or one of its ancestors.
    pub fn is_ancestor_or_self(&self, other: &TileId) -> bool {
        self.lod <= other.lod && other.ancestor_at(self.lod) == *self
    }

    /// Position of this tile inside its ancestor at `lod`.
    pub fn local_to(&self, lod: u8) -> (u32, u32) {
        let ancestor = self.ancestor_at(lod);
        let depth = self.lod.saturating_sub(lod);
        (
            self.x - (ancestor.x << depth),
            self.y - (ancestor.y << depth),
        )
    }

    /// Returns true if x and y are within the level's index range.
    pub fn is_within_lod(&self) -> bool {
        let max = max_tile_index(self.lod);
        self.x <= max && self.y <= max
    }
}

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.lod, self.x, self.y)
    }
}

/// Number of tiles along one axis at `lod`.
pub fn tile_count(lod: u8) -> u64 {
    1u64 << lod.min(MAX_LOD)
}

/// Largest valid x/y index at `lod`.
pub fn max_tile_index(lod: u8) -> u32 {
    (tile_count(lod) - 1) as u32
}

/// Inclusive rectangle of tile indices at one level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileRange {
    pub ll: (u32, u32),
    pub ur: (u32, u32),
}

impl TileRange {
    pub const fn new(ll_x: u32, ll_y: u32, ur_x: u32, ur_y: u32) -> Self {
        Self {
            ll: (ll_x, ll_y),
            ur: (ur_x, ur_y),
        }
    }

    /// Range covering exactly one tile.
    pub const fn single(x: u32, y: u32) -> Self {
        Self::new(x, y, x, y)
    }

    /// Range covering a whole level.
    pub fn full(lod: u8) -> Self {
        let max = max_tile_index(lod);
        Self::new(0, 0, max, max)
    }

    pub fn width(&self) -> u64 {
        u64::from(self.ur.0 - self.ll.0) + 1
    }

    pub fn height(&self) -> u64 {
        u64::from(self.ur.1 - self.ll.1) + 1
    }

    /// Number of tiles in the range.
    pub fn count(&self) -> u64 {
        self.width() * self.height()
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.ll.0 && x <= self.ur.0 && y >= self.ll.1 && y <= self.ur.1
    }

    pub fn contains_range(&self, other: &TileRange) -> bool {
        self.contains(other.ll.0, other.ll.1) && self.contains(other.ur.0, other.ur.1)
    }

    /// Intersection of two ranges, `None` when they do not overlap.
    pub fn intersect(&self, other: &TileRange) -> Option<TileRange> {
        let ll = (self.ll.0.max(other.ll.0), self.ll.1.max(other.ll.1));
        let ur = (self.ur.0.min(other.ur.0), self.ur.1.min(other.ur.1));
        if ll.0 > ur.0 || ll.1 > ur.1 {
            return None;
        }
        Some(TileRange { ll, ur })
    }

    /// Iterates all tiles in row-major order.
    pub fn tiles(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        (self.ll.1..=self.ur.1).flat_map(move |y| (self.ll.0..=self.ur.0).map(move |x| (x, y)))
    }
}

impl fmt::Display for TileRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{}:{},{}",
            self.ll.0, self.ll.1, self.ur.0, self.ur.1
        )
    }
}

/// Inclusive range of levels of detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "(u8, u8)", into = "(u8, u8)")]
pub struct LodRange {
    pub min: u8,
    pub max: u8,
}

impl LodRange {
    pub const fn new(min: u8, max: u8) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, lod: u8) -> bool {
        lod >= self.min && lod <= self.max
    }

    pub fn lods(&self) -> impl Iterator<Item = u8> {
        self.min..=self.max
    }
}

impl From<(u8, u8)> for LodRange {
    fn from((min, max): (u8, u8)) -> Self {
        Self { min, max }
    }
}

impl From<LodRange> for (u8, u8) {
    fn from(range: LodRange) -> Self {
        (range.min, range.max)
    }
}

impl fmt::Display for LodRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.min, self.max)
    }
}

/// Axis-aligned 2D extents in some spatial reference system.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Extents2 {
    pub ll: (f64, f64),
    pub ur: (f64, f64),
}

impl Extents2 {
    pub const fn new(ll_x: f64, ll_y: f64, ur_x: f64, ur_y: f64) -> Self {
        Self {
            ll: (ll_x, ll_y),
            ur: (ur_x, ur_y),
        }
    }

    pub fn width(&self) -> f64 {
        self.ur.0 - self.ll.0
    }

    pub fn height(&self) -> f64 {
        self.ur.1 - self.ll.1
    }

    pub fn center(&self) -> (f64, f64) {
        (
            (self.ll.0 + self.ur.0) / 2.0,
            (self.ll.1 + self.ur.1) / 2.0,
        )
    }

    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        x >= self.ll.0 && x <= self.ur.0 && y >= self.ll.1 && y <= self.ur.1
    }

    pub fn contains(&self, other: &Extents2) -> bool {
        self.contains_point(other.ll.0, other.ll.1) && self.contains_point(other.ur.0, other.ur.1)
    }

    /// Returns true if both extents share a region of positive area.
    pub fn overlaps(&self, other: &Extents2) -> bool {
        self.ll.0 < other.ur.0
            && other.ll.0 < self.ur.0
            && self.ll.1 < other.ur.1
            && other.ll.1 < self.ur.1
    }

    /// Extents enlarged by `dx`/`dy` on every side.
    pub fn grown(&self, dx: f64, dy: f64) -> Extents2 {
        Extents2::new(self.ll.0 - dx, self.ll.1 - dy, self.ur.0 + dx, self.ur.1 + dy)
    }
}

impl fmt::Display for Extents2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{}:{},{}",
            self.ll.0, self.ll.1, self.ur.0, self.ur.1
        )
    }
}
