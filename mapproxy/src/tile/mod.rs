//! Tile index geometry.
//!
//! Tiles form a quadtree: level `lod` has `2^lod × 2^lod` tiles indexed by
//! `(x, y)`. Resource ranges are configured at one level and are shifted to
//! any other level with [`shift_range`].

mod types;

pub use types::{max_tile_index, tile_count, Extents2, LodRange, TileId, TileRange, MAX_LOD};

/// Tiles at `root.lod + depth` that descend from `root`.
#[inline]
pub fn child_range(root: TileId, depth: u8) -> TileRange {
    let ll_x = u64::from(root.x) << depth;
    let ll_y = u64::from(root.y) << depth;
    let ur_x = ((u64::from(root.x) + 1) << depth) - 1;
    let ur_y = ((u64::from(root.y) + 1) << depth) - 1;
    TileRange::new(ll_x as u32, ll_y as u32, ur_x as u32, ur_y as u32)
}

/// Moves a tile range defined at `from_lod` to `to_lod`.
///
/// Going deeper covers every descendant of the original range; going
/// shallower yields the ancestors that touch it.
pub fn shift_range(from_lod: u8, range: &TileRange, to_lod: u8) -> TileRange {
    if to_lod >= from_lod {
        let depth = to_lod - from_lod;
        let ll = child_range(TileId::new(from_lod, range.ll.0, range.ll.1), depth);
        let ur = child_range(TileId::new(from_lod, range.ur.0, range.ur.1), depth);
        TileRange {
            ll: ll.ll,
            ur: ur.ur,
        }
    } else {
        let depth = from_lod - to_lod;
        TileRange::new(
            range.ll.0 >> depth,
            range.ll.1 >> depth,
            range.ur.0 >> depth,
            range.ur.1 >> depth,
        )
    }
}

/// Deepest tile that contains every tile of `range` at `lod`.
pub fn common_ancestor(lod: u8, range: &TileRange) -> TileId {
    let mut a = TileId::new(lod, range.ll.0, range.ll.1);
    let mut b = TileId::new(lod, range.ur.0, range.ur.1);
    while a != b {
        match (a.parent(), b.parent()) {
            (Some(pa), Some(pb)) => {
                a = pa;
                b = pb;
            }
            _ => break,
        }
    }
    a
}
