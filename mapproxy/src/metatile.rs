//! Metatile block decomposition.
//!
//! A metatile covers `2^order × 2^order` tiles at one level. When the reference
//! frame switches coordinate systems inside that footprint, the metatile must be
//! produced block by block, each block lying in exactly one subtree.
//!
//! ```text
//!   metatile footprint ∩ resource range = view
//!   ┌──────────┬─────┐
//!   │ subtree A│  B  │   blocks partition the view; each carries its own
//!   │          ├─────┤   srs, extents and common ancestor
//!   │          │  C  │
//!   └──────────┴─────┘
//! ```
//!
//! Blocks are discovered by a flood fill over subtree origins starting at the
//! view's lower-left index corner, so emission order is discovery order.

use std::collections::{HashSet, VecDeque};

use crate::error::{MapproxyError, Result};
use crate::reference_frame::{NodeInfo, ReferenceFrame};
use crate::tile::{child_range, common_ancestor, max_tile_index, Extents2, TileId, TileRange};

/// Whether blocks of invalid subtrees are emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidNodes {
    /// Only blocks that can produce content (serving metatiles).
    Skip,
    /// Every block, including dead regions (building tile indices).
    Include,
}

/// One rectangle of a metatile lying entirely within one subtree.
#[derive(Debug, Clone)]
pub struct MetatileBlock {
    /// Coordinate system of the block.
    pub srs: String,
    /// Tiles covered by the block, at the metatile's level.
    pub view: TileRange,
    /// Extents of `view` in `srs`.
    pub extents: Extents2,
    /// Deepest node containing the whole block.
    pub common_ancestor: NodeInfo,
    /// Position of `view.ll` inside `common_ancestor` at the metatile's level.
    pub offset: (u32, u32),
    valid: bool,
    partial: bool,
}

impl MetatileBlock {
    /// Block can produce content.
    pub fn valid(&self) -> bool {
        self.valid
    }

    /// Block is valid but only partially covered by valid extents.
    pub fn partial(&self) -> bool {
        self.partial
    }

    /// Extents of tile `(x, y)` of `view`.
    pub fn tile_extents(&self, x: u32, y: u32) -> Extents2 {
        let tw = self.extents.width() / self.view.width() as f64;
        let th = self.extents.height() / self.view.height() as f64;
        let i = f64::from(x - self.view.ll.0);
        let j = f64::from(y - self.view.ll.1);
        Extents2::new(
            self.extents.ll.0 + i * tw,
            self.extents.ur.1 - (j + 1.0) * th,
            self.extents.ll.0 + (i + 1.0) * tw,
            self.extents.ur.1 - j * th,
        )
    }

    fn new(rf: &ReferenceFrame, lod: u8, view: TileRange, ll: &NodeInfo, ur: &NodeInfo) -> Self {
        // rows grow downward: the ll index corner is the top-left tile
        let extents = Extents2::new(
            ll.extents().ll.0,
            ur.extents().ll.1,
            ur.extents().ur.0,
            ll.extents().ur.1,
        );

        let ancestor = common_ancestor(lod, &view);
        let offset = TileId::new(lod, view.ll.0, view.ll.1).local_to(ancestor.lod);
        let (valid, partial) = rf.region_validity(ll.subtree_root(), &extents);

        Self {
            srs: ll.srs().to_string(),
            view,
            extents,
            common_ancestor: rf.find_subtree(ancestor),
            offset,
            valid,
            partial,
        }
    }
}

/// Splits the metatile at `tile_id` into single-subtree blocks.
///
/// # Arguments
///
/// * `rf` - reference frame geometry
/// * `tile_id` - metatile origin; x and y must be multiples of `2^order`
/// * `order` - metatile binary order
/// * `tile_range` - tiles the resource may serve, at `tile_id.lod`
/// * `invalid` - whether blocks of invalid subtrees are emitted when the
///   metatile spans several subtrees; a single-subtree metatile always
///   yields its one block
///
/// # Errors
///
/// `NotFound` when `tile_id` is not a metatile origin. Empty intersections
/// produce an empty list, not an error.
pub fn metatile_blocks(
    rf: &ReferenceFrame,
    tile_id: TileId,
    order: u8,
    tile_range: &TileRange,
    invalid: InvalidNodes,
) -> Result<Vec<MetatileBlock>> {
    let size = 1u64 << order;
    let misaligned = size - 1;
    if u64::from(tile_id.x) & misaligned != 0 || u64::from(tile_id.y) & misaligned != 0 {
        return Err(MapproxyError::not_found(
            "TileId doesn't point to metatile origin.",
        ));
    }

    let lod = tile_id.lod;
    let max = u64::from(max_tile_index(lod));
    let metatile = TileRange::new(
        tile_id.x,
        tile_id.y,
        (u64::from(tile_id.x) + size - 1).min(max) as u32,
        (u64::from(tile_id.y) + size - 1).min(max) as u32,
    );

    let view = match metatile.intersect(tile_range) {
        Some(view) => view,
        None => return Ok(Vec::new()),
    };

    let keep = |block: &MetatileBlock| block.valid() || invalid == InvalidNodes::Include;

    let ll_node = rf.find_subtree(TileId::new(lod, view.ll.0, view.ll.1));
    let ur_node = rf.find_subtree(TileId::new(lod, view.ur.0, view.ur.1));

    if ll_node.same_subtree(&ur_node) {
        // a single subtree is always one block, valid or not
        return Ok(vec![MetatileBlock::new(rf, lod, view, &ll_node, &ur_node)]);
    }

    let mut blocks = Vec::new();
    let mut queue = VecDeque::from([view.ll]);
    let mut seen: HashSet<(u32, u32)> = HashSet::from([view.ll]);
    let mut emitted: HashSet<TileId> = HashSet::new();

    while let Some((x, y)) = queue.pop_front() {
        let node = rf.find_subtree(TileId::new(lod, x, y));
        let root = node.subtree_root();
        if !emitted.insert(root) {
            // candidate landed inside an already discovered block
            continue;
        }

        let block_view = match child_range(root, lod - root.lod).intersect(&view) {
            Some(block_view) => block_view,
            None => continue,
        };

        let block_ll = if block_view.ll == (x, y) {
            node
        } else {
            rf.find_subtree(TileId::new(lod, block_view.ll.0, block_view.ll.1))
        };
        let block_ur = rf.find_subtree(TileId::new(lod, block_view.ur.0, block_view.ur.1));

        let block = MetatileBlock::new(rf, lod, block_view, &block_ll, &block_ur);
        if keep(&block) {
            blocks.push(block);
        }

        let candidates = [
            (block_view.ll.0, block_view.ur.1 + 1),
            (block_view.ur.0 + 1, block_view.ll.1),
        ];
        for candidate in candidates {
            if candidate.0 > view.ur.0 || candidate.1 > view.ur.1 {
                continue;
            }
            if seen.insert(candidate) {
                queue.push_back(candidate);
            }
        }
    }

    tracing::trace!(
        metatile = %tile_id,
        view = %view,
        blocks = blocks.len(),
        "Decomposed metatile"
    );

    Ok(blocks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference_frame::RfNode;

    fn world() -> Extents2 {
        Extents2::new(0.0, 0.0, 1024.0, 1024.0)
    }

    /// Root manual node with two listed children on the top row; the bottom
    /// row positions are unlisted.
    fn split_frame() -> ReferenceFrame {
        ReferenceFrame::new(
            "split",
            5,
            vec![
                RfNode::manual(TileId::new(0, 0, 0), "root", world()),
                RfNode::bisection(
                    TileId::new(1, 0, 0),
                    "west",
                    Extents2::new(0.0, 512.0, 512.0, 1024.0),
                ),
                RfNode::manual(
                    TileId::new(1, 1, 0),
                    "east",
                    Extents2::new(512.0, 512.0, 1024.0, 1024.0),
                ),
                RfNode::bisection(
                    TileId::new(2, 2, 0),
                    "east-a",
                    Extents2::new(512.0, 768.0, 768.0, 1024.0),
                ),
                RfNode::bisection(
                    TileId::new(2, 3, 1),
                    "east-b",
                    Extents2::new(768.0, 512.0, 1024.0, 768.0),
                ),
            ],
        )
        .unwrap()
    }

    fn flat_frame() -> ReferenceFrame {
        ReferenceFrame::new(
            "flat",
            5,
            vec![RfNode::bisection(TileId::new(0, 0, 0), "plane", world())],
        )
        .unwrap()
    }

    #[test]
    fn test_misaligned_tile_is_not_found() {
        let rf = flat_frame();
        let err = metatile_blocks(
            &rf,
            TileId::new(5, 3, 0),
            2,
            &TileRange::full(5),
            InvalidNodes::Skip,
        )
        .unwrap_err();
        assert!(matches!(err, MapproxyError::NotFound(_)));
    }

    #[test]
    fn test_single_subtree_gives_one_block() {
        let rf = flat_frame();
        let blocks = metatile_blocks(
            &rf,
            TileId::new(4, 4, 8),
            2,
            &TileRange::full(4),
            InvalidNodes::Skip,
        )
        .unwrap();

        assert_eq!(blocks.len(), 1);
        let block = &blocks[0];
        assert_eq!(block.view, TileRange::new(4, 8, 7, 11));
        assert_eq!(block.srs, "plane");
        // 64 units per tile at lod 4
        assert_eq!(block.extents, Extents2::new(256.0, 256.0, 512.0, 512.0));
        assert_eq!(block.common_ancestor.node_id(), TileId::new(2, 1, 2));
        assert_eq!(block.offset, (0, 0));
        // first row is the top of the block
        assert_eq!(block.tile_extents(4, 8), Extents2::new(256.0, 448.0, 320.0, 512.0));
        assert_eq!(block.tile_extents(7, 11), Extents2::new(448.0, 256.0, 512.0, 320.0));
    }

    #[test]
    fn test_metatile_clipped_to_lod() {
        let rf = flat_frame();
        let blocks = metatile_blocks(
            &rf,
            TileId::new(1, 0, 0),
            3,
            &TileRange::full(1),
            InvalidNodes::Skip,
        )
        .unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].view, TileRange::new(0, 0, 1, 1));
        assert_eq!(blocks[0].extents, world());
    }

    #[test]
    fn test_empty_intersection_is_empty() {
        let rf = flat_frame();
        let blocks = metatile_blocks(
            &rf,
            TileId::new(4, 0, 0),
            2,
            &TileRange::new(8, 8, 9, 9),
            InvalidNodes::Include,
        )
        .unwrap();
        assert!(blocks.is_empty());
    }

    #[test]
    fn test_resource_range_restricts_view() {
        let rf = flat_frame();
        let blocks = metatile_blocks(
            &rf,
            TileId::new(4, 0, 0),
            2,
            &TileRange::new(2, 1, 9, 9),
            InvalidNodes::Skip,
        )
        .unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].view, TileRange::new(2, 1, 3, 3));
        assert_eq!(blocks[0].offset, (2, 1));
    }

    #[test]
    fn test_split_frame_blocks_by_subtree() {
        let rf = split_frame();
        let blocks = metatile_blocks(
            &rf,
            TileId::new(3, 0, 0),
            3,
            &TileRange::full(3),
            InvalidNodes::Include,
        )
        .unwrap();

        let mut srs: Vec<_> = blocks.iter().map(|b| b.srs.as_str()).collect();
        srs.sort_unstable();
        // west, east-a, east-b, two unlisted east positions, two unlisted root positions
        assert_eq!(
            srs,
            vec!["east", "east", "east-a", "east-b", "root", "root", "west"]
        );

        let west = blocks.iter().find(|b| b.srs == "west").unwrap();
        assert_eq!(west.view, TileRange::new(0, 0, 3, 3));
        assert_eq!(west.extents, Extents2::new(0.0, 512.0, 512.0, 1024.0));
        assert!(west.valid());
    }

    #[test]
    fn test_skip_mode_drops_invalid_blocks() {
        let rf = split_frame();
        let blocks = metatile_blocks(
            &rf,
            TileId::new(3, 0, 0),
            3,
            &TileRange::full(3),
            InvalidNodes::Skip,
        )
        .unwrap();

        let mut srs: Vec<_> = blocks.iter().map(|b| b.srs.as_str()).collect();
        srs.sort_unstable();
        assert_eq!(srs, vec!["east-a", "east-b", "west"]);
    }

    #[test]
    fn test_partial_valid_extents() {
        let rf = ReferenceFrame::new(
            "clipped",
            5,
            vec![RfNode::bisection(TileId::new(0, 0, 0), "plane", world())
                .with_valid_extents(Extents2::new(0.0, 0.0, 300.0, 1024.0))],
        )
        .unwrap();

        let blocks = metatile_blocks(
            &rf,
            TileId::new(2, 0, 0),
            1,
            &TileRange::full(2),
            InvalidNodes::Skip,
        )
        .unwrap();
        assert_eq!(blocks.len(), 1);
        assert!(blocks[0].partial());

        let dead = metatile_blocks(
            &rf,
            TileId::new(2, 2, 0),
            1,
            &TileRange::full(2),
            InvalidNodes::Skip,
        )
        .unwrap();
        assert_eq!(dead.len(), 1);
        assert!(!dead[0].valid());
        assert_eq!(dead[0].view, TileRange::new(2, 0, 3, 1));
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn test_blocks_partition_view(
                lod in 1u8..7,
                order in 0u8..5,
                mx in 0u32..64,
                my in 0u32..64,
                a in (0u32..64, 0u32..64),
                b in (0u32..64, 0u32..64),
            ) {
                let rf = split_frame();
                let max = max_tile_index(lod);
                let align = !((1u32 << order) - 1);
                let tile = TileId::new(lod, mx.min(max) & align, my.min(max) & align);
                let range = TileRange::new(
                    a.0.min(b.0).min(max),
                    a.1.min(b.1).min(max),
                    a.0.max(b.0).min(max),
                    a.1.max(b.1).min(max),
                );

                let blocks = metatile_blocks(&rf, tile, order, &range, InvalidNodes::Include)?;

                let size = 1u64 << order;
                let metatile = TileRange::new(
                    tile.x,
                    tile.y,
                    (u64::from(tile.x) + size - 1).min(u64::from(max)) as u32,
                    (u64::from(tile.y) + size - 1).min(u64::from(max)) as u32,
                );
                let expected = metatile.intersect(&range);

                let mut covered = HashSet::new();
                for block in &blocks {
                    for t in block.view.tiles() {
                        prop_assert!(covered.insert(t), "tile {:?} covered twice", t);
                        let node = rf.find_subtree(TileId::new(lod, t.0, t.1));
                        prop_assert_eq!(node.srs(), block.srs.as_str());
                    }
                }

                match expected {
                    None => prop_assert!(blocks.is_empty()),
                    Some(view) => {
                        prop_assert_eq!(covered.len() as u64, view.count());
                        for t in view.tiles() {
                            prop_assert!(covered.contains(&t));
                        }
                    }
                }
            }
        }
    }
}
