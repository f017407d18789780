//! Reference frame geometry.
//!
//! A reference frame is a tree of subtrees. Each subtree is rooted at a tile,
//! has its own spatial reference system and extents, and owns every tile below
//! its root that is not claimed by a deeper subtree.
//!
//! ```text
//!            (0,0,0) manual, "geographic"
//!            /                        \
//!   (1,0,0) bisection, "utm-w"   (1,1,0) bisection, "utm-e"
//!
//!   (1,0,1) and (1,1,1) are not listed: tiles below them belong to
//!   invalid placeholder subtrees that still have srs and extents, so
//!   index builders can emit entries for them.
//! ```
//!
//! Only `manual` nodes may have explicit children; a `bisection` node owns its
//! whole quadtree below.
//!
//! # Example
//!
//! ```ignore
//! let frames = ReferenceFrameRegistry::load(Path::new("frames.json"))?;
//! let rf = frames.get("melown2015").unwrap();
//! let node = rf.find_subtree(TileId::new(5, 3, 2));
//! if node.valid() {
//!     println!("{} in {}", node.extents(), node.srs());
//! }
//! ```

mod registry;

pub use registry::ReferenceFrameRegistry;

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::coverage::{CoverageMask, CoverageType};
use crate::error::{MapproxyError, Result};
use crate::tile::{max_tile_index, Extents2, TileId, MAX_LOD};

/// Default metatile binary order of a reference frame.
pub const DEFAULT_META_BINARY_ORDER: u8 = 5;

/// How a node's children are derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Partitioning {
    /// Children are the four quadrants, recursively.
    Bisection,
    /// Children are listed explicitly; unlisted positions are invalid.
    Manual,
}

fn default_partitioning() -> Partitioning {
    Partitioning::Bisection
}

/// One explicitly configured node of a reference frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RfNode {
    pub id: TileId,
    pub srs: String,
    pub extents: Extents2,
    #[serde(default = "default_partitioning")]
    pub partitioning: Partitioning,
    /// Region with actual content; defaults to `extents`.
    #[serde(default)]
    pub valid_extents: Option<Extents2>,
}

impl RfNode {
    pub fn bisection(id: TileId, srs: impl Into<String>, extents: Extents2) -> Self {
        Self {
            id,
            srs: srs.into(),
            extents,
            partitioning: Partitioning::Bisection,
            valid_extents: None,
        }
    }

    pub fn manual(id: TileId, srs: impl Into<String>, extents: Extents2) -> Self {
        Self {
            partitioning: Partitioning::Manual,
            ..Self::bisection(id, srs, extents)
        }
    }

    pub fn with_valid_extents(mut self, extents: Extents2) -> Self {
        self.valid_extents = Some(extents);
        self
    }

    fn effective_valid_extents(&self) -> Extents2 {
        self.valid_extents.unwrap_or(self.extents)
    }

    /// Extents of a descendant tile, obtained by subdividing this node.
    fn tile_extents(&self, tile: TileId) -> Extents2 {
        let depth = tile.lod - self.id.lod;
        let (lx, ly) = tile.local_to(self.id.lod);
        let n = (1u64 << depth) as f64;
        let w = self.extents.width() / n;
        let h = self.extents.height() / n;
        let ll_x = self.extents.ll.0 + f64::from(lx) * w;
        let ur_y = self.extents.ur.1 - f64::from(ly) * h;
        Extents2::new(ll_x, ur_y - h, ll_x + w, ur_y)
    }
}

/// A named reference frame. Immutable once constructed.
#[derive(Debug)]
pub struct ReferenceFrame {
    id: String,
    meta_binary_order: u8,
    nodes: HashMap<TileId, Arc<RfNode>>,
}

impl ReferenceFrame {
    /// Builds a reference frame, validating the node tree.
    ///
    /// # Errors
    ///
    /// Fails with `Format` when the root node is missing, a node is listed
    /// twice, a non-root node has no manual parent, or extents are empty.
    pub fn new(id: impl Into<String>, meta_binary_order: u8, nodes: Vec<RfNode>) -> Result<Self> {
        let id = id.into();
        let mut map = HashMap::with_capacity(nodes.len());

        for node in nodes {
            if node.id.lod > MAX_LOD || !node.id.is_within_lod() {
                return Err(MapproxyError::format(format!(
                    "reference frame {}: node {} outside tile space",
                    id, node.id
                )));
            }
            if node.extents.width() <= 0.0 || node.extents.height() <= 0.0 {
                return Err(MapproxyError::format(format!(
                    "reference frame {}: node {} has empty extents",
                    id, node.id
                )));
            }
            let key = node.id;
            if map.insert(key, Arc::new(node)).is_some() {
                return Err(MapproxyError::format(format!(
                    "reference frame {}: duplicate node {}",
                    id, key
                )));
            }
        }

        if !map.contains_key(&TileId::new(0, 0, 0)) {
            return Err(MapproxyError::format(format!(
                "reference frame {}: missing root node",
                id
            )));
        }

        for key in map.keys() {
            if let Some(parent) = key.parent() {
                match map.get(&parent) {
                    Some(p) if p.partitioning == Partitioning::Manual => {}
                    _ => {
                        return Err(MapproxyError::format(format!(
                            "reference frame {}: node {} must be a child of a manual node",
                            id, key
                        )))
                    }
                }
            }
        }

        Ok(Self {
            id,
            meta_binary_order,
            nodes: map,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn meta_binary_order(&self) -> u8 {
        self.meta_binary_order
    }

    /// Largest valid tile index at `lod`.
    pub fn max_tile_index(&self, lod: u8) -> u32 {
        max_tile_index(lod)
    }

    /// Configured nodes, in no particular order.
    pub fn nodes(&self) -> impl Iterator<Item = &RfNode> {
        self.nodes.values().map(|n| n.as_ref())
    }

    /// Resolves the subtree owning `tile` and the tile's geometry in it.
    pub fn find_subtree(&self, tile: TileId) -> NodeInfo {
        let mut lod = tile.lod;
        loop {
            let candidate = tile.ancestor_at(lod);
            if let Some(node) = self.nodes.get(&candidate) {
                return NodeInfo::resolve(node, tile);
            }
            if lod == 0 {
                break;
            }
            lod -= 1;
        }
        // unreachable for a validated frame: the root is always present
        NodeInfo::detached(tile)
    }

    /// Extents of a resolved node.
    pub fn node_extents(&self, node: &NodeInfo) -> Extents2 {
        node.extents
    }

    /// Validity of a region lying inside the subtree rooted at `subtree_root`.
    ///
    /// Returns `(valid, partial)`. Placeholder subtrees of unlisted manual
    /// positions are never valid.
    pub fn region_validity(&self, subtree_root: TileId, extents: &Extents2) -> (bool, bool) {
        match self.nodes.get(&subtree_root) {
            Some(node) => {
                let valid_extents = node.effective_valid_extents();
                let valid = valid_extents.overlaps(extents);
                (valid, valid && !valid_extents.contains(extents))
            }
            None => (false, false),
        }
    }
}

/// Geometry of one tile resolved against its owning subtree.
#[derive(Debug, Clone)]
pub struct NodeInfo {
    tile: TileId,
    subtree_root: TileId,
    srs: String,
    extents: Extents2,
    valid_extents: Option<Extents2>,
    valid: bool,
    partial: bool,
}

impl NodeInfo {
    fn resolve(node: &Arc<RfNode>, tile: TileId) -> Self {
        let extents = node.tile_extents(tile);

        if node.partitioning == Partitioning::Manual && node.id != tile {
            // unlisted child position of a manual node
            return Self {
                tile,
                subtree_root: tile.ancestor_at(node.id.lod + 1),
                srs: node.srs.clone(),
                extents,
                valid_extents: None,
                valid: false,
                partial: false,
            };
        }

        let valid_extents = node.effective_valid_extents();
        let valid = valid_extents.overlaps(&extents);
        let partial = valid && !valid_extents.contains(&extents);

        Self {
            tile,
            subtree_root: node.id,
            srs: node.srs.clone(),
            extents,
            valid_extents: Some(valid_extents),
            valid,
            partial,
        }
    }

    fn detached(tile: TileId) -> Self {
        Self {
            tile,
            subtree_root: TileId::new(0, 0, 0),
            srs: String::new(),
            extents: Extents2::new(0.0, 0.0, 0.0, 0.0),
            valid_extents: None,
            valid: false,
            partial: false,
        }
    }

    pub fn node_id(&self) -> TileId {
        self.tile
    }

    /// Root tile of the subtree this node belongs to.
    pub fn subtree_root(&self) -> TileId {
        self.subtree_root
    }

    pub fn srs(&self) -> &str {
        &self.srs
    }

    pub fn extents(&self) -> Extents2 {
        self.extents
    }

    /// Node may produce content.
    pub fn valid(&self) -> bool {
        self.valid
    }

    /// Node is valid but only partially covered by its subtree's valid extents.
    pub fn partial(&self) -> bool {
        self.partial
    }

    /// Returns true if both nodes live in the same subtree.
    pub fn same_subtree(&self, other: &NodeInfo) -> bool {
        self.subtree_root == other.subtree_root
    }

    /// Coverage of this node's samples by its subtree's valid extents.
    ///
    /// # Arguments
    ///
    /// * `kind` - pixel centers (`size × size`) or grid corners (`(size+1)²`)
    /// * `size` - number of pixels along one axis
    /// * `dilation` - samples by which the valid region is grown
    pub fn coverage_mask(&self, kind: CoverageType, size: u32, dilation: u32) -> CoverageMask {
        let samples = kind.samples(size);

        if !self.valid {
            return CoverageMask::new(samples, samples, false);
        }
        if !self.partial {
            return CoverageMask::new(samples, samples, true);
        }

        let valid_extents = match self.valid_extents {
            Some(e) => e,
            None => return CoverageMask::new(samples, samples, false),
        };

        let step_x = self.extents.width() / f64::from(size);
        let step_y = self.extents.height() / f64::from(size);
        let region = valid_extents.grown(
            step_x * f64::from(dilation),
            step_y * f64::from(dilation),
        );
        let offset = match kind {
            CoverageType::Pixel => 0.5,
            CoverageType::Grid => 0.0,
        };

        let mut mask = CoverageMask::new(samples, samples, false);
        for j in 0..samples {
            let y = self.extents.ur.1 - (f64::from(j) + offset) * step_y;
            for i in 0..samples {
                let x = self.extents.ll.0 + (f64::from(i) + offset) * step_x;
                if region.contains_point(x, y) {
                    mask.set(i, j, true);
                }
            }
        }
        mask
    }
}
