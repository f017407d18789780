//! Sparse quadtree marking included and excluded regions of a resource.
//!
//! The tree has a fixed depth; a node is either uniformly in, uniformly out,
//! or split into four children. Level `l` of the tree lines up with tile level
//! `l` of the reference frame, so a node `(l, x, y)` covers exactly the tile
//! `(l, x, y)` and its descendants.
//!
//! Trees are persisted with bincode.

use std::io::{self, BufReader, BufWriter};
use std::path::Path;

use bincode::Options;
use serde::{Deserialize, Serialize};

use crate::tile::{TileId, MAX_LOD};

/// Classification of a quadtree region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quad {
    /// Entire region is included.
    In,
    /// Entire region is excluded.
    Out,
    /// Region mixes both at the queried depth.
    Mixed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Node {
    Full,
    Empty,
    /// Children in order: (0,0), (1,0), (0,1), (1,1).
    Split(Box<[Node; 4]>),
}

impl Node {
    /// Number of split levels below this node.
    fn height(&self) -> u8 {
        match self {
            Node::Split(children) => 1 + children.iter().map(Node::height).max().unwrap_or(0),
            _ => 0,
        }
    }

    fn empty_split() -> Node {
        Node::Split(Box::new([Node::Empty, Node::Empty, Node::Empty, Node::Empty]))
    }

    fn compact(&mut self) {
        if let Node::Split(children) = self {
            for child in children.iter_mut() {
                child.compact();
            }
            if children.iter().all(|c| *c == Node::Full) {
                *self = Node::Full;
            } else if children.iter().all(|c| *c == Node::Empty) {
                *self = Node::Empty;
            }
        }
    }
}

/// Index of the child containing `(x, y)` when descending past bit `level`.
fn child_index(x: u32, y: u32, level: u8) -> usize {
    ((((y >> level) & 1) << 1) | ((x >> level) & 1)) as usize
}

/// Half-open rectangle of tiles at some (possibly very deep) level.
///
/// Coordinates are signed so that windows may extend past the tile space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub lod: u32,
    pub x0: i64,
    pub y0: i64,
    pub x1: i64,
    pub y1: i64,
}

impl Window {
    /// Span of tree node `id` expressed at this window's level.
    pub fn span(&self, id: TileId) -> (i64, i64, i64, i64) {
        let shift = self.lod - u32::from(id.lod);
        let x = i64::from(id.x);
        let y = i64::from(id.y);
        (x << shift, y << shift, (x + 1) << shift, (y + 1) << shift)
    }

    fn intersects(&self, id: TileId) -> bool {
        let (x0, y0, x1, y1) = self.span(id);
        x0 < self.x1 && self.x0 < x1 && y0 < self.y1 && self.y0 < y1
    }
}

/// Quadtree of included regions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaskTree {
    depth: u8,
    root: Node,
}

impl MaskTree {
    /// Tree where everything is included.
    pub fn full(depth: u8) -> Self {
        Self {
            depth: depth.min(MAX_LOD),
            root: Node::Full,
        }
    }

    /// Builds a tree whose included region is the given leaf tiles at `depth`.
    pub fn from_tiles(depth: u8, tiles: impl IntoIterator<Item = (u32, u32)>) -> Self {
        let depth = depth.min(MAX_LOD);
        let mut root = Node::Empty;

        for (x, y) in tiles {
            let mut node = &mut root;
            for level in (0..depth).rev() {
                if matches!(node, Node::Full) {
                    break;
                }
                if matches!(node, Node::Empty) {
                    *node = Node::empty_split();
                }
                let index = child_index(x, y, level);
                node = match node {
                    Node::Split(children) => &mut children[index],
                    leaf => leaf,
                };
            }
            *node = Node::Full;
        }

        root.compact();
        Self { depth, root }
    }

    pub fn depth(&self) -> u8 {
        self.depth
    }

    /// Classifies the region covered by `tile`.
    pub fn classify(&self, tile: TileId) -> Quad {
        let target = tile.lod.min(self.depth);
        let at = tile.ancestor_at(target);
        let mut node = &self.root;
        for level in (0..target).rev() {
            match node {
                Node::Full => return Quad::In,
                Node::Empty => return Quad::Out,
                Node::Split(children) => {
                    node = &children[child_index(at.x, at.y, level)];
                }
            }
        }
        match node {
            Node::Full => Quad::In,
            Node::Empty => Quad::Out,
            Node::Split(_) => Quad::Mixed,
        }
    }

    /// Visits the quads intersecting `window`, descending at most to `max_depth`.
    ///
    /// Leaves report `In` or `Out`; split nodes cut off by `max_depth` report
    /// `Mixed`. `max_depth` must not exceed `window.lod`.
    pub fn for_each_quad<F>(&self, max_depth: u8, window: &Window, mut f: F)
    where
        F: FnMut(TileId, Quad),
    {
        let max_depth = max_depth.min(self.depth);
        if u32::from(max_depth) > window.lod {
            return;
        }
        Self::visit(&self.root, TileId::new(0, 0, 0), max_depth, window, &mut f);
    }

    fn visit<F>(node: &Node, id: TileId, max_depth: u8, window: &Window, f: &mut F)
    where
        F: FnMut(TileId, Quad),
    {
        if !window.intersects(id) {
            return;
        }
        match node {
            Node::Full => f(id, Quad::In),
            Node::Empty => f(id, Quad::Out),
            Node::Split(_) if id.lod >= max_depth => f(id, Quad::Mixed),
            Node::Split(children) => {
                for (index, child) in children.iter().enumerate() {
                    let index = index as u32;
                    let child_id =
                        TileId::new(id.lod + 1, (id.x << 1) | (index & 1), (id.y << 1) | (index >> 1));
                    Self::visit(child, child_id, max_depth, window, f);
                }
            }
        }
    }

    /// Loads a tree saved with [`MaskTree::save`].
    ///
    /// Decoding never reads past the file length, and trees splitting
    /// deeper than their declared depth are rejected.
    pub fn load(path: &Path) -> io::Result<Self> {
        let file = std::fs::File::open(path)?;
        let limit = file.metadata()?.len();
        let reader = BufReader::new(file);

        let invalid = |reason: String| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Failed to deserialize mask tree {}: {}", path.display(), reason),
            )
        };

        let tree: Self = bincode::DefaultOptions::new()
            .with_fixint_encoding()
            .allow_trailing_bytes()
            .with_limit(limit)
            .deserialize_from(reader)
            .map_err(|e| invalid(e.to_string()))?;

        if tree.depth > MAX_LOD || tree.root.height() > tree.depth {
            return Err(invalid(format!("depth {} out of bounds", tree.depth)));
        }
        Ok(tree)
    }

    /// Saves the tree, replacing the target atomically.
    pub fn save(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let temp_path = path.with_extension("tmp");
        let file = std::fs::File::create(&temp_path)?;
        let writer = BufWriter::new(file);

        bincode::serialize_into(writer, self)
            .map_err(|e| io::Error::other(format!("Failed to serialize mask tree: {}", e)))?;

        std::fs::rename(&temp_path, path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(lod: u32, x0: i64, y0: i64, x1: i64, y1: i64) -> Window {
        Window { lod, x0, y0, x1, y1 }
    }

    #[test]
    fn test_from_tiles_compacts_full_quadrants() {
        let tree = MaskTree::from_tiles(2, [(0, 0), (1, 0), (0, 1), (1, 1)]);
        assert_eq!(tree.classify(TileId::new(1, 0, 0)), Quad::In);
        assert_eq!(tree.classify(TileId::new(1, 1, 0)), Quad::Out);
        assert_eq!(tree.classify(TileId::new(0, 0, 0)), Quad::Mixed);
    }

    #[test]
    fn test_classify_below_depth_uses_leaf() {
        let tree = MaskTree::from_tiles(2, [(3, 3)]);
        assert_eq!(tree.classify(TileId::new(5, 31, 31)), Quad::In);
        assert_eq!(tree.classify(TileId::new(5, 0, 0)), Quad::Out);
    }

    #[test]
    fn test_full_tree() {
        let tree = MaskTree::full(8);
        assert_eq!(tree.classify(TileId::new(12, 77, 100)), Quad::In);
    }

    #[test]
    fn test_for_each_quad_respects_window() {
        let tree = MaskTree::from_tiles(2, [(0, 0), (3, 3)]);
        let mut seen = Vec::new();
        tree.for_each_quad(2, &window(2, 0, 0, 2, 2), |id, quad| seen.push((id, quad)));

        assert!(seen.contains(&(TileId::new(2, 0, 0), Quad::In)));
        assert!(!seen.iter().any(|(id, _)| *id == TileId::new(2, 3, 3)));
    }

    #[test]
    fn test_for_each_quad_reports_mixed_at_cutoff() {
        let tree = MaskTree::from_tiles(3, [(0, 0)]);
        let mut seen = Vec::new();
        tree.for_each_quad(1, &window(1, 0, 0, 2, 2), |id, quad| seen.push((id, quad)));

        assert!(seen.contains(&(TileId::new(1, 0, 0), Quad::Mixed)));
        assert!(seen.contains(&(TileId::new(1, 1, 1), Quad::Out)));
    }

    #[test]
    fn test_window_span() {
        let w = window(4, 0, 0, 16, 16);
        assert_eq!(w.span(TileId::new(2, 1, 3)), (4, 12, 8, 16));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("mask").join("tree.bin");
        let tree = MaskTree::from_tiles(4, [(1, 2), (9, 9)]);

        tree.save(&path).unwrap();
        let loaded = MaskTree::load(&path).unwrap();
        assert_eq!(loaded, tree);
    }

    #[test]
    fn test_load_rejects_splits_below_depth() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("tree.bin");

        // depth 1 with a split under a split
        let mut data = vec![1u8];
        data.extend_from_slice(&2u32.to_le_bytes());
        data.extend_from_slice(&2u32.to_le_bytes());
        for _ in 0..7 {
            data.extend_from_slice(&0u32.to_le_bytes());
        }
        std::fs::write(&path, &data).unwrap();

        let err = MaskTree::load(&path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(err.to_string().contains("out of bounds"));
    }

    #[test]
    fn test_load_truncated_fails() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("tree.bin");
        MaskTree::from_tiles(4, [(1, 2)]).save(&path).unwrap();

        let data = std::fs::read(&path).unwrap();
        std::fs::write(&path, &data[..data.len() / 2]).unwrap();
        assert!(MaskTree::load(&path).is_err());
    }

    #[test]
    fn test_load_garbage_fails() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("tree.bin");
        std::fs::write(&path, b"\x09").unwrap();
        assert!(MaskTree::load(&path).is_err());
    }
}
