//! Per-LOD tile flags stored as rectangles.
//!
//! Surface and tiled geodata generators describe where content exists with a
//! handful of rectangles per LOD (one per metatile block) rather than a flag
//! per tile. Later rectangles override earlier ones.

use std::collections::BTreeMap;
use std::io::{self, BufReader, BufWriter};
use std::path::Path;

use bincode::Options;
use image::{GrayImage, Luma};
use serde::{Deserialize, Serialize};

use crate::tile::{TileId, TileRange};

/// Tile index flag bits.
pub struct TileFlags;

impl TileFlags {
    pub const MESH: u8 = 0x01;
    pub const WATERTIGHT: u8 = 0x02;
    pub const NAVTILE: u8 = 0x08;
    pub const META: u8 = 0x10;
}

/// 2D metatile flag values.
pub struct MetaFlags;

impl MetaFlags {
    pub const WATERTIGHT: u8 = 0xc0;
    pub const AVAILABLE: u8 = 0x80;
    pub const UNAVAILABLE: u8 = 0x00;
}

/// Binary order of 2D metatiles (256x256 tiles).
pub const META2D_BINARY_ORDER: u8 = 8;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileIndex {
    lods: BTreeMap<u8, Vec<(TileRange, u8)>>,
}

impl TileIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, lod: u8, range: TileRange, flags: u8) {
        self.lods.entry(lod).or_default().push((range, flags));
    }

    /// Merges another index built for different LODs.
    pub fn extend(&mut self, other: TileIndex) {
        for (lod, ranges) in other.lods {
            self.lods.entry(lod).or_default().extend(ranges);
        }
    }

    pub fn get(&self, tile: TileId) -> u8 {
        self.lods
            .get(&tile.lod)
            .and_then(|ranges| {
                ranges
                    .iter()
                    .rev()
                    .find(|(range, _)| range.contains(tile.x, tile.y))
            })
            .map_or(0, |(_, flags)| *flags)
    }

    /// Tile has geometry.
    pub fn real(&self, tile: TileId) -> bool {
        self.get(tile) & TileFlags::MESH != 0
    }

    pub fn navtile(&self, tile: TileId) -> bool {
        self.get(tile) & TileFlags::NAVTILE != 0
    }

    pub fn lods(&self) -> impl Iterator<Item = u8> + '_ {
        self.lods.keys().copied()
    }

    /// Renders the 2D metatile whose origin is `tile`.
    pub fn meta2d(&self, tile: TileId) -> GrayImage {
        let size = 1u32 << META2D_BINARY_ORDER;
        let mut out = GrayImage::from_pixel(size, size, Luma([MetaFlags::UNAVAILABLE]));

        let Some(ranges) = self.lods.get(&tile.lod) else {
            return out;
        };
        let last = |v: u32| (u64::from(v) + u64::from(size) - 1).min(u64::from(u32::MAX)) as u32;
        let window = TileRange::new(tile.x, tile.y, last(tile.x), last(tile.y));

        for (range, flags) in ranges {
            let Some(part) = range.intersect(&window) else {
                continue;
            };
            let value = if flags & TileFlags::MESH == 0 {
                MetaFlags::UNAVAILABLE
            } else if flags & TileFlags::WATERTIGHT != 0 {
                MetaFlags::WATERTIGHT
            } else {
                MetaFlags::AVAILABLE
            };
            for (x, y) in part.tiles() {
                out.put_pixel(x - tile.x, y - tile.y, Luma([value]));
            }
        }
        out
    }

    /// Loads an index saved with [`TileIndex::save`]; decoding is bounded by
    /// the file length.
    pub fn load(path: &Path) -> io::Result<Self> {
        let file = std::fs::File::open(path)?;
        let limit = file.metadata()?.len();
        bincode::DefaultOptions::new()
            .with_fixint_encoding()
            .allow_trailing_bytes()
            .with_limit(limit)
            .deserialize_from(BufReader::new(file))
            .map_err(|e| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("Failed to deserialize tile index {}: {}", path.display(), e),
                )
            })
    }

    /// Saves the index, replacing the target atomically.
    pub fn save(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let temp_path = path.with_extension("tmp");
        let writer = BufWriter::new(std::fs::File::create(&temp_path)?);
        bincode::serialize_into(writer, self)
            .map_err(|e| io::Error::other(format!("Failed to serialize tile index: {}", e)))?;

        std::fs::rename(&temp_path, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_later_ranges_override() {
        let mut index = TileIndex::new();
        index.set(3, TileRange::new(0, 0, 7, 7), TileFlags::META);
        index.set(3, TileRange::new(2, 2, 3, 3), TileFlags::META | TileFlags::MESH);

        assert!(index.real(TileId::new(3, 2, 3)));
        assert!(!index.real(TileId::new(3, 4, 4)));
        assert_eq!(index.get(TileId::new(3, 4, 4)), TileFlags::META);
        assert_eq!(index.get(TileId::new(4, 0, 0)), 0);
    }

    #[test]
    fn test_meta2d_flags() {
        let mut index = TileIndex::new();
        index.set(2, TileRange::new(0, 0, 1, 3), TileFlags::MESH | TileFlags::WATERTIGHT);
        index.set(2, TileRange::new(2, 0, 2, 3), TileFlags::MESH);
        index.set(2, TileRange::new(3, 0, 3, 3), TileFlags::META);

        let image = index.meta2d(TileId::new(2, 0, 0));
        assert_eq!(image.get_pixel(0, 0)[0], MetaFlags::WATERTIGHT);
        assert_eq!(image.get_pixel(2, 1)[0], MetaFlags::AVAILABLE);
        assert_eq!(image.get_pixel(3, 1)[0], MetaFlags::UNAVAILABLE);
        assert_eq!(image.get_pixel(100, 100)[0], MetaFlags::UNAVAILABLE);
    }

    #[test]
    fn test_save_load() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("store/tileset.index");

        let mut index = TileIndex::new();
        index.set(5, TileRange::new(1, 2, 3, 4), TileFlags::MESH | TileFlags::NAVTILE);
        index.save(&path).unwrap();

        let loaded = TileIndex::load(&path).unwrap();
        assert_eq!(loaded, index);
        assert!(loaded.navtile(TileId::new(5, 3, 4)));
    }

    #[test]
    fn test_load_oversized_length_fails() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("tileset.index");

        // one lod whose range list claims u32::MAX entries
        let mut data = 1u64.to_le_bytes().to_vec();
        data.push(5);
        data.extend_from_slice(&u64::from(u32::MAX).to_le_bytes());
        std::fs::write(&path, &data).unwrap();

        let err = TileIndex::load(&path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_load_garbage_fails() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("tileset.index");
        std::fs::write(&path, b"\xff\xff\xff\xff\xff\xff\xff\xff\xff").unwrap();
        assert!(TileIndex::load(&path).is_err());
    }
}
