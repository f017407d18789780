//! Resources: named, configured data sources exposed through the path hierarchy.
//!
//! A [`Resource`] binds a [`ResourceId`] to a generator driver and its
//! family-specific [`Definition`]. Resources come from a [`ResourceBackend`]
//! that the registry polls periodically; [`Resource::changed`] decides whether
//! a new version can be applied in place or needs a fresh generator.

mod backend;
mod definition;

pub use backend::{JsonFileBackend, ResourceBackend, ResourceMap};
pub use definition::{
    DemDataset, Definition, GeodataDefinition, GeodataFormat, GeodataIntrospection,
    HeightcodingMode, RasterFormat, Resampling, SurfaceDemDefinition, SurfaceIntrospection,
    TmsRasterDefinition, TmsRemoteDefinition,
};

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::MapproxyError;
use crate::tile::{shift_range, LodRange, TileId, TileRange};

/// Family of a generator, addressable in request paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeneratorType {
    Tms,
    Surface,
    Geodata,
}

impl GeneratorType {
    pub const ALL: [GeneratorType; 3] = [
        GeneratorType::Tms,
        GeneratorType::Surface,
        GeneratorType::Geodata,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            GeneratorType::Tms => "tms",
            GeneratorType::Surface => "surface",
            GeneratorType::Geodata => "geodata",
        }
    }
}

impl fmt::Display for GeneratorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GeneratorType {
    type Err = MapproxyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tms" => Ok(GeneratorType::Tms),
            "surface" => Ok(GeneratorType::Surface),
            "geodata" => Ok(GeneratorType::Geodata),
            _ => Err(MapproxyError::not_found(format!(
                "Invalid value for enum <{}>: Unknown generator type.",
                s
            ))),
        }
    }
}

/// Generator family plus concrete driver name, e.g. `tms/tms-raster`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GeneratorKind {
    #[serde(rename = "type")]
    pub kind: GeneratorType,
    pub driver: String,
}

impl GeneratorKind {
    pub fn new(kind: GeneratorType, driver: impl Into<String>) -> Self {
        Self {
            kind,
            driver: driver.into(),
        }
    }
}

impl fmt::Display for GeneratorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.driver)
    }
}

/// Unique name of a servable resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceId {
    pub reference_frame: String,
    pub generator_type: GeneratorType,
    pub group: String,
    pub id: String,
}

impl ResourceId {
    pub fn new(
        reference_frame: impl Into<String>,
        generator_type: GeneratorType,
        group: impl Into<String>,
        id: impl Into<String>,
    ) -> Self {
        Self {
            reference_frame: reference_frame.into(),
            generator_type,
            group: group.into(),
            id: id.into(),
        }
    }

    /// Frame-independent layer name, `group-id`.
    pub fn full_id(&self) -> String {
        format!("{}-{}", self.group, self.id)
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.reference_frame, self.generator_type, self.group, self.id
        )
    }
}

/// Result of comparing two versions of a resource.
///
/// Ordered by severity so that diffs can be combined with `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Changed {
    /// Identical.
    No,
    /// Can be applied to a live generator.
    Safe,
    /// Previously served content is stale; the generator must be rebuilt.
    RevisionBump,
}

impl Changed {
    /// Diff of a single field whose change always forces a rebuild.
    pub fn bump_if<T: PartialEq + ?Sized>(a: &T, b: &T) -> Changed {
        if a == b {
            Changed::No
        } else {
            Changed::RevisionBump
        }
    }

    /// Diff of a single cosmetic field.
    pub fn safe_if<T: PartialEq + ?Sized>(a: &T, b: &T) -> Changed {
        if a == b {
            Changed::No
        } else {
            Changed::Safe
        }
    }
}

/// A configured resource bound to one reference frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub id: ResourceId,
    pub generator: GeneratorKind,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub revision: u32,
    pub lod_range: LodRange,
    /// Tile range at `lod_range.min`.
    pub tile_range: TileRange,
    #[serde(default)]
    pub credits: BTreeSet<String>,
    pub definition: Definition,
}

impl Resource {
    /// Classifies the difference between this resource and `other`.
    pub fn changed(&self, other: &Resource) -> Changed {
        if self.generator != other.generator || self.id != other.id {
            return Changed::RevisionBump;
        }

        let resource_level = [
            Changed::bump_if(&self.lod_range, &other.lod_range),
            Changed::bump_if(&self.tile_range, &other.tile_range),
            Changed::bump_if(&self.revision, &other.revision),
            Changed::safe_if(&self.credits, &other.credits),
            Changed::safe_if(&self.comment, &other.comment),
        ];

        resource_level
            .into_iter()
            .fold(self.definition.changed(&other.definition), Changed::max)
    }

    /// Resource tile range moved to `lod`.
    pub fn tile_range_at(&self, lod: u8) -> TileRange {
        shift_range(self.lod_range.min, &self.tile_range, lod)
    }

    /// Returns true if `tile` lies within the configured lod and tile ranges.
    pub fn check_ranges(&self, tile: TileId) -> bool {
        self.lod_range.contains(tile.lod) && self.tile_range_at(tile.lod).contains(tile.x, tile.y)
    }
}
