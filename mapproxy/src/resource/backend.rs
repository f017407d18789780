//! Authoritative source of resource definitions.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::{Definition, GeneratorKind, GeneratorType, Resource, ResourceId};
use crate::error::{MapproxyError, Result};
use crate::tile::{LodRange, TileRange};

/// Resources keyed by id.
pub type ResourceMap = BTreeMap<ResourceId, Resource>;

/// Source of resource definitions, polled by the generator registry.
pub trait ResourceBackend: Send + Sync {
    /// Lists every currently defined resource.
    ///
    /// An error means the set could not be read at all; the caller keeps its
    /// previous state.
    fn list_resources(&self) -> Result<ResourceMap>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FrameBinding {
    lod_range: LodRange,
    tile_range: ((u32, u32), (u32, u32)),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResourceEntry {
    group: String,
    id: String,
    #[serde(rename = "type")]
    generator_type: GeneratorType,
    driver: String,
    #[serde(default)]
    comment: String,
    #[serde(default)]
    revision: u32,
    #[serde(default)]
    credits: BTreeSet<String>,
    reference_frames: BTreeMap<String, FrameBinding>,
    definition: serde_json::Value,
}

impl ResourceEntry {
    fn expand(self) -> Result<Vec<Resource>> {
        let definition = Definition::parse(&self.driver, self.definition)?;
        let generator = GeneratorKind::new(self.generator_type, self.driver);

        Ok(self
            .reference_frames
            .into_iter()
            .map(|(rf, binding)| {
                let ((llx, lly), (urx, ury)) = binding.tile_range;
                Resource {
                    id: ResourceId::new(rf, self.generator_type, &self.group, &self.id),
                    generator: generator.clone(),
                    comment: self.comment.clone(),
                    revision: self.revision,
                    lod_range: binding.lod_range,
                    tile_range: TileRange::new(llx, lly, urx, ury),
                    credits: self.credits.clone(),
                    definition: definition.clone(),
                }
            })
            .collect())
    }
}

/// Resources defined in a JSON file.
///
/// ```json
/// [{
///   "group": "grp", "id": "ortho", "type": "tms", "driver": "tms-raster",
///   "referenceFrames": {"rf1": {"lodRange": [0, 18], "tileRange": [[0, 0], [0, 0]]}},
///   "definition": {"dataset": "ortho/ortho.png"}
/// }]
/// ```
#[derive(Debug, Clone)]
pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parses resource entries, skipping (and logging) malformed ones.
    pub fn parse(data: &str) -> Result<ResourceMap> {
        let entries: Vec<serde_json::Value> = serde_json::from_str(data)?;
        let mut resources = ResourceMap::new();

        for (index, value) in entries.into_iter().enumerate() {
            let expanded = serde_json::from_value::<ResourceEntry>(value)
                .map_err(MapproxyError::from)
                .and_then(ResourceEntry::expand);

            match expanded {
                Ok(list) => {
                    for resource in list {
                        resources.insert(resource.id.clone(), resource);
                    }
                }
                Err(e) => {
                    tracing::warn!(index, error = %e, "Skipping malformed resource definition");
                }
            }
        }

        Ok(resources)
    }
}

impl ResourceBackend for JsonFileBackend {
    fn list_resources(&self) -> Result<ResourceMap> {
        let data = std::fs::read_to_string(&self.path)?;
        let resources = Self::parse(&data)?;
        tracing::debug!(
            path = %self.path.display(),
            resources = resources.len(),
            "Read resource definitions"
        );
        Ok(resources)
    }
}
