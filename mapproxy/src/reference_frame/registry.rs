//! Process-wide table of reference frames, loaded once at startup.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;

use super::{ReferenceFrame, RfNode, DEFAULT_META_BINARY_ORDER};
use crate::error::{MapproxyError, Result};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FrameFile {
    id: String,
    #[serde(default = "default_order")]
    meta_binary_order: u8,
    nodes: Vec<RfNode>,
}

fn default_order() -> u8 {
    DEFAULT_META_BINARY_ORDER
}

/// Read-only set of known reference frames keyed by id.
#[derive(Debug, Default, Clone)]
pub struct ReferenceFrameRegistry {
    frames: BTreeMap<String, Arc<ReferenceFrame>>,
}

impl ReferenceFrameRegistry {
    pub fn new(frames: impl IntoIterator<Item = ReferenceFrame>) -> Self {
        Self {
            frames: frames
                .into_iter()
                .map(|rf| (rf.id().to_string(), Arc::new(rf)))
                .collect(),
        }
    }

    /// Loads frames from a JSON array file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let registry = Self::from_json(&data)?;
        tracing::info!(
            path = %path.display(),
            frames = registry.len(),
            "Loaded reference frames"
        );
        Ok(registry)
    }

    pub fn from_json(data: &str) -> Result<Self> {
        let files: Vec<FrameFile> = serde_json::from_str(data)?;
        let mut frames = Vec::with_capacity(files.len());
        for file in files {
            frames.push(ReferenceFrame::new(
                file.id,
                file.meta_binary_order,
                file.nodes,
            )?);
        }
        let registry = Self::new(frames);
        if registry.is_empty() {
            return Err(MapproxyError::format("no reference frames defined"));
        }
        Ok(registry)
    }

    pub fn get(&self, id: &str) -> Option<Arc<ReferenceFrame>> {
        self.frames.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.frames.contains_key(id)
    }

    /// Frame ids in sorted order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.frames.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}
