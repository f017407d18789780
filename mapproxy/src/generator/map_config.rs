//! Client map configuration documents.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::reference_frame::ReferenceFrame;
use crate::resource::Resource;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FrameRef {
    pub id: String,
    pub meta_binary_order: u8,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct View {
    pub surfaces: BTreeMap<String, Vec<String>>,
    pub free_layers: BTreeMap<String, Value>,
}

/// Map configuration of one resource.
///
/// Layers are referenced by relative URL so that the document stays valid
/// wherever the resource directory is mounted.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MapConfig {
    pub reference_frame: FrameRef,
    pub credits: BTreeMap<String, Value>,
    pub bound_layers: BTreeMap<String, Value>,
    pub free_layers: BTreeMap<String, Value>,
    pub surfaces: Vec<Value>,
    pub view: View,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub browser_options: Option<Value>,
}

impl MapConfig {
    pub fn new(resource: &Resource, rf: &ReferenceFrame) -> Self {
        Self {
            reference_frame: FrameRef {
                id: rf.id().to_string(),
                meta_binary_order: rf.meta_binary_order(),
            },
            credits: resource
                .credits
                .iter()
                .map(|credit| (credit.clone(), serde_json::json!({ "id": credit })))
                .collect(),
            bound_layers: BTreeMap::new(),
            free_layers: BTreeMap::new(),
            surfaces: Vec::new(),
            view: View::default(),
            position: None,
            browser_options: None,
        }
    }

    pub fn with_bound_layer(mut self, id: impl Into<String>, url: impl Into<String>) -> Self {
        self.bound_layers.insert(id.into(), Value::String(url.into()));
        self
    }

    /// Adds a free layer and makes it visible in the default view.
    pub fn with_free_layer(mut self, id: impl Into<String>, url: impl Into<String>) -> Self {
        let id = id.into();
        self.free_layers.insert(id.clone(), Value::String(url.into()));
        self.view.free_layers.insert(id, serde_json::json!({}));
        self
    }

    /// Adds a surface with the given bound layers on top.
    pub fn with_surface(mut self, surface: Value, id: impl Into<String>, bound_layers: Vec<String>) -> Self {
        self.surfaces.push(surface);
        self.view.surfaces.insert(id.into(), bound_layers);
        self
    }
}
