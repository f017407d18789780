//! Shared fixtures: a one-node reference frame, an ortho dataset whose left
//! half has data and a TMS resource over it.

#![allow(dead_code)]

use std::path::Path;

use image::{Rgba, RgbaImage};
use mapproxy::config::ConfigFile;

pub const FRAMES: &str = r#"[{
    "id": "rf1",
    "metaBinaryOrder": 5,
    "nodes": [{"id": {"lod": 0, "x": 0, "y": 0}, "srs": "local", "extents": {"ll": [0.0, 0.0], "ur": [1.0, 1.0]}}]
}]"#;

/// TMS resource `rf1/tms/grp/ortho`, configured at lod 2 over the whole frame.
pub fn tms_entry(id: &str, revision: u32, comment: &str) -> String {
    format!(
        r#"{{
            "group": "grp", "id": "{id}", "type": "tms", "driver": "tms-raster",
            "comment": "{comment}", "revision": {revision},
            "referenceFrames": {{"rf1": {{"lodRange": [2, 10], "tileRange": [[0, 0], [3, 3]]}}}},
            "definition": {{"dataset": "ortho.png", "format": "jpg"}}
        }}"#
    )
}

pub fn resources_json(entries: &[String]) -> String {
    format!("[{}]", entries.join(","))
}

/// 64x64 dataset, left half opaque red, right half transparent.
pub fn write_dataset(dir: &Path) {
    let image = RgbaImage::from_fn(64, 64, |x, _| {
        if x < 32 {
            Rgba([200, 10, 10, 255])
        } else {
            Rgba([0, 0, 0, 0])
        }
    });
    image.save(dir.join("ortho.png")).unwrap();
    std::fs::write(
        dir.join("ortho.png.json"),
        r#"{"srs": "local", "extents": {"ll": [0.0, 0.0], "ur": [1.0, 1.0]}}"#,
    )
    .unwrap();
}

/// Writes every fixture file under `dir` and returns a config pointing at them.
pub fn fixture_config(dir: &Path, browser: bool) -> ConfigFile {
    write_dataset(dir);
    std::fs::write(dir.join("frames.json"), FRAMES).unwrap();
    std::fs::write(
        dir.join("resources.json"),
        resources_json(&[tms_entry("ortho", 0, "")]),
    )
    .unwrap();

    let mut config = ConfigFile::default();
    config.generators.root = dir.join("store");
    config.generators.resource_root = dir.to_path_buf();
    config.generators.browser = browser;
    config.resources.reference_frames = dir.join("frames.json");
    config.resources.definitions = dir.join("resources.json");
    config.resources.data_files = None;
    config.arsenal.workers = 2;
    config
}
