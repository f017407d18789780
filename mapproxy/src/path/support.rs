//! Browser support files and extra, generator-independent files.
//!
//! Support files are compiled in and only served while the browser is
//! enabled. Data files come from an optional JSON registry and are served
//! from disk. Service files compute their content per request.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::{MapproxyError, Result};

/// Build stamp used as the last-modified time of compiled-in files.
const SUPPORT_FILES_MODIFIED: i64 = 1_767_225_600;

/// A static file served by the built-in browsers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupportFile {
    pub path: &'static str,
    pub content_type: &'static str,
    pub data: &'static str,
}

impl SupportFile {
    pub fn last_modified(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(SUPPORT_FILES_MODIFIED, 0).unwrap_or_default()
    }
}

const HTML: &str = "text/html; charset=utf-8";
const JS: &str = "application/javascript; charset=utf-8";
const CSS: &str = "text/css; charset=utf-8";

const BROWSER_CSS: &str = "html, body { margin: 0; height: 100%; font-family: sans-serif; }\n\
#map { position: absolute; inset: 0; overflow: hidden; background: #222; }\n\
#map img { position: absolute; width: 256px; height: 256px; }\n\
#info { position: absolute; top: 4px; left: 4px; color: #eee; z-index: 1; }\n";

const BROWSER_2D_INDEX: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>mapproxy: bound layer</title>
<link rel="stylesheet" href="browser.css">
<script src="browser2d.js"></script>
</head>
<body onload="startBrowser2d('boundlayer.json')">
<div id="info"></div>
<div id="map"></div>
</body>
</html>
"#;

const BROWSER_2D_JS: &str = r#"function startBrowser2d(definition) {
  fetch(definition).then(r => r.json()).then(bl => {
    const map = document.getElementById('map');
    const lod = bl.lodRange[0];
    const [ll, ur] = bl.tileRange;
    document.getElementById('info').textContent = bl.id + ' @ lod ' + lod;
    for (let y = ll[1]; y <= ur[1]; ++y) {
      for (let x = ll[0]; x <= ur[0]; ++x) {
        const img = document.createElement('img');
        img.src = bl.url.replace('{lod}', lod).replace('{x}', x).replace('{y}', y);
        img.style.left = ((x - ll[0]) * 256) + 'px';
        img.style.top = ((y - ll[1]) * 256) + 'px';
        map.appendChild(img);
      }
    }
  });
}
"#;

const BROWSER_3D_INDEX: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>mapproxy: map configuration</title>
<link rel="stylesheet" href="browser.css">
<script src="browser3d.js"></script>
</head>
<body onload="startBrowser3d('mapConfig.json')">
<div id="info"></div>
<pre id="map"></pre>
</body>
</html>
"#;

const BROWSER_3D_JS: &str = r#"function startBrowser3d(config) {
  fetch(config).then(r => r.json()).then(mc => {
    document.getElementById('info').textContent =
      Object.keys(mc.surfaces || {}).concat(Object.keys(mc.freeLayers || {})).join(', ');
    document.getElementById('map').textContent = JSON.stringify(mc, null, 2);
  });
}
"#;

/// Support files of the 2D (bound layer) browser.
pub static BROWSER_2D: &[SupportFile] = &[
    SupportFile {
        path: "index.html",
        content_type: HTML,
        data: BROWSER_2D_INDEX,
    },
    SupportFile {
        path: "browser2d.js",
        content_type: JS,
        data: BROWSER_2D_JS,
    },
    SupportFile {
        path: "browser.css",
        content_type: CSS,
        data: BROWSER_CSS,
    },
];

/// Support files of the 3D (map configuration) browser.
pub static BROWSER_3D: &[SupportFile] = &[
    SupportFile {
        path: "index.html",
        content_type: HTML,
        data: BROWSER_3D_INDEX,
    },
    SupportFile {
        path: "browser3d.js",
        content_type: JS,
        data: BROWSER_3D_JS,
    },
    SupportFile {
        path: "browser.css",
        content_type: CSS,
        data: BROWSER_CSS,
    },
];

/// Looks up a support file; the empty name maps to `index.html`.
pub fn find_support_file(table: &'static [SupportFile], filename: &str) -> Option<&'static SupportFile> {
    let path = if filename.is_empty() {
        super::INDEX_FILE
    } else {
        filename
    };
    table.iter().find(|file| file.path == path)
}

/// A registered file served verbatim from disk.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataFile {
    pub filename: String,
    pub path: PathBuf,
    pub content_type: String,
}

impl DataFile {
    pub fn read(&self) -> Result<Vec<u8>> {
        Ok(std::fs::read(&self.path)?)
    }
}

/// Data files keyed by filename.
#[derive(Debug, Clone, Default)]
pub struct DataFileRegistry {
    files: HashMap<String, DataFile>,
}

impl DataFileRegistry {
    pub fn new(files: impl IntoIterator<Item = DataFile>) -> Self {
        Self {
            files: files
                .into_iter()
                .map(|file| (file.filename.clone(), file))
                .collect(),
        }
    }

    /// Loads `[{"filename", "path", "contentType"}]`. Relative paths resolve
    /// against the registry file's directory.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let mut files: Vec<DataFile> = serde_json::from_str(&data)?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        for file in &mut files {
            if file.path.is_relative() {
                file.path = base.join(&file.path);
            }
        }

        tracing::debug!(path = %path.display(), files = files.len(), "Loaded data file registry");
        Ok(Self::new(files))
    }

    pub fn get(&self, filename: &str) -> Option<&DataFile> {
        self.files.get(filename)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// A file whose content is computed per request.
pub trait ServiceFile: Send + Sync {
    fn filename(&self) -> &str;

    fn content_type(&self) -> &str;

    /// Produces the file content for a request query string.
    fn generate(&self, query: &str) -> Result<Vec<u8>>;
}

/// Service files matched by exact filename.
#[derive(Clone, Default)]
pub struct ServiceRegistry {
    services: Vec<Arc<dyn ServiceFile>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, service: Arc<dyn ServiceFile>) {
        self.services.push(service);
    }

    pub fn find(&self, filename: &str) -> Option<Arc<dyn ServiceFile>> {
        self.services
            .iter()
            .find(|service| service.filename() == filename)
            .cloned()
    }
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.services.iter().map(|s| s.filename()))
            .finish()
    }
}

/// Echoes the request query back as JSON; handy for probing proxies.
#[derive(Debug, Default)]
pub struct QueryEchoService;

impl ServiceFile for QueryEchoService {
    fn filename(&self) -> &str {
        "query.json"
    }

    fn content_type(&self) -> &str {
        "application/json; charset=utf-8"
    }

    fn generate(&self, query: &str) -> Result<Vec<u8>> {
        let params: serde_json::Map<String, serde_json::Value> = query
            .split('&')
            .filter(|pair| !pair.is_empty())
            .map(|pair| match pair.split_once('=') {
                Some((k, v)) => (k.to_string(), serde_json::Value::from(v)),
                None => (pair.to_string(), serde_json::Value::Null),
            })
            .collect();
        serde_json::to_vec(&params).map_err(MapproxyError::from)
    }
}

/// Extra files shared by every generator.
#[derive(Debug, Clone, Default)]
pub struct ExtraFiles {
    pub data_files: DataFileRegistry,
    pub services: ServiceRegistry,
}
