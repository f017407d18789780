//! Request path classification.
//!
//! Maps a request path onto the resource hierarchy:
//!
//! ```text
//! /                                  reference frame listing
//! /{rf}/                             type listing      (index.html → browser, dems.html)
//! /{rf}/{type}/                      group listing     (index.html → browser)
//! /{rf}/{type}/{group}/              id listing        (index.html → browser)
//! /{rf}/{type}/{group}/{id}/{file}   resource file
//! ```
//!
//! Anything else at a known level without a trailing slash is redirected to
//! the directory form. The filename left over for a resource file is
//! classified further by the generator family (see [`file_kind`]).

pub mod file_kind;
pub mod support;

use std::fmt;

use crate::error::{MapproxyError, Result};
use crate::reference_frame::ReferenceFrameRegistry;
use crate::resource::{GeneratorType, ResourceId};

/// Header that disables the HTML browser for one request.
pub const DISABLE_BROWSER_HEADER: &str = "X-Mapproxy-Disable-Browser";

pub const INDEX_FILE: &str = "index.html";
pub const DEMS_FILE: &str = "dems.html";

/// Incoming request, independent of the HTTP transport.
#[derive(Debug, Clone, Default)]
pub struct Request {
    pub path: String,
    pub query: String,
    headers: Vec<(String, String)>,
}

impl Request {
    /// Builds a request from `path?query`.
    pub fn new(uri: &str) -> Self {
        let (path, query) = match uri.split_once('?') {
            Some((path, query)) => (path, query),
            None => (uri, ""),
        };
        Self {
            path: path.to_string(),
            query: query.to_string(),
            headers: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Header lookup, case-insensitive on the name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn uri(&self) -> String {
        if self.query.is_empty() {
            self.path.clone()
        } else {
            format!("{}?{}", self.path, self.query)
        }
    }
}

/// Process-wide classification switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileFlags {
    pub browser_enabled: bool,
}

impl Default for FileFlags {
    fn default() -> Self {
        Self {
            browser_enabled: true,
        }
    }
}

/// Coarse routing outcome of a request path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    ReferenceFrameListing,
    ReferenceFrameBrowser {
        reference_frame: String,
    },
    ReferenceFrameDems {
        reference_frame: String,
    },
    TypeListing {
        reference_frame: String,
    },
    TypeBrowser {
        reference_frame: String,
        generator_type: GeneratorType,
    },
    GroupListing {
        reference_frame: String,
        generator_type: GeneratorType,
    },
    GroupBrowser {
        reference_frame: String,
        generator_type: GeneratorType,
        group: String,
    },
    IdListing {
        reference_frame: String,
        generator_type: GeneratorType,
        group: String,
    },
    /// Path names a directory without the trailing slash.
    DirRedirect,
    ResourceFile(ResourceId),
}

/// Classified request.
#[derive(Debug, Clone)]
pub struct FileInfo {
    pub url: String,
    pub path: String,
    pub query: String,
    /// Last path component (empty for directory requests).
    pub filename: String,
    pub route: Route,
    /// Browser flag after applying the per-request override.
    pub browser_enabled: bool,
}

impl FileInfo {
    /// Classifies `request` against the known reference frames.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown reference frames, unknown generator types and
    /// paths with an unsupported number of components.
    pub fn new(
        request: &Request,
        flags: FileFlags,
        frames: &ReferenceFrameRegistry,
    ) -> Result<FileInfo> {
        let browser_enabled =
            flags.browser_enabled && request.header(DISABLE_BROWSER_HEADER).is_none();

        let components = split_path(&request.path);
        let level = components.len().saturating_sub(1);
        let filename = components.last().copied().unwrap_or_default().to_string();

        let check_frame = |rf: &str| -> Result<String> {
            if frames.contains(rf) {
                Ok(rf.to_string())
            } else {
                Err(MapproxyError::not_found(format!(
                    "<{}> is not known reference frame.",
                    rf
                )))
            }
        };

        let route = match level {
            1 => match filename.as_str() {
                "" | INDEX_FILE => Route::ReferenceFrameListing,
                _ => Route::DirRedirect,
            },
            2 => {
                let reference_frame = check_frame(components[1])?;
                match filename.as_str() {
                    INDEX_FILE => Route::ReferenceFrameBrowser { reference_frame },
                    DEMS_FILE => Route::ReferenceFrameDems { reference_frame },
                    "" => Route::TypeListing { reference_frame },
                    _ => Route::DirRedirect,
                }
            }
            3 => {
                let reference_frame = check_frame(components[1])?;
                let generator_type: GeneratorType = components[2].parse()?;
                match filename.as_str() {
                    INDEX_FILE => Route::TypeBrowser {
                        reference_frame,
                        generator_type,
                    },
                    "" => Route::GroupListing {
                        reference_frame,
                        generator_type,
                    },
                    _ => Route::DirRedirect,
                }
            }
            4 => {
                let reference_frame = check_frame(components[1])?;
                let generator_type: GeneratorType = components[2].parse()?;
                let group = components[3].to_string();
                match filename.as_str() {
                    INDEX_FILE => Route::GroupBrowser {
                        reference_frame,
                        generator_type,
                        group,
                    },
                    "" => Route::IdListing {
                        reference_frame,
                        generator_type,
                        group,
                    },
                    _ => Route::DirRedirect,
                }
            }
            5 => {
                let reference_frame = check_frame(components[1])?;
                let generator_type: GeneratorType = components[2].parse()?;
                Route::ResourceFile(ResourceId::new(
                    reference_frame,
                    generator_type,
                    components[3],
                    components[4],
                ))
            }
            _ => {
                return Err(MapproxyError::not_found(format!(
                    "URL <{}> not found: invalid number of path components.",
                    request.uri()
                )))
            }
        };

        Ok(FileInfo {
            url: request.uri(),
            path: request.path.clone(),
            query: request.query.clone(),
            filename,
            route,
            browser_enabled,
        })
    }

    /// Resource addressed by this request, if it is a resource file.
    pub fn resource_id(&self) -> Option<&ResourceId> {
        match &self.route {
            Route::ResourceFile(id) => Some(id),
            _ => None,
        }
    }
}

impl fmt::Display for FileInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?})", self.url, self.route)
    }
}

/// Splits on `/`, compressing runs of separators into one.
///
/// The leading and trailing (possibly empty) components are kept, so `/a/`
/// yields `["", "a", ""]`.
fn split_path(path: &str) -> Vec<&str> {
    let parts: Vec<&str> = path.split('/').collect();
    let last = parts.len() - 1;
    parts
        .iter()
        .enumerate()
        .filter(|(i, part)| *i == 0 || *i == last || !part.is_empty())
        .map(|(_, part)| *part)
        .collect()
}
