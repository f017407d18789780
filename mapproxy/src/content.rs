//! Request dispatch: listings, redirects and browser pages are answered here,
//! resource files are delegated to their generator.

use std::fmt::Write as _;
use std::sync::Arc;

use crate::error::{MapproxyError, Result};
use crate::generator::{GeneratorRegistry, Reply};
use crate::path::{FileFlags, FileInfo, Request, Route, DEMS_FILE, INDEX_FILE};
use crate::resource::{Definition, GeneratorType};
use crate::sink::SinkFileInfo;

const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";
const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ListingItem {
    pub name: String,
    pub dir: bool,
}

impl ListingItem {
    pub fn dir(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dir: true,
        }
    }

    pub fn file(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dir: false,
        }
    }
}

/// Front of the proxy, independent of the HTTP transport.
pub struct ContentGenerator {
    registry: Arc<GeneratorRegistry>,
    flags: FileFlags,
}

impl ContentGenerator {
    pub fn new(registry: Arc<GeneratorRegistry>) -> Self {
        let flags = registry.config().file_flags;
        Self { registry, flags }
    }

    pub fn registry(&self) -> &Arc<GeneratorRegistry> {
        &self.registry
    }

    pub fn classify(&self, request: &Request) -> Result<FileInfo> {
        FileInfo::new(request, self.flags, self.registry.frames())
    }

    /// Produces the reply to `request`.
    ///
    /// # Errors
    ///
    /// `NotFound` for anything that does not resolve, `Unavailable` when the
    /// addressed generator is not ready yet.
    pub fn handle(&self, request: &Request) -> Result<Reply> {
        let fi = self.classify(request)?;
        tracing::debug!(file = %fi, "Handling request");

        match &fi.route {
            Route::ReferenceFrameListing => {
                let items = self
                    .registry
                    .list_reference_frames()
                    .into_iter()
                    .map(ListingItem::dir)
                    .collect();
                Ok(listing(&fi, items))
            }
            Route::TypeListing { reference_frame } => {
                let mut items: Vec<ListingItem> = self
                    .registry
                    .list_types(reference_frame)
                    .into_iter()
                    .map(|t| ListingItem::dir(t.as_str()))
                    .collect();
                items.push(ListingItem::file(DEMS_FILE));
                if fi.browser_enabled {
                    items.push(ListingItem::file(INDEX_FILE));
                }
                Ok(listing(&fi, items))
            }
            Route::GroupListing {
                reference_frame,
                generator_type,
            } => {
                let items = self
                    .registry
                    .list_groups(reference_frame, *generator_type)
                    .into_iter()
                    .map(ListingItem::dir)
                    .collect();
                Ok(listing(&fi, items))
            }
            Route::IdListing {
                reference_frame,
                generator_type,
                group,
            } => {
                let items = self
                    .registry
                    .list_ids(reference_frame, *generator_type, group)
                    .into_iter()
                    .map(ListingItem::dir)
                    .collect();
                Ok(listing(&fi, items))
            }
            Route::ReferenceFrameBrowser { reference_frame } => {
                self.browser(&fi, self.registry.list_types(reference_frame).iter().map(|t| t.as_str().to_string()))
            }
            Route::TypeBrowser {
                reference_frame,
                generator_type,
            } => self.browser(&fi, self.registry.list_groups(reference_frame, *generator_type)),
            Route::GroupBrowser {
                reference_frame,
                generator_type,
                group,
            } => self.browser(&fi, self.registry.list_ids(reference_frame, *generator_type, group)),
            Route::ReferenceFrameDems { reference_frame } => Ok(self.dems(reference_frame)),
            Route::DirRedirect => {
                let mut location = format!("{}/", fi.path);
                if !fi.query.is_empty() {
                    location.push('?');
                    location.push_str(&fi.query);
                }
                Ok(Reply::Redirect(location))
            }
            Route::ResourceFile(id) => {
                let generator = self.registry.lookup(id)?;
                generator.core().check_ready()?;
                generator.generate_file(&fi)
            }
        }
    }

    /// Browser entry page of a directory level.
    fn browser(&self, fi: &FileInfo, entries: impl IntoIterator<Item = String>) -> Result<Reply> {
        if !fi.browser_enabled {
            return Err(MapproxyError::not_found("Browser disabled."));
        }
        let items = entries.into_iter().map(ListingItem::dir).collect();
        Ok(html_listing(&fi.path, items))
    }

    /// Table of DEM surfaces of one frame with their height-coding aliases.
    fn dems(&self, rf: &str) -> Reply {
        let mut out = String::new();
        for resource in self.registry.resources_of(rf, GeneratorType::Surface) {
            if let Definition::SurfaceDem(def) = &resource.definition {
                let alias = def.heightcoding_alias.as_deref().unwrap_or("");
                let _ = writeln!(
                    out,
                    "{}\t{}\t{}\t{}",
                    resource.id.full_id(),
                    def.dem.dataset,
                    def.dem.geoid_grid.as_deref().unwrap_or("none"),
                    alias
                );
            }
        }
        Reply::content(out.into_bytes(), SinkFileInfo::new(TEXT_CONTENT_TYPE))
    }
}

fn listing(fi: &FileInfo, items: Vec<ListingItem>) -> Reply {
    if fi.browser_enabled {
        return html_listing(&fi.path, items);
    }

    let mut items = items;
    items.sort();
    let mut out = String::new();
    for item in items {
        out.push_str(&item.name);
        if item.dir {
            out.push('/');
        }
        out.push('\n');
    }
    Reply::content(out.into_bytes(), SinkFileInfo::new(TEXT_CONTENT_TYPE))
}

fn html_listing(path: &str, mut items: Vec<ListingItem>) -> Reply {
    items.sort();
    let path = escape_html(path);
    let mut out = format!(
        "<html>\n<head><title>Index of {path}</title></head>\n<body bgcolor=\"white\">\n\
         <h1>Index of {path}\n</h1><hr><pre><a href=\"../\">../</a>\n"
    );
    for item in items {
        let suffix = if item.dir { "/" } else { "" };
        let _ = writeln!(out, "<a href=\"{0}{1}\">{0}{1}</a>", escape_html(&item.name), suffix);
    }
    out.push_str("</pre><hr></body>\n</html>\n");
    Reply::content(out.into_bytes(), SinkFileInfo::new(HTML_CONTENT_TYPE))
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arsenal::tests::test_arsenal;
    use crate::generator::registry::tests::MemoryBackend;
    use crate::generator::tests::test_frames;
    use crate::generator::{FactoryRegistry, GeneratorConfig};
    use crate::path::DISABLE_BROWSER_HEADER;
    use crate::resource::tests::tms_resource;
    use std::path::Path;

    fn content(root: &Path) -> ContentGenerator {
        let backend = Arc::new(MemoryBackend::default());
        backend.set([tms_resource("ortho.png")]);
        let registry = GeneratorRegistry::new(
            Arc::new(GeneratorConfig::new(root.join("store"), root)),
            FactoryRegistry::with_defaults(),
            backend,
            Arc::new(test_arsenal(root)),
            Arc::new(test_frames()),
        );
        registry.refresh().unwrap();
        ContentGenerator::new(Arc::new(registry))
    }

    fn text(reply: Reply) -> String {
        match reply {
            Reply::Content { data, .. } => String::from_utf8(data.to_vec()).unwrap(),
            other => panic!("unexpected reply {:?}", other),
        }
    }

    #[test]
    fn test_html_listing_escapes_names() {
        let html = text(html_listing(
            "/rf1/tms/<grp>/",
            vec![ListingItem::dir("a&b"), ListingItem::file("\"x\".json")],
        ));
        assert!(html.contains("Index of /rf1/tms/&lt;grp&gt;/"));
        assert!(html.contains("<a href=\"a&amp;b/\">a&amp;b/</a>"));
        assert!(html.contains("&quot;x&quot;.json"));
        assert!(!html.contains("<grp>"));
    }

    #[test]
    fn test_listings_follow_browser_flag() {
        let dir = tempfile::TempDir::new().unwrap();
        let content = content(dir.path());

        let html = text(content.handle(&Request::new("/rf1/tms/")).unwrap());
        assert!(html.contains("<a href=\"grp/\">grp/</a>"));

        let plain = Request::new("/rf1/").with_header(DISABLE_BROWSER_HEADER, "1");
        assert_eq!(text(content.handle(&plain).unwrap()), "dems.html\ntms/\n");

        let plain = Request::new("/rf1/tms/grp/").with_header(DISABLE_BROWSER_HEADER, "1");
        assert_eq!(text(content.handle(&plain).unwrap()), "layer1/\n");
    }

    #[test]
    fn test_directory_redirect_keeps_query() {
        let dir = tempfile::TempDir::new().unwrap();
        let content = content(dir.path());

        match content.handle(&Request::new("/rf1/tms/grp/layer1?x=1")).unwrap() {
            Reply::Redirect(location) => assert_eq!(location, "/rf1/tms/grp/layer1/?x=1"),
            other => panic!("unexpected reply {:?}", other),
        }
    }

    #[test]
    fn test_browser_page_needs_browser() {
        let dir = tempfile::TempDir::new().unwrap();
        let content = content(dir.path());

        assert!(text(content.handle(&Request::new("/rf1/index.html")).unwrap()).contains("tms/"));
        let request = Request::new("/rf1/index.html").with_header(DISABLE_BROWSER_HEADER, "1");
        assert!(matches!(content.handle(&request), Err(MapproxyError::NotFound(_))));
    }

    #[test]
    fn test_cold_generator_is_unavailable() {
        let dir = tempfile::TempDir::new().unwrap();
        let content = content(dir.path());

        let err = content.handle(&Request::new("/rf1/tms/grp/layer1/2-0-0.jpg")).err().unwrap();
        assert!(matches!(err, MapproxyError::Unavailable(_)));

        let err = content.handle(&Request::new("/rf1/tms/grp/missing/2-0-0.jpg")).err().unwrap();
        assert!(matches!(err, MapproxyError::NotFound(_)));
    }

    #[test]
    fn test_unknown_frame_is_not_found() {
        let dir = tempfile::TempDir::new().unwrap();
        let content = content(dir.path());
        assert!(matches!(
            content.handle(&Request::new("/unknownrf/tms/g/i/x")),
            Err(MapproxyError::NotFound(_))
        ));
    }
}
