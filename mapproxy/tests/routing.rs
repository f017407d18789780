//! End-to-end routing through the content generator.

mod common;

use std::sync::Arc;

use bytes::Bytes;
use mapproxy::content::ContentGenerator;
use mapproxy::generator::Reply;
use mapproxy::path::file_kind::TmsFile;
use mapproxy::path::{Request, Route, DISABLE_BROWSER_HEADER};
use mapproxy::resource::RasterFormat;
use mapproxy::tile::TileId;
use mapproxy::resource::{GeneratorType, ResourceId};
use mapproxy::service::MapproxyService;
use mapproxy::sink::{Sink, SinkFileInfo};
use mapproxy::MapproxyError;

#[derive(Default)]
struct CollectSink {
    output: Option<Result<(Bytes, SinkFileInfo), MapproxyError>>,
}

impl Sink for CollectSink {
    fn content(&mut self, data: Bytes, info: SinkFileInfo) {
        self.output = Some(Ok((data, info)));
    }

    fn error(&mut self, error: MapproxyError) {
        self.output = Some(Err(error));
    }

    fn check_aborted(&self) -> mapproxy::Result<()> {
        Ok(())
    }
}

fn ortho_id() -> ResourceId {
    ResourceId::new("rf1", GeneratorType::Tms, "grp", "ortho")
}

fn setup(dir: &std::path::Path, prepare: bool) -> Arc<ContentGenerator> {
    let config = common::fixture_config(dir, true);
    let service = MapproxyService::from_config(&config).unwrap();
    let content = Arc::clone(service.content());
    content.registry().refresh().unwrap();
    if prepare {
        content.registry().prepare_now(&ortho_id()).unwrap();
    }
    content
}

/// Resolves a reply to its bytes, running deferred tasks inline.
fn resolve(content: &ContentGenerator, path: &str) -> Result<(Bytes, SinkFileInfo), MapproxyError> {
    let request = Request::new(path).with_header(DISABLE_BROWSER_HEADER, "1");
    match content.handle(&request)? {
        Reply::Content { data, info } => Ok((data, info)),
        Reply::Redirect(location) => panic!("unexpected redirect to {}", location),
        Reply::Deferred(task) => {
            let mut sink = CollectSink::default();
            content.registry().arsenal().execute(task, &mut sink);
            sink.output.expect("task wrote nothing")
        }
    }
}

fn text(content: &ContentGenerator, path: &str) -> String {
    let (data, _) = resolve(content, path).unwrap();
    String::from_utf8(data.to_vec()).unwrap()
}

#[test]
fn test_classification() {
    let dir = tempfile::TempDir::new().unwrap();
    let content = setup(dir.path(), false);

    let fi = content.classify(&Request::new("/rf1/tms/grp/layer1/5-3-2.jpg")).unwrap();
    assert_eq!(
        fi.route,
        Route::ResourceFile(ResourceId::new("rf1", GeneratorType::Tms, "grp", "layer1"))
    );
    assert_eq!(
        TmsFile::classify(&fi),
        TmsFile::Image {
            tile: TileId::new(5, 3, 2),
            format: RasterFormat::Jpg
        }
    );

    let fi = content.classify(&Request::new("/rf1/tms/grp/layer1/index.html")).unwrap();
    assert!(matches!(TmsFile::classify(&fi), TmsFile::Support(_)));

    assert!(matches!(
        content.classify(&Request::new("/unknownrf/tms/g/i/x")),
        Err(MapproxyError::NotFound(_))
    ));
}

#[test]
fn test_listing_hierarchy() {
    let dir = tempfile::TempDir::new().unwrap();
    let content = setup(dir.path(), false);

    assert_eq!(text(&content, "/"), "rf1/\n");
    assert_eq!(text(&content, "/rf1/"), "dems.html\ntms/\n");
    assert_eq!(text(&content, "/rf1/tms/"), "grp/\n");
    assert_eq!(text(&content, "/rf1/tms/grp/"), "ortho/\n");
}

#[test]
fn test_html_listing_with_browser() {
    let dir = tempfile::TempDir::new().unwrap();
    let content = setup(dir.path(), false);

    match content.handle(&Request::new("/rf1/tms/grp/")).unwrap() {
        Reply::Content { data, info } => {
            assert!(info.content_type.starts_with("text/html"));
            let html = String::from_utf8(data.to_vec()).unwrap();
            assert!(html.contains("<a href=\"ortho/\">ortho/</a>"));
        }
        other => panic!("unexpected reply {:?}", other),
    }
}

#[test]
fn test_directory_without_slash_redirects() {
    let dir = tempfile::TempDir::new().unwrap();
    let content = setup(dir.path(), false);

    match content.handle(&Request::new("/rf1/tms/grp/ortho")).unwrap() {
        Reply::Redirect(location) => assert_eq!(location, "/rf1/tms/grp/ortho/"),
        other => panic!("unexpected reply {:?}", other),
    }
}

#[test]
fn test_unprepared_resource_is_unavailable() {
    let dir = tempfile::TempDir::new().unwrap();
    let content = setup(dir.path(), false);

    let err = resolve(&content, "/rf1/tms/grp/ortho/2-0-0.jpg").unwrap_err();
    assert!(matches!(err, MapproxyError::Unavailable(_)));
}

#[test]
fn test_prepared_resource_serves_tiles() {
    let dir = tempfile::TempDir::new().unwrap();
    let content = setup(dir.path(), true);

    let (data, info) = resolve(&content, "/rf1/tms/grp/ortho/2-0-0.jpg").unwrap();
    assert_eq!(info.content_type, "image/jpeg");
    assert_eq!(&data[..2], &[0xff, 0xd8]);

    let (data, _) = resolve(&content, "/rf1/tms/grp/ortho/mapConfig.json").unwrap();
    let value: serde_json::Value = serde_json::from_slice(&data).unwrap();
    assert_eq!(value["boundLayers"]["grp-ortho"], "boundlayer.json");
}

#[test]
fn test_not_found_cases() {
    let dir = tempfile::TempDir::new().unwrap();
    let content = setup(dir.path(), true);

    for path in [
        "/unknown/tms/grp/ortho/2-0-0.jpg",
        "/rf1/vector/grp/ortho/",
        "/rf1/tms/grp/missing/2-0-0.jpg",
        "/rf1/tms/grp/ortho/1-0-0.jpg",
        "/rf1/tms/grp/ortho/2-0-0.what",
    ] {
        let err = resolve(&content, path).unwrap_err();
        assert!(
            matches!(err, MapproxyError::NotFound(_)),
            "{} gave {:?}",
            path,
            err
        );
    }
}

#[test]
fn test_prepared_state_survives_restart() {
    let dir = tempfile::TempDir::new().unwrap();
    setup(dir.path(), true);

    // a fresh service over the same store serves without preparing again
    let content = setup(dir.path(), false);
    let (data, _) = resolve(&content, "/rf1/tms/grp/ortho/2-0-0.jpg").unwrap();
    assert!(!data.is_empty());
}
