//! Per-family classification of resource filenames.
//!
//! Rules are tried in order: the `lod-x-y.ext` tile grammar, well-known
//! filenames, browser support files (browser enabled only), then the extra
//! data-file and service registries. Anything left is `Unknown`, which
//! callers must answer with NotFound.

use std::sync::{Arc, OnceLock};

use regex::Regex;

use super::support::{
    find_support_file, DataFile, ExtraFiles, ServiceFile, SupportFile, BROWSER_2D, BROWSER_3D,
};
use super::FileInfo;
use crate::resource::RasterFormat;
use crate::sink::{FileClass, SinkFileInfo};
use crate::tile::{TileId, MAX_LOD};

pub const MAP_CONFIG: &str = "mapConfig.json";
pub const BOUND_LAYER: &str = "boundlayer.json";
pub const FREE_LAYER: &str = "freelayer.json";
pub const DEBUG_CONFIG: &str = "debug.json";
pub const STYLE: &str = "style.json";
pub const GEO: &str = "geo";
pub const TILESET_CONFIG: &str = "tileset.conf";
pub const TILESET_INDEX: &str = "tileset.index";
pub const TILESET_REGISTRY: &str = "tileset.registry";

pub const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";
pub const PNG_CONTENT_TYPE: &str = "image/png";
pub const BINARY_CONTENT_TYPE: &str = "application/octet-stream";

/// `lod-x-y.ext` with unsigned decimal fields. A leading `0` is only
/// accepted when it is the whole field.
fn triplet_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(0|[1-9][0-9]*)-(0|[1-9][0-9]*)-(0|[1-9][0-9]*)\.(.*)$")
            .expect("triplet pattern is valid")
    })
}

/// Parses `lod-x-y.ext`, returning the tile and the extension.
pub fn parse_triplet(filename: &str) -> Option<(TileId, &str)> {
    let caps = triplet_pattern().captures(filename)?;
    let lod: u32 = caps.get(1)?.as_str().parse().ok()?;
    let x: u32 = caps.get(2)?.as_str().parse().ok()?;
    let y: u32 = caps.get(3)?.as_str().parse().ok()?;
    let ext = caps.get(4)?.as_str();

    if lod > u32::from(MAX_LOD) {
        return None;
    }
    Some((TileId::new(lod as u8, x, y), ext))
}

fn support_file(fi: &FileInfo, table: &'static [SupportFile]) -> Option<&'static SupportFile> {
    if !fi.browser_enabled {
        tracing::trace!(filename = %fi.filename, "Browser disabled, skipping browser files");
        return None;
    }
    find_support_file(table, &fi.filename)
}

fn support_info(support: &SupportFile) -> SinkFileInfo {
    SinkFileInfo::new(support.content_type)
        .with_last_modified(support.last_modified())
        .with_class(FileClass::Support)
}

/// Files of a TMS (bound layer) resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TmsFile {
    Image { tile: TileId, format: RasterFormat },
    Mask(TileId),
    Metatile(TileId),
    Config,
    Definition,
    Support(&'static SupportFile),
    Unknown,
}

impl TmsFile {
    pub fn classify(fi: &FileInfo) -> TmsFile {
        if let Some((tile, ext)) = parse_triplet(&fi.filename) {
            match ext {
                "mask" => return TmsFile::Mask(tile),
                "meta" => return TmsFile::Metatile(tile),
                _ => {
                    if let Ok(format) = ext.parse::<RasterFormat>() {
                        return TmsFile::Image { tile, format };
                    }
                }
            }
        }

        match fi.filename.as_str() {
            MAP_CONFIG => TmsFile::Config,
            BOUND_LAYER => TmsFile::Definition,
            _ => support_file(fi, BROWSER_2D)
                .map(TmsFile::Support)
                .unwrap_or(TmsFile::Unknown),
        }
    }

    pub fn sink_file_info(&self) -> Option<SinkFileInfo> {
        let info = match self {
            TmsFile::Config | TmsFile::Definition => {
                SinkFileInfo::new(JSON_CONTENT_TYPE).with_class(FileClass::Config)
            }
            TmsFile::Image { format, .. } => {
                SinkFileInfo::new(format.content_type()).with_class(FileClass::Data)
            }
            TmsFile::Mask(_) | TmsFile::Metatile(_) => {
                SinkFileInfo::new(PNG_CONTENT_TYPE).with_class(FileClass::Data)
            }
            TmsFile::Support(support) => support_info(support),
            TmsFile::Unknown => return None,
        };
        Some(info)
    }
}

/// Per-tile files of a surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileFileKind {
    Meta,
    Mesh,
    Atlas,
    Navtile,
    Meta2d,
    Mask,
    Ortho,
    Credits,
}

/// Variant of a surface file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFlavor {
    Regular,
    /// Unwrapped payload without the client envelope.
    Raw,
    /// Human-readable debug rendition.
    Debug,
}

impl TileFileKind {
    fn from_extension(ext: &str) -> Option<(TileFileKind, FileFlavor)> {
        let kind = match ext {
            "meta" => (TileFileKind::Meta, FileFlavor::Regular),
            "debug" => (TileFileKind::Meta, FileFlavor::Debug),
            "bin" => (TileFileKind::Mesh, FileFlavor::Regular),
            "mesh" => (TileFileKind::Mesh, FileFlavor::Raw),
            "jpg" => (TileFileKind::Atlas, FileFlavor::Regular),
            "nav" => (TileFileKind::Navtile, FileFlavor::Regular),
            "navtile" => (TileFileKind::Navtile, FileFlavor::Raw),
            "2dmeta" => (TileFileKind::Meta2d, FileFlavor::Regular),
            "mask" => (TileFileKind::Mask, FileFlavor::Regular),
            "ortho" => (TileFileKind::Ortho, FileFlavor::Regular),
            "credits" => (TileFileKind::Credits, FileFlavor::Regular),
            _ => return None,
        };
        Some(kind)
    }

    pub fn content_type(self) -> &'static str {
        match self {
            TileFileKind::Meta | TileFileKind::Credits => JSON_CONTENT_TYPE,
            TileFileKind::Mesh | TileFileKind::Navtile => BINARY_CONTENT_TYPE,
            TileFileKind::Atlas | TileFileKind::Ortho => "image/jpeg",
            TileFileKind::Meta2d | TileFileKind::Mask => PNG_CONTENT_TYPE,
        }
    }
}

/// Files of a surface resource.
#[derive(Clone)]
pub enum SurfaceFile {
    Tile {
        tile: TileId,
        kind: TileFileKind,
        flavor: FileFlavor,
    },
    Config,
    /// `tileset.conf`.
    RawConfig,
    TileIndex,
    Registry,
    DebugConfig,
    Definition,
    Support(&'static SupportFile),
    DataFile(DataFile),
    Service(Arc<dyn ServiceFile>),
    Unknown,
}

impl SurfaceFile {
    pub fn classify(fi: &FileInfo, extra: &ExtraFiles) -> SurfaceFile {
        if let Some((tile, ext)) = parse_triplet(&fi.filename) {
            if let Some((kind, flavor)) = TileFileKind::from_extension(ext) {
                return SurfaceFile::Tile { tile, kind, flavor };
            }
        }

        match fi.filename.as_str() {
            MAP_CONFIG => return SurfaceFile::Config,
            FREE_LAYER => return SurfaceFile::Definition,
            TILESET_CONFIG => return SurfaceFile::RawConfig,
            TILESET_INDEX => return SurfaceFile::TileIndex,
            TILESET_REGISTRY => return SurfaceFile::Registry,
            _ => {}
        }

        if let Some(support) = support_file(fi, BROWSER_3D) {
            return SurfaceFile::Support(support);
        }
        if let Some(file) = extra.data_files.get(&fi.filename) {
            return SurfaceFile::DataFile(file.clone());
        }
        if let Some(service) = extra.services.find(&fi.filename) {
            return SurfaceFile::Service(service);
        }
        if fi.filename == DEBUG_CONFIG {
            return SurfaceFile::DebugConfig;
        }
        SurfaceFile::Unknown
    }

    pub fn sink_file_info(&self) -> Option<SinkFileInfo> {
        let info = match self {
            SurfaceFile::Tile { kind, .. } => {
                SinkFileInfo::new(kind.content_type()).with_class(FileClass::Data)
            }
            SurfaceFile::Config
            | SurfaceFile::RawConfig
            | SurfaceFile::Registry
            | SurfaceFile::DebugConfig
            | SurfaceFile::Definition => {
                SinkFileInfo::new(JSON_CONTENT_TYPE).with_class(FileClass::Config)
            }
            SurfaceFile::TileIndex => {
                SinkFileInfo::new(BINARY_CONTENT_TYPE).with_class(FileClass::Config)
            }
            SurfaceFile::Support(support) => support_info(support),
            SurfaceFile::DataFile(file) => {
                SinkFileInfo::new(file.content_type.clone()).with_class(FileClass::Registry)
            }
            SurfaceFile::Service(service) => {
                SinkFileInfo::new(service.content_type()).with_class(FileClass::Config)
            }
            SurfaceFile::Unknown => return None,
        };
        Some(info)
    }
}

impl std::fmt::Debug for SurfaceFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SurfaceFile::Tile { tile, kind, flavor } => f
                .debug_struct("Tile")
                .field("tile", tile)
                .field("kind", kind)
                .field("flavor", flavor)
                .finish(),
            SurfaceFile::Config => f.write_str("Config"),
            SurfaceFile::RawConfig => f.write_str("RawConfig"),
            SurfaceFile::TileIndex => f.write_str("TileIndex"),
            SurfaceFile::Registry => f.write_str("Registry"),
            SurfaceFile::DebugConfig => f.write_str("DebugConfig"),
            SurfaceFile::Definition => f.write_str("Definition"),
            SurfaceFile::Support(s) => f.debug_tuple("Support").field(&s.path).finish(),
            SurfaceFile::DataFile(d) => f.debug_tuple("DataFile").field(&d.filename).finish(),
            SurfaceFile::Service(s) => f.debug_tuple("Service").field(&s.filename()).finish(),
            SurfaceFile::Unknown => f.write_str("Unknown"),
        }
    }
}

/// Files of a geodata resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeodataFile {
    /// Tile content, or the whole dataset for the flat driver.
    Geo(Option<TileId>),
    Metatile(TileId),
    Config,
    Definition,
    Style,
    Support(&'static SupportFile),
    DataFile(DataFile),
    Unknown,
}

impl GeodataFile {
    pub fn classify(fi: &FileInfo, tiled: bool, extra: &ExtraFiles) -> GeodataFile {
        if tiled {
            if let Some((tile, ext)) = parse_triplet(&fi.filename) {
                return match ext {
                    "geo" => GeodataFile::Geo(Some(tile)),
                    "meta" => GeodataFile::Metatile(tile),
                    _ => GeodataFile::Unknown,
                };
            }
        }

        match fi.filename.as_str() {
            MAP_CONFIG => return GeodataFile::Config,
            GEO if !tiled => return GeodataFile::Geo(None),
            FREE_LAYER => return GeodataFile::Definition,
            STYLE => return GeodataFile::Style,
            _ => {}
        }

        if let Some(support) = support_file(fi, BROWSER_3D) {
            return GeodataFile::Support(support);
        }
        extra
            .data_files
            .get(&fi.filename)
            .map(|file| GeodataFile::DataFile(file.clone()))
            .unwrap_or(GeodataFile::Unknown)
    }

    /// File info for this file; `geo_content_type` comes from the
    /// resource's vector format.
    pub fn sink_file_info(&self, geo_content_type: &str) -> Option<SinkFileInfo> {
        let info = match self {
            GeodataFile::Geo(_) => {
                SinkFileInfo::new(geo_content_type).with_class(FileClass::Data)
            }
            GeodataFile::Metatile(_) => {
                SinkFileInfo::new(JSON_CONTENT_TYPE).with_class(FileClass::Data)
            }
            GeodataFile::Config | GeodataFile::Definition | GeodataFile::Style => {
                SinkFileInfo::new(JSON_CONTENT_TYPE).with_class(FileClass::Config)
            }
            GeodataFile::Support(support) => support_info(support),
            GeodataFile::DataFile(file) => {
                SinkFileInfo::new(file.content_type.clone()).with_class(FileClass::Registry)
            }
            GeodataFile::Unknown => return None,
        };
        Some(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::support::{DataFileRegistry, QueryEchoService, ServiceRegistry};
    use crate::path::Route;

    fn file_info(filename: &str, browser_enabled: bool) -> FileInfo {
        FileInfo {
            url: format!("/rf1/x/g/i/{}", filename),
            path: format!("/rf1/x/g/i/{}", filename),
            query: String::new(),
            filename: filename.to_string(),
            route: Route::DirRedirect,
            browser_enabled,
        }
    }

    fn extra() -> ExtraFiles {
        let mut services = ServiceRegistry::new();
        services.register(Arc::new(QueryEchoService));
        ExtraFiles {
            data_files: DataFileRegistry::new([DataFile {
                filename: "legend.png".to_string(),
                path: "/data/legend.png".into(),
                content_type: "image/png".to_string(),
            }]),
            services,
        }
    }

    #[test]
    fn test_parse_triplet() {
        assert_eq!(
            parse_triplet("5-3-2.jpg"),
            Some((TileId::new(5, 3, 2), "jpg"))
        );
        assert_eq!(
            parse_triplet("0-1-1.jpg"),
            Some((TileId::new(0, 1, 1), "jpg"))
        );
        assert_eq!(parse_triplet("00-1-1.jpg"), None);
        assert_eq!(parse_triplet("1-01-1.jpg"), None);
        assert_eq!(parse_triplet("+1-1-1.jpg"), None);
        assert_eq!(parse_triplet("1--1-1.jpg"), None);
        assert_eq!(parse_triplet("1-1-1"), None);
        assert_eq!(parse_triplet("1-1.jpg"), None);
        assert_eq!(parse_triplet("32-0-0.jpg"), None);
        assert_eq!(parse_triplet("1-99999999999-0.jpg"), None);
    }

    #[test]
    fn test_tms_files() {
        assert_eq!(
            TmsFile::classify(&file_info("5-3-2.jpg", true)),
            TmsFile::Image {
                tile: TileId::new(5, 3, 2),
                format: RasterFormat::Jpg
            }
        );
        assert_eq!(
            TmsFile::classify(&file_info("5-3-2.mask", true)),
            TmsFile::Mask(TileId::new(5, 3, 2))
        );
        assert_eq!(
            TmsFile::classify(&file_info("8-0-0.meta", true)),
            TmsFile::Metatile(TileId::new(8, 0, 0))
        );
        assert_eq!(
            TmsFile::classify(&file_info("boundlayer.json", true)),
            TmsFile::Definition
        );
        assert_eq!(TmsFile::classify(&file_info("5-3-2.gif", true)), TmsFile::Unknown);
    }

    #[test]
    fn test_tms_browser_files_need_browser() {
        assert!(matches!(
            TmsFile::classify(&file_info("index.html", true)),
            TmsFile::Support(file) if file.path == "index.html"
        ));
        assert!(matches!(
            TmsFile::classify(&file_info("", true)),
            TmsFile::Support(_)
        ));
        assert_eq!(TmsFile::classify(&file_info("index.html", false)), TmsFile::Unknown);
    }

    #[test]
    fn test_unknown_has_no_file_info() {
        assert!(TmsFile::Unknown.sink_file_info().is_none());
        assert!(SurfaceFile::Unknown.sink_file_info().is_none());
        assert!(GeodataFile::Unknown.sink_file_info("x").is_none());
    }

    #[test]
    fn test_surface_files() {
        let extra = extra();
        assert!(matches!(
            SurfaceFile::classify(&file_info("10-4-5.bin", true), &extra),
            SurfaceFile::Tile { kind: TileFileKind::Mesh, flavor: FileFlavor::Regular, .. }
        ));
        assert!(matches!(
            SurfaceFile::classify(&file_info("10-4-5.navtile", true), &extra),
            SurfaceFile::Tile { kind: TileFileKind::Navtile, flavor: FileFlavor::Raw, .. }
        ));
        assert!(matches!(
            SurfaceFile::classify(&file_info("tileset.conf", true), &extra),
            SurfaceFile::RawConfig
        ));
        assert!(matches!(
            SurfaceFile::classify(&file_info("tileset.index", true), &extra),
            SurfaceFile::TileIndex
        ));
        assert!(matches!(
            SurfaceFile::classify(&file_info("legend.png", false), &extra),
            SurfaceFile::DataFile(_)
        ));
        assert!(matches!(
            SurfaceFile::classify(&file_info("query.json", false), &extra),
            SurfaceFile::Service(_)
        ));
        assert!(matches!(
            SurfaceFile::classify(&file_info("debug.json", false), &extra),
            SurfaceFile::DebugConfig
        ));
        assert!(matches!(
            SurfaceFile::classify(&file_info("index.html", false), &extra),
            SurfaceFile::Unknown
        ));
    }

    #[test]
    fn test_geodata_tiled_and_flat() {
        let extra = extra();
        assert_eq!(
            GeodataFile::classify(&file_info("3-1-2.geo", true), true, &extra),
            GeodataFile::Geo(Some(TileId::new(3, 1, 2)))
        );
        assert_eq!(
            GeodataFile::classify(&file_info("3-0-0.meta", true), true, &extra),
            GeodataFile::Metatile(TileId::new(3, 0, 0))
        );
        assert_eq!(
            GeodataFile::classify(&file_info("3-1-2.png", true), true, &extra),
            GeodataFile::Unknown
        );
        assert_eq!(
            GeodataFile::classify(&file_info("geo", true), false, &extra),
            GeodataFile::Geo(None)
        );
        assert_eq!(
            GeodataFile::classify(&file_info("geo", true), true, &extra),
            GeodataFile::Unknown
        );
        assert_eq!(
            GeodataFile::classify(&file_info("3-1-2.geo", true), false, &extra),
            GeodataFile::Unknown
        );
        assert_eq!(
            GeodataFile::classify(&file_info("style.json", true), false, &extra),
            GeodataFile::Style
        );
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn test_canonical_fields_accepted(lod in 0u8..=MAX_LOD, x: u32, y: u32) {
                let name = format!("{}-{}-{}.jpg", lod, x, y);
                prop_assert_eq!(parse_triplet(&name), Some((TileId::new(lod, x, y), "jpg")));
            }

            #[test]
            fn test_signed_fields_rejected(field in 0usize..3, sign in prop::sample::select(vec!['+', '-'])) {
                let mut parts = vec!["1".to_string(), "2".to_string(), "3".to_string()];
                parts[field] = format!("{}{}", sign, parts[field]);
                let name = format!("{}.jpg", parts.join("-"));
                prop_assert_eq!(parse_triplet(&name), None);
            }

            #[test]
            fn test_zero_padded_fields_rejected(field in 0usize..3, value in 0u32..1000) {
                let mut parts = vec!["1".to_string(), "2".to_string(), "3".to_string()];
                parts[field] = format!("0{}", value);
                let name = format!("{}.jpg", parts.join("-"));
                prop_assert_eq!(parse_triplet(&name), None);
            }
        }
    }
}
