//! Generators: stateful per-resource content producers.
//!
//! Every generator goes through the same lifecycle:
//!
//! ```text
//!   cold ──begin_prepare (CAS)──► preparing ──ok──► ready
//!    ▲                               │
//!    └──────────── failure ──────────┘
//! ```
//!
//! A generator whose persisted state loads on construction skips straight to
//! `ready`. Requests against a generator that is not ready fail with
//! `Unavailable`; the registry keeps retrying preparation in the background.
//!
//! Families are registered in a [`FactoryRegistry`] keyed by
//! [`GeneratorKind`], populated once at startup.

mod geodata;
pub mod map_config;
pub mod registry;
mod surface_dem;
pub mod tile_index;
mod tms_raster;
mod tms_remote;

pub use geodata::GeodataVector;
pub use map_config::MapConfig;
pub use registry::{GeneratorRegistry, RefreshStats};
pub use surface_dem::SurfaceDem;
pub use tile_index::{MetaFlags, TileFlags, TileIndex};
pub use tms_raster::TmsRaster;
pub use tms_remote::TmsRemote;

use std::collections::HashMap;
use std::fmt;
use std::io::Cursor;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use image::{DynamicImage, ImageFormat};
use parking_lot::RwLock;
use serde::Serialize;

use crate::arsenal::{panic_message, Arsenal, Task};
use crate::error::{MapproxyError, Result};
use crate::path::support::{DataFile, ExtraFiles, SupportFile};
use crate::path::{FileFlags, FileInfo};
use crate::reference_frame::ReferenceFrame;
use crate::resource::{Changed, GeneratorKind, GeneratorType, RasterFormat, Resource, ResourceId};
use crate::sink::{FileClass, SinkFileInfo};

/// Name of the persisted resource snapshot in a generator's store.
pub const RESOURCE_SNAPSHOT: &str = "resource.json";

/// Settings shared by all generators.
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// Store of persisted generator state.
    pub root: PathBuf,
    /// Base of relative dataset paths.
    pub resource_root: PathBuf,
    pub file_flags: FileFlags,
    pub extra: Arc<ExtraFiles>,
}

impl GeneratorConfig {
    pub fn new(root: impl Into<PathBuf>, resource_root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            resource_root: resource_root.into(),
            file_flags: FileFlags::default(),
            extra: Arc::new(ExtraFiles::default()),
        }
    }

    pub fn with_file_flags(mut self, file_flags: FileFlags) -> Self {
        self.file_flags = file_flags;
        self
    }

    pub fn with_extra(mut self, extra: Arc<ExtraFiles>) -> Self {
        self.extra = extra;
        self
    }

    /// Resolves a dataset path against the resource root.
    pub fn absolute_dataset(&self, path: &str) -> PathBuf {
        self.resource_root.join(path)
    }
}

/// Everything a factory needs to build a generator.
#[derive(Debug, Clone)]
pub struct GeneratorParams {
    pub config: Arc<GeneratorConfig>,
    pub resource: Resource,
    pub reference_frame: Arc<ReferenceFrame>,
}

/// Preparation state of a generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Lifecycle {
    Cold = 0,
    Preparing = 1,
    Ready = 2,
}

impl Lifecycle {
    fn from_u8(value: u8) -> Lifecycle {
        match value {
            1 => Lifecycle::Preparing,
            2 => Lifecycle::Ready,
            _ => Lifecycle::Cold,
        }
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Lifecycle::Cold => "cold",
            Lifecycle::Preparing => "preparing",
            Lifecycle::Ready => "ready",
        };
        f.write_str(name)
    }
}

/// State shared by every generator family.
#[derive(Debug)]
pub struct GeneratorCore {
    config: Arc<GeneratorConfig>,
    resource: RwLock<Resource>,
    reference_frame: Arc<ReferenceFrame>,
    store: PathBuf,
    state: AtomicU8,
    fresh: AtomicBool,
    scheduled: AtomicBool,
    created: DateTime<Utc>,
}

impl GeneratorCore {
    pub fn new(params: GeneratorParams) -> Self {
        let id = &params.resource.id;
        let store = params
            .config
            .root
            .join(&id.reference_frame)
            .join(id.generator_type.as_str())
            .join(&id.group)
            .join(&id.id);

        Self {
            config: params.config,
            resource: RwLock::new(params.resource),
            reference_frame: params.reference_frame,
            store,
            state: AtomicU8::new(Lifecycle::Cold as u8),
            fresh: AtomicBool::new(true),
            scheduled: AtomicBool::new(false),
            created: Utc::now(),
        }
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    pub fn id(&self) -> ResourceId {
        self.resource.read().id.clone()
    }

    /// Snapshot of the current resource.
    pub fn resource(&self) -> Resource {
        self.resource.read().clone()
    }

    /// Applies a change that does not alter served content.
    pub fn update_resource(&self, resource: Resource) {
        *self.resource.write() = resource;
    }

    pub fn reference_frame(&self) -> &Arc<ReferenceFrame> {
        &self.reference_frame
    }

    pub fn store(&self) -> &Path {
        &self.store
    }

    pub fn store_path(&self, name: &str) -> PathBuf {
        self.store.join(name)
    }

    pub fn lifecycle(&self) -> Lifecycle {
        Lifecycle::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_ready(&self) -> bool {
        self.lifecycle() == Lifecycle::Ready
    }

    /// Fails with `Unavailable` unless ready. Never blocks.
    pub fn check_ready(&self) -> Result<()> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(MapproxyError::unavailable(format!(
                "Resource <{}> not ready.",
                self.id()
            )))
        }
    }

    /// Claims the single preparation slot. Only one caller wins.
    pub fn begin_prepare(&self) -> bool {
        self.state
            .compare_exchange(
                Lifecycle::Cold as u8,
                Lifecycle::Preparing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Publishes readiness; all preparation side effects must be durable.
    pub fn make_ready(&self) {
        self.state.store(Lifecycle::Ready as u8, Ordering::Release);
        tracing::info!(resource = %self.id(), "Generator ready");
    }

    pub fn abort_prepare(&self) {
        let _ = self.state.compare_exchange(
            Lifecycle::Preparing as u8,
            Lifecycle::Cold as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Claims the background preparation slot; false if a run is already queued.
    pub fn try_schedule(&self) -> bool {
        self.scheduled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn finish_scheduled(&self) {
        self.scheduled.store(false, Ordering::Release);
    }

    /// Definition still matches the backend.
    pub fn is_fresh(&self) -> bool {
        self.fresh.load(Ordering::Acquire)
    }

    pub fn set_fresh(&self, fresh: bool) {
        self.fresh.store(fresh, Ordering::Release);
    }

    pub fn last_modified(&self) -> DateTime<Utc> {
        self.created
    }

    /// Persists the resource snapshot next to the prepared state.
    pub fn save_resource(&self) -> Result<()> {
        self.save_json(RESOURCE_SNAPSHOT, &self.resource())
    }

    /// Writes a JSON document into the store, replacing it atomically.
    pub fn save_json<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<()> {
        std::fs::create_dir_all(&self.store)?;
        let path = self.store_path(name);
        let temp_path = path.with_extension("tmp");
        std::fs::write(&temp_path, serde_json::to_vec_pretty(value)?)?;
        std::fs::rename(&temp_path, &path)?;
        Ok(())
    }

    pub fn load_json<T: serde::de::DeserializeOwned>(&self, name: &str) -> Result<T> {
        let data = std::fs::read(self.store_path(name))?;
        Ok(serde_json::from_slice(&data)?)
    }

    /// Returns true if the persisted snapshot exists and differs from the
    /// current resource by at most a safe change.
    pub fn persisted_matches(&self) -> bool {
        let path = self.store_path(RESOURCE_SNAPSHOT);
        let saved: Resource = match self.load_json(RESOURCE_SNAPSHOT) {
            Ok(saved) => saved,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "No usable resource snapshot");
                return false;
            }
        };
        saved.changed(&self.resource.read()) < Changed::RevisionBump
    }

    /// Marks the generator ready if the persisted state is current and
    /// `load` succeeds. Returns whether it did.
    pub fn try_fast_path<F>(&self, load: F) -> bool
    where
        F: FnOnce() -> Result<()>,
    {
        if !self.persisted_matches() {
            tracing::info!(resource = %self.id(), "Generator not ready");
            return false;
        }
        match load() {
            Ok(()) => {
                self.state.store(Lifecycle::Ready as u8, Ordering::Release);
                tracing::info!(resource = %self.id(), "Generator ready from persisted state");
                true
            }
            Err(e) => {
                tracing::warn!(resource = %self.id(), error = %e, "Persisted state unusable, needs prepare");
                false
            }
        }
    }

    /// File info stamped with this generator's modification time.
    pub fn file_info(&self, info: SinkFileInfo) -> SinkFileInfo {
        info.with_last_modified(self.created)
    }
}

/// Outcome of routing one request.
#[derive(Debug)]
pub enum Reply {
    /// Cheap content produced inline.
    Content { data: Bytes, info: SinkFileInfo },
    /// Redirect to another location.
    Redirect(String),
    /// Expensive content; must run on the worker pool.
    Deferred(Task),
}

impl Reply {
    pub fn content(data: impl Into<Bytes>, info: SinkFileInfo) -> Reply {
        Reply::Content {
            data: data.into(),
            info,
        }
    }

    pub fn json<T: Serialize + ?Sized>(value: &T, info: SinkFileInfo) -> Result<Reply> {
        Ok(Reply::content(serde_json::to_vec_pretty(value)?, info))
    }

    pub fn support(file: &SupportFile) -> Reply {
        Reply::content(
            Bytes::from_static(file.data.as_bytes()),
            SinkFileInfo::new(file.content_type)
                .with_last_modified(file.last_modified())
                .with_class(FileClass::Support),
        )
    }

    pub fn data_file(file: &DataFile) -> Result<Reply> {
        Ok(Reply::content(
            file.read()?,
            SinkFileInfo::new(file.content_type.clone()).with_class(FileClass::Registry),
        ))
    }

    /// Serves a file persisted in the generator store as is.
    pub fn store_file(core: &GeneratorCore, name: &str, info: SinkFileInfo) -> Result<Reply> {
        let path = core.store_path(name);
        let data = std::fs::read(&path).map_err(|e| {
            MapproxyError::internal(format!("Unable to read {}: {}", path.display(), e))
        })?;
        Ok(Reply::content(data, core.file_info(info)))
    }

    pub fn deferred<F>(name: impl Into<String>, run: F) -> Reply
    where
        F: FnOnce(&mut dyn crate::sink::Sink, &Arsenal) -> Result<()> + Send + 'static,
    {
        Reply::Deferred(Task::new(name, run))
    }
}

/// Encodes a raster tile.
pub(crate) fn encode_image(image: DynamicImage, format: RasterFormat) -> Result<Bytes> {
    let mut buf = Cursor::new(Vec::new());
    match format {
        RasterFormat::Jpg => DynamicImage::ImageRgb8(image.to_rgb8()).write_to(&mut buf, ImageFormat::Jpeg)?,
        RasterFormat::Png => image.write_to(&mut buf, ImageFormat::Png)?,
    }
    Ok(Bytes::from(buf.into_inner()))
}

/// Inline credits block shared by bound and free layers.
pub(crate) fn inline_credits(resource: &Resource) -> serde_json::Value {
    resource
        .credits
        .iter()
        .map(|credit| (credit.clone(), serde_json::json!({})))
        .collect::<serde_json::Map<_, _>>()
        .into()
}

/// A stateful content producer bound to one resource.
pub trait Generator: Send + Sync {
    fn core(&self) -> &GeneratorCore;

    /// Derives and persists everything needed to serve.
    fn prepare_impl(&self, arsenal: &Arsenal) -> Result<()>;

    /// Map configuration of this resource.
    fn map_config(&self) -> Result<MapConfig>;

    /// Classifies the filename and produces the reply.
    fn generate_file(&self, fi: &FileInfo) -> Result<Reply>;

    /// Runs preparation if no other caller has started it.
    ///
    /// Failure leaves the generator cold so that it can be retried. A panic
    /// in `prepare_impl` counts as failure.
    fn prepare(&self, arsenal: &Arsenal) -> Result<()> {
        let core = self.core();
        if !core.begin_prepare() {
            tracing::debug!(resource = %core.id(), lifecycle = %core.lifecycle(), "Preparation not needed");
            return Ok(());
        }

        tracing::info!(resource = %core.id(), "Preparing generator");
        let result = std::panic::catch_unwind(AssertUnwindSafe(|| self.prepare_impl(arsenal)))
            .unwrap_or_else(|panic| {
                Err(MapproxyError::internal(format!(
                    "Preparation panicked: {}",
                    panic_message(panic.as_ref())
                )))
            })
            .and_then(|()| core.save_resource());
        match result {
            Ok(()) => {
                core.make_ready();
                Ok(())
            }
            Err(e) => {
                core.abort_prepare();
                tracing::warn!(resource = %core.id(), error = %e, "Preparation failed");
                Err(e)
            }
        }
    }
}

/// Builds a generator for a resource.
pub type Factory = Arc<dyn Fn(GeneratorParams) -> Result<Arc<dyn Generator>> + Send + Sync>;

/// Generator constructors keyed by kind.
#[derive(Clone, Default)]
pub struct FactoryRegistry {
    factories: HashMap<GeneratorKind, Factory>,
}

impl FactoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in driver.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(
            GeneratorKind::new(GeneratorType::Tms, "tms-raster"),
            Arc::new(|params| Ok(Arc::new(TmsRaster::new(params)?) as Arc<dyn Generator>)),
        );
        registry.register(
            GeneratorKind::new(GeneratorType::Tms, "tms-bing"),
            Arc::new(|params| Ok(Arc::new(TmsRemote::new(params)?) as Arc<dyn Generator>)),
        );
        registry.register(
            GeneratorKind::new(GeneratorType::Surface, "surface-dem"),
            Arc::new(|params| Ok(Arc::new(SurfaceDem::new(params)?) as Arc<dyn Generator>)),
        );
        registry.register(
            GeneratorKind::new(GeneratorType::Geodata, "geodata-vector"),
            Arc::new(|params| Ok(Arc::new(GeodataVector::new(params, false)?) as Arc<dyn Generator>)),
        );
        registry.register(
            GeneratorKind::new(GeneratorType::Geodata, "geodata-vector-tiled"),
            Arc::new(|params| Ok(Arc::new(GeodataVector::new(params, true)?) as Arc<dyn Generator>)),
        );
        registry
    }

    /// Registers a factory; a later registration for the same kind wins.
    pub fn register(&mut self, kind: GeneratorKind, factory: Factory) {
        if self.factories.insert(kind.clone(), factory).is_some() {
            tracing::warn!(kind = %kind, "Replaced generator factory");
        }
    }

    pub fn contains(&self, kind: &GeneratorKind) -> bool {
        self.factories.contains_key(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &GeneratorKind> {
        self.factories.keys()
    }

    pub fn create(&self, params: GeneratorParams) -> Result<Arc<dyn Generator>> {
        let kind = &params.resource.generator;
        let factory = self.factories.get(kind).ok_or_else(|| {
            MapproxyError::format(format!("Unknown generator <{}>.", kind))
        })?;
        factory(params)
    }
}

impl fmt::Debug for FactoryRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.factories.keys()).finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::reference_frame::RfNode;
    use crate::resource::tests::tms_resource;
    use crate::tile::{Extents2, TileId};
    use std::sync::atomic::AtomicUsize;

    fn build_test_frame() -> ReferenceFrame {
        ReferenceFrame::new(
            "rf1",
            5,
            vec![RfNode::bisection(
                TileId::new(0, 0, 0),
                "local",
                Extents2::new(0.0, 0.0, 1.0, 1.0),
            )],
        )
        .unwrap()
    }

    pub(crate) fn test_frame() -> Arc<ReferenceFrame> {
        Arc::new(build_test_frame())
    }

    pub(crate) fn test_frames() -> crate::reference_frame::ReferenceFrameRegistry {
        crate::reference_frame::ReferenceFrameRegistry::new([build_test_frame()])
    }

    /// Classifies `path` against the test frames.
    pub(crate) fn test_file_info(path: &str) -> FileInfo {
        FileInfo::new(&crate::path::Request::new(path), FileFlags::default(), &test_frames()).unwrap()
    }

    pub(crate) fn test_params(root: &Path, resource: Resource) -> GeneratorParams {
        GeneratorParams {
            config: Arc::new(GeneratorConfig::new(root.join("store"), root)),
            resource,
            reference_frame: test_frame(),
        }
    }

    /// Generator whose preparation outcome is scripted.
    pub(crate) struct ScriptedGenerator {
        core: GeneratorCore,
        pub fail: AtomicBool,
        pub panic: AtomicBool,
        pub prepares: AtomicUsize,
    }

    impl ScriptedGenerator {
        pub(crate) fn new(params: GeneratorParams) -> Self {
            Self {
                core: GeneratorCore::new(params),
                fail: AtomicBool::new(false),
                panic: AtomicBool::new(false),
                prepares: AtomicUsize::new(0),
            }
        }
    }

    impl Generator for ScriptedGenerator {
        fn core(&self) -> &GeneratorCore {
            &self.core
        }

        fn prepare_impl(&self, _: &Arsenal) -> Result<()> {
            self.prepares.fetch_add(1, Ordering::SeqCst);
            if self.panic.load(Ordering::SeqCst) {
                panic!("corrupt dataset");
            }
            if self.fail.load(Ordering::SeqCst) {
                Err(MapproxyError::Dataset(crate::error::DatasetError::new("x", "cannot open")))
            } else {
                Ok(())
            }
        }

        fn map_config(&self) -> Result<MapConfig> {
            Ok(MapConfig::new(&self.core.resource(), self.core.reference_frame()))
        }

        fn generate_file(&self, _: &FileInfo) -> Result<Reply> {
            Ok(Reply::content(Bytes::from_static(b"ok"), SinkFileInfo::new("text/plain")))
        }
    }

    #[test]
    fn test_store_layout() {
        let dir = tempfile::TempDir::new().unwrap();
        let core = GeneratorCore::new(test_params(dir.path(), tms_resource("ortho.png")));
        assert_eq!(core.store(), dir.path().join("store/rf1/tms/grp/layer1"));
    }

    #[test]
    fn test_lifecycle_transitions() {
        let dir = tempfile::TempDir::new().unwrap();
        let core = GeneratorCore::new(test_params(dir.path(), tms_resource("ortho.png")));

        assert_eq!(core.lifecycle(), Lifecycle::Cold);
        assert!(matches!(core.check_ready(), Err(MapproxyError::Unavailable(_))));

        assert!(core.begin_prepare());
        assert!(!core.begin_prepare());
        assert_eq!(core.lifecycle(), Lifecycle::Preparing);

        core.abort_prepare();
        assert_eq!(core.lifecycle(), Lifecycle::Cold);

        assert!(core.begin_prepare());
        core.make_ready();
        assert!(core.check_ready().is_ok());
        assert!(!core.begin_prepare());
    }

    #[test]
    fn test_panicking_prepare_stays_cold() {
        let dir = tempfile::TempDir::new().unwrap();
        let arsenal = crate::arsenal::tests::test_arsenal(dir.path());
        let generator = ScriptedGenerator::new(test_params(dir.path(), tms_resource("ortho.png")));
        generator.panic.store(true, Ordering::SeqCst);

        let err = generator.prepare(&arsenal).unwrap_err();
        assert!(matches!(err, MapproxyError::Internal(_)));
        assert!(err.to_string().contains("corrupt dataset"));
        assert_eq!(generator.core().lifecycle(), Lifecycle::Cold);

        generator.panic.store(false, Ordering::SeqCst);
        generator.prepare(&arsenal).unwrap();
        assert!(generator.core().is_ready());
    }

    #[test]
    fn test_failed_prepare_stays_cold() {
        let dir = tempfile::TempDir::new().unwrap();
        let arsenal = crate::arsenal::tests::test_arsenal(dir.path());
        let generator = ScriptedGenerator::new(test_params(dir.path(), tms_resource("ortho.png")));
        generator.fail.store(true, Ordering::SeqCst);

        assert!(generator.prepare(&arsenal).is_err());
        assert_eq!(generator.core().lifecycle(), Lifecycle::Cold);

        generator.fail.store(false, Ordering::SeqCst);
        generator.prepare(&arsenal).unwrap();
        assert!(generator.core().is_ready());
        assert_eq!(generator.prepares.load(Ordering::SeqCst), 2);

        generator.prepare(&arsenal).unwrap();
        assert_eq!(generator.prepares.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_concurrent_prepare_runs_once() {
        let dir = tempfile::TempDir::new().unwrap();
        let arsenal = Arc::new(crate::arsenal::tests::test_arsenal(dir.path()));
        let generator = Arc::new(ScriptedGenerator::new(test_params(
            dir.path(),
            tms_resource("ortho.png"),
        )));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let generator = Arc::clone(&generator);
                let arsenal = Arc::clone(&arsenal);
                std::thread::spawn(move || generator.prepare(&arsenal).unwrap())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(generator.prepares.load(Ordering::SeqCst), 1);
        assert!(generator.core().is_ready());
    }

    #[test]
    fn test_fast_path_after_prepare() {
        let dir = tempfile::TempDir::new().unwrap();
        let arsenal = crate::arsenal::tests::test_arsenal(dir.path());
        let first = ScriptedGenerator::new(test_params(dir.path(), tms_resource("ortho.png")));
        first.prepare(&arsenal).unwrap();

        let mut safe = tms_resource("ortho.png");
        safe.comment = "renamed".to_string();
        let second = GeneratorCore::new(test_params(dir.path(), safe));
        assert!(second.try_fast_path(|| Ok(())));
        assert!(second.is_ready());

        let bumped = GeneratorCore::new(test_params(dir.path(), tms_resource("other.png")));
        assert!(!bumped.try_fast_path(|| Ok(())));
        assert!(!bumped.is_ready());

        let broken = GeneratorCore::new(test_params(dir.path(), tms_resource("ortho.png")));
        assert!(!broken.try_fast_path(|| Err(MapproxyError::format("truncated index"))));
    }

    #[test]
    fn test_factory_registry_defaults() {
        let registry = FactoryRegistry::with_defaults();
        assert_eq!(registry.kinds().count(), 5);
        assert!(registry.contains(&GeneratorKind::new(GeneratorType::Surface, "surface-dem")));

        let dir = tempfile::TempDir::new().unwrap();
        let mut resource = tms_resource("ortho.png");
        resource.generator = GeneratorKind::new(GeneratorType::Tms, "tms-unknown");
        let err = registry.create(test_params(dir.path(), resource)).err().unwrap();
        assert!(matches!(err, MapproxyError::Format(_)));
    }

    #[test]
    fn test_encode_image_formats() {
        let image = DynamicImage::ImageRgba8(image::RgbaImage::new(4, 4));
        let png = encode_image(image.clone(), RasterFormat::Png).unwrap();
        assert_eq!(&png[1..4], b"PNG");
        let jpg = encode_image(image, RasterFormat::Jpg).unwrap();
        assert_eq!(&jpg[..2], &[0xff, 0xd8]);
    }
}
