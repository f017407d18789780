//! Service facade: builds the proxy from a [`ConfigFile`] and runs it.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::arsenal::{Arsenal, WorkerPool};
use crate::config::ConfigFile;
use crate::content::ContentGenerator;
use crate::dataset::{DatasetWarper, ImageDatasetSource};
use crate::error::Result;
use crate::fetch::ReqwestFetcher;
use crate::generator::{FactoryRegistry, GeneratorConfig, GeneratorRegistry};
use crate::path::support::{DataFileRegistry, ExtraFiles, QueryEchoService, ServiceRegistry};
use crate::path::FileFlags;
use crate::reference_frame::ReferenceFrameRegistry;
use crate::resource::JsonFileBackend;

/// A fully wired proxy.
pub struct MapproxyService {
    content: Arc<ContentGenerator>,
    listen: SocketAddr,
}

impl MapproxyService {
    /// Loads reference frames and data files and builds every collaborator.
    ///
    /// Resources are not listed here; the first refresh happens in [`run`](Self::run).
    pub fn from_config(config: &ConfigFile) -> Result<Self> {
        let frames = Arc::new(ReferenceFrameRegistry::load(&config.resources.reference_frames)?);

        let data_files = match &config.resources.data_files {
            Some(path) => DataFileRegistry::load(path)?,
            None => DataFileRegistry::default(),
        };
        let mut services = ServiceRegistry::new();
        services.register(Arc::new(QueryEchoService));
        let extra = Arc::new(ExtraFiles {
            data_files,
            services,
        });

        let generators = &config.generators;
        let generator_config = GeneratorConfig::new(&generators.root, &generators.resource_root)
            .with_file_flags(FileFlags {
                browser_enabled: generators.browser,
            })
            .with_extra(extra);

        let arsenal = Arsenal::new(
            Arc::new(DatasetWarper::new(
                Arc::new(ImageDatasetSource),
                &generators.resource_root,
            )),
            Arc::new(ReqwestFetcher::new()),
            WorkerPool::new(config.arsenal.workers),
        );

        let registry = GeneratorRegistry::new(
            Arc::new(generator_config),
            FactoryRegistry::with_defaults(),
            Arc::new(JsonFileBackend::new(&config.resources.definitions)),
            Arc::new(arsenal),
            frames,
        )
        .with_update_period(generators.update_period);

        Ok(Self {
            content: Arc::new(ContentGenerator::new(Arc::new(registry))),
            listen: config.http.listen,
        })
    }

    pub fn content(&self) -> &Arc<ContentGenerator> {
        &self.content
    }

    pub fn listen(&self) -> SocketAddr {
        self.listen
    }

    /// Serves until `cancel` fires. The resource updater runs alongside and
    /// stops with it.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let listener = TcpListener::bind(self.listen).await?;
        let registry = Arc::clone(self.content.registry());
        let updater = tokio::spawn(registry.run(cancel.clone()));

        let served = crate::server::serve(listener, self.content, cancel.clone()).await;
        cancel.cancel();
        if let Err(e) = updater.await {
            tracing::warn!(error = %e, "Resource updater ended abnormally");
        }
        served?;
        Ok(())
    }
}
