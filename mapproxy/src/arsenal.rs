//! Worker pool and the collaborators available to deferred tasks.
//!
//! Expensive generation runs as a [`Task`] on the [`WorkerPool`]: a tokio
//! semaphore bounds how many tasks run at once and each task runs on the
//! blocking thread pool. Task failures, panics included, are delivered to
//! the task's sink and never escape the pool.
//!
//! ```text
//! request ──► Generator ──► Reply::Deferred(Task)
//!                                   │
//!                     Arsenal::submit(task, sink)
//!                                   │  permit (≤ workers)
//!                                   ▼
//!                            spawn_blocking ──► task.run(sink, arsenal)
//! ```

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::coverage::CoverageMask;
use crate::dataset::Warper;
use crate::error::{MapproxyError, Result};
use crate::fetch::HttpFetcher;
use crate::resource::{DemDataset, GeodataDefinition};
use crate::sink::Sink;
use crate::tile::{Extents2, TileId};

/// Terrain tile request.
#[derive(Debug, Clone)]
pub struct TerrainRequest<'a> {
    pub dem: &'a DemDataset,
    pub tile: TileId,
    pub srs: &'a str,
    pub extents: Extents2,
    /// Grid coverage of the tile; samples outside it carry no geometry.
    pub coverage: &'a CoverageMask,
    /// Skip the client envelope.
    pub raw: bool,
}

/// Produces terrain tiles from elevation data.
pub trait TerrainSampler: Send + Sync {
    fn mesh(&self, request: &TerrainRequest<'_>) -> Result<Vec<u8>>;

    fn navtile(&self, request: &TerrainRequest<'_>) -> Result<Vec<u8>>;
}

/// Geodata request; tile fields are `None` for the flat driver.
#[derive(Debug, Clone)]
pub struct GeodataRequest<'a> {
    pub definition: &'a GeodataDefinition,
    pub tile: Option<TileId>,
    pub srs: Option<&'a str>,
    pub extents: Option<Extents2>,
}

/// Produces vector geodata.
pub trait GeodataSampler: Send + Sync {
    fn geodata(&self, request: &GeodataRequest<'_>) -> Result<Vec<u8>>;
}

type TaskFn = Box<dyn FnOnce(&mut dyn Sink, &Arsenal) -> Result<()> + Send>;

/// Deferred generation of one response. Runs at most once.
pub struct Task {
    name: String,
    run: TaskFn,
}

impl Task {
    pub fn new<F>(name: impl Into<String>, run: F) -> Self
    where
        F: FnOnce(&mut dyn Sink, &Arsenal) -> Result<()> + Send + 'static,
    {
        Self {
            name: name.into(),
            run: Box::new(run),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn run(self, sink: &mut dyn Sink, arsenal: &Arsenal) -> Result<()> {
        (self.run)(sink, arsenal)
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task").field("name", &self.name).finish()
    }
}

/// Semaphore-bounded pool on tokio's blocking threads.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    workers: usize,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        tracing::info!(workers, "Created worker pool");
        Self {
            semaphore: Arc::new(Semaphore::new(workers)),
            workers,
        }
    }

    /// One worker per available core.
    pub fn with_defaults() -> Self {
        Self::new(default_workers())
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Runs `job` on a blocking thread once a permit is free.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<F>(&self, job: F) -> JoinHandle<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let semaphore = Arc::clone(&self.semaphore);
        tokio::spawn(async move {
            let permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    tracing::warn!("Worker pool closed, dropping job");
                    return;
                }
            };

            let result = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                job();
            })
            .await;

            if let Err(e) = result {
                tracing::error!(error = %e, "Worker job failed to complete");
            }
        })
    }
}

pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(4)
}

/// Collaborators shared by all generators, plus the pool running their tasks.
pub struct Arsenal {
    pub warper: Arc<dyn Warper>,
    pub fetcher: Arc<dyn HttpFetcher>,
    pub terrain: Option<Arc<dyn TerrainSampler>>,
    pub geodata: Option<Arc<dyn GeodataSampler>>,
    pool: WorkerPool,
}

impl Arsenal {
    pub fn new(warper: Arc<dyn Warper>, fetcher: Arc<dyn HttpFetcher>, pool: WorkerPool) -> Self {
        Self {
            warper,
            fetcher,
            terrain: None,
            geodata: None,
            pool,
        }
    }

    pub fn with_terrain(mut self, terrain: Arc<dyn TerrainSampler>) -> Self {
        self.terrain = Some(terrain);
        self
    }

    pub fn with_geodata(mut self, geodata: Arc<dyn GeodataSampler>) -> Self {
        self.geodata = Some(geodata);
        self
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn terrain(&self) -> Result<&dyn TerrainSampler> {
        self.terrain
            .as_deref()
            .ok_or_else(|| MapproxyError::not_found("Terrain sampling not available."))
    }

    pub fn geodata(&self) -> Result<&dyn GeodataSampler> {
        self.geodata
            .as_deref()
            .ok_or_else(|| MapproxyError::not_found("Geodata sampling not available."))
    }

    /// Schedules `task` on the pool, delivering its outcome into `sink`.
    pub fn submit(self: &Arc<Self>, task: Task, mut sink: Box<dyn Sink>) -> JoinHandle<()> {
        let arsenal = Arc::clone(self);
        self.pool.spawn(move || arsenal.execute(task, sink.as_mut()))
    }

    /// Runs `task` on the current thread.
    ///
    /// Errors and panics go to `sink.error`. Nothing is written once the
    /// sink reports abort.
    pub fn execute(&self, task: Task, sink: &mut dyn Sink) {
        let name = task.name.clone();
        if sink.check_aborted().is_err() {
            tracing::debug!(task = %name, "Client gone before task start");
            return;
        }

        let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| task.run(&mut *sink, self)));
        let error = match outcome {
            Ok(Ok(())) => return,
            Ok(Err(MapproxyError::Aborted)) => {
                tracing::debug!(task = %name, "Task aborted");
                return;
            }
            Ok(Err(e)) => e,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(task = %name, panic = %message, "Task panicked");
                MapproxyError::internal(format!("Task {} failed: {}", name, message))
            }
        };

        if sink.check_aborted().is_ok() {
            tracing::debug!(task = %name, error = %error, "Task failed");
            sink.error(error);
        }
    }
}

/// Text of a caught panic payload.
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

impl fmt::Debug for Arsenal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arsenal")
            .field("pool", &self.pool)
            .field("terrain", &self.terrain.is_some())
            .field("geodata", &self.geodata.is_some())
            .finish()
    }
}
