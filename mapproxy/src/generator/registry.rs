//! Resource id to generator binding, kept in sync with the resource backend.
//!
//! Generators are created lazily on first lookup. A periodic refresh re-reads
//! the backend and decides per resource whether its generator is kept,
//! updated in place or dropped so that the next lookup builds a fresh one.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::{FactoryRegistry, Generator, GeneratorConfig, GeneratorParams, Lifecycle};
use crate::arsenal::Arsenal;
use crate::error::{MapproxyError, Result};
use crate::reference_frame::ReferenceFrameRegistry;
use crate::resource::{Changed, GeneratorType, Resource, ResourceBackend, ResourceId, ResourceMap};

/// Default period between two backend refreshes.
pub const DEFAULT_UPDATE_PERIOD: Duration = Duration::from_secs(100);

/// What one refresh cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshStats {
    /// Resources new to the registry.
    pub added: usize,
    /// Generators dropped because their resource disappeared.
    pub removed: usize,
    /// Generators updated in place with a safe change.
    pub updated: usize,
    /// Generators dropped because of a revision bump.
    pub rebuilt: usize,
    /// Removals and rebuilds postponed while preparing.
    pub deferred: usize,
    /// Cold generators whose preparation was rescheduled.
    pub retried: usize,
}

pub struct GeneratorRegistry {
    config: Arc<GeneratorConfig>,
    factories: FactoryRegistry,
    backend: Arc<dyn ResourceBackend>,
    arsenal: Arc<Arsenal>,
    frames: Arc<ReferenceFrameRegistry>,
    resources: RwLock<ResourceMap>,
    generators: DashMap<ResourceId, Arc<dyn Generator>>,
    update_period: Duration,
}

impl GeneratorRegistry {
    pub fn new(
        config: Arc<GeneratorConfig>,
        factories: FactoryRegistry,
        backend: Arc<dyn ResourceBackend>,
        arsenal: Arc<Arsenal>,
        frames: Arc<ReferenceFrameRegistry>,
    ) -> Self {
        Self {
            config,
            factories,
            backend,
            arsenal,
            frames,
            resources: RwLock::new(ResourceMap::new()),
            generators: DashMap::new(),
            update_period: DEFAULT_UPDATE_PERIOD,
        }
    }

    pub fn with_update_period(mut self, update_period: Duration) -> Self {
        self.update_period = update_period;
        self
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    pub fn arsenal(&self) -> &Arc<Arsenal> {
        &self.arsenal
    }

    pub fn frames(&self) -> &ReferenceFrameRegistry {
        &self.frames
    }

    /// Re-reads the backend and reconciles the generators with it.
    ///
    /// # Errors
    ///
    /// Fails when the backend cannot be read; the previous state is kept.
    pub fn refresh(&self) -> Result<RefreshStats> {
        let listed = self.backend.list_resources()?;
        let current: ResourceMap = listed
            .into_iter()
            .filter(|(id, resource)| self.servable(id, resource))
            .collect();

        let mut stats = RefreshStats::default();
        {
            // new lookups see the new definitions before old generators go
            let mut known = self.resources.write();
            stats.added = current.keys().filter(|id| !known.contains_key(*id)).count();
            *known = current.clone();
        }

        let ids: Vec<ResourceId> = self.generators.iter().map(|entry| entry.key().clone()).collect();
        for id in ids {
            let Some(generator) = self.generators.get(&id).map(|entry| Arc::clone(entry.value())) else {
                continue;
            };
            let core = generator.core();
            let preparing = core.lifecycle() == Lifecycle::Preparing;

            let change = match current.get(&id) {
                None => None,
                Some(resource) => Some((resource, core.resource().changed(resource))),
            };

            match change {
                Some((_, Changed::No)) => core.set_fresh(true),
                _ if preparing => {
                    // applied on the next refresh
                    core.set_fresh(false);
                    stats.deferred += 1;
                    tracing::debug!(resource = %id, "Generator preparing, change deferred");
                }
                None => {
                    if self.drop_unless_preparing(&id) {
                        stats.removed += 1;
                        tracing::info!(resource = %id, "Resource removed, generator dropped");
                    } else {
                        stats.deferred += 1;
                    }
                }
                Some((resource, Changed::Safe)) => {
                    core.update_resource(resource.clone());
                    core.set_fresh(true);
                    stats.updated += 1;
                    tracing::info!(resource = %id, "Resource changed safely, generator updated");
                }
                Some((_, Changed::RevisionBump)) => {
                    if self.drop_unless_preparing(&id) {
                        stats.rebuilt += 1;
                        tracing::info!(resource = %id, "Resource changed, generator will be rebuilt");
                    } else {
                        stats.deferred += 1;
                    }
                }
            }
        }

        let cold: Vec<Arc<dyn Generator>> = self
            .generators
            .iter()
            .filter(|entry| entry.value().core().lifecycle() == Lifecycle::Cold)
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for generator in cold {
            if self.schedule_prepare(generator) {
                stats.retried += 1;
            }
        }

        tracing::debug!(?stats, "Refreshed resources");
        Ok(stats)
    }

    /// Drops the generator of `id` unless its preparation has started.
    fn drop_unless_preparing(&self, id: &ResourceId) -> bool {
        let dropped = self
            .generators
            .remove_if(id, |_, generator| generator.core().lifecycle() != Lifecycle::Preparing)
            .is_some();
        if !dropped {
            if let Some(generator) = self.generators.get(id) {
                generator.core().set_fresh(false);
                tracing::debug!(resource = %id, "Preparation started meanwhile, change deferred");
            }
        }
        dropped
    }

    fn servable(&self, id: &ResourceId, resource: &Resource) -> bool {
        if !self.frames.contains(&id.reference_frame) {
            tracing::warn!(resource = %id, "Resource bound to unknown reference frame, ignored");
            return false;
        }
        if !self.factories.contains(&resource.generator) {
            tracing::warn!(resource = %id, generator = %resource.generator, "No generator for resource, ignored");
            return false;
        }
        true
    }

    pub fn resource(&self, id: &ResourceId) -> Option<Resource> {
        self.resources.read().get(id).cloned()
    }

    /// Returns the generator of `id`, creating it if needed.
    ///
    /// A generator that is not ready gets its preparation scheduled on the
    /// worker pool; the caller still receives it and decides what to do.
    pub fn lookup(&self, id: &ResourceId) -> Result<Arc<dyn Generator>> {
        let generator = self.generator(id)?;
        if generator.core().lifecycle() == Lifecycle::Cold {
            self.schedule_prepare(Arc::clone(&generator));
        }
        Ok(generator)
    }

    /// Runs preparation of `id` on the calling thread.
    pub fn prepare_now(&self, id: &ResourceId) -> Result<Arc<dyn Generator>> {
        let generator = self.generator(id)?;
        generator.prepare(&self.arsenal)?;
        Ok(generator)
    }

    fn generator(&self, id: &ResourceId) -> Result<Arc<dyn Generator>> {
        if let Some(generator) = self.generators.get(id) {
            return Ok(Arc::clone(generator.value()));
        }

        let entry = self.generators.entry(id.clone()).or_try_insert_with(|| {
            // read under the entry lock so a concurrent refresh is not missed
            let resource = self
                .resource(id)
                .ok_or_else(|| MapproxyError::not_found(format!("No such resource <{}>.", id)))?;
            self.create(resource)
        })?;
        Ok(Arc::clone(entry.value()))
    }

    fn create(&self, resource: Resource) -> Result<Arc<dyn Generator>> {
        let reference_frame = self.frames.get(&resource.id.reference_frame).ok_or_else(|| {
            MapproxyError::not_found(format!(
                "Unknown reference frame <{}>.",
                resource.id.reference_frame
            ))
        })?;

        tracing::debug!(resource = %resource.id, generator = %resource.generator, "Creating generator");
        self.factories.create(GeneratorParams {
            config: Arc::clone(&self.config),
            resource,
            reference_frame,
        })
    }

    /// Queues preparation on the worker pool.
    ///
    /// Returns false outside a runtime or when a run is already queued.
    fn schedule_prepare(&self, generator: Arc<dyn Generator>) -> bool {
        if tokio::runtime::Handle::try_current().is_err() {
            tracing::debug!(resource = %generator.core().id(), "No runtime, preparation not scheduled");
            return false;
        }
        if !generator.core().try_schedule() {
            return false;
        }

        let arsenal = Arc::clone(&self.arsenal);
        self.arsenal.pool().spawn(move || {
            // failure leaves the generator cold; it is retried on refresh
            let _ = generator.prepare(&arsenal);
            generator.core().finish_scheduled();
        });
        true
    }

    /// Refreshes every update period until `cancel` fires.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.update_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(period_secs = self.update_period.as_secs(), "Resource updater started");

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,

                _ = ticker.tick() => {
                    let registry = Arc::clone(&self);
                    match tokio::task::spawn_blocking(move || registry.refresh()).await {
                        Ok(Ok(_)) => {}
                        Ok(Err(e)) => {
                            tracing::warn!(error = %e, "Unable to read resources, keeping previous state");
                        }
                        Err(e) => tracing::error!(error = %e, "Resource refresh panicked"),
                    }
                }
            }
        }

        tracing::info!("Resource updater stopped");
    }

    /// Reference frames that have at least one resource.
    pub fn list_reference_frames(&self) -> Vec<String> {
        self.list(|id| Some(id.reference_frame.clone()))
    }

    pub fn list_types(&self, rf: &str) -> Vec<GeneratorType> {
        self.resources
            .read()
            .keys()
            .filter(|id| id.reference_frame == rf)
            .map(|id| id.generator_type)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn list_groups(&self, rf: &str, generator_type: GeneratorType) -> Vec<String> {
        self.list(|id| {
            (id.reference_frame == rf && id.generator_type == generator_type).then(|| id.group.clone())
        })
    }

    pub fn list_ids(&self, rf: &str, generator_type: GeneratorType, group: &str) -> Vec<String> {
        self.list(|id| {
            (id.reference_frame == rf && id.generator_type == generator_type && id.group == group)
                .then(|| id.id.clone())
        })
    }

    /// Resources of one frame and type.
    pub fn resources_of(&self, rf: &str, generator_type: GeneratorType) -> Vec<Resource> {
        self.resources
            .read()
            .values()
            .filter(|r| r.id.reference_frame == rf && r.id.generator_type == generator_type)
            .cloned()
            .collect()
    }

    fn list<F>(&self, select: F) -> Vec<String>
    where
        F: Fn(&ResourceId) -> Option<String>,
    {
        self.resources
            .read()
            .keys()
            .filter_map(select)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}
