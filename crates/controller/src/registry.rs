//! IntersectionRegistry - one controller per configured intersection

use std::collections::BTreeMap;
use std::sync::Arc;

use contracts::{ControllerBlueprint, IntersectionId};
use dispatcher::BroadcastHub;
use ingestion::InferencePool;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use crate::actor::IntersectionController;
use crate::error::{ControllerError, Result};
use crate::event::ControllerSettings;
use crate::handle::IntersectionHandle;

struct Running {
    handle: IntersectionHandle,
    task: JoinHandle<()>,
}

/// Running controllers, each publishing on its own hub channel, sharing one
/// inference pool
pub struct IntersectionRegistry {
    hub: Arc<BroadcastHub>,
    controllers: BTreeMap<IntersectionId, Running>,
}

impl IntersectionRegistry {
    /// Spawn a controller for every intersection of `blueprint`.
    ///
    /// `hub` must carry a channel for every intersection (see
    /// [`BroadcastHub::from_blueprint`]). Either all controllers start or
    /// none: on error the ones already running are shut down before
    /// returning.
    #[instrument(
        name = "registry_spawn",
        skip(blueprint, hub, pool),
        fields(intersections = blueprint.intersections.len())
    )]
    pub async fn spawn(
        blueprint: &ControllerBlueprint,
        hub: Arc<BroadcastHub>,
        pool: Option<Arc<InferencePool>>,
    ) -> Result<Self> {
        let settings = ControllerSettings::from_blueprint(blueprint);
        let mut registry = Self {
            hub: hub.clone(),
            controllers: BTreeMap::new(),
        };

        for config in &blueprint.intersections {
            let started = if registry.controllers.contains_key(&config.id) {
                Err(ControllerError::DuplicateIntersection(config.id.clone()))
            } else if !hub.carries(&config.id) {
                Err(ControllerError::NotOnHub(config.id.clone()))
            } else {
                IntersectionController::spawn(config, settings.clone(), hub.clone(), pool.clone())
            };

            match started {
                Ok((handle, task)) => {
                    registry
                        .controllers
                        .insert(config.id.clone(), Running { handle, task });
                }
                Err(e) => {
                    warn!(
                        intersection = %config.id,
                        error = %e,
                        "controller failed to start, rolling back"
                    );
                    registry.shutdown().await;
                    return Err(e);
                }
            }
        }

        info!(count = registry.len(), "all intersection controllers started");
        Ok(registry)
    }

    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }

    pub fn len(&self) -> usize {
        self.controllers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &IntersectionId> {
        self.controllers.keys()
    }

    pub fn get(&self, id: &IntersectionId) -> Result<&IntersectionHandle> {
        self.controllers
            .get(id)
            .map(|r| &r.handle)
            .ok_or_else(|| ControllerError::UnknownIntersection(id.clone()))
    }

    pub fn handles(&self) -> impl Iterator<Item = &IntersectionHandle> {
        self.controllers.values().map(|r| &r.handle)
    }

    /// Stop every controller and wait for its task.
    ///
    /// Idempotent; controllers that already stopped are skipped.
    #[instrument(name = "registry_shutdown", skip(self), fields(count = self.controllers.len()))]
    pub async fn shutdown(&mut self) {
        for (id, running) in std::mem::take(&mut self.controllers) {
            if let Err(e) = running.handle.shutdown().await {
                warn!(intersection = %id, error = %e, "controller already stopped");
            }
            if let Err(e) = running.task.await {
                warn!(intersection = %id, error = %e, "controller task failed");
            }
        }
        info!("intersection controllers stopped");
    }
}
