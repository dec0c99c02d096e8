//! Builder for EntityTransferService
//!
//! Collects the collaborators a region's transfer subsystem talks to and
//! registers its metrics.

use crate::collaborators::{
    BroadcastEventSink, ClientNotifier, GridDirectory, SceneAgents, SimulationService, TeleportAuthorizer,
    TransferEventSink,
};
use crate::config::TransferConfig;
use crate::error::ConfigError;
use crate::metrics::TransferMetrics;
use crate::runtime::{Collaborators, TransferRuntime};
use crate::service::EntityTransferService;
use prometheus::Registry;
use std::sync::Arc;
use transit_types::LocalRegion;

const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Builder for constructing an EntityTransferService with all dependencies
pub struct EntityTransferServiceBuilder {
    local: LocalRegion,
    config: Option<TransferConfig>,
    scene: Option<Arc<dyn SceneAgents>>,
    simulation: Option<Arc<dyn SimulationService>>,
    grid: Option<Arc<dyn GridDirectory>>,
    notifier: Option<Arc<dyn ClientNotifier>>,
    events: Option<Arc<dyn TransferEventSink>>,
    authorizer: Option<Arc<dyn TeleportAuthorizer>>,
    registry: Option<Registry>,
}

impl EntityTransferServiceBuilder {
    /// Create a new builder for the given local region
    pub fn new(local: LocalRegion) -> Self {
        Self {
            local,
            config: None,
            scene: None,
            simulation: None,
            grid: None,
            notifier: None,
            events: None,
            authorizer: None,
            registry: None,
        }
    }

    pub fn with_config(mut self, config: TransferConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_scene(mut self, scene: Arc<dyn SceneAgents>) -> Self {
        self.scene = Some(scene);
        self
    }

    pub fn with_simulation(mut self, simulation: Arc<dyn SimulationService>) -> Self {
        self.simulation = Some(simulation);
        self
    }

    pub fn with_grid(mut self, grid: Arc<dyn GridDirectory>) -> Self {
        self.grid = Some(grid);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn ClientNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Set the event sink. Defaults to a broadcast channel nobody listens to.
    pub fn with_events(mut self, events: Arc<dyn TransferEventSink>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_authorizer(mut self, authorizer: Arc<dyn TeleportAuthorizer>) -> Self {
        self.authorizer = Some(authorizer);
        self
    }

    /// Register metrics in `registry` instead of a private one.
    pub fn with_registry(mut self, registry: Registry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Build the service with all components
    pub fn build(self) -> Result<EntityTransferService, ConfigError> {
        let scene = self.scene.ok_or(ConfigError::MissingCollaborator("scene"))?;
        let simulation = self
            .simulation
            .ok_or(ConfigError::MissingCollaborator("simulation"))?;
        let grid = self.grid.ok_or(ConfigError::MissingCollaborator("grid"))?;
        let notifier = self.notifier.ok_or(ConfigError::MissingCollaborator("notifier"))?;
        let authorizer = self
            .authorizer
            .ok_or(ConfigError::MissingCollaborator("authorizer"))?;
        let events = self
            .events
            .unwrap_or_else(|| Arc::new(BroadcastEventSink::new(DEFAULT_EVENT_CAPACITY)));

        let config = self.config.unwrap_or_default();
        config.validate()?;

        let registry = self.registry.unwrap_or_default();
        let metrics = TransferMetrics::new(&registry)?;

        let deps = Collaborators {
            scene,
            simulation,
            grid,
            notifier,
            events,
            authorizer,
        };
        let rt = Arc::new(TransferRuntime::new(config, self.local, deps, metrics));
        Ok(EntityTransferService::new(rt, registry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockGrid, MockScene, MockSimulation, RecordingNotifier, StaticAuthorizer};
    use transit_types::{RegionDescriptor, RegionId};

    fn local() -> LocalRegion {
        LocalRegion::new(RegionDescriptor::new(RegionId::generate(), "Home", 1000, 1000))
    }

    #[test]
    fn test_missing_collaborator() {
        let result = EntityTransferServiceBuilder::new(local())
            .with_scene(Arc::new(MockScene::new()))
            .build();
        assert!(matches!(result, Err(ConfigError::MissingCollaborator("simulation"))));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = TransferConfig {
            rpc_timeout_secs: 0,
            ..Default::default()
        };
        let result = EntityTransferServiceBuilder::new(local())
            .with_config(config)
            .with_scene(Arc::new(MockScene::new()))
            .with_simulation(Arc::new(MockSimulation::new()))
            .with_grid(Arc::new(MockGrid::new()))
            .with_notifier(Arc::new(RecordingNotifier::new()))
            .with_authorizer(Arc::new(StaticAuthorizer::allow_all()))
            .build();
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_metrics_registered() {
        let registry = Registry::new();
        let service = EntityTransferServiceBuilder::new(local())
            .with_scene(Arc::new(MockScene::new()))
            .with_simulation(Arc::new(MockSimulation::new()))
            .with_grid(Arc::new(MockGrid::new()))
            .with_notifier(Arc::new(RecordingNotifier::new()))
            .with_authorizer(Arc::new(StaticAuthorizer::allow_all()))
            .with_registry(registry.clone())
            .build()
            .unwrap();

        service.metrics().teleport_attempts.inc();
        let names: Vec<String> = registry.gather().iter().map(|family| family.get_name().to_string()).collect();
        assert!(names.contains(&"entitytransfer_teleport_attempts_total".to_string()));
    }
}
