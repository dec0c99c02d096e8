//! State and collaborators shared by the orchestrators.

use crate::collaborators::{
    ClientNotifier, CollabResult, GridDirectory, SceneAgents, SimulationService, TeleportAuthorizer,
    TransferEventSink,
};
use crate::config::TransferConfig;
use crate::error::{CollaboratorError, Result, TransferError};
use crate::metrics::TransferMetrics;
use crate::resolver::DestinationResolver;
use parking_lot::Mutex;
use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};
use transit_state::{BannedDestinationCache, KnownRegionMap, TransferStateTracker};
use transit_types::{AgentId, AgentView, LocalRegion, RegionDescriptor};

/// Everything outside the transfer subsystem it talks to
#[derive(Clone)]
pub struct Collaborators {
    pub scene: Arc<dyn SceneAgents>,
    pub simulation: Arc<dyn SimulationService>,
    pub grid: Arc<dyn GridDirectory>,
    pub notifier: Arc<dyn ClientNotifier>,
    pub events: Arc<dyn TransferEventSink>,
    pub authorizer: Arc<dyn TeleportAuthorizer>,
}

/// Shared core of one region's transfer subsystem.
pub struct TransferRuntime {
    pub(crate) config: TransferConfig,
    pub(crate) local: LocalRegion,
    pub(crate) deps: Collaborators,
    pub(crate) tracker: Arc<TransferStateTracker>,
    pub(crate) banned: BannedDestinationCache,
    pub(crate) known: KnownRegionMap,
    pub(crate) resolver: DestinationResolver,
    pub(crate) metrics: TransferMetrics,
}

impl TransferRuntime {
    pub fn new(
        config: TransferConfig,
        local: LocalRegion,
        deps: Collaborators,
        metrics: TransferMetrics,
    ) -> Self {
        let resolver = DestinationResolver::new(
            Arc::clone(&deps.grid),
            config.not_found_ttl(),
            config.neighbor_cache_ttl(),
        );
        Self {
            banned: BannedDestinationCache::new(config.banned_ttl()),
            tracker: Arc::new(TransferStateTracker::new()),
            known: KnownRegionMap::new(),
            resolver,
            config,
            local,
            deps,
            metrics,
        }
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    pub fn local_region(&self) -> &LocalRegion {
        &self.local
    }

    pub fn tracker(&self) -> &Arc<TransferStateTracker> {
        &self.tracker
    }

    pub fn banned(&self) -> &BannedDestinationCache {
        &self.banned
    }

    pub fn known_regions(&self) -> &KnownRegionMap {
        &self.known
    }

    pub fn resolver(&self) -> &DestinationResolver {
        &self.resolver
    }

    pub fn metrics(&self) -> &TransferMetrics {
        &self.metrics
    }

    /// Run a simulation call under the per-call deadline.
    pub(crate) async fn call<T, F>(&self, operation: &'static str, call: F) -> CollabResult<T>
    where
        F: Future<Output = CollabResult<T>>,
    {
        match tokio::time::timeout(self.config.rpc_timeout(), call).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    operation,
                    timeout_secs = self.config.rpc_timeout_secs,
                    "Simulation call timed out"
                );
                Err(CollaboratorError::Timeout(operation))
            }
        }
    }

    /// The agent as a root agent of this region.
    pub(crate) fn root_agent(&self, agent_id: AgentId) -> Result<AgentView> {
        match self.deps.scene.agent(agent_id) {
            Some(view) if !view.is_child => Ok(view),
            _ => Err(TransferError::AgentNotFound(agent_id)),
        }
    }

    /// Ask a destination to drop the agent's placement. Failures are logged.
    pub(crate) async fn close_at(&self, region: &RegionDescriptor, agent_id: AgentId, auth_token: &str) -> bool {
        let closed = self
            .call(
                "close_agent",
                self.deps.simulation.close_agent(region, agent_id, auth_token),
            )
            .await;
        match closed {
            Ok(()) => {
                debug!(agent_id = %agent_id, region = %region.name, "Closed agent at destination");
                true
            }
            Err(err) => {
                warn!(
                    agent_id = %agent_id,
                    region = %region.name,
                    error = %err,
                    "Failed to close agent at destination"
                );
                false
            }
        }
    }
}

/// Destination placement that must be closed if the transfer does not
/// complete. Armed once create-agent succeeded.
#[derive(Default)]
pub(crate) struct PendingRollback {
    armed: Mutex<Option<(Arc<RegionDescriptor>, String)>>,
}

impl PendingRollback {
    pub(crate) fn arm(&self, region: Arc<RegionDescriptor>, auth_token: String) {
        *self.armed.lock() = Some((region, auth_token));
    }

    pub(crate) fn disarm(&self) -> Option<(Arc<RegionDescriptor>, String)> {
        self.armed.lock().take()
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
