//! EntityTransferService: one region's entry point for moving agents and
//! objects to other regions.

use crate::collaborators::CollabResult;
use crate::crossing::{CrossingTarget, RegionCrossingOrchestrator};
use crate::error::Result;
use crate::metrics::TransferMetrics;
use crate::neighbors::{NeighborChildAgentManager, ReconcileReport};
use crate::objects::ObjectCrossing;
use crate::runtime::TransferRuntime;
use crate::teleport::{TeleportOrchestrator, TeleportOutcome};
use prometheus::Registry;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;
use transit_state::{BannedDestinationCache, TransferStateTracker};
use transit_types::{
    AgentId, Landmark, ObjectSummary, RegionDescriptor, RegionHandle, TeleportFlags, Vector3,
};

/// Teleports, crossings and child agent upkeep for one region.
///
/// Built with [`crate::EntityTransferServiceBuilder`].
pub struct EntityTransferService {
    rt: Arc<TransferRuntime>,
    teleports: TeleportOrchestrator,
    crossings: Arc<RegionCrossingOrchestrator>,
    neighbors: NeighborChildAgentManager,
    objects: ObjectCrossing,
    registry: Registry,
}

impl EntityTransferService {
    pub(crate) fn new(rt: Arc<TransferRuntime>, registry: Registry) -> Self {
        info!(
            region = %rt.local.descriptor.name,
            handle = %rt.local.handle(),
            "Entity transfer service ready"
        );
        Self {
            teleports: TeleportOrchestrator::new(Arc::clone(&rt)),
            crossings: Arc::new(RegionCrossingOrchestrator::new(Arc::clone(&rt))),
            neighbors: NeighborChildAgentManager::new(Arc::clone(&rt)),
            objects: ObjectCrossing::new(Arc::clone(&rt)),
            rt,
            registry,
        }
    }

    /// Teleport to a position in the region at `target`.
    pub async fn teleport(
        &self,
        agent_id: AgentId,
        target: RegionHandle,
        position: Vector3,
        look_at: Vector3,
        flags: TeleportFlags,
    ) -> Result<TeleportOutcome> {
        self.teleports
            .teleport(agent_id, target, position, look_at, flags)
            .await
    }

    /// Teleport to the agent's home location.
    pub async fn teleport_home(&self, agent_id: AgentId) -> Result<TeleportOutcome> {
        self.teleports.teleport_home(agent_id).await
    }

    /// Teleport to a saved landmark.
    pub async fn teleport_to_landmark(
        &self,
        agent_id: AgentId,
        landmark: &Landmark,
        look_at: Vector3,
    ) -> Result<TeleportOutcome> {
        self.teleports
            .teleport_to_landmark(agent_id, landmark, look_at)
            .await
    }

    /// Teleport to an already resolved region.
    pub async fn do_teleport(
        &self,
        agent_id: AgentId,
        region: Arc<RegionDescriptor>,
        position: Vector3,
        look_at: Vector3,
        flags: TeleportFlags,
    ) -> Result<TeleportOutcome> {
        self.teleports
            .do_teleport(agent_id, region, position, look_at, flags)
            .await
    }

    /// Client pressed cancel on a teleport in progress.
    pub fn on_client_cancel(&self, agent_id: AgentId) -> bool {
        self.teleports.on_client_cancel(agent_id)
    }

    /// Client connection went away; aborts only when logging out.
    pub fn on_connection_closed(&self, agent_id: AgentId, logging_out: bool) -> bool {
        self.teleports.on_connection_closed(agent_id, logging_out)
    }

    /// Destination callback: the agent arrived, or the source may release it.
    pub fn on_agent_arrived(&self, agent_id: AgentId) -> bool {
        self.teleports.on_agent_arrived(agent_id)
    }

    /// Start a border crossing in the background.
    pub fn cross(&self, agent_id: AgentId, flying: bool) -> JoinHandle<Result<RegionHandle>> {
        self.crossings.cross(agent_id, flying)
    }

    /// Cross the border and wait for the outcome.
    pub async fn cross_async(&self, agent_id: AgentId, flying: bool) -> Result<RegionHandle> {
        self.crossings.cross_async(agent_id, flying).await
    }

    /// Where the agent would cross to right now, if anywhere.
    pub async fn crossing_destination(&self, agent_id: AgentId) -> Result<CrossingTarget> {
        let view = self.rt.root_agent(agent_id)?;
        self.crossings.get_destination(&view).await
    }

    /// Create and close child agents to match the agent's view.
    pub async fn reconcile_child_agents(&self, agent_id: AgentId) -> Result<ReconcileReport> {
        self.neighbors.reconcile(agent_id).await
    }

    pub async fn enable_child_agent(&self, agent_id: AgentId, region: &Arc<RegionDescriptor>) -> Result<bool> {
        self.neighbors.enable_child_agent(agent_id, region).await
    }

    pub async fn close_old_child_agents(&self, agent_id: AgentId) -> Result<Vec<RegionHandle>> {
        self.neighbors.close_old_child_agents(agent_id).await
    }

    pub async fn close_all_child_agents(&self, agent_id: AgentId, auth_token: &str) -> Vec<RegionHandle> {
        self.neighbors.close_all_child_agents(agent_id, auth_token).await
    }

    pub async fn send_child_position_updates(&self, agent_id: AgentId) -> Result<usize> {
        self.neighbors.send_child_position_updates(agent_id).await
    }

    /// Neighbor owning an out-of-bounds object position, and the position there.
    pub async fn object_destination(
        &self,
        position: Vector3,
    ) -> CollabResult<Option<(Arc<RegionDescriptor>, Vector3)>> {
        self.objects.object_destination(position).await
    }

    /// Hand an object to `destination`, deleting it locally once accepted.
    pub async fn cross_object(
        &self,
        destination: &RegionDescriptor,
        position: Vector3,
        object: &ObjectSummary,
    ) -> Result<()> {
        self.objects.cross_object(destination, position, object).await
    }

    pub fn tracker(&self) -> &Arc<TransferStateTracker> {
        self.rt.tracker()
    }

    pub fn banned(&self) -> &BannedDestinationCache {
        self.rt.banned()
    }

    pub fn runtime(&self) -> &Arc<TransferRuntime> {
        &self.rt
    }

    pub fn metrics(&self) -> &TransferMetrics {
        self.rt.metrics()
    }

    /// Registry the metrics were registered with.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
