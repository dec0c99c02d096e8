//! Boundaries to the rest of the simulator.
//!
//! The scene, notifier, event sink and authorizer are in-process and
//! synchronous. The simulation service and grid directory cross the network
//! and are async; every simulation call is wrapped in a per-call deadline by
//! the caller.

use crate::error::CollaboratorError;
use async_trait::async_trait;
use std::net::SocketAddr;
use tokio::sync::broadcast;
use tracing::trace;
use transit_types::{
    AccessDecision, AccessRequest, AgentId, AgentSessionSnapshot, AgentView, ChildPositionUpdate,
    CrossRegionNotice, HomeLocation, ObjectId, ObjectSummary, RegionDescriptor, RegionId,
    TeleportFinishNotice, TeleportFlags, TransferEvent, Vector3,
};

/// Result alias for collaborator calls.
pub type CollabResult<T> = std::result::Result<T, CollaboratorError>;

/// Live agents and objects of the local scene.
///
/// Mutations return `AgentGone` when the agent left the scene in the
/// meantime.
pub trait SceneAgents: Send + Sync {
    /// Current state of the agent, `None` when it is not in the scene.
    fn agent(&self, agent_id: AgentId) -> Option<AgentView>;

    /// Terrain height at a region-local horizontal position.
    fn ground_height(&self, x: f32, y: f32) -> f32;

    /// Move the agent within the region, facing `look_at`, with zero velocity.
    fn relocate(
        &self,
        agent_id: AgentId,
        position: Vector3,
        look_at: Vector3,
        flags: TeleportFlags,
    ) -> CollabResult<()>;

    /// Fire the teleport `changed` event on one attachment.
    fn notify_attachment_teleported(&self, agent_id: AgentId, attachment_local_id: u32) -> CollabResult<()>;

    fn stand_up(&self, agent_id: AgentId) -> CollabResult<()>;

    fn remove_from_physics(&self, agent_id: AgentId) -> CollabResult<()>;

    fn add_to_physics(&self, agent_id: AgentId, flying: bool) -> CollabResult<()>;

    /// Stop attachment scripts and keep their state for the handoff.
    fn suspend_scripts(&self, agent_id: AgentId) -> CollabResult<()>;

    fn resume_scripts(&self, agent_id: AgentId) -> CollabResult<()>;

    /// Flip the child flag without tearing anything down.
    fn set_child(&self, agent_id: AgentId, is_child: bool) -> CollabResult<()>;

    /// Demote the agent to a child placement of the region it moved to.
    fn make_child_agent(&self, agent_id: AgentId, destination: &RegionDescriptor) -> CollabResult<()>;

    /// Hook for subsystems that react to the avatar leaving.
    fn has_moved_away(&self, agent_id: AgentId, keep_attachments: bool) -> CollabResult<()>;

    fn clear_controls(&self, agent_id: AgentId) -> CollabResult<()>;

    /// Tell the agent its crossing did not happen.
    fn crossing_failed(&self, agent_id: AgentId) -> CollabResult<()>;

    /// Remove the agent from this region entirely.
    fn close_agent(&self, agent_id: AgentId) -> CollabResult<()>;

    fn delete_object(&self, object_id: ObjectId) -> CollabResult<()>;
}

/// Calls into another region's entity transfer endpoint.
#[async_trait]
pub trait SimulationService: Send + Sync {
    async fn query_access(
        &self,
        destination: &RegionDescriptor,
        request: &AccessRequest,
    ) -> CollabResult<AccessDecision>;

    /// Create a placement for the agent. Refusals come back as `Rejected`.
    async fn create_agent(
        &self,
        source: &RegionDescriptor,
        destination: &RegionDescriptor,
        snapshot: &AgentSessionSnapshot,
        flags: TeleportFlags,
    ) -> CollabResult<()>;

    /// Push the full agent state, making the placement authoritative.
    async fn update_agent(
        &self,
        destination: &RegionDescriptor,
        snapshot: &AgentSessionSnapshot,
    ) -> CollabResult<()>;

    async fn update_child_position(
        &self,
        destination: &RegionDescriptor,
        update: &ChildPositionUpdate,
    ) -> CollabResult<()>;

    /// Remove the agent's placement at the destination.
    async fn close_agent(
        &self,
        destination: &RegionDescriptor,
        agent_id: AgentId,
        auth_token: &str,
    ) -> CollabResult<()>;

    async fn create_object(
        &self,
        destination: &RegionDescriptor,
        position: Vector3,
        object: &ObjectSummary,
    ) -> CollabResult<()>;
}

/// Region and user lookups against the grid services.
#[async_trait]
pub trait GridDirectory: Send + Sync {
    /// Region containing the grid cell whose origin is `(world_x, world_y)`.
    async fn region_by_position(&self, world_x: u32, world_y: u32) -> CollabResult<Option<RegionDescriptor>>;

    async fn region_by_id(&self, region_id: RegionId) -> CollabResult<Option<RegionDescriptor>>;

    /// Regions intersecting the world rectangle, bounds inclusive.
    async fn region_range(
        &self,
        min_x: u32,
        max_x: u32,
        min_y: u32,
        max_y: u32,
    ) -> CollabResult<Vec<RegionDescriptor>>;

    /// `None` when the grid has no record for the user.
    async fn home_location(&self, agent_id: AgentId) -> CollabResult<Option<HomeLocation>>;
}

/// Messages to the agent's client.
pub trait ClientNotifier: Send + Sync {
    fn teleport_failed(&self, agent_id: AgentId, reason: &str);

    fn teleport_start(&self, agent_id: AgentId, flags: TeleportFlags);

    fn local_teleport(&self, agent_id: AgentId, position: Vector3, look_at: Vector3, flags: TeleportFlags);

    fn teleport_finish(&self, agent_id: AgentId, notice: &TeleportFinishNotice);

    fn enable_simulator(&self, agent_id: AgentId, region: &RegionDescriptor, endpoint: SocketAddr);

    fn establish_agent_communication(
        &self,
        agent_id: AgentId,
        region: &RegionDescriptor,
        endpoint: SocketAddr,
        seed_capability: &str,
    );

    fn cross_region(&self, agent_id: AgentId, notice: &CrossRegionNotice);

    fn alert(&self, agent_id: AgentId, message: &str);

    /// Mark a grid cell as empty on the client's map.
    fn map_block_offline(&self, agent_id: AgentId, loc_x: u32, loc_y: u32);
}

/// Consumer of [`TransferEvent`]s.
pub trait TransferEventSink: Send + Sync {
    fn emit(&self, event: TransferEvent);
}

/// Fans events out over a `tokio::sync::broadcast` channel.
pub struct BroadcastEventSink {
    sender: broadcast::Sender<TransferEvent>,
}

impl BroadcastEventSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TransferEvent> {
        self.sender.subscribe()
    }
}

impl TransferEventSink for BroadcastEventSink {
    fn emit(&self, event: TransferEvent) {
        if self.sender.send(event).is_err() {
            trace!("No transfer event subscribers");
        }
    }
}

/// Permission checks for teleports.
pub trait TeleportAuthorizer: Send + Sync {
    fn is_grid_god(&self, agent_id: AgentId) -> bool;

    fn can_teleport(&self, agent_id: AgentId) -> bool;
}
