//! In-memory collaborators for tests and local experiments.
//!
//! Every mock records what it was asked to do so tests can assert on the
//! exact calls a transfer made.

use crate::collaborators::{
    ClientNotifier, CollabResult, GridDirectory, SceneAgents, SimulationService, TeleportAuthorizer,
    TransferEventSink,
};
use crate::error::CollaboratorError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use transit_types::{
    AccessDecision, AccessRequest, AgentId, AgentSessionSnapshot, AgentView, ChildPositionUpdate,
    CrossRegionNotice, HomeLocation, ObjectId, ObjectSummary, RegionDescriptor, RegionHandle, RegionId,
    TeleportFinishNotice, TeleportFlags, TransferContext, TransferEvent, Vector3,
};

/// Callback run when a mock sees a call for an agent.
pub type AgentHook = Arc<dyn Fn(AgentId) + Send + Sync>;

/// Scene mutations recorded by [`MockScene`]
#[derive(Debug, Clone, PartialEq)]
pub enum SceneCall {
    Relocate { position: Vector3, look_at: Vector3 },
    AttachmentTeleported(u32),
    StandUp,
    RemoveFromPhysics,
    AddToPhysics { flying: bool },
    SuspendScripts,
    ResumeScripts,
    SetChild(bool),
    MakeChild(RegionHandle),
    MovedAway { keep_attachments: bool },
    ClearControls,
    CrossingFailed,
    Close,
    DeleteObject(ObjectId),
}

#[derive(Default)]
pub struct MockScene {
    agents: Mutex<HashMap<AgentId, AgentView>>,
    ground: Mutex<f32>,
    calls: Mutex<Vec<SceneCall>>,
}

impl MockScene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_agent(&self, view: AgentView) {
        self.agents.lock().insert(view.agent_id, view);
    }

    pub fn update_agent(&self, agent_id: AgentId, update: impl FnOnce(&mut AgentView)) {
        if let Some(view) = self.agents.lock().get_mut(&agent_id) {
            update(view);
        }
    }

    pub fn set_ground_height(&self, height: f32) {
        *self.ground.lock() = height;
    }

    pub fn calls(&self) -> Vec<SceneCall> {
        self.calls.lock().clone()
    }

    pub fn called(&self, call: &SceneCall) -> bool {
        self.calls.lock().contains(call)
    }

    fn mutate(
        &self,
        agent_id: AgentId,
        call: SceneCall,
        update: impl FnOnce(&mut AgentView),
    ) -> CollabResult<()> {
        let mut agents = self.agents.lock();
        let view = agents
            .get_mut(&agent_id)
            .ok_or(CollaboratorError::AgentGone(agent_id))?;
        update(view);
        self.calls.lock().push(call);
        Ok(())
    }
}

impl SceneAgents for MockScene {
    fn agent(&self, agent_id: AgentId) -> Option<AgentView> {
        self.agents.lock().get(&agent_id).cloned()
    }

    fn ground_height(&self, _x: f32, _y: f32) -> f32 {
        *self.ground.lock()
    }

    fn relocate(
        &self,
        agent_id: AgentId,
        position: Vector3,
        look_at: Vector3,
        _flags: TeleportFlags,
    ) -> CollabResult<()> {
        self.mutate(agent_id, SceneCall::Relocate { position, look_at }, |view| {
            view.position = position;
            view.look_at = look_at;
            view.velocity = Vector3::ZERO;
        })
    }

    fn notify_attachment_teleported(&self, agent_id: AgentId, attachment_local_id: u32) -> CollabResult<()> {
        self.mutate(agent_id, SceneCall::AttachmentTeleported(attachment_local_id), |_| {})
    }

    fn stand_up(&self, agent_id: AgentId) -> CollabResult<()> {
        self.mutate(agent_id, SceneCall::StandUp, |view| {
            view.sitting = false;
            view.seated_on_object = false;
        })
    }

    fn remove_from_physics(&self, agent_id: AgentId) -> CollabResult<()> {
        self.mutate(agent_id, SceneCall::RemoveFromPhysics, |_| {})
    }

    fn add_to_physics(&self, agent_id: AgentId, flying: bool) -> CollabResult<()> {
        self.mutate(agent_id, SceneCall::AddToPhysics { flying }, |view| view.flying = flying)
    }

    fn suspend_scripts(&self, agent_id: AgentId) -> CollabResult<()> {
        self.mutate(agent_id, SceneCall::SuspendScripts, |_| {})
    }

    fn resume_scripts(&self, agent_id: AgentId) -> CollabResult<()> {
        self.mutate(agent_id, SceneCall::ResumeScripts, |_| {})
    }

    fn set_child(&self, agent_id: AgentId, is_child: bool) -> CollabResult<()> {
        self.mutate(agent_id, SceneCall::SetChild(is_child), |view| view.is_child = is_child)
    }

    fn make_child_agent(&self, agent_id: AgentId, destination: &RegionDescriptor) -> CollabResult<()> {
        self.mutate(agent_id, SceneCall::MakeChild(destination.handle()), |view| {
            view.is_child = true
        })
    }

    fn has_moved_away(&self, agent_id: AgentId, keep_attachments: bool) -> CollabResult<()> {
        self.mutate(agent_id, SceneCall::MovedAway { keep_attachments }, |_| {})
    }

    fn clear_controls(&self, agent_id: AgentId) -> CollabResult<()> {
        self.mutate(agent_id, SceneCall::ClearControls, |view| {
            view.control_flags = Default::default()
        })
    }

    fn crossing_failed(&self, agent_id: AgentId) -> CollabResult<()> {
        self.mutate(agent_id, SceneCall::CrossingFailed, |_| {})
    }

    fn close_agent(&self, agent_id: AgentId) -> CollabResult<()> {
        if self.agents.lock().remove(&agent_id).is_none() {
            return Err(CollaboratorError::AgentGone(agent_id));
        }
        self.calls.lock().push(SceneCall::Close);
        Ok(())
    }

    fn delete_object(&self, object_id: ObjectId) -> CollabResult<()> {
        self.calls.lock().push(SceneCall::DeleteObject(object_id));
        Ok(())
    }
}

/// Remote calls recorded by [`MockSimulation`], by destination
#[derive(Debug, Clone, PartialEq)]
pub enum SimCall {
    QueryAccess(RegionHandle),
    CreateAgent(RegionHandle),
    UpdateAgent(RegionHandle),
    UpdateChildPosition(RegionHandle),
    CloseAgent(RegionHandle),
    CreateObject(RegionHandle),
}

/// Destinations that accept everything unless told otherwise.
pub struct MockSimulation {
    calls: Mutex<Vec<SimCall>>,
    created: Mutex<Vec<AgentSessionSnapshot>>,
    updates: Mutex<Vec<AgentSessionSnapshot>>,
    access: Mutex<AccessDecision>,
    refuse_create: Mutex<Option<String>>,
    refuse_create_at: Mutex<HashMap<RegionHandle, String>>,
    fail_update: Mutex<Option<CollaboratorError>>,
    refuse_objects: Mutex<bool>,
    on_create: Mutex<Option<AgentHook>>,
    on_update: Mutex<Option<AgentHook>>,
    stall_create: Mutex<Option<Duration>>,
}

impl Default for MockSimulation {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            created: Mutex::new(Vec::new()),
            updates: Mutex::new(Vec::new()),
            access: Mutex::new(AccessDecision::Granted(TransferContext::new(0.7, 0.7))),
            refuse_create: Mutex::new(None),
            refuse_create_at: Mutex::new(HashMap::new()),
            fail_update: Mutex::new(None),
            refuse_objects: Mutex::new(false),
            on_create: Mutex::new(None),
            on_update: Mutex::new(None),
            stall_create: Mutex::new(None),
        }
    }
}

impl MockSimulation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_access(&self, decision: AccessDecision) {
        *self.access.lock() = decision;
    }

    /// Grant access at the given protocol version.
    pub fn grant_version(&self, version: f32) {
        self.set_access(AccessDecision::Granted(TransferContext::new(version, version)));
    }

    pub fn refuse_create(&self, reason: impl Into<String>) {
        *self.refuse_create.lock() = Some(reason.into());
    }

    pub fn refuse_create_at(&self, handle: RegionHandle, reason: impl Into<String>) {
        self.refuse_create_at.lock().insert(handle, reason.into());
    }

    pub fn fail_update(&self, err: CollaboratorError) {
        *self.fail_update.lock() = Some(err);
    }

    pub fn refuse_objects(&self) {
        *self.refuse_objects.lock() = true;
    }

    /// Accept create-agent, then hold the reply back for `delay`.
    pub fn stall_create(&self, delay: Duration) {
        *self.stall_create.lock() = Some(delay);
    }

    pub fn on_create(&self, hook: AgentHook) {
        *self.on_create.lock() = Some(hook);
    }

    pub fn on_update(&self, hook: AgentHook) {
        *self.on_update.lock() = Some(hook);
    }

    pub fn calls(&self) -> Vec<SimCall> {
        self.calls.lock().clone()
    }

    pub fn count(&self, matches: impl Fn(&SimCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|call| matches(call)).count()
    }

    pub fn created(&self) -> Vec<AgentSessionSnapshot> {
        self.created.lock().clone()
    }

    pub fn last_update(&self) -> Option<AgentSessionSnapshot> {
        self.updates.lock().last().cloned()
    }

    fn record(&self, call: SimCall) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl SimulationService for MockSimulation {
    async fn query_access(
        &self,
        destination: &RegionDescriptor,
        _request: &AccessRequest,
    ) -> CollabResult<AccessDecision> {
        self.record(SimCall::QueryAccess(destination.handle()));
        Ok(self.access.lock().clone())
    }

    async fn create_agent(
        &self,
        _source: &RegionDescriptor,
        destination: &RegionDescriptor,
        snapshot: &AgentSessionSnapshot,
        _flags: TeleportFlags,
    ) -> CollabResult<()> {
        let handle = destination.handle();
        self.record(SimCall::CreateAgent(handle));

        let refusal = self
            .refuse_create_at
            .lock()
            .get(&handle)
            .cloned()
            .or_else(|| self.refuse_create.lock().clone());
        if let Some(reason) = refusal {
            return Err(CollaboratorError::Rejected(reason));
        }

        self.created.lock().push(snapshot.clone());
        let hook = self.on_create.lock().clone();
        if let Some(hook) = hook {
            hook(snapshot.agent_id);
        }
        let stall = *self.stall_create.lock();
        if let Some(delay) = stall {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    async fn update_agent(
        &self,
        destination: &RegionDescriptor,
        snapshot: &AgentSessionSnapshot,
    ) -> CollabResult<()> {
        self.record(SimCall::UpdateAgent(destination.handle()));
        if let Some(err) = self.fail_update.lock().clone() {
            return Err(err);
        }

        self.updates.lock().push(snapshot.clone());
        let hook = self.on_update.lock().clone();
        if let Some(hook) = hook {
            hook(snapshot.agent_id);
        }
        Ok(())
    }

    async fn update_child_position(
        &self,
        destination: &RegionDescriptor,
        _update: &ChildPositionUpdate,
    ) -> CollabResult<()> {
        self.record(SimCall::UpdateChildPosition(destination.handle()));
        Ok(())
    }

    async fn close_agent(
        &self,
        destination: &RegionDescriptor,
        _agent_id: AgentId,
        _auth_token: &str,
    ) -> CollabResult<()> {
        self.record(SimCall::CloseAgent(destination.handle()));
        Ok(())
    }

    async fn create_object(
        &self,
        destination: &RegionDescriptor,
        _position: Vector3,
        _object: &ObjectSummary,
    ) -> CollabResult<()> {
        self.record(SimCall::CreateObject(destination.handle()));
        if *self.refuse_objects.lock() {
            return Err(CollaboratorError::Rejected("object refused".into()));
        }
        Ok(())
    }
}

/// Grid directory over a fixed set of regions.
#[derive(Default)]
pub struct MockGrid {
    regions: Mutex<Vec<RegionDescriptor>>,
    homes: Mutex<HashMap<AgentId, HomeLocation>>,
    position_queries: AtomicUsize,
    range_queries: AtomicUsize,
}

impl MockGrid {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_region(&self, region: RegionDescriptor) {
        self.regions.lock().push(region);
    }

    pub fn set_home(&self, agent_id: AgentId, home: HomeLocation) {
        self.homes.lock().insert(agent_id, home);
    }

    pub fn position_queries(&self) -> usize {
        self.position_queries.load(Ordering::SeqCst)
    }

    pub fn range_queries(&self) -> usize {
        self.range_queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GridDirectory for MockGrid {
    async fn region_by_position(&self, world_x: u32, world_y: u32) -> CollabResult<Option<RegionDescriptor>> {
        self.position_queries.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .regions
            .lock()
            .iter()
            .find(|region| region.footprint.contains_world(world_x as f64, world_y as f64))
            .cloned())
    }

    async fn region_by_id(&self, region_id: RegionId) -> CollabResult<Option<RegionDescriptor>> {
        Ok(self
            .regions
            .lock()
            .iter()
            .find(|region| region.region_id == region_id)
            .cloned())
    }

    async fn region_range(
        &self,
        min_x: u32,
        max_x: u32,
        min_y: u32,
        max_y: u32,
    ) -> CollabResult<Vec<RegionDescriptor>> {
        self.range_queries.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .regions
            .lock()
            .iter()
            .filter(|region| {
                let fp = &region.footprint;
                fp.world_x <= max_x
                    && fp.world_x + fp.size_x > min_x
                    && fp.world_y <= max_y
                    && fp.world_y + fp.size_y > min_y
            })
            .cloned()
            .collect())
    }

    async fn home_location(&self, agent_id: AgentId) -> CollabResult<Option<HomeLocation>> {
        Ok(self.homes.lock().get(&agent_id).cloned())
    }
}

/// Client messages recorded by [`RecordingNotifier`]
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    TeleportFailed(String),
    TeleportStart(TeleportFlags),
    LocalTeleport { position: Vector3, look_at: Vector3 },
    TeleportFinish(TeleportFinishNotice),
    EnableSimulator(RegionHandle, SocketAddr),
    EstablishAgentCommunication { region: RegionHandle, seed_capability: String },
    CrossRegion(CrossRegionNotice),
    Alert(String),
    MapBlockOffline(u32, u32),
}

#[derive(Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<Notice>>,
    on_teleport_finish: Mutex<Option<AgentHook>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `hook` whenever a client is sent to a teleport destination.
    pub fn on_teleport_finish(&self, hook: AgentHook) {
        *self.on_teleport_finish.lock() = Some(hook);
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().clone()
    }

    pub fn failures(&self) -> Vec<String> {
        self.notices
            .lock()
            .iter()
            .filter_map(|notice| match notice {
                Notice::TeleportFailed(reason) => Some(reason.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn alerts(&self) -> Vec<String> {
        self.notices
            .lock()
            .iter()
            .filter_map(|notice| match notice {
                Notice::Alert(message) => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    fn push(&self, notice: Notice) {
        self.notices.lock().push(notice);
    }
}

impl ClientNotifier for RecordingNotifier {
    fn teleport_failed(&self, _agent_id: AgentId, reason: &str) {
        self.push(Notice::TeleportFailed(reason.to_string()));
    }

    fn teleport_start(&self, _agent_id: AgentId, flags: TeleportFlags) {
        self.push(Notice::TeleportStart(flags));
    }

    fn local_teleport(&self, _agent_id: AgentId, position: Vector3, look_at: Vector3, _flags: TeleportFlags) {
        self.push(Notice::LocalTeleport { position, look_at });
    }

    fn teleport_finish(&self, agent_id: AgentId, notice: &TeleportFinishNotice) {
        self.push(Notice::TeleportFinish(notice.clone()));
        let hook = self.on_teleport_finish.lock().clone();
        if let Some(hook) = hook {
            hook(agent_id);
        }
    }

    fn enable_simulator(&self, _agent_id: AgentId, region: &RegionDescriptor, endpoint: SocketAddr) {
        self.push(Notice::EnableSimulator(region.handle(), endpoint));
    }

    fn establish_agent_communication(
        &self,
        _agent_id: AgentId,
        region: &RegionDescriptor,
        _endpoint: SocketAddr,
        seed_capability: &str,
    ) {
        self.push(Notice::EstablishAgentCommunication {
            region: region.handle(),
            seed_capability: seed_capability.to_string(),
        });
    }

    fn cross_region(&self, _agent_id: AgentId, notice: &CrossRegionNotice) {
        self.push(Notice::CrossRegion(notice.clone()));
    }

    fn alert(&self, _agent_id: AgentId, message: &str) {
        self.push(Notice::Alert(message.to_string()));
    }

    fn map_block_offline(&self, _agent_id: AgentId, loc_x: u32, loc_y: u32) {
        self.push(Notice::MapBlockOffline(loc_x, loc_y));
    }
}

#[derive(Default)]
pub struct RecordingEvents {
    events: Mutex<Vec<TransferEvent>>,
}

impl RecordingEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TransferEvent> {
        self.events.lock().clone()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(TransferEvent::kind).collect()
    }
}

impl TransferEventSink for RecordingEvents {
    fn emit(&self, event: TransferEvent) {
        self.events.lock().push(event);
    }
}

/// Authorizer with fixed answers.
#[derive(Debug, Clone, Copy)]
pub struct StaticAuthorizer {
    pub grid_god: bool,
    pub can_teleport: bool,
}

impl StaticAuthorizer {
    pub fn allow_all() -> Self {
        Self {
            grid_god: false,
            can_teleport: true,
        }
    }

    pub fn deny_all() -> Self {
        Self {
            grid_god: false,
            can_teleport: false,
        }
    }

    pub fn god() -> Self {
        Self {
            grid_god: true,
            can_teleport: true,
        }
    }
}

impl TeleportAuthorizer for StaticAuthorizer {
    fn is_grid_god(&self, _agent_id: AgentId) -> bool {
        self.grid_god
    }

    fn can_teleport(&self, _agent_id: AgentId) -> bool {
        self.can_teleport
    }
}
