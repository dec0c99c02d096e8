//! Walking, flying or driving across a region border.
//!
//! Unlike a teleport the agent usually already has a child placement in
//! the neighbor, so a crossing mostly promotes that placement: push the full
//! agent state, tell the client and demote the local agent. A neighbor that
//! refused the agent is remembered for a while so a stream of movement
//! updates at the border does not hammer it.

use crate::error::{Result, TransferError};
use crate::neighbors::NeighborChildAgentManager;
use crate::runtime::{panic_message, PendingRollback, TransferRuntime};
use crate::snapshot::AgentSessionSnapshotBuilder;
use chrono::Utc;
use futures::FutureExt;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use transit_types::{
    AccessDecision, AccessRequest, AgentId, AgentView, ControlFlags, CrossRegionNotice, Footprint, Placement,
    RegionDescriptor, RegionHandle, TransferContext, TransferEvent, TransferPhase, Vector3,
};

const NOTICE_IN_TRANSIT: &str = "Agent is already in transit.";

/// A neighbor that will take the agent
#[derive(Debug, Clone)]
pub struct CrossingTarget {
    pub region: Arc<RegionDescriptor>,
    /// Arrival position relative to `region`.
    pub position: Vector3,
    pub context: TransferContext,
}

pub struct RegionCrossingOrchestrator {
    rt: Arc<TransferRuntime>,
    neighbors: NeighborChildAgentManager,
}

impl RegionCrossingOrchestrator {
    pub fn new(rt: Arc<TransferRuntime>) -> Self {
        let neighbors = NeighborChildAgentManager::new(Arc::clone(&rt));
        Self { rt, neighbors }
    }

    /// Start a crossing in the background.
    pub fn cross(self: &Arc<Self>, agent_id: AgentId, flying: bool) -> JoinHandle<Result<RegionHandle>> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.cross_async(agent_id, flying).await })
    }

    /// Move a root agent that left the region bounds into the neighbor
    /// it is heading for.
    #[instrument(skip(self), fields(agent_id = %agent_id))]
    pub async fn cross_async(&self, agent_id: AgentId, flying: bool) -> Result<RegionHandle> {
        let view = self.rt.root_agent(agent_id)?;

        let target = match self.get_destination(&view).await {
            Ok(target) => target,
            Err(err) => {
                self.refused(&view, None, &err);
                return Err(err);
            }
        };
        let Some(endpoint) = target.region.resolve_endpoint().await else {
            let err = TransferError::EndpointUnresolved(target.region.name.clone());
            self.refused(&view, Some(target.region.handle()), &err);
            return Err(err);
        };
        let Some(guard) = self.rt.tracker.begin_guarded(agent_id) else {
            debug!("Crossing skipped, agent already in transit");
            return Err(TransferError::AlreadyInTransit {
                agent_id,
                notice: NOTICE_IN_TRANSIT,
            });
        };

        let scene = &self.rt.deps.scene;
        if let Err(err) = scene.remove_from_physics(agent_id) {
            debug!(error = %err, "Could not remove agent from physics");
        }
        if let Err(err) = scene.suspend_scripts(agent_id) {
            debug!(error = %err, "Could not suspend scripts");
        }

        let pending = PendingRollback::default();
        let handoff = self.hand_over(&view, &target, endpoint, flying, &pending);
        let result = match AssertUnwindSafe(handoff).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(panic = %message, "Crossing panicked");
                Err(TransferError::Internal(message))
            }
        };

        let result = match result {
            Ok(handle) => Ok(handle),
            Err(err) => {
                self.restore_after_failure(&view, &target.region, flying, &err, &pending)
                    .await;
                Err(err)
            }
        };
        drop(guard);
        result
    }

    /// The neighbor the agent is heading into, after checking it will
    /// take the agent.
    pub async fn get_destination(&self, view: &AgentView) -> Result<CrossingTarget> {
        if view.region_view_distance <= 0.0 {
            return Err(TransferError::CrossingDisabled(view.agent_id));
        }

        let probe = view.position + view.velocity * self.rt.config.crossing_lookahead_secs;
        let (world_x, world_y) = Footprint::world_of(self.rt.local.handle(), probe);
        let region = self
            .rt
            .resolver
            .resolve_by_world_position(world_x, world_y)
            .await
            .map_err(TransferError::Directory)?;
        let Some(region) = region else {
            return Err(TransferError::NoNeighbor);
        };
        if region.region_id == self.rt.local.descriptor.region_id || !region.is_online() {
            return Err(TransferError::NoNeighbor);
        }

        let position = Vector3::new(
            (world_x - region.footprint.world_x as f64) as f32,
            (world_y - region.footprint.world_y as f64) as f32,
            probe.z,
        );
        let context = self.check_agent_access(view, &region, position).await?;
        Ok(CrossingTarget {
            region,
            position,
            context,
        })
    }

    /// Ask the neighbor whether the agent may enter. Refusals are
    /// remembered per agent and region.
    pub async fn check_agent_access(
        &self,
        view: &AgentView,
        region: &RegionDescriptor,
        position: Vector3,
    ) -> Result<TransferContext> {
        let agent_id = view.agent_id;
        let handle = region.handle();
        if self.rt.banned.is_banned(handle, agent_id) {
            return Err(TransferError::RecentlyRefused(region.name.clone()));
        }

        let request = AccessRequest {
            agent_id,
            home_uri: view.home_uri.clone(),
            via_teleport: false,
            position,
        };
        let decision = self
            .rt
            .call(
                "query_access",
                self.rt.deps.simulation.query_access(region, &request),
            )
            .await;

        let refusal = match decision {
            Ok(AccessDecision::Granted(context)) => {
                let appearance = view.appearance.clone().unwrap_or_default();
                if appearance.can_teleport(context.outbound) {
                    return Ok(context);
                }
                TransferError::OutfitIncompatible(region.name.clone())
            }
            Ok(AccessDecision::Denied(reason)) => TransferError::AccessDenied {
                region: region.name.clone(),
                reason,
            },
            Err(err) => {
                warn!(region = %region.name, error = %err, "Access query failed");
                TransferError::AccessDenied {
                    region: region.name.clone(),
                    reason: String::new(),
                }
            }
        };

        self.rt.banned.ban(handle, agent_id);
        debug!(region = %region.name, reason = %refusal, "Crossing refused, destination banned");
        Err(refusal)
    }

    async fn hand_over(
        &self,
        view: &AgentView,
        target: &CrossingTarget,
        endpoint: SocketAddr,
        flying: bool,
        pending: &PendingRollback,
    ) -> Result<RegionHandle> {
        let agent_id = view.agent_id;
        let region = &target.region;
        let handle = region.handle();
        let tracker = &self.rt.tracker;
        let scene = &self.rt.deps.scene;

        tracker.set_phase(agent_id, TransferPhase::Transferring);

        if !self.rt.known.knows(agent_id, handle) {
            self.neighbors.create_far_child(view, region, target.position).await?;
            pending.arm(Arc::clone(region), view.client.session_id.to_string());
        }
        if tracker.current_phase(agent_id) == Some(TransferPhase::Aborting) {
            return Err(TransferError::Aborted { stage: "create_agent" });
        }

        let seed = self.rt.known.seed(agent_id, handle);
        let mut snapshot =
            AgentSessionSnapshotBuilder::build(view, target.position, Placement::Root, seed.as_deref());
        snapshot.children_caps_seeds = self.rt.known.seeds(agent_id);
        if flying {
            snapshot.control_flags |= ControlFlags::FLY;
        } else {
            snapshot.control_flags.remove(ControlFlags::FLY);
        }

        let to_close = self
            .neighbors
            .child_agents_to_close(agent_id, &region.footprint, view.region_view_distance);
        if target.context.outbound < self.rt.config.local_close_min_version() {
            for closing in &to_close {
                snapshot.children_caps_seeds.remove(closing);
            }
        }

        let updated = self
            .rt
            .call(
                "update_agent",
                self.rt.deps.simulation.update_agent(region, &snapshot),
            )
            .await;
        if let Err(source) = updated {
            return Err(TransferError::UpdateAgentFailed {
                region: region.name.clone(),
                source,
            });
        }
        pending.disarm();

        if let Err(err) = scene.set_child(agent_id, true) {
            warn!(error = %err, "Could not mark agent as child");
        }
        let velocity = if view.crossing.preserve_velocity {
            Vector3::new(view.velocity.x, view.velocity.y, 0.0)
        } else {
            Vector3::ZERO
        };
        let seed_url = AgentSessionSnapshotBuilder::seed_capability_url(&region.server_uri, &snapshot.caps_path);
        self.rt.deps.notifier.cross_region(
            agent_id,
            &CrossRegionNotice {
                destination: handle,
                endpoint,
                seed_capability: seed_url,
                session_id: view.client.session_id,
                position: target.position,
                velocity,
                size_x: region.footprint.size_x,
                size_y: region.footprint.size_y,
            },
        );

        tracker.set_phase(agent_id, TransferPhase::ReceivedAtDestination);
        tracker.set_phase(agent_id, TransferPhase::CleaningUp);

        self.neighbors.close_child_agents(view, &to_close).await;

        let keep_controls = view.crossing.keep_controls;
        if !keep_controls {
            if let Err(err) = scene.clear_controls(agent_id) {
                debug!(error = %err, "Could not clear controls");
            }
        }
        if let Err(err) = scene.has_moved_away(agent_id, !keep_controls) {
            warn!(error = %err, "Moved-away hook failed");
        }
        if let Err(err) = scene.make_child_agent(agent_id, region) {
            warn!(error = %err, "Could not demote agent to child");
        }
        self.rt.known.forget_agent(agent_id);

        self.rt.metrics.record_crossing("completed");
        self.rt.deps.events.emit(TransferEvent::CrossingCompleted {
            agent_id,
            to: handle,
            at: Utc::now(),
        });
        info!(region = %region.name, position = %target.position, "Crossed into neighbor");
        Ok(handle)
    }

    /// Put the agent back the way it was before the crossing started.
    async fn restore_after_failure(
        &self,
        view: &AgentView,
        region: &RegionDescriptor,
        flying: bool,
        err: &TransferError,
        pending: &PendingRollback,
    ) {
        let agent_id = view.agent_id;
        let scene = &self.rt.deps.scene;
        self.rt.tracker.set_phase(agent_id, TransferPhase::CleaningUp);

        if let Some((created, token)) = pending.disarm() {
            self.rt.known.remove(agent_id, created.handle());
            self.rt.close_at(&created, agent_id, &token).await;
        }
        if scene.agent(agent_id).is_some_and(|current| current.is_child) {
            if let Err(err) = scene.set_child(agent_id, false) {
                warn!(error = %err, "Could not restore root agent");
            }
        }
        if let Err(err) = scene.resume_scripts(agent_id) {
            warn!(error = %err, "Could not resume scripts");
        }
        if !view.seated_on_object {
            if let Err(err) = scene.add_to_physics(agent_id, flying) {
                warn!(error = %err, "Could not return agent to physics");
            }
        }
        if let Err(err) = scene.crossing_failed(agent_id) {
            debug!(error = %err, "Crossing failure notice not delivered");
        }

        self.rt.metrics.record_crossing("failed");
        self.rt.deps.events.emit(TransferEvent::CrossingFailed {
            agent_id,
            to: Some(region.handle()),
            reason: err.to_string(),
            at: Utc::now(),
        });
        warn!(agent_id = %agent_id, region = %region.name, error = %err, "Crossing failed");
    }

    /// A crossing that never started.
    fn refused(&self, view: &AgentView, to: Option<RegionHandle>, err: &TransferError) {
        let agent_id = view.agent_id;
        if let Some(message) = err.user_message() {
            self.rt.deps.notifier.alert(agent_id, &message);
        }
        if let Err(err) = self.rt.deps.scene.crossing_failed(agent_id) {
            debug!(error = %err, "Crossing failure notice not delivered");
        }
        self.rt.metrics.record_crossing("refused");
        self.rt.deps.events.emit(TransferEvent::CrossingFailed {
            agent_id,
            to,
            reason: err.to_string(),
            at: Utc::now(),
        });
        debug!(agent_id = %agent_id, reason = %err, "Crossing refused");
    }
}
