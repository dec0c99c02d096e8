//! Teleports: same-region repositioning and cross-region handoff.
//!
//! A cross-region teleport creates a placement at the destination, pushes
//! the full agent state there and demotes the local agent to a child. Two
//! handoff flavours exist, chosen by the protocol version the destination
//! negotiated during the access query:
//!
//! * V1 sends the client to the destination and then waits for the
//!   destination to confirm the arrival before the source lets go.
//! * V2 tells the client first, treats a successful update-agent as the
//!   arrival and only waits for the release callback before closing a
//!   source that will not stay in view.
//!
//! Once create-agent succeeded every failure path closes the destination
//! placement again before the error is surfaced.

use crate::error::{CollaboratorError, FailureClass, Result, TransferError};
use crate::neighbors::NeighborChildAgentManager;
use crate::runtime::{panic_message, PendingRollback, TransferRuntime};
use crate::snapshot::AgentSessionSnapshotBuilder;
use chrono::Utc;
use futures::FutureExt;
use std::future::Future;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use transit_types::{
    is_outside_view, AccessDecision, AccessRequest, AgentId, AgentSessionSnapshot, AgentView, ControlFlags,
    Landmark, Placement, RegionDescriptor, RegionHandle, TeleportFinishNotice, TeleportFlags, TransferContext,
    TransferEvent, TransferPhase, Vector3,
};

const NOTICE_RETRY_SHORTLY: &str = "Previous teleport process incomplete.  Please retry shortly.";
const NOTICE_IN_TRANSIT: &str = "Agent is already in transit.";
const NOTICE_HOME_BUSY: &str = "Already processing a teleport";

/// Position old clients send when they mean "wherever the region wants me".
const LEGACY_DEFAULT_LANDING: Vector3 = Vector3::new(128.0, 128.0, 22.5);

/// Height used when a same-region target is unusable.
const EMERGENCY_HEIGHT: f32 = 128.0;

/// Where a successful teleport left the agent
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TeleportOutcome {
    /// Repositioned inside this region.
    Local { position: Vector3 },
    /// Root agent of another region now.
    Remote {
        destination: RegionHandle,
        /// The local placement was closed instead of kept as a child.
        closed_source: bool,
    },
}

/// Everything decided about a cross-region teleport before anything is
/// created at the destination.
struct RemotePlan {
    view: AgentView,
    region: Arc<RegionDescriptor>,
    endpoint: SocketAddr,
    position: Vector3,
    look_at: Vector3,
    flags: TeleportFlags,
    context: TransferContext,
    local_transit: bool,
    outside_view_range: bool,
}

impl RemotePlan {
    fn agent_id(&self) -> AgentId {
        self.view.agent_id
    }

    fn auth_token(&self) -> String {
        self.view.client.session_id.to_string()
    }
}

pub struct TeleportOrchestrator {
    rt: Arc<TransferRuntime>,
    neighbors: NeighborChildAgentManager,
}

impl TeleportOrchestrator {
    pub fn new(rt: Arc<TransferRuntime>) -> Self {
        let neighbors = NeighborChildAgentManager::new(Arc::clone(&rt));
        Self { rt, neighbors }
    }

    /// Teleport an agent to `position` relative to `target`.
    ///
    /// The agent is marked in transit for the whole call; a second teleport
    /// for the same agent is refused until this one returns.
    #[instrument(skip(self), fields(agent_id = %agent_id, target = %target))]
    pub async fn teleport(
        &self,
        agent_id: AgentId,
        target: RegionHandle,
        position: Vector3,
        look_at: Vector3,
        flags: TeleportFlags,
    ) -> Result<TeleportOutcome> {
        let flags = match self.admit(agent_id, flags) {
            Ok(flags) => flags,
            Err(err) => return Err(self.report(agent_id, err)),
        };
        let Some(guard) = self.rt.tracker.begin_guarded(agent_id) else {
            let err = TransferError::AlreadyInTransit {
                agent_id,
                notice: NOTICE_RETRY_SHORTLY,
            };
            return Err(self.report(agent_id, err));
        };

        let pending = PendingRollback::default();
        let result = self
            .drive(
                agent_id,
                &pending,
                self.teleport_inner(agent_id, target, position, look_at, flags, &pending),
            )
            .await;
        drop(guard);
        result
    }

    /// Teleport to the agent's home location.
    #[instrument(skip(self), fields(agent_id = %agent_id))]
    pub async fn teleport_home(&self, agent_id: AgentId) -> Result<TeleportOutcome> {
        let (region, position, look_at) = match self.resolve_home(agent_id).await {
            Ok(home) => home,
            Err(err) => return Err(self.report(agent_id, err)),
        };
        info!(home = %region.name, position = %position, "Teleporting home");
        self.teleport(
            agent_id,
            region.handle(),
            position,
            look_at,
            TeleportFlags::SET_LAST_TO_TARGET | TeleportFlags::VIA_HOME,
        )
        .await
    }

    /// Teleport to a landmark, tolerating a region that moved or grew since
    /// the landmark was made.
    #[instrument(skip(self, landmark), fields(agent_id = %agent_id, region_id = %landmark.region_id))]
    pub async fn teleport_to_landmark(
        &self,
        agent_id: AgentId,
        landmark: &Landmark,
        look_at: Vector3,
    ) -> Result<TeleportOutcome> {
        let region = match self.rt.resolver.region_by_id(landmark.region_id).await {
            Ok(Some(region)) => region,
            Ok(None) => return Err(self.report(agent_id, TransferError::LandmarkRegionNotFound)),
            Err(err) => return Err(self.report(agent_id, TransferError::Directory(err))),
        };
        let position = region
            .footprint
            .local_offset(landmark.region_handle, landmark.position)
            .unwrap_or(landmark.position);

        self.teleport(
            agent_id,
            region.handle(),
            position,
            look_at,
            TeleportFlags::SET_LAST_TO_TARGET | TeleportFlags::VIA_LANDMARK,
        )
        .await
    }

    /// Teleport to an already resolved region, skipping handle resolution.
    #[instrument(skip(self, region), fields(agent_id = %agent_id, region = %region.name))]
    pub async fn do_teleport(
        &self,
        agent_id: AgentId,
        region: Arc<RegionDescriptor>,
        position: Vector3,
        look_at: Vector3,
        flags: TeleportFlags,
    ) -> Result<TeleportOutcome> {
        let Some(guard) = self.rt.tracker.begin_guarded(agent_id) else {
            let err = TransferError::AlreadyInTransit {
                agent_id,
                notice: NOTICE_IN_TRANSIT,
            };
            return Err(self.report(agent_id, err));
        };

        let pending = PendingRollback::default();
        let work = async {
            let view = self.rt.root_agent(agent_id)?;
            self.teleport_to_resolved(&view, region, position, look_at, flags, &pending)
                .await
        };
        let result = self.drive(agent_id, &pending, work).await;
        drop(guard);
        result
    }

    /// The client pressed cancel. Returns whether the request was recorded.
    pub fn on_client_cancel(&self, agent_id: AgentId) -> bool {
        if self.rt.config.disable_cancellation {
            debug!(agent_id = %agent_id, "Teleport cancellation disabled, ignoring");
            return false;
        }
        let accepted = self.rt.tracker.set_phase(agent_id, TransferPhase::Cancelling);
        if accepted {
            info!(agent_id = %agent_id, "Client requested teleport cancel");
        }
        accepted
    }

    /// The client connection went away. Only a logout aborts a transfer.
    pub fn on_connection_closed(&self, agent_id: AgentId, logging_out: bool) -> bool {
        if !logging_out {
            return false;
        }
        let accepted = self.rt.tracker.set_phase(agent_id, TransferPhase::Aborting);
        if accepted {
            info!(agent_id = %agent_id, "Client logged out during transfer");
        }
        accepted
    }

    /// The destination confirmed that the agent arrived or may be released.
    pub fn on_agent_arrived(&self, agent_id: AgentId) -> bool {
        self.rt
            .tracker
            .set_phase(agent_id, TransferPhase::ReceivedAtDestination)
    }

    fn admit(&self, agent_id: AgentId, flags: TeleportFlags) -> Result<TeleportFlags> {
        let authorizer = &self.rt.deps.authorizer;
        if authorizer.is_grid_god(agent_id) {
            return Ok(flags | TeleportFlags::GODLIKE);
        }
        if !authorizer.can_teleport(agent_id) {
            return Err(TransferError::PermissionDenied(agent_id));
        }
        Ok(flags)
    }

    /// Run one teleport body, turning a panic into an internal error after
    /// the same cleanup a failure gets.
    async fn drive<F>(&self, agent_id: AgentId, pending: &PendingRollback, work: F) -> Result<TeleportOutcome>
    where
        F: Future<Output = Result<TeleportOutcome>>,
    {
        let result = match AssertUnwindSafe(work).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(agent_id = %agent_id, panic = %message, "Teleport panicked");
                if let Some((region, token)) = pending.disarm() {
                    self.rt.close_at(&region, agent_id, &token).await;
                }
                self.restore_source(agent_id);
                Err(TransferError::Internal(message))
            }
        };
        result.map_err(|err| self.report(agent_id, err))
    }

    /// Account for a failed teleport and tell the client, if it should be told.
    fn report(&self, agent_id: AgentId, err: TransferError) -> TransferError {
        let class = err.class();
        self.rt.metrics.record_teleport_outcome(class);

        match class {
            FailureClass::Internal => error!(agent_id = %agent_id, error = %err, "Teleport failed internally"),
            FailureClass::Failure => warn!(agent_id = %agent_id, error = %err, "Teleport failed"),
            FailureClass::Cancelled | FailureClass::Aborted => {
                info!(agent_id = %agent_id, reason = %err, "Teleport interrupted")
            }
            FailureClass::Precondition => info!(agent_id = %agent_id, reason = %err, "Teleport refused"),
        }

        if let Some(message) = err.user_message() {
            self.rt.deps.notifier.teleport_failed(agent_id, &message);
        }
        err
    }

    async fn resolve_home(&self, agent_id: AgentId) -> Result<(Arc<RegionDescriptor>, Vector3, Vector3)> {
        self.rt.root_agent(agent_id)?;
        if self.rt.tracker.is_in_transit(agent_id) {
            return Err(TransferError::AlreadyInTransit {
                agent_id,
                notice: NOTICE_HOME_BUSY,
            });
        }

        let home = self
            .rt
            .deps
            .grid
            .home_location(agent_id)
            .await
            .map_err(TransferError::Directory)?
            .ok_or(TransferError::HomeNotFound)?;
        let region_id = home.region_id.ok_or(TransferError::HomeNotSet)?;
        let region = self
            .rt
            .resolver
            .region_by_id(region_id)
            .await
            .map_err(TransferError::Directory)?
            .ok_or(TransferError::HomeRegionNotFound)?;
        Ok((region, home.position, home.look_at))
    }

    async fn teleport_inner(
        &self,
        agent_id: AgentId,
        target: RegionHandle,
        position: Vector3,
        look_at: Vector3,
        flags: TeleportFlags,
        pending: &PendingRollback,
    ) -> Result<TeleportOutcome> {
        let view = self.rt.root_agent(agent_id)?;

        if let Some(local_position) = self.rt.local.footprint().local_offset(target, position) {
            return self.teleport_within_region(&view, local_position, look_at, flags);
        }

        let resolved = self
            .rt
            .resolver
            .resolve_by_handle(target, position)
            .await
            .map_err(TransferError::Directory)?;
        let Some(resolved) = resolved else {
            let (loc_x, loc_y) = target.region_loc();
            self.rt.deps.notifier.map_block_offline(agent_id, loc_x, loc_y);
            return Err(TransferError::DestinationNotFound(target));
        };

        self.teleport_to_resolved(&view, resolved.region, resolved.position, look_at, flags, pending)
            .await
    }

    fn teleport_within_region(
        &self,
        view: &AgentView,
        position: Vector3,
        look_at: Vector3,
        flags: TeleportFlags,
    ) -> Result<TeleportOutcome> {
        let agent_id = view.agent_id;
        if !view.allow_movement {
            return Err(TransferError::Frozen(agent_id));
        }

        let position = self.landing_position(view, position);
        let mut flags = flags;
        if view.flying {
            flags |= TeleportFlags::IS_FLYING;
        }

        let scene = &self.rt.deps.scene;
        let notifier = &self.rt.deps.notifier;
        let tracker = &self.rt.tracker;

        tracker.set_phase(agent_id, TransferPhase::Transferring);
        notifier.teleport_start(agent_id, flags);

        let look_at = flatten_look_at(look_at);
        notifier.local_teleport(agent_id, position, look_at, flags);
        scene
            .relocate(agent_id, position, look_at, flags)
            .map_err(TransferError::scene("relocate"))?;
        tracker.set_phase(agent_id, TransferPhase::ReceivedAtDestination);

        for attachment in view.attachments.iter().filter(|a| a.handles_changed) {
            if let Err(err) = scene.notify_attachment_teleported(agent_id, attachment.local_id) {
                debug!(attachment = attachment.local_id, error = %err, "Attachment teleport notice failed");
            }
        }

        tracker.set_phase(agent_id, TransferPhase::CleaningUp);
        info!(agent_id = %agent_id, position = %position, "Teleported within region");
        Ok(TeleportOutcome::Local { position })
    }

    /// Where a same-region teleport actually puts the avatar.
    fn landing_position(&self, view: &AgentView, requested: Vector3) -> Vector3 {
        let footprint = self.rt.local.footprint();
        let mut position = requested;

        if !position.is_finite() || !footprint.contains_local(position) || position.z < 0.0 {
            let safe = Vector3::new(
                footprint.size_x as f32 / 2.0,
                footprint.size_y as f32 / 2.0,
                EMERGENCY_HEIGHT,
            );
            warn!(
                agent_id = %view.agent_id,
                requested = %requested,
                substituted = %safe,
                "Illegal same-region teleport target"
            );
            position = safe;
        }

        if position == LEGACY_DEFAULT_LANDING {
            position = self.rt.local.default_landing_point;
        }

        let half_height = view
            .appearance
            .as_ref()
            .map_or(self.rt.config.default_half_height, |a| a.half_height());
        let floor = self.rt.deps.scene.ground_height(position.x, position.y)
            + half_height
            + self.rt.config.landing_height_margin;
        if floor.is_finite() && position.z < floor {
            position.z = floor;
        }
        position
    }

    async fn teleport_to_resolved(
        &self,
        view: &AgentView,
        region: Arc<RegionDescriptor>,
        position: Vector3,
        look_at: Vector3,
        flags: TeleportFlags,
        pending: &PendingRollback,
    ) -> Result<TeleportOutcome> {
        let agent_id = view.agent_id;
        if region.handle() == self.rt.local.handle() {
            return Err(TransferError::SameMapPosition);
        }
        if !region.is_online() {
            return Err(TransferError::DestinationOffline(region.name.clone()));
        }
        let Some(endpoint) = region.resolve_endpoint().await else {
            return Err(TransferError::EndpointUnresolved(region.name.clone()));
        };

        let request = AccessRequest {
            agent_id,
            home_uri: view.home_uri.clone(),
            via_teleport: true,
            position,
        };
        let decision = self
            .rt
            .call(
                "query_access",
                self.rt.deps.simulation.query_access(&region, &request),
            )
            .await;
        let context = match decision {
            Ok(AccessDecision::Granted(context)) => context,
            Ok(AccessDecision::Denied(reason)) => {
                return Err(TransferError::AccessDenied {
                    region: region.name.clone(),
                    reason,
                })
            }
            Err(err) => {
                warn!(region = %region.name, error = %err, "Access query failed");
                return Err(TransferError::AccessDenied {
                    region: region.name.clone(),
                    reason: String::new(),
                });
            }
        };

        let appearance = view.appearance.clone().unwrap_or_default();
        if !appearance.can_teleport(context.outbound) {
            return Err(TransferError::OutfitIncompatible(region.name.clone()));
        }
        if !view.attachments_loaded {
            return Err(TransferError::AttachmentsLoading);
        }

        self.rt.metrics.teleport_attempts.inc();
        debug!(
            region = %region.name,
            outbound = %context.outbound,
            inbound = %context.inbound,
            "Destination granted access"
        );

        let mut flags = flags;
        if view.sitting {
            self.rt
                .deps
                .scene
                .stand_up(agent_id)
                .map_err(TransferError::scene("stand_up"))?;
        }
        if view.flying {
            flags |= TeleportFlags::IS_FLYING;
        }
        if self.rt.config.disable_cancellation {
            flags |= TeleportFlags::DISABLE_CANCEL;
        }
        self.rt.deps.notifier.teleport_start(agent_id, flags);

        let local_transit = !region.handle().is_legacy_link();
        let outside_view_range = !local_transit
            || is_outside_view(view.region_view_distance, self.rt.local.footprint(), &region.footprint);

        let known_seed = if outside_view_range {
            None
        } else {
            self.rt.known.seed(agent_id, region.handle())
        };
        let mut snapshot =
            AgentSessionSnapshotBuilder::build(view, position, Placement::Child, known_seed.as_deref());
        snapshot.look_at = look_at;
        snapshot.children_caps_seeds = self.rt.known.seeds(agent_id);
        if flags.contains(TeleportFlags::IS_FLYING) {
            snapshot.control_flags |= ControlFlags::FLY;
        }

        let plan = RemotePlan {
            view: view.clone(),
            region,
            endpoint,
            position,
            look_at,
            flags,
            context,
            local_transit,
            outside_view_range,
        };

        if context.outbound >= self.rt.config.v2_min_version() {
            self.transfer_v2(&plan, snapshot, pending).await
        } else {
            self.transfer_v1(&plan, snapshot, pending).await
        }
    }

    /// Handoff for destinations below the V2 protocol version.
    async fn transfer_v1(
        &self,
        plan: &RemotePlan,
        mut snapshot: AgentSessionSnapshot,
        pending: &PendingRollback,
    ) -> Result<TeleportOutcome> {
        let agent_id = plan.agent_id();
        let tracker = &self.rt.tracker;
        let notifier = &self.rt.deps.notifier;

        let to_close = self.neighbors.child_agents_to_close(
            agent_id,
            &plan.region.footprint,
            plan.view.region_view_distance,
        );
        for handle in &to_close {
            snapshot.children_caps_seeds.remove(handle);
        }

        self.create_at_destination(plan, &snapshot, pending).await?;
        self.checkpoint(plan, "create_agent", pending).await?;
        tracker.set_phase(agent_id, TransferPhase::Transferring);

        let seed_url = AgentSessionSnapshotBuilder::seed_capability_url(&plan.region.server_uri, &snapshot.caps_path);
        if plan.outside_view_range {
            notifier.enable_simulator(agent_id, &plan.region, plan.endpoint);
            notifier.establish_agent_communication(agent_id, &plan.region, plan.endpoint, &seed_url);
        }

        let update = self.root_update(plan, &snapshot, false);
        self.push_update(plan, &update, pending).await?;
        self.checkpoint(plan, "update_agent", pending).await?;

        if let Err(err) = self.rt.deps.scene.set_child(agent_id, true) {
            self.rollback(plan, pending).await;
            return Err(TransferError::scene("set_child")(err));
        }
        notifier.teleport_finish(agent_id, &self.finish_notice(plan, seed_url));

        if self.rt.config.wait_for_callback {
            let arrived = tracker
                .await_destination_confirmation(agent_id, self.rt.config.confirmation_timeout())
                .await;
            if !arrived {
                self.checkpoint(plan, "await_arrival", pending).await?;
                warn!(region = %plan.region.name, "Destination did not confirm arrival");
                self.rollback(plan, pending).await;
                return Err(TransferError::ConfirmationTimeout(plan.region.name.clone()));
            }
        }

        pending.disarm();
        tracker.set_phase(agent_id, TransferPhase::CleaningUp);
        self.neighbors.close_child_agents(&plan.view, &to_close).await;
        self.demote_source(plan);
        if plan.outside_view_range {
            self.close_source(agent_id);
        }
        Ok(self.completed(plan))
    }

    /// Handoff for destinations at or above the V2 protocol version.
    async fn transfer_v2(
        &self,
        plan: &RemotePlan,
        mut snapshot: AgentSessionSnapshot,
        pending: &PendingRollback,
    ) -> Result<TeleportOutcome> {
        let agent_id = plan.agent_id();
        let tracker = &self.rt.tracker;

        let local_close = plan.context.outbound < self.rt.config.local_close_min_version() || !plan.local_transit;
        let to_close = if local_close {
            self.neighbors.child_agents_to_close(
                agent_id,
                &plan.region.footprint,
                plan.view.region_view_distance,
            )
        } else {
            Vec::new()
        };
        for handle in &to_close {
            snapshot.children_caps_seeds.remove(handle);
        }
        if plan.outside_view_range {
            snapshot.children_caps_seeds.remove(&self.rt.local.handle());
        }

        self.create_at_destination(plan, &snapshot, pending).await?;
        self.checkpoint(plan, "create_agent", pending).await?;
        tracker.set_phase(agent_id, TransferPhase::Transferring);

        let seed_url = AgentSessionSnapshotBuilder::seed_capability_url(&plan.region.server_uri, &snapshot.caps_path);
        self.rt
            .deps
            .notifier
            .teleport_finish(agent_id, &self.finish_notice(plan, seed_url));
        self.checkpoint(plan, "teleport_finish", pending).await?;

        if let Err(err) = self.rt.deps.scene.set_child(agent_id, true) {
            self.rollback(plan, pending).await;
            return Err(TransferError::scene("set_child")(err));
        }
        let update = self.root_update(plan, &snapshot, true);
        self.push_update(plan, &update, pending).await?;

        // The destination holds the root now; nothing below rolls back.
        pending.disarm();
        self.demote_source(plan);
        if local_close {
            self.neighbors.close_child_agents(&plan.view, &to_close).await;
        }

        if plan.outside_view_range {
            let released = tracker
                .await_destination_confirmation(agent_id, self.rt.config.release_wait())
                .await;
            if !released {
                debug!(region = %plan.region.name, "No release callback, closing source anyway");
            }
            tracker.set_phase(agent_id, TransferPhase::CleaningUp);
            self.close_source(agent_id);
        } else {
            tracker.set_phase(agent_id, TransferPhase::CleaningUp);
        }
        Ok(self.completed(plan))
    }

    async fn create_at_destination(
        &self,
        plan: &RemotePlan,
        snapshot: &AgentSessionSnapshot,
        pending: &PendingRollback,
    ) -> Result<()> {
        let agent_id = plan.agent_id();
        let created = self
            .rt
            .call(
                "create_agent",
                self.rt.deps.simulation.create_agent(
                    &self.rt.local.descriptor,
                    &plan.region,
                    snapshot,
                    plan.flags,
                ),
            )
            .await;

        if let Err(err) = created {
            // A timed out create may still have landed.
            if matches!(err, CollaboratorError::Timeout(_)) {
                self.rt.close_at(&plan.region, agent_id, &plan.auth_token()).await;
            }
            let reason = match &err {
                CollaboratorError::Rejected(reason) => reason.clone(),
                other => other.to_string(),
            };
            self.rt.deps.events.emit(TransferEvent::TeleportFailed {
                agent_id,
                to: plan.region.handle(),
                reason: reason.clone(),
                at: Utc::now(),
            });
            return Err(TransferError::CreateAgentRefused {
                region: plan.region.name.clone(),
                reason,
            });
        }

        pending.arm(Arc::clone(&plan.region), plan.auth_token());
        self.rt.deps.events.emit(TransferEvent::TeleportStarted {
            agent_id,
            from: self.rt.local.handle(),
            to: plan.region.handle(),
            flags: plan.flags,
            at: Utc::now(),
        });
        debug!(region = %plan.region.name, "Destination created agent");
        Ok(())
    }

    async fn push_update(
        &self,
        plan: &RemotePlan,
        update: &AgentSessionSnapshot,
        pending: &PendingRollback,
    ) -> Result<()> {
        let updated = self
            .rt
            .call(
                "update_agent",
                self.rt.deps.simulation.update_agent(&plan.region, update),
            )
            .await;
        let Err(source) = updated else {
            return Ok(());
        };

        let aborting = self.rt.tracker.current_phase(plan.agent_id()) == Some(TransferPhase::Aborting);
        self.rollback(plan, pending).await;
        if aborting {
            return Err(TransferError::Aborted { stage: "update_agent" });
        }
        Err(TransferError::UpdateAgentFailed {
            region: plan.region.name.clone(),
            source,
        })
    }

    /// Stop here if the client cancelled or left since the last round trip.
    async fn checkpoint(&self, plan: &RemotePlan, stage: &'static str, pending: &PendingRollback) -> Result<()> {
        match self.rt.tracker.current_phase(plan.agent_id()) {
            Some(TransferPhase::Cancelling) => {
                debug!(stage, "Teleport cancelled, rolling back");
                self.rollback(plan, pending).await;
                Err(TransferError::Cancelled { stage })
            }
            Some(TransferPhase::Aborting) => {
                debug!(stage, "Client left, rolling back");
                self.rollback(plan, pending).await;
                Err(TransferError::Aborted { stage })
            }
            _ => Ok(()),
        }
    }

    /// Undo a cross-region teleport that will not complete: close the
    /// destination placement and restore the local root agent.
    async fn rollback(&self, plan: &RemotePlan, pending: &PendingRollback) {
        let agent_id = plan.agent_id();
        if let Some((region, token)) = pending.disarm() {
            self.rt.close_at(&region, agent_id, &token).await;
        }
        if self.restore_source(agent_id) {
            if let Err(err) = self.neighbors.reconcile(agent_id).await {
                debug!(error = %err, "Child agent reconcile after rollback failed");
            }
        }
    }

    /// Returns whether the agent had already been demoted and was restored.
    fn restore_source(&self, agent_id: AgentId) -> bool {
        self.rt.tracker.set_phase(agent_id, TransferPhase::CleaningUp);

        let scene = &self.rt.deps.scene;
        let demoted = scene.agent(agent_id).is_some_and(|view| view.is_child);
        if !demoted {
            return false;
        }
        if let Err(err) = scene.set_child(agent_id, false) {
            warn!(agent_id = %agent_id, error = %err, "Could not restore root agent");
            return false;
        }
        if let Err(err) = scene.resume_scripts(agent_id) {
            warn!(agent_id = %agent_id, error = %err, "Could not resume scripts");
        }
        true
    }

    fn root_update(&self, plan: &RemotePlan, snapshot: &AgentSessionSnapshot, v2: bool) -> AgentSessionSnapshot {
        let mut update = snapshot.clone();
        update.placement = Placement::Root;
        update.position = plan.position;
        update.look_at = plan.look_at;
        update.velocity = Vector3::ZERO;

        let callback = AgentSessionSnapshotBuilder::release_callback_url(
            &self.rt.local.descriptor.server_uri,
            plan.agent_id(),
            self.rt.local.descriptor.region_id,
        );
        if v2 {
            update.sender_wants_to_wait_for_root = true;
            if plan.outside_view_range {
                update.new_callback_uri = Some(callback);
            }
        } else {
            update.callback_uri = Some(callback);
        }
        update
    }

    fn finish_notice(&self, plan: &RemotePlan, seed_capability: String) -> TeleportFinishNotice {
        TeleportFinishNotice {
            destination: plan.region.handle(),
            endpoint: plan.endpoint,
            seed_capability,
            flags: plan.flags,
            size_x: plan.region.footprint.size_x,
            size_y: plan.region.footprint.size_y,
        }
    }

    /// Local side of a completed handoff; failures only get logged.
    fn demote_source(&self, plan: &RemotePlan) {
        let agent_id = plan.agent_id();
        let scene = &self.rt.deps.scene;
        if let Err(err) = scene.has_moved_away(agent_id, !plan.outside_view_range) {
            warn!(agent_id = %agent_id, error = %err, "Moved-away hook failed");
        }
        if let Err(err) = scene.make_child_agent(agent_id, &plan.region) {
            warn!(agent_id = %agent_id, error = %err, "Could not demote agent to child");
        }
        self.rt.known.forget_agent(agent_id);
    }

    fn close_source(&self, agent_id: AgentId) {
        if let Err(err) = self.rt.deps.scene.close_agent(agent_id) {
            warn!(agent_id = %agent_id, error = %err, "Could not close source agent");
        }
    }

    fn completed(&self, plan: &RemotePlan) -> TeleportOutcome {
        let destination = plan.region.handle();
        self.rt.deps.events.emit(TransferEvent::TeleportCompleted {
            agent_id: plan.agent_id(),
            to: destination,
            closed_source: plan.outside_view_range,
            at: Utc::now(),
        });
        info!(
            agent_id = %plan.agent_id(),
            region = %plan.region.name,
            closed_source = plan.outside_view_range,
            "Teleport completed"
        );
        TeleportOutcome::Remote {
            destination,
            closed_source: plan.outside_view_range,
        }
    }
}

/// Horizontal facing direction; a vertical or empty vector faces east.
fn flatten_look_at(look_at: Vector3) -> Vector3 {
    let flat = Vector3::new(look_at.x, look_at.y, 0.0);
    if !flat.is_finite() || (flat.x.abs() < f32::EPSILON && flat.y.abs() < f32::EPSILON) {
        return Vector3::new(1.0, 0.0, 0.0);
    }
    flat
}
