//! Child agent placements in neighbor regions.
//!
//! An agent standing near a border keeps presence-only placements in the
//! regions it can see, so a crossing or short teleport only has to promote
//! an existing placement. Reconciliation diffs the regions in view against
//! the known-region map and only talks to regions whose membership changed.
//! A neighbor that refused a placement is left alone until its ban expires.

use crate::error::{CollaboratorError, Result, TransferError};
use crate::runtime::TransferRuntime;
use crate::snapshot::AgentSessionSnapshotBuilder;
use futures::future::join_all;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use transit_state::KnownRegion;
use transit_types::{
    is_outside_view, AgentId, AgentView, ChildPositionUpdate, Footprint, Placement, RegionDescriptor,
    RegionHandle, TeleportFlags, Vector3,
};

/// What a reconcile pass changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub created: Vec<RegionHandle>,
    pub rejected: Vec<RegionHandle>,
    pub closed: Vec<RegionHandle>,
}

impl ReconcileReport {
    /// Nothing was created, rejected or closed.
    pub fn is_noop(&self) -> bool {
        self.created.is_empty() && self.rejected.is_empty() && self.closed.is_empty()
    }
}

/// Keeps each agent's child placements in step with its view.
pub struct NeighborChildAgentManager {
    rt: Arc<TransferRuntime>,
}

impl NeighborChildAgentManager {
    pub fn new(rt: Arc<TransferRuntime>) -> Self {
        Self { rt }
    }

    /// Online regions whose footprint overlaps the square of half-width
    /// `view_range` centred on a world position.
    pub fn regions_in_view(
        world_x: f64,
        world_y: f64,
        view_range: f32,
        candidates: &[Arc<RegionDescriptor>],
    ) -> Vec<Arc<RegionDescriptor>> {
        if view_range <= 0.0 {
            return Vec::new();
        }
        let range = view_range as f64;
        let (min_x, max_x) = (world_x - range, world_x + range);
        let (min_y, max_y) = (world_y - range, world_y + range);

        candidates
            .iter()
            .filter(|region| region.is_online())
            .filter(|region| {
                let fp = &region.footprint;
                let (x0, y0) = (fp.world_x as f64, fp.world_y as f64);
                let (x1, y1) = (x0 + fp.size_x as f64, y0 + fp.size_y as f64);
                x0 < max_x && x1 > min_x && y0 < max_y && y1 > min_y
            })
            .cloned()
            .collect()
    }

    /// Bring child placements in line with what the agent can see.
    ///
    /// Running it again without movement issues no calls.
    #[instrument(skip(self), fields(agent_id = %agent_id))]
    pub async fn reconcile(&self, agent_id: AgentId) -> Result<ReconcileReport> {
        let view = self.rt.root_agent(agent_id)?;
        self.ensure_local_seed(&view);

        let in_view = self.in_view(&view).await?;
        let in_view_handles: BTreeSet<RegionHandle> = in_view.iter().map(|r| r.handle()).collect();
        let local = self.rt.local.handle();

        let stale: Vec<RegionHandle> = self
            .rt
            .known
            .entries(agent_id)
            .into_keys()
            .filter(|handle| *handle != local && !in_view_handles.contains(handle))
            .collect();
        let fresh: Vec<Arc<RegionDescriptor>> = in_view
            .into_iter()
            .filter(|region| !self.rt.known.knows(agent_id, region.handle()))
            .filter(|region| !self.rt.banned.is_banned(region.handle(), agent_id))
            .collect();

        let mut report = ReconcileReport::default();
        if !stale.is_empty() {
            report.closed = self.close_child_agents(&view, &stale).await;
        }

        let created = join_all(fresh.iter().map(|region| self.create_child_agent(&view, region))).await;
        for (region, ok) in fresh.iter().zip(created) {
            if ok {
                report.created.push(region.handle());
            } else {
                report.rejected.push(region.handle());
            }
        }

        if !report.is_noop() {
            info!(
                created = report.created.len(),
                rejected = report.rejected.len(),
                closed = report.closed.len(),
                "Child agents reconciled"
            );
        }
        Ok(report)
    }

    /// Create a child placement in one region, if none exists yet.
    #[instrument(skip(self, region), fields(agent_id = %agent_id, region = %region.name))]
    pub async fn enable_child_agent(&self, agent_id: AgentId, region: &Arc<RegionDescriptor>) -> Result<bool> {
        let view = self.rt.root_agent(agent_id)?;
        self.ensure_local_seed(&view);
        Ok(self.create_child_agent(&view, region).await)
    }

    /// Close child placements that fell out of view.
    #[instrument(skip(self), fields(agent_id = %agent_id))]
    pub async fn close_old_child_agents(&self, agent_id: AgentId) -> Result<Vec<RegionHandle>> {
        let view = self.rt.root_agent(agent_id)?;
        let in_view: BTreeSet<RegionHandle> = self.in_view(&view).await?.iter().map(|r| r.handle()).collect();
        let local = self.rt.local.handle();

        let stale: Vec<RegionHandle> = self
            .rt
            .known
            .entries(agent_id)
            .into_keys()
            .filter(|handle| *handle != local && !in_view.contains(handle))
            .collect();
        if stale.is_empty() {
            return Ok(stale);
        }
        Ok(self.close_child_agents(&view, &stale).await)
    }

    /// Known placements that will be out of view once the agent stands in
    /// `destination`. The local region and the destination itself are never
    /// included.
    pub fn child_agents_to_close(
        &self,
        agent_id: AgentId,
        destination: &Footprint,
        view_distance: f32,
    ) -> Vec<RegionHandle> {
        let local = self.rt.local.handle();
        let target = destination.handle();

        self.rt
            .known
            .entries(agent_id)
            .into_iter()
            .filter(|(handle, _)| *handle != local && *handle != target)
            .filter(|(handle, known)| {
                let footprint = Footprint::new(handle.world_x(), handle.world_y(), known.size_x, known.size_y);
                is_outside_view(view_distance, destination, &footprint)
            })
            .map(|(handle, _)| handle)
            .collect()
    }

    /// Close the given placements, forgetting their seeds. Returns the
    /// handles that were known.
    pub async fn close_child_agents(&self, view: &AgentView, handles: &[RegionHandle]) -> Vec<RegionHandle> {
        let agent_id = view.agent_id;
        let token = view.client.session_id.to_string();

        let closing: Vec<RegionHandle> = handles
            .iter()
            .copied()
            .filter(|handle| self.rt.known.remove(agent_id, *handle).is_some())
            .collect();

        join_all(closing.iter().map(|handle| self.close_remote(agent_id, *handle, &token))).await;
        closing
    }

    /// Close every child placement of the agent and forget its map.
    pub async fn close_all_child_agents(&self, agent_id: AgentId, auth_token: &str) -> Vec<RegionHandle> {
        let local = self.rt.local.handle();
        let handles: Vec<RegionHandle> = self
            .rt
            .known
            .forget_agent(agent_id)
            .into_keys()
            .filter(|handle| *handle != local)
            .collect();

        join_all(handles.iter().map(|handle| self.close_remote(agent_id, *handle, auth_token))).await;
        handles
    }

    /// Refresh every child placement with the agent's current position.
    #[instrument(skip(self), fields(agent_id = %agent_id))]
    pub async fn send_child_position_updates(&self, agent_id: AgentId) -> Result<usize> {
        let view = self.rt.root_agent(agent_id)?;
        let local = self.rt.local.handle();
        let update = ChildPositionUpdate {
            agent_id,
            session_id: view.client.session_id,
            region_handle: local,
            position: view.position,
            velocity: view.velocity,
            draw_distance: view.draw_distance,
        };

        let handles: Vec<RegionHandle> = self
            .rt
            .known
            .entries(agent_id)
            .into_keys()
            .filter(|handle| *handle != local)
            .collect();

        let update = &update;
        let sent = join_all(handles.iter().map(|handle| async move {
            let region = match self.rt.resolver.region_at_handle(*handle).await {
                Ok(Some(region)) => region,
                _ => return false,
            };
            let result = self
                .rt
                .call(
                    "update_child_position",
                    self.rt.deps.simulation.update_child_position(&region, update),
                )
                .await;
            match result {
                Ok(()) => {
                    self.rt.metrics.record_child_agent("update");
                    true
                }
                Err(err) => {
                    debug!(handle = %handle, error = %err, "Child position update failed");
                    false
                }
            }
        }))
        .await;

        Ok(sent.into_iter().filter(|ok| *ok).count())
    }

    /// Pre-stage a child placement in a crossing destination that the agent
    /// has no placement in yet.
    #[instrument(skip(self, view, region), fields(agent_id = %view.agent_id, region = %region.name))]
    pub async fn create_far_child(
        &self,
        view: &AgentView,
        region: &Arc<RegionDescriptor>,
        position: Vector3,
    ) -> Result<()> {
        let agent_id = view.agent_id;
        let handle = region.handle();
        if self.rt.known.knows(agent_id, handle) {
            return Ok(());
        }

        let Some(endpoint) = region.resolve_endpoint().await else {
            return Err(TransferError::EndpointUnresolved(region.name.clone()));
        };

        let seed = AgentSessionSnapshotBuilder::random_caps_path();
        self.rt.known.insert(
            agent_id,
            handle,
            KnownRegion::new(seed.clone(), region.footprint.size_x, region.footprint.size_y),
        );

        let mut snapshot = AgentSessionSnapshotBuilder::build(view, position, Placement::Child, Some(&seed));
        snapshot.children_caps_seeds = self.rt.known.seeds(agent_id);

        let created = self
            .rt
            .call(
                "create_agent",
                self.rt.deps.simulation.create_agent(
                    &self.rt.local.descriptor,
                    region,
                    &snapshot,
                    TeleportFlags::empty(),
                ),
            )
            .await;
        if let Err(err) = created {
            self.rt.known.remove(agent_id, handle);
            self.close_if_timed_out(&err, view, region).await;
            self.rt.metrics.record_child_agent("rejected");
            return Err(TransferError::CreateAgentRefused {
                region: region.name.clone(),
                reason: err.to_string(),
            });
        }

        self.rt.metrics.record_child_agent("create");
        let seed_url = AgentSessionSnapshotBuilder::seed_capability_url(&region.server_uri, &seed);
        self.rt.deps.notifier.enable_simulator(agent_id, region, endpoint);
        self.rt
            .deps
            .notifier
            .establish_agent_communication(agent_id, region, endpoint, &seed_url);
        Ok(())
    }

    async fn in_view(&self, view: &AgentView) -> Result<Vec<Arc<RegionDescriptor>>> {
        if view.region_view_distance <= 0.0 {
            return Ok(Vec::new());
        }
        let neighbors = self
            .rt
            .resolver
            .neighbors(&self.rt.local)
            .await
            .map_err(TransferError::Directory)?;
        let (world_x, world_y) = Footprint::world_of(self.rt.local.handle(), view.position);
        Ok(Self::regions_in_view(world_x, world_y, view.region_view_distance, &neighbors))
    }

    fn ensure_local_seed(&self, view: &AgentView) {
        let footprint = self.rt.local.footprint();
        self.rt.known.insert_if_absent(
            view.agent_id,
            self.rt.local.handle(),
            KnownRegion::new(view.client.caps_path.clone(), footprint.size_x, footprint.size_y),
        );
    }

    async fn create_child_agent(&self, view: &AgentView, region: &Arc<RegionDescriptor>) -> bool {
        let agent_id = view.agent_id;
        let handle = region.handle();
        let seed = AgentSessionSnapshotBuilder::random_caps_path();
        if !self.rt.known.insert_if_absent(
            agent_id,
            handle,
            KnownRegion::new(seed.clone(), region.footprint.size_x, region.footprint.size_y),
        ) {
            return false;
        }

        let local = self.rt.local.footprint();
        let position = Vector3::new(
            (local.world_x as f64 - region.footprint.world_x as f64 + view.position.x as f64) as f32,
            (local.world_y as f64 - region.footprint.world_y as f64 + view.position.y as f64) as f32,
            view.position.z,
        );
        let mut snapshot = AgentSessionSnapshotBuilder::build(view, position, Placement::Child, Some(&seed));
        snapshot.children_caps_seeds = self.rt.known.seeds(agent_id);

        let created = self
            .rt
            .call(
                "create_agent",
                self.rt.deps.simulation.create_agent(
                    &self.rt.local.descriptor,
                    region,
                    &snapshot,
                    TeleportFlags::empty(),
                ),
            )
            .await;

        match created {
            Ok(()) => {
                self.rt.metrics.record_child_agent("create");
                if let Some(endpoint) = region.resolve_endpoint().await {
                    let seed_url = AgentSessionSnapshotBuilder::seed_capability_url(&region.server_uri, &seed);
                    self.rt.deps.notifier.enable_simulator(agent_id, region, endpoint);
                    self.rt
                        .deps
                        .notifier
                        .establish_agent_communication(agent_id, region, endpoint, &seed_url);
                }
                debug!(region = %region.name, "Child agent created");
                true
            }
            Err(err) => {
                self.rt.known.remove(agent_id, handle);
                self.close_if_timed_out(&err, view, region).await;
                self.rt.banned.ban(handle, agent_id);
                self.rt.metrics.record_child_agent("rejected");
                warn!(region = %region.name, error = %err, "Neighbor refused child agent");
                false
            }
        }
    }

    /// A create that timed out may still have landed.
    async fn close_if_timed_out(&self, err: &CollaboratorError, view: &AgentView, region: &RegionDescriptor) {
        if matches!(err, CollaboratorError::Timeout(_)) {
            self.rt
                .close_at(region, view.agent_id, &view.client.session_id.to_string())
                .await;
        }
    }

    async fn close_remote(&self, agent_id: AgentId, handle: RegionHandle, auth_token: &str) {
        let region = match self.rt.resolver.region_at_handle(handle).await {
            Ok(Some(region)) => region,
            Ok(None) => {
                debug!(handle = %handle, "Child region vanished from the grid");
                return;
            }
            Err(err) => {
                warn!(handle = %handle, error = %err, "Could not look up child region");
                return;
            }
        };

        let closed = self
            .rt
            .call(
                "close_agent",
                self.rt.deps.simulation.close_agent(&region, agent_id, auth_token),
            )
            .await;
        match closed {
            Ok(()) => {
                self.rt.metrics.record_child_agent("close");
                debug!(region = %region.name, "Child agent closed");
            }
            Err(err) => warn!(region = %region.name, error = %err, "Failed to close child agent"),
        }
    }
}
