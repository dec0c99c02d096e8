//! Per-agent map of regions holding a placement for the agent.

use dashmap::DashMap;
use std::collections::BTreeMap;
use transit_types::{AgentId, RegionHandle};

/// A region the agent has a placement in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownRegion {
    /// Capability seed path issued for the placement.
    pub seed: String,
    pub size_x: u32,
    pub size_y: u32,
}

impl KnownRegion {
    pub fn new(seed: impl Into<String>, size_x: u32, size_y: u32) -> Self {
        Self {
            seed: seed.into(),
            size_x,
            size_y,
        }
    }
}

/// Sharded by agent; each agent's map is only written from its own
/// transfer or reconcile path.
#[derive(Default)]
pub struct KnownRegionMap {
    agents: DashMap<AgentId, BTreeMap<RegionHandle, KnownRegion>>,
}

impl KnownRegionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, agent_id: AgentId, region: RegionHandle) -> Option<KnownRegion> {
        self.agents
            .get(&agent_id)
            .and_then(|regions| regions.get(&region).cloned())
    }

    pub fn knows(&self, agent_id: AgentId, region: RegionHandle) -> bool {
        self.agents
            .get(&agent_id)
            .is_some_and(|regions| regions.contains_key(&region))
    }

    /// Seed path for a placement, if one was issued.
    pub fn seed(&self, agent_id: AgentId, region: RegionHandle) -> Option<String> {
        self.get(agent_id, region).map(|known| known.seed)
    }

    /// Handle to seed map, as carried in session snapshots.
    pub fn seeds(&self, agent_id: AgentId) -> BTreeMap<RegionHandle, String> {
        self.agents
            .get(&agent_id)
            .map(|regions| {
                regions
                    .iter()
                    .map(|(handle, known)| (*handle, known.seed.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn entries(&self, agent_id: AgentId) -> BTreeMap<RegionHandle, KnownRegion> {
        self.agents
            .get(&agent_id)
            .map(|regions| regions.clone())
            .unwrap_or_default()
    }

    /// Returns the previous entry for the region, if any.
    pub fn insert(&self, agent_id: AgentId, region: RegionHandle, known: KnownRegion) -> Option<KnownRegion> {
        self.agents.entry(agent_id).or_default().insert(region, known)
    }

    /// Insert only when the region is not known yet. Returns whether it was inserted.
    pub fn insert_if_absent(&self, agent_id: AgentId, region: RegionHandle, known: KnownRegion) -> bool {
        let mut regions = self.agents.entry(agent_id).or_default();
        if regions.contains_key(&region) {
            return false;
        }
        regions.insert(region, known);
        true
    }

    pub fn remove(&self, agent_id: AgentId, region: RegionHandle) -> Option<KnownRegion> {
        let mut regions = self.agents.get_mut(&agent_id)?;
        regions.remove(&region)
    }

    /// Drop everything known about the agent.
    pub fn forget_agent(&self, agent_id: AgentId) -> BTreeMap<RegionHandle, KnownRegion> {
        self.agents
            .remove(&agent_id)
            .map(|(_, regions)| regions)
            .unwrap_or_default()
    }

    pub fn len(&self, agent_id: AgentId) -> usize {
        self.agents.get(&agent_id).map_or(0, |regions| regions.len())
    }
}
