//! Short-lived memory of destinations that refused an agent.

use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;
use transit_types::{AgentId, RegionHandle};

/// Default lifetime of a ban.
pub const DEFAULT_BAN_TTL: Duration = Duration::from_secs(60);

/// `(region, agent) -> expiry` with lazy expiration.
pub struct BannedDestinationCache {
    entries: DashMap<(RegionHandle, AgentId), Instant>,
    ttl: Duration,
}

impl BannedDestinationCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Whether `agent_id` was refused by `region` within the TTL.
    /// Expired entries are dropped on the way.
    pub fn is_banned(&self, region: RegionHandle, agent_id: AgentId) -> bool {
        let key = (region, agent_id);
        let expired = match self.entries.get(&key) {
            None => return false,
            Some(expiry) => *expiry <= Instant::now(),
        };
        if expired {
            self.entries.remove_if(&key, |_, expiry| *expiry <= Instant::now());
            return false;
        }
        true
    }

    /// Record a refusal for the default TTL.
    pub fn ban(&self, region: RegionHandle, agent_id: AgentId) {
        self.ban_for(region, agent_id, self.ttl);
    }

    pub fn ban_for(&self, region: RegionHandle, agent_id: AgentId, ttl: Duration) {
        debug!(
            agent_id = %agent_id,
            handle = %region,
            ttl_secs = ttl.as_secs(),
            "Caching destination refusal"
        );
        self.entries.insert((region, agent_id), Instant::now() + ttl);
    }

    /// Forget a refusal, e.g. after a later access check succeeded.
    pub fn clear(&self, region: RegionHandle, agent_id: AgentId) {
        self.entries.remove(&(region, agent_id));
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, expiry| *expiry > now);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for BannedDestinationCache {
    fn default() -> Self {
        Self::new(DEFAULT_BAN_TTL)
    }
}
