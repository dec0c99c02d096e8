//! Region descriptors and named destinations.

use crate::flags::RegionFlags;
use crate::geometry::{Footprint, RegionHandle, Vector3, REGION_SIZE};
use crate::ids::RegionId;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio::sync::OnceCell;

/// Immutable description of a candidate destination region.
///
/// The network endpoint is resolved on first use and cached for the life of
/// the descriptor; share descriptors behind an `Arc` so every step of a
/// handshake sees the same resolution.
#[derive(Debug, Clone)]
pub struct RegionDescriptor {
    pub region_id: RegionId,
    pub name: String,
    pub footprint: Footprint,
    /// Base URI of the region's simulation service, with trailing slash.
    pub server_uri: String,
    pub external_host: String,
    pub internal_port: u16,
    /// `None` when the directory did not report flags.
    pub flags: Option<RegionFlags>,
    endpoint: OnceCell<Option<SocketAddr>>,
}

impl RegionDescriptor {
    /// Single-cell region at the given grid location.
    pub fn new(region_id: RegionId, name: impl Into<String>, loc_x: u32, loc_y: u32) -> Self {
        let name = name.into();
        Self {
            region_id,
            server_uri: format!("http://{}.region.local:9000/", name.to_lowercase()),
            external_host: format!("{}.region.local", name.to_lowercase()),
            internal_port: 9000,
            name,
            footprint: Footprint::cell(loc_x, loc_y),
            flags: None,
            endpoint: OnceCell::new(),
        }
    }

    /// Set the region's extent in meters.
    pub fn with_size(mut self, size_x: u32, size_y: u32) -> Self {
        self.footprint.size_x = size_x;
        self.footprint.size_y = size_y;
        self
    }

    /// Point the descriptor at another simulation server.
    pub fn with_server(
        mut self,
        server_uri: impl Into<String>,
        external_host: impl Into<String>,
        internal_port: u16,
    ) -> Self {
        self.server_uri = server_uri.into();
        self.external_host = external_host.into();
        self.internal_port = internal_port;
        self.endpoint = OnceCell::new();
        self
    }

    /// Attach directory flags.
    pub fn with_flags(mut self, flags: RegionFlags) -> Self {
        self.flags = Some(flags);
        self
    }

    /// Seed the endpoint cache, skipping DNS entirely.
    pub fn with_endpoint(self, endpoint: SocketAddr) -> Self {
        let _ = self.endpoint.set(Some(endpoint));
        self
    }

    /// Handle of the region's south-west corner.
    pub fn handle(&self) -> RegionHandle {
        self.footprint.handle()
    }

    /// Regions without directory flags are assumed online.
    pub fn is_online(&self) -> bool {
        self.flags.map_or(true, |f| f.contains(RegionFlags::ONLINE))
    }

    /// Resolve the external endpoint, caching the answer (including a
    /// failed lookup) for the lifetime of this descriptor.
    pub async fn resolve_endpoint(&self) -> Option<SocketAddr> {
        *self
            .endpoint
            .get_or_init(|| async {
                match tokio::net::lookup_host((self.external_host.as_str(), self.internal_port)).await
                {
                    Ok(mut addrs) => addrs.next(),
                    Err(_) => None,
                }
            })
            .await
    }

    /// Endpoint if it has already been resolved.
    pub fn cached_endpoint(&self) -> Option<SocketAddr> {
        self.endpoint.get().copied().flatten()
    }
}

/// The region this subsystem runs in
#[derive(Debug, Clone)]
pub struct LocalRegion {
    pub descriptor: std::sync::Arc<RegionDescriptor>,
    /// Where avatars land when sent to the legacy default coordinate.
    pub default_landing_point: Vector3,
    /// Largest view distance any agent may use, bounding neighbor lookups.
    pub max_view_distance: u32,
}

impl LocalRegion {
    pub fn new(descriptor: RegionDescriptor) -> Self {
        let size_x = descriptor.footprint.size_x as f32;
        let size_y = descriptor.footprint.size_y as f32;
        Self {
            descriptor: std::sync::Arc::new(descriptor),
            default_landing_point: Vector3::new(size_x / 2.0, size_y / 2.0, 25.0),
            max_view_distance: REGION_SIZE - 1,
        }
    }

    pub fn with_landing_point(mut self, point: Vector3) -> Self {
        self.default_landing_point = point;
        self
    }

    pub fn with_max_view_distance(mut self, distance: u32) -> Self {
        self.max_view_distance = distance;
        self
    }

    pub fn handle(&self) -> RegionHandle {
        self.descriptor.handle()
    }

    pub fn footprint(&self) -> &Footprint {
        &self.descriptor.footprint
    }
}

/// An agent's stored home, as reported by the grid user service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HomeLocation {
    /// `None` when the user never set a home.
    pub region_id: Option<RegionId>,
    pub position: Vector3,
    pub look_at: Vector3,
}

/// Saved location pointing at a region by identity and last-known handle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub region_id: RegionId,
    pub region_handle: RegionHandle,
    pub position: Vector3,
}
