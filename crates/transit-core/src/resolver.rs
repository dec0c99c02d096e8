//! Destination lookup against the grid directory.
//!
//! Handles variable-sized regions (a handle may address a sub-cell of a
//! larger region), legacy link regions (addressed by base handle only) and
//! keeps two short-lived caches: empty grid cells and the local neighbor
//! list.

use crate::collaborators::{CollabResult, GridDirectory};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};
use transit_types::{quantize_to_grid, Footprint, LocalRegion, RegionDescriptor, RegionHandle, Vector3};

/// A resolved destination and the target position relative to it
#[derive(Debug, Clone)]
pub struct ResolvedDestination {
    pub region: Arc<RegionDescriptor>,
    pub position: Vector3,
}

/// Grid cells recently found empty, keyed by cell origin.
pub struct NotFoundLocationCache {
    cells: DashMap<u64, Instant>,
    ttl: Duration,
}

impl NotFoundLocationCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            cells: DashMap::new(),
            ttl,
        }
    }

    fn key(world_x: f64, world_y: f64) -> u64 {
        RegionHandle::from_world(quantize_to_grid(world_x), quantize_to_grid(world_y)).raw()
    }

    pub fn add(&self, world_x: f64, world_y: f64) {
        self.cells.insert(Self::key(world_x, world_y), Instant::now() + self.ttl);
    }

    pub fn contains(&self, world_x: f64, world_y: f64) -> bool {
        let key = Self::key(world_x, world_y);
        let expired = match self.cells.get(&key) {
            None => return false,
            Some(expiry) => *expiry <= Instant::now(),
        };
        if expired {
            self.cells.remove_if(&key, |_, expiry| *expiry <= Instant::now());
            return false;
        }
        true
    }

    pub fn remove(&self, world_x: f64, world_y: f64) {
        self.cells.remove(&Self::key(world_x, world_y));
    }
}

struct CachedNeighbors {
    fetched_at: Instant,
    regions: Vec<Arc<RegionDescriptor>>,
}

pub struct DestinationResolver {
    grid: Arc<dyn GridDirectory>,
    not_found: NotFoundLocationCache,
    neighbors: Mutex<Option<CachedNeighbors>>,
    neighbor_ttl: Duration,
}

impl DestinationResolver {
    pub fn new(grid: Arc<dyn GridDirectory>, not_found_ttl: Duration, neighbor_ttl: Duration) -> Self {
        Self {
            grid,
            not_found: NotFoundLocationCache::new(not_found_ttl),
            neighbors: Mutex::new(None),
            neighbor_ttl,
        }
    }

    /// Resolve the region hosting `position` relative to `handle`.
    ///
    /// When the point falls into a different base region than the handle
    /// names (a sub-cell of a variable-sized region), the returned position
    /// is rewritten relative to the containing region.
    pub async fn resolve_by_handle(
        &self,
        handle: RegionHandle,
        position: Vector3,
    ) -> CollabResult<Option<ResolvedDestination>> {
        if handle.is_legacy_link() {
            let region = self.grid.region_by_position(handle.world_x(), handle.world_y()).await?;
            return Ok(region.map(|region| ResolvedDestination {
                region: Arc::new(region),
                position,
            }));
        }

        let (world_x, world_y) = Footprint::world_of(handle, position);
        let Some(region) = self.resolve_by_world_position(world_x, world_y).await? else {
            return Ok(None);
        };

        let position = if region.handle() == handle {
            position
        } else {
            let corrected = Vector3::new(
                (world_x - region.footprint.world_x as f64) as f32,
                (world_y - region.footprint.world_y as f64) as f32,
                position.z,
            );
            debug!(
                requested = %handle,
                resolved = %region.handle(),
                position = %corrected,
                "Target lies in a variable-sized region, position corrected"
            );
            corrected
        };

        Ok(Some(ResolvedDestination { region, position }))
    }

    /// Region covering a world position, consulting the empty-cell cache first.
    pub async fn resolve_by_world_position(
        &self,
        world_x: f64,
        world_y: f64,
    ) -> CollabResult<Option<Arc<RegionDescriptor>>> {
        if world_x < 0.0 || world_y < 0.0 || !world_x.is_finite() || !world_y.is_finite() {
            return Ok(None);
        }
        if self.not_found.contains(world_x, world_y) {
            trace!(world_x, world_y, "Grid cell cached as empty");
            return Ok(None);
        }

        let cell_x = quantize_to_grid(world_x);
        let cell_y = quantize_to_grid(world_y);
        match self.grid.region_by_position(cell_x, cell_y).await? {
            Some(region) => Ok(Some(Arc::new(region))),
            None => {
                debug!(cell_x, cell_y, "No region in grid cell");
                self.not_found.add(world_x, world_y);
                Ok(None)
            }
        }
    }

    /// Region whose origin is `handle`, if any.
    pub async fn region_at_handle(&self, handle: RegionHandle) -> CollabResult<Option<Arc<RegionDescriptor>>> {
        self.resolve_by_world_position(handle.world_x() as f64, handle.world_y() as f64)
            .await
    }

    pub async fn region_by_id(&self, region_id: transit_types::RegionId) -> CollabResult<Option<Arc<RegionDescriptor>>> {
        Ok(self.grid.region_by_id(region_id).await?.map(Arc::new))
    }

    /// Regions around the local one within the largest view distance,
    /// excluding the local region. Cached briefly.
    pub async fn neighbors(&self, local: &LocalRegion) -> CollabResult<Vec<Arc<RegionDescriptor>>> {
        {
            let cached = self.neighbors.lock();
            if let Some(cached) = cached.as_ref() {
                if cached.fetched_at.elapsed() < self.neighbor_ttl {
                    return Ok(cached.regions.clone());
                }
            }
        }

        let footprint = local.footprint();
        let reach = local.max_view_distance.saturating_sub(1);
        let min_x = footprint.world_x.saturating_sub(reach);
        let min_y = footprint.world_y.saturating_sub(reach);
        let max_x = footprint.world_x + footprint.size_x + reach;
        let max_y = footprint.world_y + footprint.size_y + reach;

        let regions: Vec<Arc<RegionDescriptor>> = self
            .grid
            .region_range(min_x, max_x, min_y, max_y)
            .await?
            .into_iter()
            .filter(|region| region.region_id != local.descriptor.region_id)
            .map(Arc::new)
            .collect();

        debug!(count = regions.len(), "Refreshed neighbor list");
        *self.neighbors.lock() = Some(CachedNeighbors {
            fetched_at: Instant::now(),
            regions: regions.clone(),
        });
        Ok(regions)
    }

    /// Drop the cached neighbor list, e.g. after a neighbor came up.
    pub fn invalidate_neighbors(&self) {
        *self.neighbors.lock() = None;
    }

    pub fn not_found_cache(&self) -> &NotFoundLocationCache {
        &self.not_found
    }
}
