//! Moving unattached objects across a region border.

use crate::collaborators::CollabResult;
use crate::error::{Result, TransferError};
use crate::runtime::TransferRuntime;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use transit_types::{Footprint, ObjectSummary, RegionDescriptor, Vector3};

/// Closest an object may land to the destination's edge.
const EDGE_MARGIN: f32 = 0.2;

pub struct ObjectCrossing {
    rt: Arc<TransferRuntime>,
}

impl ObjectCrossing {
    pub fn new(rt: Arc<TransferRuntime>) -> Self {
        Self { rt }
    }

    /// The neighbor an object at `position` (region-local, out of bounds)
    /// belongs to, and its position there, kept off the destination's edge.
    pub async fn object_destination(&self, position: Vector3) -> CollabResult<Option<(Arc<RegionDescriptor>, Vector3)>> {
        let footprint = self.rt.local.footprint();
        let probe = Vector3::new(
            nudge_outward(position.x, footprint.size_x),
            nudge_outward(position.y, footprint.size_y),
            position.z,
        );
        let (probe_x, probe_y) = Footprint::world_of(self.rt.local.handle(), probe);
        let Some(region) = self.rt.resolver.resolve_by_world_position(probe_x, probe_y).await? else {
            return Ok(None);
        };
        if region.region_id == self.rt.local.descriptor.region_id {
            return Ok(None);
        }

        let (world_x, world_y) = Footprint::world_of(self.rt.local.handle(), position);
        let dest = &region.footprint;
        let arrival = Vector3::new(
            clamp_inside((world_x - dest.world_x as f64) as f32, dest.size_x),
            clamp_inside((world_y - dest.world_y as f64) as f32, dest.size_y),
            position.z,
        );
        Ok(Some((region, arrival)))
    }

    /// Hand an object to `destination`; the local copy is deleted only
    /// once the destination accepted it.
    #[instrument(skip(self, destination, object), fields(object = %object.object_id, region = %destination.name))]
    pub async fn cross_object(
        &self,
        destination: &RegionDescriptor,
        position: Vector3,
        object: &ObjectSummary,
    ) -> Result<()> {
        let created = self
            .rt
            .call(
                "create_object",
                self.rt.deps.simulation.create_object(destination, position, object),
            )
            .await;
        if let Err(source) = created {
            warn!(error = %source, "Destination refused object");
            return Err(TransferError::ObjectRejected {
                region: destination.name.clone(),
                source,
            });
        }

        if let Err(err) = self.rt.deps.scene.delete_object(object.object_id) {
            warn!(error = %err, "Crossed object could not be removed locally");
        }
        info!(name = %object.name, position = %position, "Object crossed");
        Ok(())
    }
}

fn nudge_outward(value: f32, size: u32) -> f32 {
    if value < 0.0 {
        value - 1.0
    } else if value >= size as f32 {
        value + 1.0
    } else {
        value
    }
}

fn clamp_inside(value: f32, size: u32) -> f32 {
    value.clamp(EDGE_MARGIN, size as f32 - EDGE_MARGIN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nudge_outward() {
        assert_eq!(nudge_outward(-0.5, 256), -1.5);
        assert_eq!(nudge_outward(256.0, 256), 257.0);
        assert_eq!(nudge_outward(100.0, 256), 100.0);
    }

    #[test]
    fn test_clamp_inside() {
        assert_eq!(clamp_inside(-3.0, 256), EDGE_MARGIN);
        assert_eq!(clamp_inside(300.0, 256), 256.0 - EDGE_MARGIN);
        assert_eq!(clamp_inside(12.5, 256), 12.5);
    }
}
