//! Shared types for inter-region entity transfer.
//!
//! This crate holds the vocabulary used by the transfer subsystem:
//! identifiers, region-grid geometry, region descriptors, teleport and
//! control flags, the read-only agent view handed out by the scene, the
//! session snapshot sent to destinations, transfer phases and outbound
//! events. Apart from lazy endpoint resolution it performs no I/O.

#![deny(unsafe_code)]

pub mod agent;
pub mod events;
pub mod flags;
pub mod geometry;
pub mod ids;
pub mod notices;
pub mod phase;
pub mod region;
pub mod snapshot;

pub use agent::{AgentView, AppearanceSummary, AttachmentView, CircuitInfo, CrossingFlags, ObjectSummary};
pub use events::TransferEvent;
pub use flags::{ControlFlags, RegionFlags, TeleportFlags};
pub use geometry::{is_outside_view, quantize_to_grid, Footprint, RegionHandle, Vector3, REGION_SIZE};
pub use ids::{AgentId, ObjectId, RegionId};
pub use notices::{CrossRegionNotice, TeleportFinishNotice};
pub use phase::TransferPhase;
pub use region::{HomeLocation, Landmark, LocalRegion, RegionDescriptor};
pub use snapshot::{
    AccessDecision, AccessRequest, AgentSessionSnapshot, ChildPositionUpdate, Placement,
    ProtocolVersion, TransferContext,
};
