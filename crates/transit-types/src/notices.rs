//! Client-facing notices describing a new destination.

use crate::flags::TeleportFlags;
use crate::geometry::{RegionHandle, Vector3};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use uuid::Uuid;

/// Tells the client to move its root connection to a teleport destination
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeleportFinishNotice {
    pub destination: RegionHandle,
    pub endpoint: SocketAddr,
    pub seed_capability: String,
    pub flags: TeleportFlags,
    pub size_x: u32,
    pub size_y: u32,
}

/// Tells the client it walked into a neighbor region
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossRegionNotice {
    pub destination: RegionHandle,
    pub endpoint: SocketAddr,
    pub seed_capability: String,
    pub session_id: Uuid,
    pub position: Vector3,
    pub velocity: Vector3,
    pub size_x: u32,
    pub size_y: u32,
}
