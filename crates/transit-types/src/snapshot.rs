//! Payloads exchanged with destination regions.

use crate::agent::AppearanceSummary;
use crate::flags::ControlFlags;
use crate::geometry::{RegionHandle, Vector3};
use crate::ids::AgentId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Entity transfer protocol generation spoken by a peer
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct ProtocolVersion(f32);

impl ProtocolVersion {
    pub const fn new(version: f32) -> Self {
        Self(version)
    }

    pub fn value(&self) -> f32 {
        self.0
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SIMULATION/{:.1}", self.0)
    }
}

/// Versions negotiated with a destination during the access query
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransferContext {
    /// What we may send to the destination.
    pub outbound: ProtocolVersion,
    /// What the destination may send back.
    pub inbound: ProtocolVersion,
}

impl TransferContext {
    pub fn new(outbound: f32, inbound: f32) -> Self {
        Self {
            outbound: ProtocolVersion::new(outbound),
            inbound: ProtocolVersion::new(inbound),
        }
    }
}

/// Admission question put to a destination before anything is created there
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessRequest {
    pub agent_id: AgentId,
    pub home_uri: Option<String>,
    pub via_teleport: bool,
    pub position: Vector3,
}

/// Answer to an [`AccessRequest`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AccessDecision {
    Granted(TransferContext),
    /// Refused, with a reason suitable for the user (possibly empty).
    Denied(String),
}

/// Whether the destination placement is authoritative
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Placement {
    Root,
    Child,
}

/// Everything a destination needs to instantiate or update an agent.
///
/// Built fresh for each handshake attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSessionSnapshot {
    pub agent_id: AgentId,
    pub session_id: Uuid,
    pub secure_session_id: Uuid,
    pub circuit_code: u32,
    pub placement: Placement,
    pub position: Vector3,
    pub look_at: Vector3,
    pub velocity: Vector3,
    pub control_flags: ControlFlags,
    pub appearance: AppearanceSummary,
    pub draw_distance: f32,
    /// Capability seed path issued for the destination placement.
    pub caps_path: String,
    /// Seeds of every region the agent already has a placement in.
    pub children_caps_seeds: BTreeMap<RegionHandle, String>,
    pub service_urls: BTreeMap<String, String>,
    pub ip_address: Option<String>,
    pub viewer: String,
    pub channel: String,
    pub mac: String,
    pub id0: String,
    /// Where the destination confirms arrival.
    pub callback_uri: Option<String>,
    /// Release callback the destination calls once the client is settled.
    pub new_callback_uri: Option<String>,
    /// The source will wait for the destination to report the root placement.
    pub sender_wants_to_wait_for_root: bool,
}

/// Lightweight refresh sent to regions holding a child placement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildPositionUpdate {
    pub agent_id: AgentId,
    pub session_id: Uuid,
    /// Source region the position is relative to.
    pub region_handle: RegionHandle,
    pub position: Vector3,
    pub velocity: Vector3,
    pub draw_distance: f32,
}
