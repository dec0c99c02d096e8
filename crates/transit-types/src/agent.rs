//! Read-only views of scene state handed to the transfer subsystem.

use crate::flags::ControlFlags;
use crate::geometry::Vector3;
use crate::ids::{AgentId, ObjectId};
use crate::snapshot::ProtocolVersion;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Summary of an avatar's appearance relevant to transfer decisions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppearanceSummary {
    pub avatar_height: f32,
    /// Number of items worn in each wearable slot, indexed by slot.
    pub wearables: Vec<u32>,
}

impl AppearanceSummary {
    /// Slots understood by every destination.
    pub const LEGACY_WEARABLE_SLOTS: usize = 15;

    /// First protocol version able to carry the extended wearable slots.
    pub const EXTENDED_WEARABLES_VERSION: ProtocolVersion = ProtocolVersion::new(0.5);

    pub fn new(avatar_height: f32) -> Self {
        Self {
            avatar_height,
            wearables: vec![0; Self::LEGACY_WEARABLE_SLOTS],
        }
    }

    pub fn half_height(&self) -> f32 {
        self.avatar_height / 2.0
    }

    /// Whether a destination speaking `version` can represent this outfit.
    pub fn can_teleport(&self, version: ProtocolVersion) -> bool {
        if version >= Self::EXTENDED_WEARABLES_VERSION {
            return true;
        }
        self.wearables
            .iter()
            .skip(Self::LEGACY_WEARABLE_SLOTS)
            .all(|count| *count == 0)
    }
}

impl Default for AppearanceSummary {
    fn default() -> Self {
        Self::new(1.6)
    }
}

/// Connection metadata of a client circuit
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CircuitInfo {
    pub circuit_code: u32,
    pub session_id: Uuid,
    pub secure_session_id: Uuid,
    /// Capability path of the client's current root placement.
    pub caps_path: String,
    #[serde(default)]
    pub service_urls: BTreeMap<String, String>,
    pub ip_address: Option<String>,
    pub viewer: String,
    pub channel: String,
    pub mac: String,
    pub id0: String,
}

/// Behavior requested by the client for boundary crossings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossingFlags {
    /// Carry horizontal velocity into the destination.
    pub preserve_velocity: bool,
    /// Keep movement controls engaged after the crossing.
    pub keep_controls: bool,
}

/// An attachment worn by the avatar
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentView {
    pub local_id: u32,
    /// Some script in the attachment listens for `changed` events.
    pub handles_changed: bool,
}

/// Point-in-time copy of the scene's state for one agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentView {
    pub agent_id: AgentId,
    pub name: String,
    pub position: Vector3,
    pub velocity: Vector3,
    pub look_at: Vector3,
    pub control_flags: ControlFlags,
    pub flying: bool,
    pub sitting: bool,
    /// Seated on an object rather than the ground.
    pub seated_on_object: bool,
    /// Cleared when a region manager froze the avatar.
    pub allow_movement: bool,
    pub is_child: bool,
    /// Neighbor view range used for child agent placement.
    pub region_view_distance: f32,
    pub draw_distance: f32,
    pub appearance: Option<AppearanceSummary>,
    /// What the client connection itself reports.
    pub client: CircuitInfo,
    /// Circuit record registered at login or on arrival, if any.
    pub active_circuit: Option<CircuitInfo>,
    pub attachments_loaded: bool,
    pub attachments: Vec<AttachmentView>,
    pub crossing: CrossingFlags,
    pub home_uri: Option<String>,
}

impl AgentView {
    /// A standing root agent with default view ranges.
    pub fn new(agent_id: AgentId, name: impl Into<String>, position: Vector3) -> Self {
        Self {
            agent_id,
            name: name.into(),
            position,
            velocity: Vector3::ZERO,
            look_at: Vector3::new(1.0, 0.0, 0.0),
            control_flags: ControlFlags::empty(),
            flying: false,
            sitting: false,
            seated_on_object: false,
            allow_movement: true,
            is_child: false,
            region_view_distance: 256.0,
            draw_distance: 256.0,
            appearance: Some(AppearanceSummary::default()),
            client: CircuitInfo {
                circuit_code: derived_circuit_code(&agent_id),
                session_id: Uuid::new_v4(),
                secure_session_id: Uuid::new_v4(),
                caps_path: Uuid::new_v4().simple().to_string(),
                ..Default::default()
            },
            active_circuit: None,
            attachments_loaded: true,
            attachments: Vec::new(),
            crossing: CrossingFlags::default(),
            home_uri: None,
        }
    }
}

fn derived_circuit_code(agent_id: &AgentId) -> u32 {
    let bytes = agent_id.as_uuid().as_bytes();
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// A scene object about to cross a boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectSummary {
    pub object_id: ObjectId,
    pub local_id: u32,
    pub name: String,
    pub owner: AgentId,
    pub position: Vector3,
    pub velocity: Vector3,
}
