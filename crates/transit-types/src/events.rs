//! Outbound transfer events for logging and metrics consumers.

use crate::flags::TeleportFlags;
use crate::geometry::RegionHandle;
use crate::ids::AgentId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Something observable happened to a transfer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransferEvent {
    /// The destination accepted create-agent.
    TeleportStarted {
        agent_id: AgentId,
        from: RegionHandle,
        to: RegionHandle,
        flags: TeleportFlags,
        at: DateTime<Utc>,
    },
    /// The destination refused create-agent.
    TeleportFailed {
        agent_id: AgentId,
        to: RegionHandle,
        reason: String,
        at: DateTime<Utc>,
    },
    TeleportCompleted {
        agent_id: AgentId,
        to: RegionHandle,
        /// The source placement was closed rather than kept as a child.
        closed_source: bool,
        at: DateTime<Utc>,
    },
    CrossingCompleted {
        agent_id: AgentId,
        to: RegionHandle,
        at: DateTime<Utc>,
    },
    CrossingFailed {
        agent_id: AgentId,
        to: Option<RegionHandle>,
        reason: String,
        at: DateTime<Utc>,
    },
}

impl TransferEvent {
    pub fn agent_id(&self) -> AgentId {
        match self {
            TransferEvent::TeleportStarted { agent_id, .. }
            | TransferEvent::TeleportFailed { agent_id, .. }
            | TransferEvent::TeleportCompleted { agent_id, .. }
            | TransferEvent::CrossingCompleted { agent_id, .. }
            | TransferEvent::CrossingFailed { agent_id, .. } => *agent_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            TransferEvent::TeleportStarted { .. } => "teleport_started",
            TransferEvent::TeleportFailed { .. } => "teleport_failed",
            TransferEvent::TeleportCompleted { .. } => "teleport_completed",
            TransferEvent::CrossingCompleted { .. } => "crossing_completed",
            TransferEvent::CrossingFailed { .. } => "crossing_failed",
        }
    }
}
