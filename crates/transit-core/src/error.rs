//! Error types for transit-core.
//!
//! [`TransferError`] is what orchestrators return; its [`FailureClass`]
//! decides which counter moves and [`TransferError::user_message`] what the
//! client is told. [`CollaboratorError`] is what the scene, grid and
//! simulation boundaries return.

use thiserror::Error;
use transit_types::{AgentId, RegionHandle};

/// Shown when a destination cannot represent the avatar's outfit.
pub const OUTFIT_REFUSAL: &str =
    "destination region does not support the Outfit you are wearing. Please retry with a simpler one";

const VIEWER_CONNECT_FAILED: &str =
    "Connection between viewer and destination region could not be established.";
const NO_COMPLETION_SIGNAL: &str = "Destination region did not signal teleport completion.";

/// Failure reported by a collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CollaboratorError {
    /// The agent left the scene.
    #[error("agent gone: {0}")]
    AgentGone(AgentId),

    /// The peer could not be reached.
    #[error("unreachable: {0}")]
    Unreachable(String),

    /// The call exceeded its deadline.
    #[error("{0} timed out")]
    Timeout(&'static str),

    /// The peer answered and said no.
    #[error("rejected: {0}")]
    Rejected(String),
}

/// How a failed transfer is accounted for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureClass {
    /// Refused before anything was created remotely. Not an attempt.
    Precondition,
    /// Network or server failure after the attempt started.
    Failure,
    /// The client cancelled.
    Cancelled,
    /// The client disconnected or logged out.
    Aborted,
    /// Unexpected fault inside the transfer.
    Internal,
}

impl FailureClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureClass::Precondition => "precondition",
            FailureClass::Failure => "failure",
            FailureClass::Cancelled => "cancelled",
            FailureClass::Aborted => "aborted",
            FailureClass::Internal => "internal",
        }
    }
}

/// Why a teleport or crossing did not complete.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("agent {0} may not teleport")]
    PermissionDenied(AgentId),

    #[error("agent {agent_id} is already in transit")]
    AlreadyInTransit {
        agent_id: AgentId,
        notice: &'static str,
    },

    #[error("agent {0} is not a root agent in this region")]
    AgentNotFound(AgentId),

    #[error("agent {0} is frozen")]
    Frozen(AgentId),

    #[error("no region at {0}")]
    DestinationNotFound(RegionHandle),

    #[error("destination {0} is offline")]
    DestinationOffline(String),

    #[error("destination shares the local map position")]
    SameMapPosition,

    #[error("could not resolve endpoint of {0}")]
    EndpointUnresolved(String),

    #[error("access denied by {region}: {reason}")]
    AccessDenied { region: String, reason: String },

    #[error("access to {0} temporarily refused")]
    RecentlyRefused(String),

    #[error("outfit not supported by {0}")]
    OutfitIncompatible(String),

    #[error("attachments still loading")]
    AttachmentsLoading,

    #[error("create-agent refused by {region}: {reason}")]
    CreateAgentRefused { region: String, reason: String },

    #[error("update-agent to {region} failed: {source}")]
    UpdateAgentFailed {
        region: String,
        #[source]
        source: CollaboratorError,
    },

    #[error("{0} did not confirm arrival")]
    ConfirmationTimeout(String),

    #[error("cancelled by client during {stage}")]
    Cancelled { stage: &'static str },

    #[error("client left during {stage}")]
    Aborted { stage: &'static str },

    #[error("home location unknown")]
    HomeNotFound,

    #[error("home not set")]
    HomeNotSet,

    #[error("home region not found")]
    HomeRegionNotFound,

    #[error("landmark region not found")]
    LandmarkRegionNotFound,

    #[error("crossings disabled for agent {0}")]
    CrossingDisabled(AgentId),

    #[error("no region to cross into")]
    NoNeighbor,

    #[error("{region} refused object: {source}")]
    ObjectRejected {
        region: String,
        #[source]
        source: CollaboratorError,
    },

    #[error("directory lookup failed: {0}")]
    Directory(#[source] CollaboratorError),

    #[error("scene refused {operation}: {source}")]
    Scene {
        operation: &'static str,
        #[source]
        source: CollaboratorError,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

impl TransferError {
    pub fn class(&self) -> FailureClass {
        match self {
            TransferError::CreateAgentRefused { .. }
            | TransferError::UpdateAgentFailed { .. }
            | TransferError::ConfirmationTimeout(_)
            | TransferError::ObjectRejected { .. } => FailureClass::Failure,
            TransferError::Cancelled { .. } => FailureClass::Cancelled,
            TransferError::Aborted { .. } => FailureClass::Aborted,
            TransferError::Internal(_) | TransferError::Scene { .. } => FailureClass::Internal,
            _ => FailureClass::Precondition,
        }
    }

    /// Text for the client, if the client should be told anything.
    pub fn user_message(&self) -> Option<String> {
        let text = match self {
            TransferError::PermissionDenied(_) => "You are not allowed to teleport".to_string(),
            TransferError::AlreadyInTransit { notice, .. } => notice.to_string(),
            TransferError::Frozen(_) => "You are frozen".to_string(),
            TransferError::DestinationNotFound(_) => {
                "The region you tried to teleport to was not found".to_string()
            }
            TransferError::DestinationOffline(_) => {
                "The region you tried to teleport to is offline".to_string()
            }
            TransferError::SameMapPosition => {
                "Can't teleport to a region on same map position. Try going to another region first, then retry from there".to_string()
            }
            TransferError::EndpointUnresolved(_) => "Could not resolve destination Address".to_string(),
            TransferError::AccessDenied { reason, .. } => {
                if reason.trim().is_empty() {
                    "Access Denied".to_string()
                } else {
                    reason.clone()
                }
            }
            TransferError::RecentlyRefused(_) => {
                "Access Denied or Temporary not possible".to_string()
            }
            TransferError::OutfitIncompatible(_) => OUTFIT_REFUSAL.to_string(),
            TransferError::AttachmentsLoading => {
                "Cannot leave region yet, attachments are still loading".to_string()
            }
            TransferError::CreateAgentRefused { reason, .. } => reason.clone(),
            TransferError::UpdateAgentFailed { region, .. } => {
                format!("Problems connecting to destination {region}, reason: {VIEWER_CONNECT_FAILED}")
            }
            TransferError::ConfirmationTimeout(region) => {
                format!("Problems connecting to destination {region}, reason: {NO_COMPLETION_SIGNAL}")
            }
            TransferError::HomeNotFound => "Your home region not found".to_string(),
            TransferError::HomeNotSet => "Home set not".to_string(),
            TransferError::HomeRegionNotFound => "Home region not found".to_string(),
            TransferError::LandmarkRegionNotFound => "Landmark region not found".to_string(),
            TransferError::Directory(_) => "Unable to locate destination".to_string(),
            TransferError::Internal(_) | TransferError::Scene { .. } => "Internal error".to_string(),
            TransferError::AgentNotFound(_)
            | TransferError::Cancelled { .. }
            | TransferError::Aborted { .. }
            | TransferError::CrossingDisabled(_)
            | TransferError::NoNeighbor
            | TransferError::ObjectRejected { .. } => return None,
        };
        Some(text)
    }

    /// Map a scene failure; an agent that left the scene aborts the transfer.
    pub(crate) fn scene(operation: &'static str) -> impl FnOnce(CollaboratorError) -> TransferError {
        move |source| match source {
            CollaboratorError::AgentGone(_) => TransferError::Aborted { stage: operation },
            source => TransferError::Scene { operation, source },
        }
    }
}

/// Configuration loading failure.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration error: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("metrics registration failed: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("missing collaborator: {0}")]
    MissingCollaborator(&'static str),
}

/// Result alias for transfer operations.
pub type Result<T> = std::result::Result<T, TransferError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert_eq!(TransferError::Frozen(AgentId::generate()).class(), FailureClass::Precondition);
        assert_eq!(TransferError::OutfitIncompatible("b".into()).class(), FailureClass::Precondition);
        assert_eq!(TransferError::ConfirmationTimeout("b".into()).class(), FailureClass::Failure);
        assert_eq!(TransferError::Cancelled { stage: "x" }.class(), FailureClass::Cancelled);
        assert_eq!(TransferError::Aborted { stage: "x" }.class(), FailureClass::Aborted);
        assert_eq!(TransferError::Internal("boom".into()).class(), FailureClass::Internal);
    }

    #[test]
    fn test_user_messages() {
        let timeout = TransferError::ConfirmationTimeout("Beta".into());
        assert_eq!(
            timeout.user_message().as_deref(),
            Some("Problems connecting to destination Beta, reason: Destination region did not signal teleport completion.")
        );

        let denied = TransferError::AccessDenied {
            region: "Beta".into(),
            reason: " ".into(),
        };
        assert_eq!(denied.user_message().as_deref(), Some("Access Denied"));

        assert_eq!(TransferError::Cancelled { stage: "x" }.user_message(), None);
        assert_eq!(
            TransferError::Internal("boom".into()).user_message().as_deref(),
            Some("Internal error")
        );
    }
}
