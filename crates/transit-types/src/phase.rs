//! Transfer progress phases.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Progress of an agent's in-flight transfer.
///
/// The success path runs `Transferring -> ReceivedAtDestination -> CleaningUp`;
/// `Cancelling` and `Aborting` are raised asynchronously by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransferPhase {
    NotInTransit,
    Transferring,
    ReceivedAtDestination,
    CleaningUp,
    /// The client asked to cancel.
    Cancelling,
    /// The client disconnected or logged out mid-transfer.
    Aborting,
}

impl TransferPhase {
    /// Cancel or abort signal.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, TransferPhase::Cancelling | TransferPhase::Aborting)
    }

    /// Position along the success path, `None` for interrupt phases.
    pub fn success_rank(&self) -> Option<u8> {
        match self {
            TransferPhase::NotInTransit => Some(0),
            TransferPhase::Transferring => Some(1),
            TransferPhase::ReceivedAtDestination => Some(2),
            TransferPhase::CleaningUp => Some(3),
            TransferPhase::Cancelling | TransferPhase::Aborting => None,
        }
    }
}

impl fmt::Display for TransferPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransferPhase::NotInTransit => "not_in_transit",
            TransferPhase::Transferring => "transferring",
            TransferPhase::ReceivedAtDestination => "received_at_destination",
            TransferPhase::CleaningUp => "cleaning_up",
            TransferPhase::Cancelling => "cancelling",
            TransferPhase::Aborting => "aborting",
        };
        f.write_str(name)
    }
}
