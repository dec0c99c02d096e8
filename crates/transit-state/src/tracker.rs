//! Per-agent transfer admission and progress tracking.
//!
//! A live record means the agent is in transit. Creating the record is the
//! admission gate for teleports and crossings; removing it releases the
//! agent for the next transfer. Each record carries a `watch` channel so a
//! driver can wait for the destination's arrival confirmation while cancel
//! and abort signals arrive from other tasks.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, trace};
use transit_types::{AgentId, TransferPhase};

struct TransferRecord {
    phase: watch::Sender<TransferPhase>,
    created_at: DateTime<Utc>,
    last_transition_at: DateTime<Utc>,
}

/// Read-only copy of a live transfer record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferRecordInfo {
    /// Phase at the time of the read
    pub phase: TransferPhase,
    /// When the transfer was admitted
    pub created_at: DateTime<Utc>,
    /// When the phase last changed
    pub last_transition_at: DateTime<Utc>,
}

/// Tracks which agents are in transit and how far their transfer got.
#[derive(Default)]
pub struct TransferStateTracker {
    records: DashMap<AgentId, TransferRecord>,
}

impl TransferStateTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a transfer for `agent_id`.
    ///
    /// Returns `false` without touching state when the agent already has a
    /// live record.
    pub fn begin_transfer(&self, agent_id: AgentId) -> bool {
        match self.records.entry(agent_id) {
            Entry::Occupied(existing) => {
                let phase = *existing.get().phase.borrow();
                debug!(agent_id = %agent_id, phase = %phase, "Transfer refused, agent already in transit");
                false
            }
            Entry::Vacant(slot) => {
                let now = Utc::now();
                let (phase, _) = watch::channel(TransferPhase::Transferring);
                slot.insert(TransferRecord {
                    phase,
                    created_at: now,
                    last_transition_at: now,
                });
                trace!(agent_id = %agent_id, "Transfer admitted");
                true
            }
        }
    }

    /// Admit a transfer and tie its release to the returned guard.
    pub fn begin_guarded(self: &Arc<Self>, agent_id: AgentId) -> Option<TransferGuard> {
        self.begin_transfer(agent_id).then(|| TransferGuard {
            tracker: Arc::clone(self),
            agent_id,
        })
    }

    /// Move a live record to `phase`.
    ///
    /// Returns `false` when there is no live record or the move is not
    /// allowed: the success path never goes backwards, a cancel or abort is
    /// never overwritten by a success-path phase, and a transfer that is
    /// already cleaning up can no longer be cancelled.
    pub fn set_phase(&self, agent_id: AgentId, phase: TransferPhase) -> bool {
        let Some(mut record) = self.records.get_mut(&agent_id) else {
            return false;
        };

        let current = *record.phase.borrow();
        if !transition_allowed(current, phase) {
            debug!(
                agent_id = %agent_id,
                from = %current,
                to = %phase,
                "Ignoring transfer phase change"
            );
            return false;
        }

        record.phase.send_replace(phase);
        record.last_transition_at = Utc::now();
        trace!(agent_id = %agent_id, from = %current, to = %phase, "Transfer phase changed");
        true
    }

    /// Phase of the agent's live transfer, if any.
    pub fn current_phase(&self, agent_id: AgentId) -> Option<TransferPhase> {
        self.records.get(&agent_id).map(|record| *record.phase.borrow())
    }

    /// Snapshot of the agent's live record.
    pub fn record(&self, agent_id: AgentId) -> Option<TransferRecordInfo> {
        self.records.get(&agent_id).map(|record| TransferRecordInfo {
            phase: *record.phase.borrow(),
            created_at: record.created_at,
            last_transition_at: record.last_transition_at,
        })
    }

    /// Whether the agent holds a live record.
    pub fn is_in_transit(&self, agent_id: AgentId) -> bool {
        self.records.contains_key(&agent_id)
    }

    /// Number of agents currently in transit.
    pub fn in_transit_count(&self) -> usize {
        self.records.len()
    }

    /// Release the agent. Safe to call any number of times.
    pub fn end_transfer(&self, agent_id: AgentId) {
        if self.records.remove(&agent_id).is_some() {
            trace!(agent_id = %agent_id, "Transfer released");
        }
    }

    /// Wait until the destination confirms arrival, a cancel or abort is
    /// raised, the record is released, or `timeout` elapses.
    ///
    /// Returns `true` only for a confirmed arrival.
    pub async fn await_destination_confirmation(&self, agent_id: AgentId, timeout: Duration) -> bool {
        let Some(mut phase) = self.records.get(&agent_id).map(|r| r.phase.subscribe()) else {
            return false;
        };

        let settled = tokio::time::timeout(
            timeout,
            phase.wait_for(|p| {
                matches!(
                    p,
                    TransferPhase::ReceivedAtDestination
                        | TransferPhase::Cancelling
                        | TransferPhase::Aborting
                )
            }),
        )
        .await;

        match settled {
            Ok(Ok(observed)) => *observed == TransferPhase::ReceivedAtDestination,
            Ok(Err(_)) => {
                debug!(agent_id = %agent_id, "Transfer released while awaiting confirmation");
                false
            }
            Err(_) => {
                debug!(
                    agent_id = %agent_id,
                    timeout_ms = timeout.as_millis() as u64,
                    "Timed out awaiting destination confirmation"
                );
                false
            }
        }
    }
}

fn transition_allowed(from: TransferPhase, to: TransferPhase) -> bool {
    if from == to {
        return true;
    }
    match to {
        TransferPhase::NotInTransit => false,
        TransferPhase::CleaningUp => true,
        TransferPhase::Aborting => from != TransferPhase::CleaningUp,
        TransferPhase::Cancelling => matches!(
            from,
            TransferPhase::Transferring | TransferPhase::ReceivedAtDestination
        ),
        TransferPhase::Transferring | TransferPhase::ReceivedAtDestination => {
            match (from.success_rank(), to.success_rank()) {
                (Some(current), Some(next)) => current <= next,
                _ => false,
            }
        }
    }
}

/// Releases the agent's transfer record when dropped.
#[must_use = "dropping the guard ends the transfer immediately"]
pub struct TransferGuard {
    tracker: Arc<TransferStateTracker>,
    agent_id: AgentId,
}

impl TransferGuard {
    pub fn agent_id(&self) -> AgentId {
        self.agent_id
    }

    pub fn tracker(&self) -> &TransferStateTracker {
        &self.tracker
    }
}

impl Drop for TransferGuard {
    fn drop(&mut self) {
        self.tracker.end_transfer(self.agent_id);
    }
}

impl std::fmt::Debug for TransferGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferGuard")
            .field("agent_id", &self.agent_id)
            .finish()
    }
}
