//! Prometheus counters for transfer outcomes.

use crate::error::FailureClass;
use prometheus::{IntCounter, IntCounterVec, Opts, Registry};

/// Counters for teleports, crossings and child agent traffic.
///
/// Each teleport call moves `teleport_attempts` at most once and at most
/// one of aborts, cancels or failures.
#[derive(Clone)]
pub struct TransferMetrics {
    /// Cross-region teleports that passed admission.
    pub teleport_attempts: IntCounter,
    /// Teleports dropped because the client logged out.
    pub teleport_aborts: IntCounter,
    /// Teleports the client cancelled.
    pub teleport_cancels: IntCounter,
    /// Network or destination failures.
    pub teleport_failures: IntCounter,
    /// Labelled by `outcome`: completed, failed, refused.
    pub crossings: IntCounterVec,
    /// Labelled by `op`: create, close, update, rejected.
    pub child_agents: IntCounterVec,
}

impl TransferMetrics {
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let teleport_attempts = IntCounter::with_opts(Opts::new(
            "entitytransfer_teleport_attempts_total",
            "Cross-region teleports that passed admission",
        ))?;
        let teleport_aborts = IntCounter::with_opts(Opts::new(
            "entitytransfer_teleport_aborts_total",
            "Teleports abandoned because the client logged out",
        ))?;
        let teleport_cancels = IntCounter::with_opts(Opts::new(
            "entitytransfer_teleport_cancels_total",
            "Teleports cancelled by the client",
        ))?;
        let teleport_failures = IntCounter::with_opts(Opts::new(
            "entitytransfer_teleport_failures_total",
            "Teleports that failed on the network or at the destination",
        ))?;
        let crossings = IntCounterVec::new(
            Opts::new("entitytransfer_crossings_total", "Region crossings by outcome"),
            &["outcome"],
        )?;
        let child_agents = IntCounterVec::new(
            Opts::new(
                "entitytransfer_child_agents_total",
                "Child agent operations against neighbor regions",
            ),
            &["op"],
        )?;

        registry.register(Box::new(teleport_attempts.clone()))?;
        registry.register(Box::new(teleport_aborts.clone()))?;
        registry.register(Box::new(teleport_cancels.clone()))?;
        registry.register(Box::new(teleport_failures.clone()))?;
        registry.register(Box::new(crossings.clone()))?;
        registry.register(Box::new(child_agents.clone()))?;

        Ok(Self {
            teleport_attempts,
            teleport_aborts,
            teleport_cancels,
            teleport_failures,
            crossings,
            child_agents,
        })
    }

    /// Account for a teleport that ended with `class`.
    pub fn record_teleport_outcome(&self, class: FailureClass) {
        match class {
            FailureClass::Failure => self.teleport_failures.inc(),
            FailureClass::Cancelled => self.teleport_cancels.inc(),
            FailureClass::Aborted => self.teleport_aborts.inc(),
            FailureClass::Precondition | FailureClass::Internal => {}
        }
    }

    pub fn record_crossing(&self, outcome: &str) {
        self.crossings.with_label_values(&[outcome]).inc();
    }

    pub fn record_child_agent(&self, op: &str) {
        self.child_agents.with_label_values(&[op]).inc();
    }
}
