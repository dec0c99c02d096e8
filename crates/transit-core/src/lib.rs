//! Entity transfer orchestration for one region.
//!
//! Moves root agents between regions by teleport or by walking across a
//! border, and keeps presence-only child agents alive in the neighbor
//! regions an agent can see.
//!
//! # Architecture
//!
//! ```text
//!            EntityTransferService
//!   ┌──────────────┼──────────────────┐
//!   │              │                  │
//! Teleport    RegionCrossing    NeighborChildAgent
//! Orchestrator Orchestrator      Manager
//!   │              │                  │
//!   └──────── TransferRuntime ────────┘
//!     tracker · banned cache · known regions · resolver · metrics
//!                   │
//!   scene · simulation · grid · notifier · events · authorizer
//! ```
//!
//! Collaborators are traits; [`mock`] has in-memory versions.

#![deny(unsafe_code)]

pub mod builder;
pub mod collaborators;
pub mod config;
pub mod crossing;
pub mod error;
pub mod metrics;
pub mod mock;
pub mod neighbors;
pub mod objects;
pub mod resolver;
pub mod runtime;
pub mod service;
pub mod snapshot;
pub mod telemetry;
pub mod teleport;

pub use builder::EntityTransferServiceBuilder;
pub use collaborators::{
    BroadcastEventSink, ClientNotifier, CollabResult, GridDirectory, SceneAgents, SimulationService,
    TeleportAuthorizer, TransferEventSink,
};
pub use config::{LoggingConfig, TransferConfig};
pub use crossing::{CrossingTarget, RegionCrossingOrchestrator};
pub use error::{CollaboratorError, ConfigError, FailureClass, Result, TransferError};
pub use metrics::TransferMetrics;
pub use neighbors::{NeighborChildAgentManager, ReconcileReport};
pub use objects::ObjectCrossing;
pub use resolver::{DestinationResolver, NotFoundLocationCache, ResolvedDestination};
pub use runtime::{Collaborators, TransferRuntime};
pub use service::EntityTransferService;
pub use snapshot::AgentSessionSnapshotBuilder;
pub use telemetry::init_tracing;
pub use teleport::{TeleportOrchestrator, TeleportOutcome};
