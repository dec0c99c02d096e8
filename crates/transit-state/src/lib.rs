//! Shared mutable state for entity transfer.
//!
//! Three per-key structures are touched by concurrent transfers:
//!
//! - [`TransferStateTracker`]: at most one in-flight transfer per agent, plus
//!   the arrival rendezvous the orchestrators wait on
//! - [`BannedDestinationCache`]: recent access refusals per (region, agent)
//! - [`KnownRegionMap`]: capability seeds of each agent's child placements
//!
//! Every structure is sharded by key, so unrelated agents never contend.

#![deny(unsafe_code)]

pub mod banned;
pub mod known_regions;
pub mod tracker;

pub use banned::BannedDestinationCache;
pub use known_regions::{KnownRegion, KnownRegionMap};
pub use tracker::{TransferGuard, TransferStateTracker};
