//! # QLRN Simulation
//!
//! A discrete-event simulator for the QLRN on-demand routing engine.
//!
//! ## Overview
//!
//! Every simulated node runs a real [`qlrn_routing::RoutingEngine`]. What a
//! real network would provide is simulated around it:
//!
//! - **Virtual clock**: one [`qlrn_core::ManualClock`] shared by all engines,
//!   moved forward event by event
//! - **Timer heap**: routing timers and frames in flight share one
//!   time-ordered [`EventQueue`]
//! - **Shared medium**: a radio-range graph; broadcasts reach every node in
//!   range, unicasts to a node out of range raise a link-layer failure
//! - **Route discovery**: requests are answered from the live link graph
//!   within the request's search radius
//!
//! ## Architecture
//!
//! - **Types** (`types.rs`): node ids, addressing and the event log
//! - **Topology** (`topology.rs`): line, ring, star, grid and random graphs
//! - **Scheduler** (`scheduler.rs`): event queue and per-node timer scheduler
//! - **Medium** (`medium.rs`): the shared channel and per-node network stacks
//! - **Discovery** (`discovery.rs`): route request hook
//! - **Simulation** (`simulation.rs`): the event loop and statistics
//! - **Scenarios** (`scenarios.rs`): pre-built runs used by the CLI and tests
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use qlrn_simulation::*;
//!
//! // n0 - n1 - n2
//! let topology = TopologyBuilder::new(3).line();
//! let mut sim = Simulation::new(&topology, SimConfig::default())?;
//!
//! // The first packet waits for discovery, then travels two hops
//! sim.send(NodeId(0), NodeId(2))?;
//! sim.run_for(Duration::from_secs(1));
//!
//! assert_eq!(sim.stats.packets_delivered, 1);
//! assert_eq!(sim.stats.total_hops, 2);
//! ```

pub mod discovery;
pub mod medium;
pub mod scenarios;
pub mod scheduler;
pub mod simulation;
pub mod topology;
pub mod types;

#[cfg(test)]
mod integration_scenarios;

// Re-export main types
pub use discovery::OracleDiscovery;
pub use medium::{Medium, MediumArp, MediumSocket, MediumStats, NodeStack};
pub use scheduler::{EventQueue, NodeScheduler, SimEvent};
pub use simulation::{DATA_PORT, SimConfig, SimEngine, SimError, SimStats, Simulation};
pub use topology::{Topology, TopologyBuilder, from_edges};
pub use types::{LOOPBACK_IF, LossCause, NetworkEvent, NodeId, WIRELESS_IF};
