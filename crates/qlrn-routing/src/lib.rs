//! # QLRN Routing
//!
//! On-demand routing decision engine for multi-hop wireless networks.
//!
//! The engine follows AODV's reactive model: routes are discovered only
//! when traffic needs them, kept alive by use, and torn down on timeout or
//! link failure. Route freshness can come from sequence numbers or from a
//! learned score supplied through [`NextHopSelector`].
//!
//! ## Core Components
//!
//! - [`RoutingTable`]: one entry per destination with VALID / INVALID /
//!   IN_SEARCH lifecycle and lazy expiry
//! - [`DuplicatePacketDetection`]: atomic check-and-insert cache for
//!   broadcast (packet id, source) pairs
//! - [`NeighborTracker`]: one-hop neighbor liveness and link-layer failure
//!   reports
//! - [`PendingPacketQueue`]: bounded, aged buffer for packets awaiting a route
//! - [`RoutingEngine`]: the state machine that ties them together
//!
//! ## Packet Paths
//!
//! 1. **OUTPUT**: [`RoutingEngine::route_output`] answers with a route or a
//!    loopback "defer" route
//! 2. **DEFER**: [`RoutingEngine::deferred_route_output`] queues the packet
//!    and starts discovery
//! 3. **INPUT**: [`RoutingEngine::route_input`] classifies inbound packets
//!    as echo, multicast, broadcast, local, or transit
//! 4. **TIMERS**: [`RoutingEngine::handle_timer`] retries or abandons
//!    discovery, probes neighbors and sweeps stale state
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use qlrn_routing::{RoutingHelper, TokioClock, TokioScheduler, run_timers};
//!
//! let (scheduler, fired) = TokioScheduler::new(tokio::runtime::Handle::current());
//! let engine = Arc::new(RoutingHelper::new().create(stack, Arc::new(scheduler), Arc::new(TokioClock)));
//! engine.start()?;
//! engine.notify_interface_up(iface)?;
//! tokio::spawn(run_timers(Arc::clone(&engine), fired));
//! ```

pub mod config;
pub mod dpd;
pub mod driver;
pub mod engine;
pub mod error;
pub mod helper;
pub mod message;
pub mod neighbor;
pub mod queue;
pub mod selector;
pub mod stats;
pub mod table;

// Re-export main types
pub use config::RoutingConfig;
pub use dpd::DuplicatePacketDetection;
pub use driver::{TokioClock, TokioScheduler, run_timers};
pub use engine::{DiscoveredRoute, OutputDecision, RoutingEngine, RoutingTimer};
pub use error::{ConfigError, EngineError, EngineResult, TableError, TableResult};
pub use helper::RoutingHelper;
pub use message::{ControlMessage, Hello, HelloAck, MessageType};
pub use neighbor::{Neighbor, NeighborTracker};
pub use queue::{PendingPacketQueue, QueueEntry};
pub use selector::{
    LoggingDiscovery, LowestCostSelector, NextHopSelector, RouteCandidate, RouteDiscovery,
    RouteRequest, TableSelector,
};
pub use stats::{EngineStats, StatsSnapshot};
pub use table::{RouteEntry, RouteFlag, RoutingTable, TimeUnit};

// Re-export core types for convenience
pub use qlrn_core::{DropReason, Route, SocketError};
