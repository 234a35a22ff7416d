//! # QLRN Core
//!
//! Core traits, types, and errors shared by the QLRN routing crates.
//!
//! The routing engine never talks to a real network stack or a real clock
//! directly. Everything it needs from the outside world is expressed as a
//! trait in this crate, so the same engine runs inside the discrete-event
//! simulator, under tokio, or inside unit tests with a hand-driven clock.
//!
//! ## Key Traits
//!
//! - [`NetworkStack`]: Interface enumeration, forwarding flags and socket binding
//! - [`DatagramSocket`]: Per-interface raw send with TTL control
//! - [`ArpCache`]: Link-layer address resolution used for transmit-failure reports
//! - [`Scheduler`]: One-shot, cancellable timers carrying a typed payload
//! - [`Clock`]: Time abstraction for testability
//!
//! ## Key Types
//!
//! - [`InterfaceAddress`]: IPv4 address plus netmask bound to an interface
//! - [`Packet`] / [`Ipv4Header`]: The opaque payload and the header fields routing reads
//! - [`Route`]: A forwarding decision handed to the unicast continuation
//! - [`InputCallbacks`]: The dispatch continuations supplied with every inbound packet
//! - [`Expiry`]: Absolute deadline or "never"

pub mod address;
pub mod callback;
pub mod error;
pub mod event;
pub mod packet;
pub mod time;
pub mod traits;

// Re-export main types
pub use address::*;
pub use callback::*;
pub use error::*;
pub use event::*;
pub use packet::*;
pub use time::*;
pub use traits::*;
