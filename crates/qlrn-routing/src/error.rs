//! Routing error types
//!
//! Re-exports core routing errors and adds errors specific to the routing
//! table, configuration and the engine.

use std::net::Ipv4Addr;

use thiserror::Error;

// Re-export core routing errors
pub use qlrn_core::RoutingError as CoreRoutingError;
pub use qlrn_core::{ProtocolError, TransportError};

/// Routing table contract violations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TableError {
    /// A live entry already exists for the destination
    #[error("Route to {0} already exists")]
    DuplicateDestination(Ipv4Addr),

    /// No entry exists for the destination
    #[error("No route to {0} in table")]
    NoSuchRoute(Ipv4Addr),
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Attribute name not recognized
    #[error("Unknown attribute: {0}")]
    UnknownAttribute(String),

    /// Attribute value could not be parsed
    #[error("Invalid value {value:?} for attribute {name}")]
    InvalidValue { name: String, value: String },
}

/// Errors surfaced by the routing engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// Core routing error
    #[error("Core routing error: {0}")]
    Core(#[from] CoreRoutingError),

    /// Routing table error
    #[error("Routing table error: {0}")]
    Table(#[from] TableError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Socket binding or send failure
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Control message could not be decoded
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Interface has no usable address
    #[error("Interface {0} has no usable address")]
    NoInterfaceAddress(qlrn_core::InterfaceIndex),

    /// Next hop is blacklisted as a unidirectional link
    #[error("Next hop {0} is blacklisted")]
    NextHopBlacklisted(std::net::Ipv4Addr),
}

/// Result type for routing table operations
pub type TableResult<T> = Result<T, TableError>;

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
