//! Error types for the QLRN routing stack

use std::net::Ipv4Addr;

use thiserror::Error;

/// Top-level error type for the QLRN stack
#[derive(Debug, Error)]
pub enum QlrnError {
    #[error("Routing error: {0}")]
    Routing(#[from] RoutingError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Socket-level error delivered to a packet's error continuation
///
/// This is the only failure signal a packet's owner ever sees. Success is
/// the absence of an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum SocketError {
    #[error("No route to host")]
    NoRouteToHost,
}

/// Errors related to routing
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutingError {
    #[error("No route available to destination")]
    NoRouteToHost,

    #[error("Route discovery for {destination} exhausted after {attempts} attempts")]
    DiscoveryExhausted { destination: Ipv4Addr, attempts: u8 },

    #[error("TTL expired for packet")]
    TtlExpired,
}

impl From<RoutingError> for SocketError {
    fn from(_: RoutingError) -> Self {
        Self::NoRouteToHost
    }
}

/// Errors related to transport
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Bind failed: {0}")]
    BindFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Socket closed")]
    SocketClosed,

    #[error("Interface not found: {0}")]
    InterfaceNotFound(String),
}

/// Errors related to control-message encoding
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Invalid message format: {0}")]
    InvalidMessageFormat(String),

    #[error("Unknown message type: {0}")]
    UnknownMessageType(u8),

    #[error("Empty message")]
    EmptyMessage,
}

/// Result type for routing operations
pub type RoutingResult<T> = Result<T, RoutingError>;

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routing_error_maps_to_no_route() {
        let err = RoutingError::DiscoveryExhausted {
            destination: Ipv4Addr::new(10, 0, 0, 9),
            attempts: 2,
        };
        assert_eq!(
            err.to_string(),
            "Route discovery for 10.0.0.9 exhausted after 2 attempts"
        );
        assert_eq!(SocketError::from(err), SocketError::NoRouteToHost);
    }

    #[test]
    fn test_top_level_wraps() {
        let err: QlrnError = TransportError::SocketClosed.into();
        assert!(matches!(err, QlrnError::Transport(TransportError::SocketClosed)));
    }
}
