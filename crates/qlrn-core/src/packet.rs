//! Packet and route types
//!
//! Routing treats payloads as opaque. The only header fields it reads are
//! the ones carried by [`Ipv4Header`]; the destination port is kept on the
//! [`Packet`] so control traffic can be told apart from data traffic.

use std::fmt::Display;
use std::net::Ipv4Addr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::address::{CONTROL_PORT, InterfaceIndex, UDP_PROTOCOL};

/// Unique identifier for a packet, assigned by the sender's stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PacketId(pub u64);

impl PacketId {
    /// Create a new packet ID
    pub const fn new(uid: u64) -> Self {
        Self(uid)
    }
}

impl Display for PacketId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// IPv4 header fields consulted by routing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ipv4Header {
    /// Originator of the packet
    pub source: Ipv4Addr,
    /// Final destination of the packet
    pub destination: Ipv4Addr,
    /// Remaining hop budget
    pub ttl: u8,
    /// IP protocol number of the payload
    pub protocol: u8,
}

impl Ipv4Header {
    /// Create a UDP header with the given TTL
    pub fn udp(source: Ipv4Addr, destination: Ipv4Addr, ttl: u8) -> Self {
        Self {
            source,
            destination,
            ttl,
            protocol: UDP_PROTOCOL,
        }
    }

    /// Header with the TTL decremented by one hop
    pub fn hop(mut self) -> Self {
        self.ttl = self.ttl.saturating_sub(1);
        self
    }
}

/// An opaque packet travelling through the routing layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Unique packet identifier
    pub id: PacketId,
    /// Transport payload, never inspected by routing
    pub payload: Bytes,
    /// Destination transport port, if the payload is UDP
    pub dest_port: Option<u16>,
}

impl Packet {
    /// Create a new packet
    pub fn new(id: PacketId, payload: impl Into<Bytes>) -> Self {
        Self {
            id,
            payload: payload.into(),
            dest_port: None,
        }
    }

    /// Set the destination port
    pub fn with_dest_port(mut self, port: u16) -> Self {
        self.dest_port = Some(port);
        self
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the payload is empty
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Whether this packet is one of the routing protocol's own control messages
    pub fn is_control(&self, header: &Ipv4Header) -> bool {
        header.protocol == UDP_PROTOCOL && self.dest_port == Some(CONTROL_PORT)
    }
}

/// A forwarding decision
///
/// `gateway` is the next hop; for on-link destinations it equals the
/// destination itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Route {
    pub destination: Ipv4Addr,
    pub source: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub output_interface: InterfaceIndex,
}

impl Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} -> {} via {} on {}",
            self.source, self.destination, self.gateway, self.output_interface
        )
    }
}
