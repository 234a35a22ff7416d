//! Core types for the routing simulation
//!
//! Nodes are numbered from zero. Node `n` owns the address `10.0.0.0 + n + 1`
//! on a shared /16 wireless subnet, and a locally administered MAC address
//! derived from the same number.

use std::fmt;
use std::net::Ipv4Addr;
use std::time::Duration;

use derive_more::Display;
use qlrn_core::{InterfaceAddress, InterfaceIndex, MacAddress, PacketId};
use serde::{Deserialize, Serialize};

/// Loopback interface of every simulated node
pub const LOOPBACK_IF: InterfaceIndex = InterfaceIndex::new(0);

/// Wireless interface of every simulated node
pub const WIRELESS_IF: InterfaceIndex = InterfaceIndex::new(1);

/// Prefix length of the shared wireless subnet
pub const SUBNET_PREFIX: u8 = 16;

/// Base of the wireless subnet
const SUBNET_BASE: u32 = 0x0A00_0000;

/// Largest node count the subnet can address
pub const MAX_NODES: u16 = 65_534;

/// Identifier of a simulated node
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display,
)]
#[display("n{_0}")]
pub struct NodeId(pub u16);

impl NodeId {
    /// The node's IPv4 address
    pub fn address(self) -> Ipv4Addr {
        Ipv4Addr::from(SUBNET_BASE + u32::from(self.0) + 1)
    }

    /// The node's address and subnet
    pub fn interface_address(self) -> InterfaceAddress {
        InterfaceAddress::new(self.address(), SUBNET_PREFIX)
    }

    /// The node's link-layer address
    pub fn mac(self) -> MacAddress {
        let [hi, lo] = self.0.to_be_bytes();
        MacAddress::new([0x02, 0, 0, 0, hi, lo])
    }

    /// Node owning a wireless address
    pub fn from_address(addr: Ipv4Addr) -> Option<Self> {
        let host = u32::from(addr).checked_sub(SUBNET_BASE + 1)?;
        u16::try_from(host)
            .ok()
            .filter(|id| *id < MAX_NODES)
            .map(Self)
    }

    /// Node owning a link-layer address
    pub fn from_mac(mac: MacAddress) -> Option<Self> {
        match mac.octets() {
            [0x02, 0, 0, 0, hi, lo] => Some(Self(u16::from_be_bytes([hi, lo]))),
            _ => None,
        }
    }
}

/// Why the simulation lost a packet outside the routing engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LossCause {
    /// The engine declined an inbound packet
    Unroutable,
    /// Hop budget ran out in transit
    TtlExpired,
    /// The next hop was no longer in radio range
    LinkLoss,
}

impl fmt::Display for LossCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unroutable => write!(f, "unroutable"),
            Self::TtlExpired => write!(f, "ttl expired"),
            Self::LinkLoss => write!(f, "link loss"),
        }
    }
}

/// Events recorded in the simulation log
///
/// `at` is simulated time since the start of the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NetworkEvent {
    /// Application handed a packet to a node
    Send {
        uid: PacketId,
        from: NodeId,
        to: Ipv4Addr,
        at: Duration,
    },
    /// A node put a data frame on the air
    Hop {
        uid: PacketId,
        from: NodeId,
        via: Ipv4Addr,
        at: Duration,
    },
    /// Packet reached its destination
    Delivered {
        uid: PacketId,
        node: NodeId,
        hops: u8,
        at: Duration,
    },
    /// A broadcast copy was delivered locally
    BroadcastReceived {
        uid: PacketId,
        node: NodeId,
        at: Duration,
    },
    /// The routing engine reported a failure through the error continuation
    Failed {
        uid: PacketId,
        node: NodeId,
        at: Duration,
    },
    /// Packet lost outside the engine
    Lost {
        uid: PacketId,
        node: NodeId,
        cause: LossCause,
        at: Duration,
    },
    /// Discovery installed a route at the requesting node
    RouteInstalled {
        node: NodeId,
        destination: NodeId,
        next_hop: NodeId,
        hops: u16,
        at: Duration,
    },
    /// Link state changed
    Link {
        a: NodeId,
        b: NodeId,
        up: bool,
        at: Duration,
    },
}
