//! Dispatch continuations
//!
//! Every inbound or deferred packet arrives with a set of continuations
//! supplied by the network stack. The routing layer decides which one to
//! call. Each continuation is `FnOnce`: ownership of the packet moves into
//! whichever continuation runs, so a packet can never be both forwarded and
//! failed.

use std::fmt;
use std::sync::Arc;

use crate::address::{InterfaceIndex, MacAddress};
use crate::error::SocketError;
use crate::packet::{Ipv4Header, Packet, Route};

/// Forward a unicast packet along a route
pub type UnicastForwardCallback = Box<dyn FnOnce(Route, Packet, Ipv4Header) + Send>;

/// Forward a multicast packet
pub type MulticastForwardCallback = Box<dyn FnOnce(Packet, Ipv4Header) + Send>;

/// Hand a packet to the local transport layer
pub type LocalDeliverCallback = Box<dyn FnOnce(Packet, Ipv4Header, InterfaceIndex) + Send>;

/// Report a failure for a packet back to its owner
pub type ErrorCallback = Box<dyn FnOnce(Packet, Ipv4Header, SocketError) + Send>;

/// Link-layer transmit-failure sink, invoked with the receiver's MAC address
pub type TxErrorCallback = Arc<dyn Fn(MacAddress) + Send + Sync>;

/// The continuations supplied with an inbound packet
pub struct InputCallbacks {
    /// Unicast forwarding (also used to relay broadcasts)
    pub unicast: UnicastForwardCallback,
    /// Multicast forwarding, unused by this protocol
    pub multicast: Option<MulticastForwardCallback>,
    /// Local delivery; a missing callback is reported through `error`
    pub local: Option<LocalDeliverCallback>,
    /// Failure report
    pub error: ErrorCallback,
}

impl InputCallbacks {
    /// Create a callback set from its parts
    pub fn new(
        unicast: UnicastForwardCallback,
        local: Option<LocalDeliverCallback>,
        error: ErrorCallback,
    ) -> Self {
        Self {
            unicast,
            multicast: None,
            local,
            error,
        }
    }

    /// Attach a multicast continuation
    pub fn with_multicast(mut self, multicast: MulticastForwardCallback) -> Self {
        self.multicast = Some(multicast);
        self
    }
}

impl fmt::Debug for InputCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputCallbacks")
            .field("multicast", &self.multicast.is_some())
            .field("local", &self.local.is_some())
            .finish_non_exhaustive()
    }
}
