//! Collaborator traits
//!
//! The routing engine consumes these traits and never implements them.
//!
//! ## Key Traits
//!
//! - [`NetworkStack`]: Interface state and socket binding on the local node
//! - [`DatagramSocket`]: A bound UDP endpoint used for control traffic
//! - [`ArpCache`]: Reverse lookup from link-layer to network address
//! - [`Scheduler`]: One-shot, cancellable timers
//! - [`Clock`]: Time abstraction for testability

use std::fmt::Display;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::address::{InterfaceAddress, InterfaceIndex, MacAddress};
use crate::callback::TxErrorCallback;
use crate::error::TransportResult;

/// Time abstraction for testability
///
/// This trait allows tests and simulations to control time, enabling
/// deterministic testing of lifetime and timer behavior.
pub trait Clock: Send + Sync {
    /// Get the current instant (monotonic time)
    fn now(&self) -> Instant;
}

/// Real clock implementation using system time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl ManualClock {
    /// Create a manual clock frozen at the current instant
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    /// Create a manual clock frozen at `start`
    pub fn starting_at(start: Instant) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }

    /// Jump the clock to `instant`; moving backwards is ignored
    pub fn set(&self, instant: Instant) {
        let mut now = self.now.lock();
        if instant > *now {
            *now = instant;
        }
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock()
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> Instant {
        (**self).now()
    }
}

/// Handle to an armed timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimerHandle(pub u64);

impl Display for TimerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "timer-{}", self.0)
    }
}

/// One-shot timer scheduler
///
/// A timer carries a small payload `T` identifying what fired (for the
/// routing engine, a destination or neighbor key). When a timer fires, the
/// host hands the payload back to whoever armed it. Cancelling an
/// already-fired or unknown handle is a no-op.
pub trait Scheduler<T>: Send + Sync {
    /// Arm a timer that fires after `delay`
    fn schedule(&self, delay: Duration, timer: T) -> TimerHandle;

    /// Disarm a timer
    fn cancel(&self, handle: TimerHandle);
}

impl<T, S: Scheduler<T> + ?Sized> Scheduler<T> for Arc<S> {
    fn schedule(&self, delay: Duration, timer: T) -> TimerHandle {
        (**self).schedule(delay, timer)
    }

    fn cancel(&self, handle: TimerHandle) {
        (**self).cancel(handle)
    }
}

/// A bound datagram endpoint
pub trait DatagramSocket: Send + Sync {
    /// Send a datagram with an explicit TTL
    fn send_to(&self, payload: Bytes, destination: SocketAddrV4, ttl: u8) -> TransportResult<()>;

    /// Address the socket is bound to
    fn local_addr(&self) -> SocketAddrV4;

    /// Close the socket
    fn close(self)
    where
        Self: Sized,
    {
    }
}

/// Reverse address resolution on one interface
pub trait ArpCache: Send + Sync {
    /// Network address currently associated with a link-layer address
    fn lookup_mac(&self, mac: MacAddress) -> Option<Ipv4Addr>;
}

/// The local node's IPv4 stack
///
/// Interface indices are stable for the lifetime of the node.
pub trait NetworkStack: Send + Sync {
    /// Socket type produced by [`NetworkStack::bind`]
    type Socket: DatagramSocket;

    /// Index of the loopback interface
    fn loopback_interface(&self) -> InterfaceIndex;

    /// Whether the interface is administratively up
    fn is_up(&self, iface: InterfaceIndex) -> bool;

    /// Addresses configured on the interface
    fn addresses(&self, iface: InterfaceIndex) -> Vec<InterfaceAddress>;

    /// Whether IP forwarding is enabled on the interface
    fn is_forwarding(&self, iface: InterfaceIndex) -> bool;

    /// Interface that owns `addr`, if any
    fn interface_for_address(&self, addr: Ipv4Addr) -> Option<InterfaceIndex>;

    /// Whether a packet for `addr` arriving on `iface` is for this node
    fn is_destination_address(&self, addr: Ipv4Addr, _iface: InterfaceIndex) -> bool {
        self.interface_for_address(addr).is_some()
    }

    /// Whether the interface is the loopback interface
    fn is_loopback(&self, iface: InterfaceIndex) -> bool {
        iface == self.loopback_interface()
    }

    /// Bind a datagram socket to `local` on `iface`
    fn bind(&self, iface: InterfaceIndex, local: SocketAddrV4) -> TransportResult<Self::Socket>;

    /// ARP cache of the interface, if it has one
    fn arp_cache(&self, iface: InterfaceIndex) -> Option<Arc<dyn ArpCache>>;

    /// Subscribe to link-layer transmit failures on the interface
    ///
    /// Returns `false` if the interface offers no such feedback.
    fn connect_tx_errors(&self, iface: InterfaceIndex, callback: TxErrorCallback) -> bool;

    /// Drop a transmit-failure subscription
    fn disconnect_tx_errors(&self, iface: InterfaceIndex);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new();
        let start = clock.now();
        clock.advance(Duration::from_secs(2));
        assert_eq!(clock.now() - start, Duration::from_secs(2));
    }

    #[test]
    fn test_manual_clock_never_goes_back() {
        let clock = ManualClock::new();
        let start = clock.now();
        clock.advance(Duration::from_secs(5));
        clock.set(start);
        assert_eq!(clock.now() - start, Duration::from_secs(5));
    }

    #[test]
    fn test_arc_clock_delegates() {
        let clock = Arc::new(ManualClock::new());
        let start = Clock::now(&clock);
        clock.advance(Duration::from_millis(40));
        assert_eq!(Clock::now(&clock) - start, Duration::from_millis(40));
    }
}
