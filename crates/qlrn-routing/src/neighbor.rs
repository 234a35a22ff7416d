//! Neighbor liveness tracking
//!
//! The [`NeighborTracker`] records which one-hop neighbors have been heard
//! recently and on which interface. It also owns the link-layer
//! transmit-failure path: the network stack is handed a
//! [`TxErrorCallback`] that resolves the failed receiver's MAC address
//! through the registered ARP caches and queues the neighbor's IPv4
//! address as a link failure. The engine drains those failures with
//! [`NeighborTracker::take_link_failures`].
//!
//! Losing a neighbor record is advisory. It never invalidates routes by
//! itself.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use qlrn_core::{ArpCache, InterfaceIndex, MacAddress, TxErrorCallback};
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// A one-hop neighbor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Neighbor {
    /// Neighbor address
    pub address: Ipv4Addr,
    /// Interface the neighbor was heard on
    pub interface: InterfaceIndex,
    /// Liveness deadline
    pub expire: Instant,
    /// Link-layer address, learned from failure reports
    pub mac: Option<MacAddress>,
    /// Set when the link layer reported a transmit failure
    pub close: bool,
}

/// Tracks one-hop neighbors and link-layer failures
pub struct NeighborTracker {
    /// Neighbors indexed by address
    neighbors: Arc<DashMap<Ipv4Addr, Neighbor>>,
    /// ARP caches of the interfaces we listen on
    arp_caches: Arc<RwLock<Vec<Arc<dyn ArpCache>>>>,
    /// Sender half handed to link-layer callbacks
    failures_tx: mpsc::UnboundedSender<Ipv4Addr>,
    /// Receiver half drained by the engine
    failures_rx: Mutex<mpsc::UnboundedReceiver<Ipv4Addr>>,
}

impl Default for NeighborTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl NeighborTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        let (failures_tx, failures_rx) = mpsc::unbounded_channel();
        Self {
            neighbors: Arc::new(DashMap::new()),
            arp_caches: Arc::new(RwLock::new(Vec::new())),
            failures_tx,
            failures_rx: Mutex::new(failures_rx),
        }
    }

    /// Refresh or create a neighbor's liveness deadline
    ///
    /// An existing deadline is never shortened.
    pub fn update(&self, address: Ipv4Addr, interface: InterfaceIndex, expire: Instant) {
        self.neighbors
            .entry(address)
            .and_modify(|n| {
                n.expire = n.expire.max(expire);
                n.interface = interface;
                n.close = false;
            })
            .or_insert_with(|| {
                trace!(neighbor = %address, iface = %interface, "New neighbor");
                Neighbor {
                    address,
                    interface,
                    expire,
                    mac: None,
                    close: false,
                }
            });
    }

    /// Whether `address` is a live neighbor at `now`
    pub fn is_neighbor(&self, address: Ipv4Addr, now: Instant) -> bool {
        self.neighbors
            .get(&address)
            .is_some_and(|n| !n.close && now <= n.expire)
    }

    /// Liveness deadline of a neighbor
    pub fn expire_time(&self, address: Ipv4Addr) -> Option<Instant> {
        self.neighbors.get(&address).map(|n| n.expire)
    }

    /// Live neighbors heard on `iface`
    pub fn neighbors_on(&self, iface: InterfaceIndex, now: Instant) -> Vec<Ipv4Addr> {
        self.neighbors
            .iter()
            .filter(|n| n.interface == iface && !n.close && now <= n.expire)
            .map(|n| n.address)
            .collect()
    }

    /// Remove expired and closed neighbors
    ///
    /// Returns the addresses that were dropped.
    pub fn purge(&self, now: Instant) -> Vec<Ipv4Addr> {
        let mut lost = Vec::new();
        self.neighbors.retain(|addr, n| {
            if n.close || now > n.expire {
                lost.push(*addr);
                false
            } else {
                true
            }
        });
        if !lost.is_empty() {
            debug!(count = lost.len(), "Neighbors lost");
        }
        lost
    }

    /// Forget every neighbor heard on `iface`
    pub fn remove_interface(&self, iface: InterfaceIndex) -> usize {
        let before = self.neighbors.len();
        self.neighbors.retain(|_, n| n.interface != iface);
        before.saturating_sub(self.neighbors.len())
    }

    /// Forget all neighbors
    pub fn clear(&self) {
        self.neighbors.clear();
    }

    /// Number of tracked neighbors
    pub fn len(&self) -> usize {
        self.neighbors.len()
    }

    /// Whether no neighbors are tracked
    pub fn is_empty(&self) -> bool {
        self.neighbors.is_empty()
    }

    /// Register an interface's ARP cache
    pub fn add_arp_cache(&self, cache: Arc<dyn ArpCache>) {
        self.arp_caches.write().push(cache);
    }

    /// Unregister an ARP cache
    pub fn del_arp_cache(&self, cache: &Arc<dyn ArpCache>) {
        self.arp_caches.write().retain(|c| !Arc::ptr_eq(c, cache));
    }

    /// Number of registered ARP caches
    pub fn arp_cache_count(&self) -> usize {
        self.arp_caches.read().len()
    }

    /// Sink for link-layer transmit failures
    ///
    /// The callback may be invoked from any thread. Failures whose MAC
    /// address no registered ARP cache can resolve are ignored.
    pub fn tx_error_callback(&self) -> TxErrorCallback {
        let neighbors = Arc::clone(&self.neighbors);
        let arp_caches = Arc::clone(&self.arp_caches);
        let failures = self.failures_tx.clone();
        Arc::new(move |mac: MacAddress| {
            let resolved = arp_caches
                .read()
                .iter()
                .find_map(|cache| cache.lookup_mac(mac));
            let Some(address) = resolved else {
                trace!(%mac, "Transmit failure for unknown link address");
                return;
            };
            if let Some(mut neighbor) = neighbors.get_mut(&address) {
                neighbor.close = true;
                neighbor.mac = Some(mac);
            }
            debug!(neighbor = %address, %mac, "Link-layer transmit failure");
            // Receiver lives as long as the tracker
            let _ = failures.send(address);
        })
    }

    /// Drain link failures reported since the last call
    pub fn take_link_failures(&self) -> Vec<Ipv4Addr> {
        let mut rx = self.failures_rx.lock();
        let mut failed = Vec::new();
        while let Ok(address) = rx.try_recv() {
            if !failed.contains(&address) {
                failed.push(address);
            }
        }
        failed
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use super::*;

    struct StaticArp(HashMap<MacAddress, Ipv4Addr>);

    impl ArpCache for StaticArp {
        fn lookup_mac(&self, mac: MacAddress) -> Option<Ipv4Addr> {
            self.0.get(&mac).copied()
        }
    }

    fn make_addr(last: u8) -> Ipv4Addr {
        Ipv4Addr::new(10, 0, 0, last)
    }

    fn make_mac(last: u8) -> MacAddress {
        MacAddress::new([0, 0, 0, 0, 0, last])
    }

    #[test]
    fn test_update_and_expiry() {
        let tracker = NeighborTracker::new();
        let now = Instant::now();
        let iface = InterfaceIndex::new(1);

        tracker.update(make_addr(2), iface, now + Duration::from_secs(4));
        assert!(tracker.is_neighbor(make_addr(2), now));
        assert!(!tracker.is_neighbor(make_addr(3), now));
        assert!(!tracker.is_neighbor(make_addr(2), now + Duration::from_secs(5)));

        // A shorter deadline never wins
        tracker.update(make_addr(2), iface, now + Duration::from_secs(1));
        assert_eq!(
            tracker.expire_time(make_addr(2)),
            Some(now + Duration::from_secs(4))
        );
    }

    #[test]
    fn test_purge_reports_lost() {
        let tracker = NeighborTracker::new();
        let now = Instant::now();
        let iface = InterfaceIndex::new(1);
        tracker.update(make_addr(2), iface, now + Duration::from_secs(1));
        tracker.update(make_addr(3), iface, now + Duration::from_secs(10));

        let lost = tracker.purge(now + Duration::from_secs(2));
        assert_eq!(lost, vec![make_addr(2)]);
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_remove_interface_and_clear() {
        let tracker = NeighborTracker::new();
        let now = Instant::now() + Duration::from_secs(10);
        tracker.update(make_addr(2), InterfaceIndex::new(1), now);
        tracker.update(make_addr(3), InterfaceIndex::new(2), now);

        assert_eq!(tracker.remove_interface(InterfaceIndex::new(1)), 1);
        assert_eq!(
            tracker.neighbors_on(InterfaceIndex::new(2), Instant::now()),
            vec![make_addr(3)]
        );

        tracker.clear();
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_tx_error_resolves_through_arp() {
        let tracker = NeighborTracker::new();
        let now = Instant::now();
        tracker.update(make_addr(2), InterfaceIndex::new(1), now + Duration::from_secs(10));

        let cache: Arc<dyn ArpCache> =
            Arc::new(StaticArp(HashMap::from([(make_mac(2), make_addr(2))])));
        tracker.add_arp_cache(Arc::clone(&cache));

        let sink = tracker.tx_error_callback();
        sink(make_mac(2));
        sink(make_mac(2));
        sink(make_mac(9));

        assert_eq!(tracker.take_link_failures(), vec![make_addr(2)]);
        assert!(tracker.take_link_failures().is_empty());
        assert!(!tracker.is_neighbor(make_addr(2), now));

        tracker.del_arp_cache(&cache);
        assert_eq!(tracker.arp_cache_count(), 0);
        sink(make_mac(2));
        assert!(tracker.take_link_failures().is_empty());
    }
}
