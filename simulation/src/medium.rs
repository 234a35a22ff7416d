//! Shared wireless medium and the per-node network stacks on top of it
//!
//! The [`Medium`] knows which nodes are in radio range of each other and
//! turns every transmission into frame events on the [`EventQueue`]. A
//! broadcast reaches every node in range; a unicast reaches its receiver
//! only while the link is up, and otherwise raises a link-layer transmit
//! failure at the sender.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use qlrn_core::{
    ArpCache, DatagramSocket, InterfaceAddress, InterfaceIndex, Ipv4Header, MacAddress,
    NetworkStack, Packet, TransportError, TransportResult, TxErrorCallback,
};
use tracing::trace;

use crate::scheduler::{EventQueue, SimEvent};
use crate::topology::Topology;
use crate::types::{LOOPBACK_IF, NodeId, WIRELESS_IF};

/// Frame counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MediumStats {
    pub data_frames: u64,
    pub control_frames: u64,
    pub lost_frames: u64,
}

/// The shared radio channel
pub struct Medium {
    queue: Arc<EventQueue>,
    links: RwLock<BTreeMap<NodeId, BTreeSet<NodeId>>>,
    tx_errors: Mutex<HashMap<NodeId, TxErrorCallback>>,
    hop_latency: Duration,
    data_frames: AtomicU64,
    control_frames: AtomicU64,
    lost_frames: AtomicU64,
}

impl std::fmt::Debug for Medium {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Medium")
            .field("links", &*self.links.read())
            .field("subscribers", &self.tx_errors.lock().len())
            .field("hop_latency", &self.hop_latency)
            .field("stats", &self.stats())
            .finish()
    }
}

impl Medium {
    /// Create a medium with the links of `topology`
    pub fn new(queue: Arc<EventQueue>, topology: &Topology, hop_latency: Duration) -> Self {
        let links = topology
            .node_ids()
            .into_iter()
            .map(|id| (id, topology.neighbors(id).cloned().unwrap_or_default()))
            .collect();
        Self {
            queue,
            links: RwLock::new(links),
            tx_errors: Mutex::new(HashMap::new()),
            hop_latency,
            data_frames: AtomicU64::new(0),
            control_frames: AtomicU64::new(0),
            lost_frames: AtomicU64::new(0),
        }
    }

    /// One-hop propagation delay
    pub fn hop_latency(&self) -> Duration {
        self.hop_latency
    }

    /// Whether the node is attached to the medium
    pub fn contains(&self, node: NodeId) -> bool {
        self.links.read().contains_key(&node)
    }

    /// Whether two nodes can currently hear each other
    pub fn are_linked(&self, a: NodeId, b: NodeId) -> bool {
        self.links.read().get(&a).is_some_and(|set| set.contains(&b))
    }

    /// Nodes currently in range of `node`
    pub fn neighbors(&self, node: NodeId) -> Vec<NodeId> {
        self.links
            .read()
            .get(&node)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Bring a link up or down; returns whether anything changed
    pub fn set_link(&self, a: NodeId, b: NodeId, up: bool) -> bool {
        let mut links = self.links.write();
        if a == b || !links.contains_key(&a) || !links.contains_key(&b) {
            return false;
        }
        let changed = match links.get_mut(&a) {
            Some(set) if up => set.insert(b),
            Some(set) => set.remove(&b),
            None => false,
        };
        if let Some(set) = links.get_mut(&b) {
            if up {
                set.insert(a);
            } else {
                set.remove(&a);
            }
        }
        changed
    }

    /// Current link graph
    pub fn snapshot(&self) -> Topology {
        let links = self.links.read();
        let mut topology = Topology::new();
        for (node, neighbors) in links.iter() {
            topology.add_node(*node);
            for neighbor in neighbors {
                topology.connect(*node, *neighbor);
            }
        }
        topology
    }

    /// Fewest-hop path over the links that are up right now
    pub fn shortest_path(&self, from: NodeId, to: NodeId) -> Option<Vec<NodeId>> {
        self.snapshot().shortest_path(from, to)
    }

    /// Subscribe `node` to its own transmit failures
    pub fn register_tx_errors(&self, node: NodeId, callback: TxErrorCallback) {
        self.tx_errors.lock().insert(node, callback);
    }

    /// Drop a transmit-failure subscription
    pub fn unregister_tx_errors(&self, node: NodeId) {
        self.tx_errors.lock().remove(&node);
    }

    /// Tell `node`'s link layer that `receiver` did not acknowledge a frame
    pub fn report_tx_failure(&self, node: NodeId, receiver: NodeId) {
        let callback = self.tx_errors.lock().get(&node).cloned();
        if let Some(callback) = callback {
            callback(receiver.mac());
        }
    }

    /// Put a data frame on the air toward `gateway`
    ///
    /// Returns the receivers. An empty result for a unicast gateway means
    /// the frame was lost and the caller should report the failure.
    pub fn transmit_data(
        &self,
        from: NodeId,
        gateway: Ipv4Addr,
        packet: Packet,
        header: Ipv4Header,
    ) -> Vec<NodeId> {
        let receivers = self.receivers(from, gateway);
        self.data_frames.fetch_add(1, Ordering::Relaxed);
        if receivers.is_empty() {
            self.lost_frames.fetch_add(1, Ordering::Relaxed);
        }
        for to in &receivers {
            self.queue.push_after(
                self.hop_latency,
                SimEvent::DataFrame {
                    from,
                    to: *to,
                    packet: packet.clone(),
                    header,
                },
            );
        }
        receivers
    }

    /// Put a control datagram on the air
    ///
    /// A unicast to a node out of range is lost and reported to the sender
    /// as a transmit failure once the current event finishes.
    pub fn transmit_control(&self, from: NodeId, destination: Ipv4Addr, payload: Bytes) {
        let receivers = self.receivers(from, destination);
        self.control_frames.fetch_add(1, Ordering::Relaxed);
        if receivers.is_empty() {
            self.lost_frames.fetch_add(1, Ordering::Relaxed);
            if let Some(receiver) = NodeId::from_address(destination) {
                self.queue
                    .push_now(SimEvent::TxFailure { node: from, receiver });
            }
            return;
        }
        for to in receivers {
            self.queue.push_after(
                self.hop_latency,
                SimEvent::ControlFrame {
                    to,
                    source: from.address(),
                    payload: payload.clone(),
                },
            );
        }
    }

    fn receivers(&self, from: NodeId, destination: Ipv4Addr) -> Vec<NodeId> {
        let broadcast = destination == Ipv4Addr::BROADCAST
            || destination == from.interface_address().broadcast();
        if broadcast {
            return self.neighbors(from);
        }
        match NodeId::from_address(destination) {
            Some(to) if self.are_linked(from, to) => vec![to],
            _ => {
                trace!(from = %from, dst = %destination, "Receiver out of range");
                Vec::new()
            }
        }
    }

    /// Frame counters
    pub fn stats(&self) -> MediumStats {
        MediumStats {
            data_frames: self.data_frames.load(Ordering::Relaxed),
            control_frames: self.control_frames.load(Ordering::Relaxed),
            lost_frames: self.lost_frames.load(Ordering::Relaxed),
        }
    }
}

/// Control socket bound on a node's wireless interface
#[derive(Debug)]
pub struct MediumSocket {
    node: NodeId,
    local: SocketAddrV4,
    medium: Arc<Medium>,
}

impl DatagramSocket for MediumSocket {
    fn send_to(&self, payload: Bytes, destination: SocketAddrV4, _ttl: u8) -> TransportResult<()> {
        self.medium
            .transmit_control(self.node, *destination.ip(), payload);
        Ok(())
    }

    fn local_addr(&self) -> SocketAddrV4 {
        self.local
    }
}

/// ARP cache resolving the simulation's derived MAC addresses
#[derive(Debug, Clone, Copy, Default)]
pub struct MediumArp;

impl ArpCache for MediumArp {
    fn lookup_mac(&self, mac: MacAddress) -> Option<Ipv4Addr> {
        NodeId::from_mac(mac).map(NodeId::address)
    }
}

/// IPv4 stack of one simulated node: loopback plus one wireless interface
pub struct NodeStack {
    node: NodeId,
    medium: Arc<Medium>,
    arp: Arc<dyn ArpCache>,
    up: AtomicBool,
    forwarding: AtomicBool,
}

impl NodeStack {
    /// Create the stack for `node`
    pub fn new(node: NodeId, medium: Arc<Medium>) -> Self {
        Self {
            node,
            medium,
            arp: Arc::new(MediumArp),
            up: AtomicBool::new(true),
            forwarding: AtomicBool::new(true),
        }
    }

    /// The node this stack belongs to
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Administratively raise or lower the wireless interface
    pub fn set_up(&self, up: bool) {
        self.up.store(up, Ordering::Relaxed);
    }

    /// Enable or disable IP forwarding
    pub fn set_forwarding(&self, enabled: bool) {
        self.forwarding.store(enabled, Ordering::Relaxed);
    }
}

impl NetworkStack for NodeStack {
    type Socket = MediumSocket;

    fn loopback_interface(&self) -> InterfaceIndex {
        LOOPBACK_IF
    }

    fn is_up(&self, iface: InterfaceIndex) -> bool {
        iface == LOOPBACK_IF || (iface == WIRELESS_IF && self.up.load(Ordering::Relaxed))
    }

    fn addresses(&self, iface: InterfaceIndex) -> Vec<InterfaceAddress> {
        match iface {
            LOOPBACK_IF => vec![InterfaceAddress::loopback()],
            WIRELESS_IF => vec![self.node.interface_address()],
            _ => Vec::new(),
        }
    }

    fn is_forwarding(&self, iface: InterfaceIndex) -> bool {
        iface == WIRELESS_IF && self.forwarding.load(Ordering::Relaxed)
    }

    fn interface_for_address(&self, addr: Ipv4Addr) -> Option<InterfaceIndex> {
        if addr == self.node.address() {
            Some(WIRELESS_IF)
        } else if addr.is_loopback() {
            Some(LOOPBACK_IF)
        } else {
            None
        }
    }

    fn bind(&self, iface: InterfaceIndex, local: SocketAddrV4) -> TransportResult<MediumSocket> {
        if iface != WIRELESS_IF {
            return Err(TransportError::InterfaceNotFound(iface.to_string()));
        }
        Ok(MediumSocket {
            node: self.node,
            local,
            medium: Arc::clone(&self.medium),
        })
    }

    fn arp_cache(&self, iface: InterfaceIndex) -> Option<Arc<dyn ArpCache>> {
        (iface == WIRELESS_IF).then(|| Arc::clone(&self.arp))
    }

    fn connect_tx_errors(&self, iface: InterfaceIndex, callback: TxErrorCallback) -> bool {
        if iface != WIRELESS_IF {
            return false;
        }
        self.medium.register_tx_errors(self.node, callback);
        true
    }

    fn disconnect_tx_errors(&self, iface: InterfaceIndex) {
        if iface == WIRELESS_IF {
            self.medium.unregister_tx_errors(self.node);
        }
    }
}
