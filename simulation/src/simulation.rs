//! Discrete-event simulation of a wireless routing network
//!
//! Every node runs its own [`RoutingEngine`] over a [`NodeStack`] attached
//! to one shared [`Medium`]. All engines share a manual clock; the
//! simulation pops events in time order, moves the clock to each event's
//! due time and hands the event to the node it belongs to.
//!
//! Engine continuations never call back into an engine. They only post
//! follow-up events (transmit, deliver, fail), which keeps every engine
//! call on the simulation's own stack frame.

use std::collections::{BTreeMap, HashMap};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use qlrn_core::{
    Clock, DropReason, InputCallbacks, Ipv4Header, ManualClock, Packet, PacketId, SocketError,
};
use qlrn_logging::NodeContextGuard;
use qlrn_routing::{
    DiscoveredRoute, EngineError, OutputDecision, RouteRequest, RoutingConfig, RoutingEngine,
    RoutingHelper, StatsSnapshot, TimeUnit,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, debug_span, info, trace, warn};
use uuid::Uuid;

use crate::discovery::OracleDiscovery;
use crate::medium::{Medium, NodeStack};
use crate::scheduler::{EventQueue, NodeScheduler, SimEvent};
use crate::topology::Topology;
use crate::types::{LossCause, NetworkEvent, NodeId, WIRELESS_IF};

/// Destination port of simulated application traffic
pub const DATA_PORT: u16 = 9;

/// Engine type every simulated node runs
pub type SimEngine = RoutingEngine<NodeStack, NodeScheduler, ManualClock>;

/// Configuration for the simulation
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Protocol constants handed to every engine
    pub routing: RoutingConfig,
    /// One-hop propagation delay
    pub hop_latency: Duration,
    /// TTL of originated data packets
    pub initial_ttl: u8,
    /// Lifetime of routes installed by discovery
    pub route_lifetime: Duration,
    /// Payload bytes per data packet
    pub payload_size: usize,
    /// First random stream handed to the engines
    pub seed: i64,
}

impl Default for SimConfig {
    fn default() -> Self {
        let routing = RoutingConfig::default();
        Self {
            route_lifetime: routing.active_route_timeout,
            routing,
            hop_latency: Duration::from_millis(5),
            initial_ttl: 64,
            payload_size: 64,
            seed: 1,
        }
    }
}

impl SimConfig {
    /// Use specific protocol constants
    pub fn with_routing(mut self, routing: RoutingConfig) -> Self {
        self.route_lifetime = routing.active_route_timeout;
        self.routing = routing;
        self
    }

    /// Enable or disable HELLO neighbor detection on every node
    pub fn with_hello(mut self, enabled: bool) -> Self {
        self.routing.enable_hello = enabled;
        self
    }

    /// Set the one-hop propagation delay
    pub fn with_hop_latency(mut self, latency: Duration) -> Self {
        self.hop_latency = latency;
        self
    }

    /// Set the first random stream
    pub fn with_seed(mut self, seed: i64) -> Self {
        self.seed = seed;
        self
    }
}

/// Simulation statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct SimStats {
    pub packets_sent: u64,
    pub packets_delivered: u64,
    pub packets_failed: u64,
    pub packets_lost: u64,
    pub broadcasts_sent: u64,
    pub broadcast_deliveries: u64,
    pub total_hops: u64,
    /// Sum of send-to-delivery times of delivered packets
    pub total_latency: Duration,
    pub route_requests: u64,
    pub route_replies: u64,
    pub link_changes: u64,
}

impl SimStats {
    /// Fraction of unicast packets delivered
    pub fn delivery_ratio(&self) -> f64 {
        if self.packets_sent == 0 {
            return 0.0;
        }
        self.packets_delivered as f64 / self.packets_sent as f64
    }

    /// Mean hop count of delivered packets
    pub fn average_hops(&self) -> f64 {
        if self.packets_delivered == 0 {
            return 0.0;
        }
        self.total_hops as f64 / self.packets_delivered as f64
    }

    /// Mean latency of delivered packets
    pub fn average_latency(&self) -> Duration {
        u32::try_from(self.packets_delivered)
            .ok()
            .filter(|n| *n > 0)
            .map_or(Duration::ZERO, |n| self.total_latency / n)
    }
}

/// Simulation setup and control errors
#[derive(Debug, Error)]
pub enum SimError {
    #[error("Engine error on {node}: {source}")]
    Engine {
        node: NodeId,
        #[source]
        source: EngineError,
    },

    #[error("Unknown node: {0}")]
    UnknownNode(NodeId),

    #[error("Topology has no nodes")]
    EmptyTopology,
}

struct SimNode {
    stack: Arc<NodeStack>,
    engine: Arc<SimEngine>,
    /// Distinguishes this node's log lines across runs
    instance: Uuid,
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    sent_at: Instant,
}

/// The simulation state
pub struct Simulation {
    /// Configuration
    pub config: SimConfig,
    /// Statistics
    pub stats: SimStats,
    /// Global event log
    pub event_log: Vec<NetworkEvent>,
    start: Instant,
    queue: Arc<EventQueue>,
    medium: Arc<Medium>,
    nodes: BTreeMap<NodeId, SimNode>,
    /// Unicast packets neither delivered, failed nor lost yet
    in_flight: HashMap<PacketId, InFlight>,
    next_uid: u64,
    /// Sequence number stamped on discovered routes
    reply_seq: u32,
}

impl Simulation {
    /// Create a simulation with one started engine per topology node
    pub fn new(topology: &Topology, config: SimConfig) -> Result<Self, SimError> {
        if topology.node_count() == 0 {
            return Err(SimError::EmptyTopology);
        }
        let clock = Arc::new(ManualClock::new());
        let start = clock.now();
        let queue = Arc::new(EventQueue::new(Arc::clone(&clock)));
        let medium = Arc::new(Medium::new(
            Arc::clone(&queue),
            topology,
            config.hop_latency,
        ));
        let helper = RoutingHelper::with_config(config.routing.clone());

        let mut nodes = BTreeMap::new();
        for id in topology.node_ids() {
            let stack = Arc::new(NodeStack::new(id, Arc::clone(&medium)));
            let scheduler = Arc::new(NodeScheduler::new(id, Arc::clone(&queue)));
            let engine = helper
                .create(Arc::clone(&stack), scheduler, Arc::clone(&clock))
                .with_discovery(Arc::new(OracleDiscovery::new(id, Arc::clone(&queue))));
            nodes.insert(
                id,
                SimNode {
                    stack,
                    engine: Arc::new(engine),
                    instance: Uuid::new_v4(),
                },
            );
        }

        let streams = {
            let engines: Vec<&SimEngine> = nodes.values().map(|n| n.engine.as_ref()).collect();
            RoutingHelper::assign_streams(&engines, config.seed)
        };

        for (id, node) in &nodes {
            let _ctx = NodeContextGuard::with_instance_id(id, node.instance);
            let engine_error = |source| SimError::Engine { node: *id, source };
            node.engine.start().map_err(engine_error)?;
            node.engine
                .notify_interface_up(WIRELESS_IF)
                .map_err(engine_error)?;
        }

        info!(
            nodes = nodes.len(),
            links = topology.edge_count(),
            streams,
            hello = config.routing.enable_hello,
            "Simulation created"
        );

        Ok(Self {
            config,
            stats: SimStats::default(),
            event_log: Vec::new(),
            start,
            queue,
            medium,
            nodes,
            in_flight: HashMap::new(),
            next_uid: 1,
            reply_seq: 0,
        })
    }

    // ------------------------------------------------------------------
    // Traffic and link control
    // ------------------------------------------------------------------

    /// Hand a unicast packet from `from` to `to` at the current instant
    pub fn send(&mut self, from: NodeId, to: NodeId) -> Result<PacketId, SimError> {
        self.send_after(Duration::ZERO, from, to)
    }

    /// Hand a unicast packet from `from` to `to` after `delay`
    pub fn send_after(
        &mut self,
        delay: Duration,
        from: NodeId,
        to: NodeId,
    ) -> Result<PacketId, SimError> {
        self.check_node(to)?;
        self.originate(delay, from, to.address())
    }

    /// Hand a packet for an arbitrary address to `from`
    pub fn send_to_address(
        &mut self,
        from: NodeId,
        destination: Ipv4Addr,
    ) -> Result<PacketId, SimError> {
        self.originate(Duration::ZERO, from, destination)
    }

    /// Broadcast a packet on the subnet of `from`
    pub fn broadcast(&mut self, from: NodeId) -> Result<PacketId, SimError> {
        self.originate(Duration::ZERO, from, from.interface_address().broadcast())
    }

    fn originate(
        &mut self,
        delay: Duration,
        from: NodeId,
        destination: Ipv4Addr,
    ) -> Result<PacketId, SimError> {
        self.check_node(from)?;
        let uid = PacketId::new(self.next_uid);
        self.next_uid += 1;
        let packet = Packet::new(uid, Bytes::from(vec![0u8; self.config.payload_size]))
            .with_dest_port(DATA_PORT);
        self.queue.push_after(
            delay,
            SimEvent::Originate {
                node: from,
                destination,
                packet,
            },
        );
        Ok(uid)
    }

    /// Take a link down; returns whether it was up
    pub fn break_link(&mut self, a: NodeId, b: NodeId) -> bool {
        self.set_link(a, b, false)
    }

    /// Bring a link back up; returns whether it was down
    pub fn restore_link(&mut self, a: NodeId, b: NodeId) -> bool {
        self.set_link(a, b, true)
    }

    fn set_link(&mut self, a: NodeId, b: NodeId, up: bool) -> bool {
        if !self.medium.set_link(a, b, up) {
            return false;
        }
        self.stats.link_changes += 1;
        info!(a = %a, b = %b, up, "Link changed");
        let at = self.elapsed();
        self.emit(NetworkEvent::Link { a, b, up, at });
        true
    }

    // ------------------------------------------------------------------
    // Running
    // ------------------------------------------------------------------

    /// Process every event due within `duration`, then move the clock to
    /// the end of the window
    ///
    /// Returns the number of events processed.
    pub fn run_for(&mut self, duration: Duration) -> usize {
        let deadline = self.queue.now() + duration;
        let mut processed = 0;
        while let Some(scheduled) = self.queue.pop_until(deadline) {
            self.queue.clock().set(scheduled.at);
            self.dispatch(scheduled.event);
            processed += 1;
        }
        self.queue.clock().set(deadline);
        trace!(processed, "Window complete");
        processed
    }

    fn dispatch(&mut self, event: SimEvent) {
        let node = event.node();
        let _ctx = node.and_then(|id| {
            self.nodes
                .get(&id)
                .map(|n| NodeContextGuard::with_instance_id(id, n.instance))
        });
        let _span = node.map(|id| debug_span!("node", node = %id).entered());

        match event {
            SimEvent::Timer { node, timer } => {
                if let Some(engine) = self.engine_arc(node) {
                    engine.handle_timer(timer);
                }
            }
            SimEvent::Originate {
                node,
                destination,
                packet,
            } => self.on_originate(node, destination, packet),
            SimEvent::Transmit {
                node,
                route,
                packet,
                header,
            } => self.on_transmit(node, route.gateway, packet, header),
            SimEvent::DataFrame {
                from,
                to,
                packet,
                header,
            } => self.on_data_frame(from, to, packet, header),
            SimEvent::ControlFrame {
                to,
                source,
                payload,
            } => self.on_control_frame(to, source, &payload),
            SimEvent::TxFailure { node, receiver } => {
                self.medium.report_tx_failure(node, receiver);
            }
            SimEvent::Deliver {
                node,
                packet,
                header,
            } => self.on_deliver(node, &packet, &header),
            SimEvent::Fail {
                node,
                packet,
                error,
            } => self.on_fail(node, packet.id, error),
            SimEvent::Discover { node, request } => self.on_discover(node, request),
            SimEvent::RouteReply { path } => self.on_route_reply(&path),
        }
    }

    fn on_originate(&mut self, node: NodeId, destination: Ipv4Addr, packet: Packet) {
        let Some(engine) = self.engine_arc(node) else {
            return;
        };
        let uid = packet.id;
        let header = Ipv4Header::udp(node.address(), destination, self.config.initial_ttl);
        let at = self.elapsed();

        if self.is_broadcast(node, destination) {
            self.stats.broadcasts_sent += 1;
        } else {
            self.stats.packets_sent += 1;
            self.in_flight.insert(
                uid,
                InFlight {
                    sent_at: self.queue.now(),
                },
            );
        }
        debug!(uid = %uid, dst = %destination, "Packet originated");
        self.emit(NetworkEvent::Send {
            uid,
            from: node,
            to: destination,
            at,
        });

        match engine.route_output(&header, None) {
            Ok(OutputDecision::Route(route)) => {
                self.queue.push_now(SimEvent::Transmit {
                    node,
                    route,
                    packet,
                    header,
                });
            }
            Ok(OutputDecision::Defer(_)) => {
                let forward_queue = Arc::clone(&self.queue);
                let error_queue = Arc::clone(&self.queue);
                engine.deferred_route_output(
                    packet,
                    header,
                    Box::new(move |route, packet, header| {
                        forward_queue.push_now(SimEvent::Transmit {
                            node,
                            route,
                            packet,
                            header,
                        });
                    }),
                    Box::new(move |packet, _header, error| {
                        error_queue.push_now(SimEvent::Fail {
                            node,
                            packet,
                            error,
                        });
                    }),
                );
            }
            Err(error) => self.on_fail(node, uid, error),
        }
    }

    fn on_transmit(&mut self, node: NodeId, gateway: Ipv4Addr, packet: Packet, header: Ipv4Header) {
        let uid = packet.id;
        if header.ttl == 0 {
            self.on_lost(uid, node, LossCause::TtlExpired);
            return;
        }
        let at = self.elapsed();
        self.emit(NetworkEvent::Hop {
            uid,
            from: node,
            via: gateway,
            at,
        });

        let receivers = self.medium.transmit_data(node, gateway, packet, header);
        if receivers.is_empty() && !self.is_broadcast(node, gateway) {
            self.on_lost(uid, node, LossCause::LinkLoss);
            if let Some(receiver) = NodeId::from_address(gateway) {
                self.medium.report_tx_failure(node, receiver);
            }
        }
    }

    fn on_data_frame(&mut self, from: NodeId, to: NodeId, packet: Packet, header: Ipv4Header) {
        let Some(engine) = self.engine_arc(to) else {
            return;
        };
        let uid = packet.id;
        trace!(uid = %uid, from = %from, "Data frame received");

        let forward_queue = Arc::clone(&self.queue);
        let local_queue = Arc::clone(&self.queue);
        let error_queue = Arc::clone(&self.queue);
        let callbacks = InputCallbacks::new(
            Box::new(move |route, packet, header: Ipv4Header| {
                forward_queue.push_now(SimEvent::Transmit {
                    node: to,
                    route,
                    packet,
                    header: header.hop(),
                });
            }),
            Some(Box::new(move |packet, header, _iif| {
                local_queue.push_now(SimEvent::Deliver {
                    node: to,
                    packet,
                    header,
                });
            })),
            Box::new(move |packet, _header, error| {
                error_queue.push_now(SimEvent::Fail {
                    node: to,
                    packet,
                    error,
                });
            }),
        );

        if !engine.route_input(packet, header, WIRELESS_IF, callbacks) {
            self.on_lost(uid, to, LossCause::Unroutable);
        }
    }

    fn on_control_frame(&mut self, to: NodeId, source: Ipv4Addr, payload: &[u8]) {
        let Some(engine) = self.engine_arc(to) else {
            return;
        };
        if let Err(e) = engine.recv_control(WIRELESS_IF, source, payload) {
            warn!(src = %source, error = %e, "Control message rejected");
        }
    }

    fn on_deliver(&mut self, node: NodeId, packet: &Packet, header: &Ipv4Header) {
        let uid = packet.id;
        let at = self.elapsed();
        if self.is_broadcast(node, header.destination) {
            self.stats.broadcast_deliveries += 1;
            self.emit(NetworkEvent::BroadcastReceived { uid, node, at });
            return;
        }

        let Some(flight) = self.in_flight.remove(&uid) else {
            debug!(uid = %uid, "Delivery of a packet no longer in flight");
            return;
        };
        let hops = self
            .config
            .initial_ttl
            .saturating_sub(header.ttl)
            .saturating_add(1);
        let latency = self.queue.now().saturating_duration_since(flight.sent_at);
        self.stats.packets_delivered += 1;
        self.stats.total_hops += u64::from(hops);
        self.stats.total_latency += latency;
        debug!(uid = %uid, hops, ?latency, "Packet delivered");
        self.emit(NetworkEvent::Delivered { uid, node, hops, at });
    }

    fn on_fail(&mut self, node: NodeId, uid: PacketId, error: SocketError) {
        if self.in_flight.remove(&uid).is_none() {
            trace!(uid = %uid, %error, "Failure for a packet not in flight");
            return;
        }
        self.stats.packets_failed += 1;
        debug!(uid = %uid, %error, "Packet failed");
        let at = self.elapsed();
        self.emit(NetworkEvent::Failed { uid, node, at });
    }

    fn on_lost(&mut self, uid: PacketId, node: NodeId, cause: LossCause) {
        if self.in_flight.remove(&uid).is_none() {
            trace!(uid = %uid, %cause, "Loss of a packet not in flight");
            return;
        }
        self.stats.packets_lost += 1;
        debug!(uid = %uid, %cause, "Packet lost");
        let at = self.elapsed();
        self.emit(NetworkEvent::Lost {
            uid,
            node,
            cause,
            at,
        });
    }

    /// Answer a route request from the live link graph
    ///
    /// A reply comes back only if the destination is within the request's
    /// search radius.
    fn on_discover(&mut self, node: NodeId, request: RouteRequest) {
        self.stats.route_requests += 1;
        let Some(target) = NodeId::from_address(request.destination) else {
            debug!(dst = %request.destination, "Route request for an address outside the subnet");
            return;
        };
        let Some(path) = self.medium.shortest_path(node, target) else {
            debug!(dst = %target, "No path to destination");
            return;
        };
        let hops = path.len().saturating_sub(1);
        if hops == 0 || hops > usize::from(request.ttl) {
            trace!(dst = %target, hops, ttl = request.ttl, "Destination outside search radius");
            return;
        }
        let round_trip = self
            .config
            .hop_latency
            .saturating_mul(2 * u32::try_from(hops).unwrap_or(u32::MAX / 2));
        self.queue
            .push_after(round_trip, SimEvent::RouteReply { path });
    }

    /// Install forward and reverse routes at every node on `path`
    fn on_route_reply(&mut self, path: &[NodeId]) {
        let (Some(&origin), Some(&target)) = (path.first(), path.last()) else {
            return;
        };
        if path.windows(2).any(|hop| !self.medium.are_linked(hop[0], hop[1])) {
            debug!(origin = %origin, dst = %target, "Route reply path broke in flight");
            return;
        }
        self.stats.route_replies += 1;
        self.reply_seq = self.reply_seq.wrapping_add(1);
        let last = path.len() - 1;

        // Downstream first, so the origin's released packets find routes
        for (i, node) in path.iter().enumerate().rev() {
            let Some(sim_node) = self.nodes.get(node) else {
                continue;
            };
            let _ctx = NodeContextGuard::with_instance_id(node, sim_node.instance);
            let _span = debug_span!("node", node = %node).entered();

            let mut routes = Vec::with_capacity(2);
            if i < last {
                routes.push(self.discovered(target, path[i + 1], last - i));
            }
            if i > 0 {
                routes.push(self.discovered(origin, path[i - 1], i));
            }
            for route in routes {
                if let Err(e) = sim_node.engine.on_route_discovered(route) {
                    warn!(dst = %route.destination, error = %e, "Failed to install discovered route");
                }
            }
        }

        let at = self.elapsed();
        self.emit(NetworkEvent::RouteInstalled {
            node: origin,
            destination: target,
            next_hop: path[1],
            hops: u16::try_from(last).unwrap_or(u16::MAX),
            at,
        });
    }

    fn discovered(&self, destination: NodeId, next_hop: NodeId, hops: usize) -> DiscoveredRoute {
        DiscoveredRoute {
            destination: destination.address(),
            next_hop: next_hop.address(),
            interface: WIRELESS_IF,
            hop_count: u16::try_from(hops).unwrap_or(u16::MAX),
            lifetime: self.config.route_lifetime,
            seq_no: Some(self.reply_seq),
            cost: None,
        }
    }

    fn emit(&mut self, event: NetworkEvent) {
        trace!(?event, "Event");
        self.event_log.push(event);
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    fn check_node(&self, node: NodeId) -> Result<(), SimError> {
        if self.nodes.contains_key(&node) {
            Ok(())
        } else {
            Err(SimError::UnknownNode(node))
        }
    }

    fn engine_arc(&self, node: NodeId) -> Option<Arc<SimEngine>> {
        self.nodes.get(&node).map(|n| Arc::clone(&n.engine))
    }

    fn is_broadcast(&self, node: NodeId, addr: Ipv4Addr) -> bool {
        addr == Ipv4Addr::BROADCAST || addr == node.interface_address().broadcast()
    }

    /// The routing engine of `node`
    pub fn engine(&self, node: NodeId) -> Option<&SimEngine> {
        self.nodes.get(&node).map(|n| n.engine.as_ref())
    }

    /// The network stack of `node`
    pub fn stack(&self, node: NodeId) -> Option<&NodeStack> {
        self.nodes.get(&node).map(|n| n.stack.as_ref())
    }

    /// All node IDs, ascending
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.keys().copied().collect()
    }

    /// The shared medium
    pub fn medium(&self) -> &Medium {
        &self.medium
    }

    /// Current link graph
    pub fn topology(&self) -> Topology {
        self.medium.snapshot()
    }

    /// Simulated time since the simulation was created
    pub fn elapsed(&self) -> Duration {
        self.queue.now().saturating_duration_since(self.start)
    }

    /// Unicast packets still in flight
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Counters summed over every engine
    pub fn engine_totals(&self) -> StatsSnapshot {
        let mut totals = StatsSnapshot {
            drops: DropReason::ALL.iter().map(|r| (*r, 0)).collect(),
            ..StatsSnapshot::default()
        };
        for node in self.nodes.values() {
            let stats = node.engine.stats();
            totals.forwarded += stats.forwarded;
            totals.delivered += stats.delivered;
            totals.relayed_broadcasts += stats.relayed_broadcasts;
            totals.route_requests += stats.route_requests;
            totals.discoveries_exhausted += stats.discoveries_exhausted;
            totals.link_failures += stats.link_failures;
            for (reason, count) in totals.drops.iter_mut() {
                *count += stats.dropped(*reason);
            }
        }
        totals
    }

    /// Routing table of `node` as text
    pub fn routing_table_dump(&self, node: NodeId) -> Option<String> {
        let engine = self.engine(node)?;
        let mut out = String::new();
        engine
            .print_routing_table(&mut out, TimeUnit::Milliseconds)
            .ok()?;
        Some(out)
    }

    /// Get a summary of the current state
    pub fn state_summary(&self) -> String {
        let queued: usize = self.nodes.values().map(|n| n.engine.queue_len()).sum();
        let routes: usize = self
            .nodes
            .values()
            .map(|n| n.engine.routing_table().len())
            .sum();
        format!(
            "t={:?}: {} nodes, {} routes, {} queued, {} in flight, {} events pending",
            self.elapsed(),
            self.nodes.len(),
            routes,
            queued,
            self.in_flight.len(),
            self.queue.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::{TopologyBuilder, from_edges};

    fn quiet() -> SimConfig {
        SimConfig::default().with_hello(false)
    }

    #[test]
    fn test_neighbor_delivery() {
        let mut sim = Simulation::new(&TopologyBuilder::new(2).line(), quiet()).unwrap();
        sim.send(NodeId(0), NodeId(1)).unwrap();
        sim.run_for(Duration::from_secs(1));

        assert_eq!(sim.stats.packets_sent, 1);
        assert_eq!(sim.stats.packets_delivered, 1);
        assert_eq!(sim.stats.total_hops, 1);
        assert_eq!(sim.in_flight(), 0);
    }

    #[test]
    fn test_relay_delivery() {
        let mut sim = Simulation::new(&TopologyBuilder::new(3).line(), quiet()).unwrap();
        sim.send(NodeId(0), NodeId(2)).unwrap();
        sim.run_for(Duration::from_secs(2));

        assert_eq!(sim.stats.packets_delivered, 1);
        assert_eq!(sim.stats.total_hops, 2);
        assert!(sim.engine_totals().forwarded >= 1);
        assert!(sim
            .event_log
            .iter()
            .any(|e| matches!(e, NetworkEvent::RouteInstalled { hops: 2, .. })));
    }

    #[test]
    fn test_second_packet_uses_cached_route() {
        let mut sim = Simulation::new(&TopologyBuilder::new(3).line(), quiet()).unwrap();
        sim.send(NodeId(0), NodeId(2)).unwrap();
        sim.run_for(Duration::from_secs(1));
        let requests = sim.stats.route_requests;

        sim.send(NodeId(0), NodeId(2)).unwrap();
        sim.run_for(Duration::from_millis(100));
        assert_eq!(sim.stats.packets_delivered, 2);
        assert_eq!(sim.stats.route_requests, requests);
    }

    #[test]
    fn test_unknown_node_rejected() {
        let mut sim = Simulation::new(&from_edges(&[(0, 1)]), quiet()).unwrap();
        assert!(matches!(
            sim.send(NodeId(0), NodeId(5)),
            Err(SimError::UnknownNode(NodeId(5)))
        ));
        assert!(Simulation::new(&Topology::new(), quiet()).is_err());
    }

    #[test]
    fn test_link_changes_are_logged_once() {
        let mut sim = Simulation::new(&TopologyBuilder::new(3).ring(), quiet()).unwrap();
        assert!(sim.break_link(NodeId(0), NodeId(1)));
        assert!(!sim.break_link(NodeId(1), NodeId(0)));
        assert!(sim.restore_link(NodeId(0), NodeId(1)));
        assert_eq!(sim.stats.link_changes, 2);
        assert_eq!(sim.event_log.len(), 2);
    }

    #[test]
    fn test_stats_ratios() {
        let stats = SimStats {
            packets_sent: 4,
            packets_delivered: 2,
            total_hops: 6,
            total_latency: Duration::from_millis(30),
            ..SimStats::default()
        };
        assert!((stats.delivery_ratio() - 0.5).abs() < f64::EPSILON);
        assert!((stats.average_hops() - 3.0).abs() < f64::EPSILON);
        assert_eq!(stats.average_latency(), Duration::from_millis(15));
        assert_eq!(SimStats::default().average_latency(), Duration::ZERO);
    }

    #[test]
    fn test_routing_table_dump_lists_broadcast_route() {
        let sim = Simulation::new(&TopologyBuilder::new(2).line(), quiet()).unwrap();
        let dump = sim.routing_table_dump(NodeId(0)).unwrap();
        assert!(dump.contains("10.0.255.255"));
        assert!(sim.routing_table_dump(NodeId(7)).is_none());
    }
}
