//! Routing engine state machine
//!
//! The [`RoutingEngine`] ties the routing table, pending queue, duplicate
//! detector and neighbor tracker together and makes every per-packet
//! decision:
//!
//! 1. **OUTPUT**: locally originated packets get a route, an explicit
//!    `NoRouteToHost`, or a "defer" answer that sends them through the
//!    loopback path into [`RoutingEngine::deferred_route_output`].
//! 2. **INPUT**: inbound packets are classified as own-echo, multicast,
//!    local broadcast, local unicast, or transit, in that order.
//! 3. **FORWARD**: transit packets follow a VALID table route, optionally
//!    overridden by the [`NextHopSelector`].
//! 4. **DISCOVER**: packets without a route wait in the queue while an
//!    expanding-ring search runs. Timer expiry retries with a wider ring
//!    or gives up and fails every waiting packet.
//!
//! ## Timers
//!
//! Timers carry only a key ([`RoutingTimer`]) and re-validate against the
//! table when they fire, so a timer that outlives its route is a harmless
//! no-op.
//!
//! ## Continuations
//!
//! Continuations run synchronously on the calling thread and must not call
//! back into the same engine.

use std::collections::HashMap;
use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use qlrn_core::{
    ArpCache, CONTROL_PORT, Clock, DatagramSocket, DropReason, ErrorCallback, Expiry,
    InputCallbacks, InterfaceAddress, InterfaceIndex, Ipv4Header, LocalDeliverCallback,
    NetworkStack, Packet, Route, RoutingError, Scheduler, SocketError, TimerHandle,
    UnicastForwardCallback,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::config::RoutingConfig;
use crate::dpd::DuplicatePacketDetection;
use crate::error::{EngineError, EngineResult};
use crate::message::{ControlMessage, Hello, HelloAck};
use crate::neighbor::NeighborTracker;
use crate::queue::{PendingPacketQueue, QueueEntry};
use crate::selector::{
    LoggingDiscovery, NextHopSelector, RouteCandidate, RouteDiscovery, RouteRequest,
    TableSelector,
};
use crate::stats::{EngineStats, StatsSnapshot};
use crate::table::{RouteEntry, RouteFlag, RoutingTable, TimeUnit};

/// Initial HELLO timer jitter upper bound
const HELLO_START_JITTER_MS: u64 = 100;

/// Per-period HELLO jitter upper bound
const HELLO_JITTER_MS: u64 = 10;

/// Timer payloads armed by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoutingTimer {
    /// Discovery attempt for `destination` timed out
    RouteRequest { destination: Ipv4Addr },
    /// Expected HELLO_ACK from `neighbor` never arrived
    Ack {
        neighbor: Ipv4Addr,
        blacklist: Duration,
    },
    /// Periodic HELLO broadcast
    Hello,
    /// Periodic housekeeping sweep
    Purge,
}

impl fmt::Display for RoutingTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RouteRequest { destination } => write!(f, "rreq({destination})"),
            Self::Ack { neighbor, .. } => write!(f, "ack({neighbor})"),
            Self::Hello => f.write_str("hello"),
            Self::Purge => f.write_str("purge"),
        }
    }
}

/// Answer to [`RoutingEngine::route_output`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputDecision {
    /// Send along this route
    Route(Route),
    /// No route yet: loop the packet back through this route so it
    /// re-enters as deferred output
    Defer(Route),
}

impl OutputDecision {
    /// The route carried by either variant
    pub fn route(&self) -> Route {
        match self {
            Self::Route(route) | Self::Defer(route) => *route,
        }
    }

    /// Whether the caller must take the deferred path
    pub fn is_deferred(&self) -> bool {
        matches!(self, Self::Defer(_))
    }
}

/// A route learned by the discovery protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveredRoute {
    pub destination: Ipv4Addr,
    pub next_hop: Ipv4Addr,
    pub interface: InterfaceIndex,
    pub hop_count: u16,
    pub lifetime: Duration,
    pub seq_no: Option<u32>,
    pub cost: Option<u32>,
}

/// Control sockets bound on one interface
struct InterfaceBinding<S> {
    address: InterfaceAddress,
    unicast: S,
    broadcast: S,
    arp_cache: Option<Arc<dyn ArpCache>>,
}

/// On-demand routing engine for one node
pub struct RoutingEngine<N, S, C>
where
    N: NetworkStack,
    S: Scheduler<RoutingTimer>,
    C: Clock,
{
    /// Protocol constants
    config: RoutingConfig,
    /// Local IPv4 stack
    stack: Arc<N>,
    /// Timer service
    scheduler: Arc<S>,
    /// Time source
    clock: Arc<C>,
    /// Route request sender
    discovery: Arc<dyn RouteDiscovery>,
    /// Learned next-hop preference
    selector: Arc<dyn NextHopSelector>,
    /// Destination-keyed routes
    routing_table: RoutingTable,
    /// Broadcast duplicate cache
    dpd: DuplicatePacketDetection,
    /// One-hop neighbors
    neighbors: NeighborTracker,
    /// Packets waiting for discovery
    queue: Mutex<PendingPacketQueue>,
    /// Control sockets per live interface
    bindings: Mutex<HashMap<InterfaceIndex, InterfaceBinding<N::Socket>>>,
    /// Armed discovery timers per destination
    request_timers: Mutex<HashMap<Ipv4Addr, TimerHandle>>,
    /// Armed HELLO_ACK timers per neighbor
    ack_timers: Mutex<HashMap<Ipv4Addr, TimerHandle>>,
    /// Armed HELLO timer
    hello_timer: Mutex<Option<TimerHandle>>,
    /// Armed housekeeping timer
    purge_timer: Mutex<Option<TimerHandle>>,
    /// Last broadcast sent since the HELLO timer last fired
    last_broadcast: Mutex<Option<Instant>>,
    /// Own sequence number
    seq_no: AtomicU32,
    /// Jitter source
    rng: Mutex<StdRng>,
    /// Counters
    stats: EngineStats,
}

impl<N, S, C> RoutingEngine<N, S, C>
where
    N: NetworkStack,
    S: Scheduler<RoutingTimer>,
    C: Clock,
{
    /// Create a new engine
    ///
    /// The engine is inert until [`RoutingEngine::start`] runs and at
    /// least one interface comes up.
    pub fn new(config: RoutingConfig, stack: Arc<N>, scheduler: Arc<S>, clock: Arc<C>) -> Self {
        Self {
            routing_table: RoutingTable::new(config.delete_period),
            dpd: DuplicatePacketDetection::new(config.duplicate_window),
            neighbors: NeighborTracker::new(),
            queue: Mutex::new(PendingPacketQueue::new(
                config.max_queue_len,
                config.max_queue_time,
            )),
            config,
            stack,
            scheduler,
            clock,
            discovery: Arc::new(LoggingDiscovery),
            selector: Arc::new(TableSelector),
            bindings: Mutex::new(HashMap::new()),
            request_timers: Mutex::new(HashMap::new()),
            ack_timers: Mutex::new(HashMap::new()),
            hello_timer: Mutex::new(None),
            purge_timer: Mutex::new(None),
            last_broadcast: Mutex::new(None),
            seq_no: AtomicU32::new(0),
            rng: Mutex::new(StdRng::seed_from_u64(0)),
            stats: EngineStats::default(),
        }
    }

    /// Use a custom route request sender
    pub fn with_discovery(mut self, discovery: Arc<dyn RouteDiscovery>) -> Self {
        self.discovery = discovery;
        self
    }

    /// Use a custom next-hop selector
    pub fn with_selector(mut self, selector: Arc<dyn NextHopSelector>) -> Self {
        self.selector = selector;
        self
    }

    /// Protocol configuration
    pub fn config(&self) -> &RoutingConfig {
        &self.config
    }

    /// The routing table
    pub fn routing_table(&self) -> &RoutingTable {
        &self.routing_table
    }

    /// The neighbor tracker
    pub fn neighbors(&self) -> &NeighborTracker {
        &self.neighbors
    }

    /// The duplicate detector
    pub fn duplicate_detection(&self) -> &DuplicatePacketDetection {
        &self.dpd
    }

    /// Number of packets waiting for a route
    pub fn queue_len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Whether any packet waits for `destination`
    pub fn has_queued(&self, destination: Ipv4Addr) -> bool {
        self.queue.lock().find(destination)
    }

    /// Interfaces with live control bindings
    pub fn interfaces(&self) -> Vec<InterfaceIndex> {
        let mut ifaces: Vec<_> = self.bindings.lock().keys().copied().collect();
        ifaces.sort();
        ifaces
    }

    /// Address the engine uses on `iface`
    pub fn interface_address(&self, iface: InterfaceIndex) -> Option<InterfaceAddress> {
        self.bindings.lock().get(&iface).map(|b| b.address)
    }

    /// Snapshot of the engine's counters, including queue drops
    pub fn stats(&self) -> StatsSnapshot {
        let mut snapshot = self.stats.snapshot();
        let (evicted, expired) = {
            let queue = self.queue.lock();
            (queue.evicted(), queue.expired())
        };
        for (reason, count) in snapshot.drops.iter_mut() {
            match reason {
                DropReason::QueueOverflow => *count += evicted,
                DropReason::Expired => *count += expired,
                _ => {}
            }
        }
        snapshot
    }

    /// Install the loopback route and arm periodic timers
    pub fn start(&self) -> EngineResult<()> {
        self.install_loopback_route()?;
        self.arm_purge(self.config.purge_interval);
        if self.config.enable_hello {
            let jitter = self.jitter(HELLO_START_JITTER_MS);
            self.arm_hello(jitter);
        }
        info!(hello = self.config.enable_hello, "Routing engine started");
        Ok(())
    }

    /// Re-seed the jitter source from a stream index
    ///
    /// Returns the number of random streams consumed, always 1.
    pub fn assign_streams(&self, stream: i64) -> i64 {
        *self.rng.lock() = StdRng::seed_from_u64(stream as u64);
        1
    }

    // ------------------------------------------------------------------
    // Output
    // ------------------------------------------------------------------

    /// Route a locally originated packet
    ///
    /// Never blocks. A miss answers [`OutputDecision::Defer`]; the caller
    /// loops the packet back and hands it to
    /// [`RoutingEngine::deferred_route_output`].
    pub fn route_output(
        &self,
        header: &Ipv4Header,
        oif: Option<InterfaceIndex>,
    ) -> Result<OutputDecision, SocketError> {
        let source = {
            let bindings = self.bindings.lock();
            if bindings.is_empty() {
                debug!(dst = %header.destination, "No interfaces bound");
                return Err(SocketError::NoRouteToHost);
            }
            match oif {
                Some(oif) => bindings.get(&oif).map(|b| b.address.local()),
                None => None,
            }
            .or_else(|| {
                bindings
                    .iter()
                    .min_by_key(|(idx, _)| **idx)
                    .map(|(_, b)| b.address.local())
            })
            .unwrap_or(Ipv4Addr::LOCALHOST)
        };

        self.process_link_failures();
        let now = self.clock.now();
        let dst = header.destination;

        if let Some(entry) = self.routing_table.lookup_valid_route(dst, now) {
            if oif.is_some_and(|oif| entry.interface != oif) {
                debug!(dst = %dst, route_if = %entry.interface, requested_if = ?oif, "Output interface mismatch");
                return Err(SocketError::NoRouteToHost);
            }
            let route = self.choose_route(&entry, oif, now);
            self.update_route_lifetime(dst, self.config.active_route_timeout);
            self.update_route_lifetime(route.gateway, self.config.active_route_timeout);
            trace!(dst = %dst, gateway = %route.gateway, "Output route found");
            return Ok(OutputDecision::Route(route));
        }

        trace!(dst = %dst, "No valid route, deferring");
        Ok(OutputDecision::Defer(Route {
            destination: dst,
            source,
            gateway: Ipv4Addr::LOCALHOST,
            output_interface: self.stack.loopback_interface(),
        }))
    }

    /// Buffer a packet until a route to its destination is known
    ///
    /// Starts discovery unless one is already running for the destination.
    /// Returns `false` if the queue rejected the packet, in which case its
    /// error continuation has already run.
    pub fn deferred_route_output(
        &self,
        packet: Packet,
        header: Ipv4Header,
        forward: UnicastForwardCallback,
        error: ErrorCallback,
    ) -> bool {
        let now = self.clock.now();
        let dst = header.destination;
        let uid = packet.id;

        let accepted = self
            .queue
            .lock()
            .enqueue(QueueEntry::new(packet, header, forward, error), now);
        if !accepted {
            self.stats.dropped(DropReason::Malformed, 1);
            return false;
        }
        debug!(uid = %uid, dst = %dst, "Packet deferred");

        let searching = self
            .routing_table
            .lookup_route(dst)
            .is_some_and(|e| e.flag == RouteFlag::InSearch);
        if !searching {
            self.send_request(dst);
        }
        true
    }

    // ------------------------------------------------------------------
    // Input
    // ------------------------------------------------------------------

    /// Classify and dispatch an inbound packet
    ///
    /// Returns `false` when the packet was not handled and the caller
    /// should fall back to other routing protocols.
    pub fn route_input(
        &self,
        packet: Packet,
        header: Ipv4Header,
        iif: InterfaceIndex,
        callbacks: InputCallbacks,
    ) -> bool {
        let InputCallbacks {
            unicast,
            local,
            error,
            ..
        } = callbacks;
        let src = header.source;
        let dst = header.destination;

        let (no_interfaces, own_echo, local_broadcast) = {
            let bindings = self.bindings.lock();
            (
                bindings.is_empty(),
                bindings.values().any(|b| b.address.local() == src),
                dst == Ipv4Addr::BROADCAST
                    || bindings.values().any(|b| b.address.broadcast() == dst),
            )
        };

        if no_interfaces {
            debug!(uid = %packet.id, "No interfaces bound, not handled");
            return false;
        }
        if own_echo {
            trace!(uid = %packet.id, src = %src, "Own packet echoed back");
            return true;
        }
        if dst.is_multicast() {
            return false;
        }

        let now = self.clock.now();

        if local_broadcast {
            if self.dpd.is_duplicate(packet.id, src, now) {
                self.stats.dropped(DropReason::Duplicate, 1);
                debug!(uid = %packet.id, src = %src, "Duplicate broadcast dropped");
                return true;
            }

            let relay = (!packet.is_control(&header) && header.ttl > 1).then(|| packet.clone());
            self.deliver_locally(packet, header, iif, local, error);

            if let Some(copy) = relay {
                match self.routing_table.lookup_route(dst) {
                    Some(entry) => {
                        trace!(uid = %copy.id, dst = %dst, "Relaying broadcast");
                        self.stats.relayed_broadcast();
                        unicast(entry.route(), copy, header);
                    }
                    None => {
                        debug!(uid = %copy.id, dst = %dst, "No relay route for broadcast");
                    }
                }
            }
            return true;
        }

        if self.stack.is_destination_address(dst, iif) {
            if let Some(to_origin) = self.routing_table.lookup_valid_route(src, now) {
                self.update_route_lifetime(src, self.config.active_route_timeout);
                self.update_route_lifetime(to_origin.next_hop, self.config.active_route_timeout);
            }
            self.deliver_locally(packet, header, iif, local, error);
            return true;
        }

        if !self.stack.is_forwarding(iif) {
            debug!(uid = %packet.id, iface = %iif, "Forwarding disabled");
            self.stats.dropped(DropReason::ForwardingDisabled, 1);
            error(packet, header, SocketError::NoRouteToHost);
            return true;
        }

        self.forwarding(packet, header, unicast)
    }

    fn deliver_locally(
        &self,
        packet: Packet,
        header: Ipv4Header,
        iif: InterfaceIndex,
        local: Option<LocalDeliverCallback>,
        error: ErrorCallback,
    ) {
        match local {
            Some(local) => {
                trace!(uid = %packet.id, dst = %header.destination, "Local delivery");
                self.stats.delivered();
                local(packet, header, iif);
            }
            None => {
                error!(uid = %packet.id, "Unable to deliver packet locally: no delivery callback");
                error(packet, header, SocketError::NoRouteToHost);
            }
        }
    }

    fn forwarding(&self, packet: Packet, header: Ipv4Header, unicast: UnicastForwardCallback) -> bool {
        self.process_link_failures();
        let now = self.clock.now();
        self.routing_table.purge(now);

        let dst = header.destination;
        if let Some(entry) = self.routing_table.lookup_valid_route(dst, now) {
            let route = self.choose_route(&entry, None, now);
            let timeout = self.config.active_route_timeout;
            self.update_route_lifetime(dst, timeout);
            self.update_route_lifetime(route.gateway, timeout);
            if let Some(to_origin) = self.routing_table.lookup_valid_route(header.source, now) {
                self.update_route_lifetime(header.source, timeout);
                self.update_route_lifetime(to_origin.next_hop, timeout);
            }
            debug!(uid = %packet.id, dst = %dst, gateway = %route.gateway, "Forwarding");
            self.stats.forwarded();
            unicast(route, packet, header);
            return true;
        }

        match self.routing_table.lookup_route(dst) {
            Some(entry) if entry.has_freshness() => {
                debug!(uid = %packet.id, dst = %dst, flag = %entry.flag, "Route not valid, drop");
                self.stats.dropped(DropReason::RouteInvalid, 1);
            }
            _ => {
                debug!(uid = %packet.id, dst = %dst, "No route, drop");
                self.stats.dropped(DropReason::NoRoute, 1);
            }
        }
        false
    }

    /// Apply the next-hop selector to a VALID table route
    fn choose_route(&self, entry: &RouteEntry, oif: Option<InterfaceIndex>, now: Instant) -> Route {
        let neighbors: Vec<RouteEntry> = self
            .routing_table
            .neighbor_routes(now)
            .into_iter()
            .filter(|n| oif.is_none_or(|oif| n.interface == oif) && self.stack.is_up(n.interface))
            .collect();
        if neighbors.is_empty() {
            return entry.route();
        }

        let candidates: Vec<RouteCandidate> = neighbors.iter().map(RouteCandidate::from).collect();
        let Some(preferred) = self.selector.select(entry.destination, &candidates) else {
            return entry.route();
        };
        if preferred == entry.next_hop {
            return entry.route();
        }
        match neighbors.iter().find(|n| n.next_hop == preferred) {
            Some(via) => {
                trace!(dst = %entry.destination, table = %entry.next_hop, chosen = %preferred, "Selector override");
                Route {
                    destination: entry.destination,
                    source: via.local.local(),
                    gateway: preferred,
                    output_interface: via.interface,
                }
            }
            None => entry.route(),
        }
    }

    /// Extend a VALID route's lifetime and reset its retry count
    ///
    /// Returns `false` if there is no VALID route to `destination`.
    pub fn update_route_lifetime(&self, destination: Ipv4Addr, lifetime: Duration) -> bool {
        let now = self.clock.now();
        let Some(mut entry) = self.routing_table.lookup_valid_route(destination, now) else {
            return false;
        };
        entry.lifetime = entry.lifetime.extend_to(now, lifetime);
        entry.rreq_count = 0;
        self.routing_table.update(entry).is_ok()
    }

    // ------------------------------------------------------------------
    // Discovery
    // ------------------------------------------------------------------

    /// Start or widen the search for `destination`
    ///
    /// Implements expanding-ring search: the TTL grows by the configured
    /// increment per attempt and jumps to the network diameter past the
    /// threshold. Attempts at the diameter count toward the retry limit.
    pub fn send_request(&self, destination: Ipv4Addr) {
        let now = self.clock.now();
        let config = &self.config;
        let lifetime = Expiry::after(now, config.path_discovery_time());

        let request = match self.routing_table.lookup_route(destination) {
            Some(mut entry) => {
                let ttl = if entry.flag == RouteFlag::InSearch {
                    let ttl = entry.hop_count.saturating_add(config.ttl_increment);
                    if ttl > config.ttl_threshold {
                        config.net_diameter
                    } else {
                        ttl
                    }
                } else {
                    entry
                        .hop_count
                        .saturating_add(config.ttl_increment)
                        .min(config.net_diameter)
                };
                if ttl == config.net_diameter {
                    entry.rreq_count = entry.rreq_count.saturating_add(1);
                }
                entry.flag = RouteFlag::InSearch;
                entry.hop_count = ttl;
                entry.lifetime = lifetime;
                let request = RouteRequest {
                    destination,
                    ttl,
                    attempt: entry.rreq_count,
                    known_seq_no: entry.seq_known.then_some(entry.seq_no),
                };
                if let Err(e) = self.routing_table.update(entry) {
                    warn!(dst = %destination, error = %e, "Failed to mark route in search");
                }
                request
            }
            None => {
                let (iface, local) = self.default_binding();
                let entry =
                    RouteEntry::searching(destination, iface, local, config.ttl_start, lifetime);
                if let Err(e) = self.routing_table.add_route(entry, now) {
                    warn!(dst = %destination, error = %e, "Failed to add search entry");
                }
                RouteRequest {
                    destination,
                    ttl: config.ttl_start,
                    attempt: 0,
                    known_seq_no: None,
                }
            }
        };

        debug!(dst = %destination, ttl = request.ttl, attempt = request.attempt, "Sending route request");
        self.stats.route_request();
        *self.last_broadcast.lock() = Some(now);
        self.discovery.send_request(request);
        self.schedule_rreq_retry(destination);
    }

    /// Timeout for the current discovery attempt toward an entry
    ///
    /// Below the network diameter the wait scales with the search radius;
    /// at the diameter it backs off exponentially with the attempt count.
    pub fn rreq_retry_delay(&self, entry: &RouteEntry) -> Duration {
        let config = &self.config;
        if entry.hop_count < config.net_diameter {
            let hops = u32::from(entry.hop_count) + u32::from(config.timeout_buffer);
            config.node_traversal_time.saturating_mul(2 * hops)
        } else {
            let exponent = u32::from(entry.rreq_count.saturating_sub(1));
            let factor = 2u32.saturating_pow(exponent);
            config.net_traversal_time().saturating_mul(factor)
        }
    }

    fn schedule_rreq_retry(&self, destination: Ipv4Addr) {
        let Some(entry) = self.routing_table.lookup_route(destination) else {
            return;
        };
        let delay = self.rreq_retry_delay(&entry);
        let mut timers = self.request_timers.lock();
        if let Some(old) = timers.remove(&destination) {
            self.scheduler.cancel(old);
        }
        let handle = self
            .scheduler
            .schedule(delay, RoutingTimer::RouteRequest { destination });
        timers.insert(destination, handle);
        trace!(dst = %destination, ?delay, "Route request timer armed");
    }

    /// Discovery timer for `destination` fired
    #[instrument(skip_all, fields(dst = %destination))]
    pub fn route_request_timer_expire(&self, destination: Ipv4Addr) {
        self.request_timers.lock().remove(&destination);
        let now = self.clock.now();

        if let Some(entry) = self.routing_table.lookup_valid_route(destination, now) {
            debug!("Route found, flushing queue");
            self.send_packet_from_queue(destination, &entry);
            return;
        }

        match self.routing_table.lookup_route(destination) {
            Some(entry) if entry.rreq_count >= self.config.rreq_retries => {
                self.give_up(destination, entry.rreq_count);
            }
            Some(entry) if entry.flag == RouteFlag::InSearch => {
                debug!(previous_ttl = entry.hop_count, "Resending route request");
                self.send_request(destination);
            }
            Some(entry) => self.give_up(destination, entry.rreq_count),
            None => self.give_up(destination, 0),
        }
    }

    fn give_up(&self, destination: Ipv4Addr, attempts: u8) {
        self.routing_table.delete_route(destination);
        let failure = RoutingError::DiscoveryExhausted {
            destination,
            attempts,
        };
        let dropped = self.queue.lock().drop_packet_with_dst(destination);
        warn!(dst = %destination, dropped, "{failure}");
        self.stats.discovery_exhausted();
        self.stats.dropped(DropReason::NoRoute, dropped as u64);
    }

    /// Install a route learned by discovery and release waiting packets
    ///
    /// A route through a blacklisted next hop is refused; the search for
    /// the destination keeps running.
    pub fn on_route_discovered(&self, discovered: DiscoveredRoute) -> EngineResult<()> {
        let now = self.clock.now();
        let local = self
            .interface_address(discovered.interface)
            .ok_or(EngineError::NoInterfaceAddress(discovered.interface))?;

        let existing = self.routing_table.lookup_route(discovered.destination);
        let via_blacklisted = self
            .routing_table
            .lookup_route(discovered.next_hop)
            .is_some_and(|hop| hop.next_hop == discovered.next_hop && hop.is_blacklisted(now))
            || existing
                .as_ref()
                .is_some_and(|e| e.next_hop == discovered.next_hop && e.is_blacklisted(now));
        if via_blacklisted {
            debug!(dst = %discovered.destination, next_hop = %discovered.next_hop, "Discovered route uses blacklisted next hop");
            return Err(EngineError::NextHopBlacklisted(discovered.next_hop));
        }

        let mut entry = RouteEntry::new(
            discovered.destination,
            discovered.next_hop,
            discovered.interface,
            local,
            discovered.hop_count,
            Expiry::after(now, discovered.lifetime),
        )
        .with_cost(discovered.cost);
        if let Some(seq) = discovered.seq_no {
            entry = entry.with_sequence(seq);
        }

        if let Some(existing) = existing {
            if existing.next_hop == discovered.next_hop {
                entry.blacklist_until = existing.blacklist_until;
            }
            self.routing_table.update(entry.clone())?;
        } else {
            self.routing_table.add_route(entry.clone(), now)?;
        }
        if let Some(handle) = self.request_timers.lock().remove(&discovered.destination) {
            self.scheduler.cancel(handle);
        }
        info!(dst = %discovered.destination, next_hop = %discovered.next_hop, hops = discovered.hop_count, "Route discovered");

        self.send_packet_from_queue(discovered.destination, &entry);
        Ok(())
    }

    /// Forward every queued packet for `destination` along `entry`
    fn send_packet_from_queue(&self, destination: Ipv4Addr, entry: &RouteEntry) {
        let mut sent = 0usize;
        loop {
            let now = self.clock.now();
            let next = self.queue.lock().dequeue(destination, now);
            let Some(queued) = next else {
                break;
            };
            let route = self.choose_route(entry, None, now);
            trace!(uid = %queued.packet.id, waited = ?queued.waited(now), "Dequeued");
            self.stats.forwarded();
            queued.forward(route);
            sent += 1;
        }
        if sent > 0 {
            debug!(dst = %destination, sent, "Sent queued packets");
        }
    }

    // ------------------------------------------------------------------
    // Link maintenance
    // ------------------------------------------------------------------

    /// HELLO_ACK from `neighbor` never arrived
    #[instrument(skip_all, fields(neighbor = %neighbor))]
    pub fn ack_timer_expire(&self, neighbor: Ipv4Addr, blacklist: Duration) {
        self.ack_timers.lock().remove(&neighbor);
        let now = self.clock.now();
        self.routing_table
            .mark_link_as_unidirectional(neighbor, blacklist, now);
    }

    /// Invalidate routes through neighbors the link layer reported as failed
    ///
    /// Returns the number of routes invalidated.
    pub fn process_link_failures(&self) -> usize {
        let failed = self.neighbors.take_link_failures();
        if failed.is_empty() {
            return 0;
        }
        let now = self.clock.now();
        let mut invalidated = 0;
        for neighbor in failed {
            let affected = self.routing_table.invalidate_routes_via(neighbor, now);
            self.stats.link_failure();
            debug!(neighbor = %neighbor, routes = affected.len(), "Link failure");
            invalidated += affected.len();
        }
        invalidated
    }

    /// Create or refresh the one-hop route to a neighbor we just heard
    pub fn update_route_to_neighbor(
        &self,
        sender: Ipv4Addr,
        iface: InterfaceIndex,
        local: InterfaceAddress,
        lifetime: Duration,
        cost: Option<u32>,
    ) {
        let now = self.clock.now();
        let result = match self.routing_table.lookup_route(sender) {
            None => {
                let entry = RouteEntry::new(
                    sender,
                    sender,
                    iface,
                    local,
                    1,
                    Expiry::after(now, lifetime),
                )
                .with_cost(cost);
                self.routing_table.add_route(entry, now)
            }
            Some(existing) if existing.lifetime.is_never() => return,
            Some(mut existing) => {
                if existing.is_usable(now)
                    && existing.next_hop == sender
                    && existing.hop_count == 1
                    && existing.interface == iface
                {
                    existing.lifetime = existing.lifetime.extend_to(now, lifetime);
                } else {
                    existing.flag = RouteFlag::Valid;
                    existing.next_hop = sender;
                    existing.interface = iface;
                    existing.local = local;
                    existing.hop_count = 1;
                    existing.rreq_count = 0;
                    existing.lifetime = Expiry::after(now, lifetime);
                }
                if cost.is_some() {
                    existing.cost = cost;
                }
                self.routing_table.update(existing)
            }
        };
        if let Err(e) = result {
            warn!(neighbor = %sender, error = %e, "Failed to update neighbor route");
        }
    }

    // ------------------------------------------------------------------
    // Control traffic
    // ------------------------------------------------------------------

    /// Handle a control message received on `iface` from `source`
    pub fn recv_control(
        &self,
        iface: InterfaceIndex,
        source: Ipv4Addr,
        payload: &[u8],
    ) -> EngineResult<()> {
        let message = ControlMessage::decode(payload)?;
        let local = self
            .interface_address(iface)
            .ok_or(EngineError::NoInterfaceAddress(iface))?;
        if source == local.local() {
            return Ok(());
        }
        trace!(src = %source, iface = %iface, kind = ?message.message_type(), "Control message");

        match message {
            ControlMessage::Hello(hello) => self.process_hello(iface, local, source, &hello),
            ControlMessage::HelloAck(ack) => {
                self.process_hello_ack(iface, local, source, &ack);
                Ok(())
            }
        }
    }

    fn process_hello(
        &self,
        iface: InterfaceIndex,
        local: InterfaceAddress,
        source: Ipv4Addr,
        hello: &Hello,
    ) -> EngineResult<()> {
        let now = self.clock.now();
        let lifetime = if hello.lifetime_ms == 0 {
            self.config.hello_lifetime()
        } else {
            hello.lifetime()
        };
        self.update_route_to_neighbor(source, iface, local, lifetime, hello.cost);
        self.neighbors.update(source, iface, now + lifetime);

        if hello.ack_requested {
            let ack = ControlMessage::HelloAck(HelloAck {
                origin: local.local(),
                seq_no: hello.seq_no,
                cost: None,
            });
            let bytes = ack.encode()?;
            let bindings = self.bindings.lock();
            if let Some(binding) = bindings.get(&iface) {
                binding
                    .unicast
                    .send_to(bytes, SocketAddrV4::new(source, CONTROL_PORT), 1)?;
            }
        }
        Ok(())
    }

    fn process_hello_ack(
        &self,
        iface: InterfaceIndex,
        local: InterfaceAddress,
        source: Ipv4Addr,
        ack: &HelloAck,
    ) {
        if let Some(handle) = self.ack_timers.lock().remove(&source) {
            self.scheduler.cancel(handle);
        }
        self.routing_table.clear_blacklist(source);
        let now = self.clock.now();
        let lifetime = self.config.hello_lifetime();
        self.update_route_to_neighbor(source, iface, local, lifetime, ack.cost);
        self.neighbors.update(source, iface, now + lifetime);
    }

    /// Broadcast a HELLO on every bound interface
    ///
    /// Arms an acknowledgment timer for each neighbor currently known on
    /// the interface.
    pub fn send_hello(&self) {
        let now = self.clock.now();
        let seq_no = self.seq_no.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        let lifetime_ms = u32::try_from(self.config.hello_lifetime().as_millis()).unwrap_or(u32::MAX);

        let mut expected_acks = Vec::new();
        {
            let bindings = self.bindings.lock();
            for (iface, binding) in bindings.iter() {
                let hello = ControlMessage::Hello(Hello {
                    origin: binding.address.local(),
                    seq_no,
                    lifetime_ms,
                    ack_requested: true,
                    cost: None,
                });
                let bytes = match hello.encode() {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        warn!(iface = %iface, error = %e, "Failed to encode hello");
                        continue;
                    }
                };
                let destination =
                    SocketAddrV4::new(binding.address.control_broadcast(), CONTROL_PORT);
                if let Err(e) = binding.unicast.send_to(bytes, destination, 1) {
                    warn!(iface = %iface, error = %e, "Failed to send hello");
                    continue;
                }
                trace!(iface = %iface, seq_no, "Hello sent");
                expected_acks.extend(self.neighbors.neighbors_on(*iface, now));
            }
        }

        for neighbor in expected_acks {
            self.arm_ack_timer(neighbor);
        }
    }

    fn arm_ack_timer(&self, neighbor: Ipv4Addr) {
        let mut timers = self.ack_timers.lock();
        if let Some(old) = timers.remove(&neighbor) {
            self.scheduler.cancel(old);
        }
        let handle = self.scheduler.schedule(
            self.config.next_hop_wait(),
            RoutingTimer::Ack {
                neighbor,
                blacklist: self.config.blacklist_duration(),
            },
        );
        timers.insert(neighbor, handle);
    }

    /// HELLO timer fired
    ///
    /// A broadcast sent since the last firing stands in for the HELLO, and
    /// the next firing is pulled in by the time already elapsed.
    #[instrument(skip(self))]
    pub fn hello_timer_expire(&self) {
        let now = self.clock.now();
        let last = self.last_broadcast.lock().take();
        let delay = match last {
            Some(at) => {
                debug!("Hello deferred by recent broadcast");
                self.config
                    .hello_interval
                    .saturating_sub(now.saturating_duration_since(at))
            }
            None => {
                self.send_hello();
                self.config.hello_interval
            }
        };
        let jitter = self.jitter(HELLO_JITTER_MS);
        self.arm_hello(delay + jitter);
    }

    fn arm_hello(&self, delay: Duration) {
        let mut timer = self.hello_timer.lock();
        if let Some(old) = timer.take() {
            self.scheduler.cancel(old);
        }
        *timer = Some(self.scheduler.schedule(delay, RoutingTimer::Hello));
    }

    /// Housekeeping timer fired
    #[instrument(skip(self))]
    pub fn purge_timer_expire(&self) {
        let now = self.clock.now();
        self.process_link_failures();
        self.routing_table.purge(now);
        self.dpd.sweep(now);
        let lost = self.neighbors.purge(now);
        for neighbor in &lost {
            trace!(neighbor = %neighbor, "Neighbor expired");
        }
        self.queue.lock().purge(now);
        self.arm_purge(self.config.purge_interval);
    }

    fn arm_purge(&self, delay: Duration) {
        let mut timer = self.purge_timer.lock();
        if let Some(old) = timer.take() {
            self.scheduler.cancel(old);
        }
        *timer = Some(self.scheduler.schedule(delay, RoutingTimer::Purge));
    }

    /// Dispatch a fired timer
    pub fn handle_timer(&self, timer: RoutingTimer) {
        trace!(%timer, "Timer fired");
        match timer {
            RoutingTimer::RouteRequest { destination } => {
                self.route_request_timer_expire(destination)
            }
            RoutingTimer::Ack {
                neighbor,
                blacklist,
            } => self.ack_timer_expire(neighbor, blacklist),
            RoutingTimer::Hello => self.hello_timer_expire(),
            RoutingTimer::Purge => self.purge_timer_expire(),
        }
    }

    // ------------------------------------------------------------------
    // Interface lifecycle
    // ------------------------------------------------------------------

    /// An interface came up
    pub fn notify_interface_up(&self, iface: InterfaceIndex) -> EngineResult<()> {
        if self.stack.is_loopback(iface) {
            return Ok(());
        }
        let addresses = self.stack.addresses(iface);
        if addresses.len() > 1 {
            warn!(iface = %iface, count = addresses.len(), "Only the first interface address is used");
        }
        let Some(address) = addresses.first().copied() else {
            debug!(iface = %iface, "Interface up without address");
            return Ok(());
        };
        if address.local() == Ipv4Addr::LOCALHOST {
            return Ok(());
        }
        self.bind_interface(iface, address)
    }

    /// An interface went down
    pub fn notify_interface_down(&self, iface: InterfaceIndex) {
        if self.unbind_interface(iface).is_none() {
            return;
        }
        info!(iface = %iface, "Interface down");
        self.after_unbind(iface);
    }

    /// An address was added to an interface
    pub fn notify_add_address(
        &self,
        iface: InterfaceIndex,
        address: InterfaceAddress,
    ) -> EngineResult<()> {
        if !self.stack.is_up(iface) || self.stack.is_loopback(iface) {
            return Ok(());
        }
        if self.bindings.lock().contains_key(&iface) {
            debug!(iface = %iface, %address, "Interface already bound, address ignored");
            return Ok(());
        }
        if address.local() == Ipv4Addr::LOCALHOST {
            return Ok(());
        }
        self.bind_interface(iface, address)
    }

    /// An address was removed from an interface
    pub fn notify_remove_address(
        &self,
        iface: InterfaceIndex,
        address: InterfaceAddress,
    ) -> EngineResult<()> {
        let bound = self.interface_address(iface);
        if bound.map(|b| b.local()) != Some(address.local()) {
            return Ok(());
        }
        self.routing_table.delete_all_routes_from_interface(iface);
        self.unbind_interface(iface);
        info!(iface = %iface, %address, "Bound address removed");

        let replacement = self
            .stack
            .addresses(iface)
            .into_iter()
            .find(|a| a.local() != address.local() && a.local() != Ipv4Addr::LOCALHOST);
        match replacement {
            Some(next) if self.stack.is_up(iface) => self.bind_interface(iface, next),
            _ => {
                self.after_unbind(iface);
                Ok(())
            }
        }
    }

    fn bind_interface(&self, iface: InterfaceIndex, address: InterfaceAddress) -> EngineResult<()> {
        if self.bindings.lock().contains_key(&iface) {
            return Ok(());
        }
        let unicast = self
            .stack
            .bind(iface, SocketAddrV4::new(address.local(), CONTROL_PORT))?;
        let broadcast = self
            .stack
            .bind(iface, SocketAddrV4::new(address.broadcast(), CONTROL_PORT))?;

        let arp_cache = self.stack.arp_cache(iface);
        if let Some(cache) = &arp_cache {
            self.neighbors.add_arp_cache(Arc::clone(cache));
        }
        if !self
            .stack
            .connect_tx_errors(iface, self.neighbors.tx_error_callback())
        {
            trace!(iface = %iface, "No link-layer feedback on interface");
        }

        self.bindings.lock().insert(
            iface,
            InterfaceBinding {
                address,
                unicast,
                broadcast,
                arp_cache,
            },
        );

        self.install_loopback_route()?;
        let now = self.clock.now();
        let broadcast_route = RouteEntry::new(
            address.broadcast(),
            address.broadcast(),
            iface,
            address,
            1,
            Expiry::Never,
        )
        .with_sequence(0);
        if self.routing_table.lookup_route(address.broadcast()).is_some() {
            self.routing_table.update(broadcast_route)?;
        } else {
            self.routing_table.add_route(broadcast_route, now)?;
        }

        info!(iface = %iface, %address, "Interface bound");
        Ok(())
    }

    fn unbind_interface(&self, iface: InterfaceIndex) -> Option<InterfaceAddress> {
        let binding = self.bindings.lock().remove(&iface)?;
        self.stack.disconnect_tx_errors(iface);
        if let Some(cache) = &binding.arp_cache {
            self.neighbors.del_arp_cache(cache);
        }
        binding.unicast.close();
        binding.broadcast.close();
        Some(binding.address)
    }

    fn after_unbind(&self, iface: InterfaceIndex) {
        if self.bindings.lock().is_empty() {
            info!("No interfaces left, clearing state");
            self.neighbors.clear();
            self.routing_table.clear();
        } else {
            self.routing_table.delete_all_routes_from_interface(iface);
            self.neighbors.remove_interface(iface);
        }
    }

    fn install_loopback_route(&self) -> EngineResult<()> {
        let now = self.clock.now();
        if self
            .routing_table
            .lookup_valid_route(Ipv4Addr::LOCALHOST, now)
            .is_some()
        {
            return Ok(());
        }
        let entry = RouteEntry::new(
            Ipv4Addr::LOCALHOST,
            Ipv4Addr::LOCALHOST,
            self.stack.loopback_interface(),
            InterfaceAddress::loopback(),
            1,
            Expiry::Never,
        )
        .with_sequence(0);
        self.routing_table.add_route(entry, now)?;
        Ok(())
    }

    /// First bound interface, or loopback when none is bound
    fn default_binding(&self) -> (InterfaceIndex, InterfaceAddress) {
        self.bindings
            .lock()
            .iter()
            .min_by_key(|(idx, _)| **idx)
            .map(|(idx, b)| (*idx, b.address))
            .unwrap_or_else(|| (self.stack.loopback_interface(), InterfaceAddress::loopback()))
    }

    fn jitter(&self, max_ms: u64) -> Duration {
        Duration::from_millis(self.rng.lock().random_range(0..=max_ms))
    }

    // ------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------

    /// Write the routing table to `out`
    pub fn print_routing_table(&self, out: &mut impl fmt::Write, unit: TimeUnit) -> fmt::Result {
        let interfaces: Vec<String> = self
            .interfaces()
            .into_iter()
            .filter_map(|i| self.interface_address(i).map(|a| format!("{i}={a}")))
            .collect();
        writeln!(out, "Interfaces: {}", interfaces.join(", "))?;
        self.routing_table.print(out, self.clock.now(), unit)
    }
}
