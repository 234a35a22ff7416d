//! Pending-packet queue
//!
//! Packets whose destination has no usable route wait here while
//! discovery runs. The queue is bounded two ways:
//!
//! - **Count**: at capacity, the oldest packet across all destinations is
//!   evicted to admit the new one (drop-front). Evictions are silent and
//!   only counted.
//! - **Age**: a packet that has waited longer than the maximum queueing
//!   delay is failed with [`SocketError::NoRouteToHost`] the next time the
//!   queue is touched, instead of being forwarded late.
//!
//! Each entry owns its packet and both continuations. Whoever removes an
//! entry must consume it through [`QueueEntry::forward`] or
//! [`QueueEntry::fail`].

use std::collections::VecDeque;
use std::fmt;
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use qlrn_core::{ErrorCallback, Ipv4Header, Packet, Route, SocketError, UnicastForwardCallback};
use tracing::{debug, trace};

/// A buffered packet with its continuations
pub struct QueueEntry {
    /// The buffered packet
    pub packet: Packet,
    /// Header as seen when the packet was deferred
    pub header: Ipv4Header,
    forward: UnicastForwardCallback,
    error: ErrorCallback,
    enqueued_at: Option<Instant>,
    expire: Option<Instant>,
}

impl QueueEntry {
    /// Create a queue entry
    pub fn new(
        packet: Packet,
        header: Ipv4Header,
        forward: UnicastForwardCallback,
        error: ErrorCallback,
    ) -> Self {
        Self {
            packet,
            header,
            forward,
            error,
            enqueued_at: None,
            expire: None,
        }
    }

    /// Destination the packet waits for
    pub fn destination(&self) -> Ipv4Addr {
        self.header.destination
    }

    /// How long the packet has been waiting
    pub fn waited(&self, now: Instant) -> Duration {
        self.enqueued_at
            .map_or(Duration::ZERO, |at| now.saturating_duration_since(at))
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expire.is_some_and(|expire| now > expire)
    }

    /// Hand the packet to its forward continuation
    pub fn forward(self, route: Route) {
        (self.forward)(route, self.packet, self.header);
    }

    /// Hand the packet to its error continuation
    pub fn fail(self, error: SocketError) {
        (self.error)(self.packet, self.header, error);
    }
}

impl fmt::Debug for QueueEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueEntry")
            .field("packet", &self.packet.id)
            .field("destination", &self.header.destination)
            .field("expire", &self.expire)
            .finish_non_exhaustive()
    }
}

/// Bounded multi-destination FIFO of packets awaiting a route
pub struct PendingPacketQueue {
    entries: VecDeque<QueueEntry>,
    max_len: usize,
    max_delay: Duration,
    evicted: u64,
    expired: u64,
}

impl PendingPacketQueue {
    /// Create a queue holding at most `max_len` packets for at most `max_delay` each
    pub fn new(max_len: usize, max_delay: Duration) -> Self {
        Self {
            entries: VecDeque::with_capacity(max_len.min(1024)),
            max_len,
            max_delay,
            evicted: 0,
            expired: 0,
        }
    }

    /// Append a packet
    ///
    /// Expired packets are failed first. At capacity, the oldest packet is
    /// evicted. A packet with an unspecified destination is rejected: its
    /// error continuation runs and `false` is returned.
    pub fn enqueue(&mut self, mut entry: QueueEntry, now: Instant) -> bool {
        self.purge(now);

        if entry.header.destination.is_unspecified() {
            debug!(uid = %entry.packet.id, "Rejecting packet without destination");
            entry.fail(SocketError::NoRouteToHost);
            return false;
        }

        entry.enqueued_at = Some(now);
        entry.expire = Some(now + self.max_delay);

        if self.max_len == 0 {
            self.evicted += 1;
            trace!(uid = %entry.packet.id, "Queue has no capacity, dropping");
            return true;
        }
        while self.entries.len() >= self.max_len {
            if let Some(oldest) = self.entries.pop_front() {
                self.evicted += 1;
                debug!(
                    uid = %oldest.packet.id,
                    dst = %oldest.destination(),
                    "Queue full, dropping oldest packet"
                );
            }
        }

        trace!(
            uid = %entry.packet.id,
            dst = %entry.destination(),
            len = self.entries.len() + 1,
            "Packet queued"
        );
        self.entries.push_back(entry);
        true
    }

    /// Remove and return the oldest packet for `destination`
    pub fn dequeue(&mut self, destination: Ipv4Addr, now: Instant) -> Option<QueueEntry> {
        self.purge(now);
        let index = self
            .entries
            .iter()
            .position(|e| e.destination() == destination)?;
        self.entries.remove(index)
    }

    /// Whether any packet is waiting for `destination`
    pub fn find(&self, destination: Ipv4Addr) -> bool {
        self.entries.iter().any(|e| e.destination() == destination)
    }

    /// Fail every packet for `destination` with `NoRouteToHost`
    ///
    /// Each dropped packet's error continuation runs exactly once. Returns
    /// the number of packets dropped.
    pub fn drop_packet_with_dst(&mut self, destination: Ipv4Addr) -> usize {
        let (matching, rest): (VecDeque<_>, VecDeque<_>) = self
            .entries
            .drain(..)
            .partition(|e| e.destination() == destination);
        self.entries = rest;

        let dropped = matching.len();
        for entry in matching {
            entry.fail(SocketError::NoRouteToHost);
        }
        if dropped > 0 {
            debug!(dst = %destination, dropped, "Dropped queued packets");
        }
        dropped
    }

    /// Fail every packet that has waited too long
    pub fn purge(&mut self, now: Instant) -> usize {
        if !self.entries.iter().any(|e| e.is_expired(now)) {
            return 0;
        }
        let (expired, live): (VecDeque<_>, VecDeque<_>) =
            self.entries.drain(..).partition(|e| e.is_expired(now));
        self.entries = live;

        let count = expired.len();
        for entry in expired {
            trace!(
                uid = %entry.packet.id,
                waited = ?entry.waited(now),
                "Queued packet expired"
            );
            entry.fail(SocketError::NoRouteToHost);
        }
        self.expired += count as u64;
        count
    }

    /// Number of buffered packets
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the queue is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Capacity in packets
    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Maximum queueing delay
    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Packets evicted by drop-front so far
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    /// Packets failed for waiting too long so far
    pub fn expired(&self) -> u64 {
        self.expired
    }
}
