//! Discrete-event queue and per-node timer scheduler
//!
//! Every pending action in the simulation (timers, frames in flight,
//! continuation results) is a [`SimEvent`] in one time-ordered heap. Events
//! due at the same instant run in the order they were pushed.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashSet};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use qlrn_core::{Clock, Ipv4Header, ManualClock, Packet, Route, Scheduler, SocketError, TimerHandle};
use qlrn_routing::{RouteRequest, RoutingTimer};

use crate::types::NodeId;

/// Something that happens at a simulated instant
#[derive(Debug, Clone)]
pub enum SimEvent {
    /// A routing timer fired
    Timer { node: NodeId, timer: RoutingTimer },
    /// The application hands a packet to `node`
    Originate {
        node: NodeId,
        destination: Ipv4Addr,
        packet: Packet,
    },
    /// `node` decided to send a data packet along `route`
    Transmit {
        node: NodeId,
        route: Route,
        packet: Packet,
        header: Ipv4Header,
    },
    /// A data frame arrives at `to`
    DataFrame {
        from: NodeId,
        to: NodeId,
        packet: Packet,
        header: Ipv4Header,
    },
    /// A control datagram arrives at `to`
    ControlFrame {
        to: NodeId,
        source: Ipv4Addr,
        payload: Bytes,
    },
    /// The link layer of `node` failed to reach `receiver`
    TxFailure { node: NodeId, receiver: NodeId },
    /// Local delivery continuation ran on `node`
    Deliver {
        node: NodeId,
        packet: Packet,
        header: Ipv4Header,
    },
    /// Error continuation ran on `node`
    Fail {
        node: NodeId,
        packet: Packet,
        error: SocketError,
    },
    /// `node` asked for a route
    Discover { node: NodeId, request: RouteRequest },
    /// A route reply travelled back along `path`
    RouteReply { path: Vec<NodeId> },
}

impl SimEvent {
    /// Node the event runs on; a route reply touches several
    pub fn node(&self) -> Option<NodeId> {
        match self {
            Self::Timer { node, .. }
            | Self::Originate { node, .. }
            | Self::Transmit { node, .. }
            | Self::TxFailure { node, .. }
            | Self::Deliver { node, .. }
            | Self::Fail { node, .. }
            | Self::Discover { node, .. } => Some(*node),
            Self::DataFrame { to, .. } | Self::ControlFrame { to, .. } => Some(*to),
            Self::RouteReply { .. } => None,
        }
    }
}

/// An event with its due time
#[derive(Debug)]
pub struct Scheduled {
    pub at: Instant,
    pub seq: u64,
    pub event: SimEvent,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.at, self.seq).cmp(&(other.at, other.seq))
    }
}

#[derive(Debug, Default)]
struct QueueInner {
    heap: BinaryHeap<Reverse<Scheduled>>,
    /// Sequence numbers of armed, uncancelled timers
    live_timers: HashSet<u64>,
    next_seq: u64,
}

/// Time-ordered event queue driven by a virtual clock
#[derive(Debug)]
pub struct EventQueue {
    clock: Arc<ManualClock>,
    inner: Mutex<QueueInner>,
}

impl EventQueue {
    /// Create an empty queue on `clock`
    pub fn new(clock: Arc<ManualClock>) -> Self {
        Self {
            clock,
            inner: Mutex::new(QueueInner::default()),
        }
    }

    /// The virtual clock
    pub fn clock(&self) -> &Arc<ManualClock> {
        &self.clock
    }

    /// Current simulated time
    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    /// Schedule `event` after `delay`; returns its sequence number
    pub fn push_after(&self, delay: Duration, event: SimEvent) -> u64 {
        let at = self.now() + delay;
        let mut inner = self.inner.lock();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        if matches!(event, SimEvent::Timer { .. }) {
            inner.live_timers.insert(seq);
        }
        inner.heap.push(Reverse(Scheduled { at, seq, event }));
        seq
    }

    /// Schedule `event` at the current instant, after everything already due
    pub fn push_now(&self, event: SimEvent) -> u64 {
        self.push_after(Duration::ZERO, event)
    }

    /// Disarm a timer; unknown or fired sequence numbers are ignored
    pub fn cancel_timer(&self, seq: u64) {
        self.inner.lock().live_timers.remove(&seq);
    }

    /// Pop the next event due no later than `deadline`
    ///
    /// Cancelled timers are discarded on the way.
    pub fn pop_until(&self, deadline: Instant) -> Option<Scheduled> {
        let mut inner = self.inner.lock();
        loop {
            let due = inner.heap.peek().is_some_and(|Reverse(s)| s.at <= deadline);
            if !due {
                return None;
            }
            let Reverse(scheduled) = inner.heap.pop()?;
            if matches!(scheduled.event, SimEvent::Timer { .. })
                && !inner.live_timers.remove(&scheduled.seq)
            {
                continue;
            }
            return Some(scheduled);
        }
    }

    /// Due time of the earliest queued event, cancelled timers included
    pub fn next_at(&self) -> Option<Instant> {
        self.inner.lock().heap.peek().map(|Reverse(s)| s.at)
    }

    /// Number of queued events, cancelled timers included
    pub fn len(&self) -> usize {
        self.inner.lock().heap.len()
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.inner.lock().heap.is_empty()
    }

    /// Number of armed timers
    pub fn armed_timers(&self) -> usize {
        self.inner.lock().live_timers.len()
    }
}

/// Routing-timer scheduler for one node
#[derive(Debug, Clone)]
pub struct NodeScheduler {
    node: NodeId,
    queue: Arc<EventQueue>,
}

impl NodeScheduler {
    /// Create a scheduler delivering timers for `node`
    pub fn new(node: NodeId, queue: Arc<EventQueue>) -> Self {
        Self { node, queue }
    }
}

impl Scheduler<RoutingTimer> for NodeScheduler {
    fn schedule(&self, delay: Duration, timer: RoutingTimer) -> TimerHandle {
        TimerHandle(self.queue.push_after(
            delay,
            SimEvent::Timer {
                node: self.node,
                timer,
            },
        ))
    }

    fn cancel(&self, handle: TimerHandle) {
        self.queue.cancel_timer(handle.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> Arc<EventQueue> {
        Arc::new(EventQueue::new(Arc::new(ManualClock::new())))
    }

    fn fired(scheduled: Option<Scheduled>) -> Option<(NodeId, RoutingTimer)> {
        match scheduled?.event {
            SimEvent::Timer { node, timer } => Some((node, timer)),
            _ => None,
        }
    }

    #[test]
    fn test_events_pop_in_time_order() {
        let queue = queue();
        let scheduler = NodeScheduler::new(NodeId(1), Arc::clone(&queue));
        scheduler.schedule(Duration::from_millis(30), RoutingTimer::Purge);
        scheduler.schedule(Duration::from_millis(10), RoutingTimer::Hello);

        let deadline = queue.now() + Duration::from_secs(1);
        assert_eq!(fired(queue.pop_until(deadline)), Some((NodeId(1), RoutingTimer::Hello)));
        assert_eq!(fired(queue.pop_until(deadline)), Some((NodeId(1), RoutingTimer::Purge)));
        assert!(queue.pop_until(deadline).is_none());
    }

    #[test]
    fn test_same_instant_is_fifo() {
        let queue = queue();
        let a = NodeScheduler::new(NodeId(1), Arc::clone(&queue));
        let b = NodeScheduler::new(NodeId(2), Arc::clone(&queue));
        a.schedule(Duration::from_millis(5), RoutingTimer::Hello);
        b.schedule(Duration::from_millis(5), RoutingTimer::Hello);

        let deadline = queue.now() + Duration::from_millis(5);
        assert_eq!(fired(queue.pop_until(deadline)).map(|(n, _)| n), Some(NodeId(1)));
        assert_eq!(fired(queue.pop_until(deadline)).map(|(n, _)| n), Some(NodeId(2)));
    }

    #[test]
    fn test_cancelled_timer_is_skipped() {
        let queue = queue();
        let scheduler = NodeScheduler::new(NodeId(1), Arc::clone(&queue));
        let handle = scheduler.schedule(Duration::from_millis(10), RoutingTimer::Hello);
        scheduler.schedule(Duration::from_millis(20), RoutingTimer::Purge);
        scheduler.cancel(handle);
        assert_eq!(queue.armed_timers(), 1);

        let deadline = queue.now() + Duration::from_secs(1);
        assert_eq!(fired(queue.pop_until(deadline)), Some((NodeId(1), RoutingTimer::Purge)));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_deadline_holds_back_later_events() {
        let queue = queue();
        let scheduler = NodeScheduler::new(NodeId(1), Arc::clone(&queue));
        scheduler.schedule(Duration::from_millis(50), RoutingTimer::Purge);

        assert!(queue.pop_until(queue.now() + Duration::from_millis(49)).is_none());
        assert_eq!(queue.len(), 1);
        queue.clock().advance(Duration::from_millis(50));
        assert!(queue.pop_until(queue.now()).is_some());
    }
}
