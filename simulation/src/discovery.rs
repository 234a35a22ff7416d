//! Route discovery for the simulation
//!
//! Route requests are not flooded hop by hop. [`OracleDiscovery`] posts the
//! request on the event queue and the simulation answers it from the live
//! link graph, installing the reply along the fewest-hop path after the
//! round-trip time that path would take.

use std::sync::Arc;

use qlrn_routing::{RouteDiscovery, RouteRequest};
use tracing::trace;

use crate::scheduler::{EventQueue, SimEvent};
use crate::types::NodeId;

/// Route request sender for one simulated node
#[derive(Debug, Clone)]
pub struct OracleDiscovery {
    node: NodeId,
    queue: Arc<EventQueue>,
}

impl OracleDiscovery {
    /// Create the discovery hook of `node`
    pub fn new(node: NodeId, queue: Arc<EventQueue>) -> Self {
        Self { node, queue }
    }
}

impl RouteDiscovery for OracleDiscovery {
    fn send_request(&self, request: RouteRequest) {
        trace!(
            node = %self.node,
            dst = %request.destination,
            ttl = request.ttl,
            attempt = request.attempt,
            "Route request queued"
        );
        self.queue.push_now(SimEvent::Discover {
            node: self.node,
            request,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qlrn_core::ManualClock;

    #[test]
    fn test_request_becomes_discover_event() {
        let queue = Arc::new(EventQueue::new(Arc::new(ManualClock::new())));
        let discovery = OracleDiscovery::new(NodeId(4), Arc::clone(&queue));
        let request = RouteRequest {
            destination: NodeId(9).address(),
            ttl: 3,
            attempt: 0,
            known_seq_no: None,
        };
        discovery.send_request(request);

        let scheduled = queue.pop_until(queue.now());
        match scheduled.map(|s| s.event) {
            Some(SimEvent::Discover { node, request: got }) => {
                assert_eq!(node, NodeId(4));
                assert_eq!(got, request);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
