//! Integration scenarios exercising the full routing stack
//!
//! These scenarios drive real engines through the simulated medium:
//! - qlrn-core collaborators (NodeStack, ManualClock, ArpCache)
//! - qlrn-routing engine paths (output, defer, input, timers)
//! - HELLO neighbor detection over the control socket

use std::net::Ipv4Addr;
use std::time::Duration;

use qlrn_core::DropReason;
use qlrn_routing::RoutingConfig;

use crate::simulation::{SimConfig, Simulation};
use crate::topology::TopologyBuilder;
use crate::types::{LossCause, NetworkEvent, NodeId};

fn line(nodes: usize, config: SimConfig) -> Simulation {
    Simulation::new(&TopologyBuilder::new(nodes).line(), config).unwrap()
}

/// One-hop delivery costs one discovery round trip plus one hop
#[test]
fn test_neighbor_latency_is_discovery_plus_hop() {
    let mut sim = line(2, SimConfig::default());
    sim.send(NodeId(0), NodeId(1)).unwrap();
    sim.run_for(Duration::from_millis(100));

    assert_eq!(sim.stats.packets_delivered, 1);
    assert_eq!(sim.stats.average_latency(), Duration::from_millis(15));
}

/// Expanding-ring search reaches a destination four hops away
#[test]
fn test_expanding_ring_search_widens() {
    let mut sim = line(5, SimConfig::default());
    sim.send(NodeId(0), NodeId(4)).unwrap();
    sim.run_for(Duration::from_secs(3));

    assert_eq!(sim.stats.packets_delivered, 1);
    assert_eq!(sim.stats.total_hops, 4);
    // TTL 1 and 3 fall short, TTL 5 finds it
    assert_eq!(sim.stats.route_requests, 3);
    assert_eq!(sim.stats.route_replies, 1);
}

/// HELLO exchange installs one-hop routes without any discovery
#[test]
fn test_hello_discovers_neighbors() {
    let mut sim = Simulation::new(
        &TopologyBuilder::new(4).ring(),
        SimConfig::default().with_hello(true),
    )
    .unwrap();
    sim.run_for(Duration::from_secs(5));

    for node in sim.node_ids() {
        let engine = sim.engine(node).unwrap();
        assert_eq!(engine.neighbors().len(), 2, "{node} neighbors");
    }

    sim.send(NodeId(0), NodeId(1)).unwrap();
    sim.run_for(Duration::from_millis(100));
    assert_eq!(sim.stats.packets_delivered, 1);
    assert_eq!(sim.stats.route_requests, 0);
}

/// A neighbor that stops answering HELLOs ages out
#[test]
fn test_silent_neighbor_expires() {
    let mut sim = line(2, SimConfig::default().with_hello(true));
    sim.run_for(Duration::from_secs(3));
    assert_eq!(sim.engine(NodeId(0)).unwrap().neighbors().len(), 1);

    sim.break_link(NodeId(0), NodeId(1));
    sim.run_for(Duration::from_secs(7));
    assert_eq!(sim.engine(NodeId(0)).unwrap().neighbors().len(), 0);
}

/// Packets run out of hops in transit
#[test]
fn test_ttl_expires_in_transit() {
    let mut sim = line(
        4,
        SimConfig {
            initial_ttl: 2,
            ..SimConfig::default()
        },
    );
    sim.send(NodeId(0), NodeId(3)).unwrap();
    sim.run_for(Duration::from_secs(2));

    assert_eq!(sim.stats.packets_delivered, 0);
    assert_eq!(sim.stats.packets_lost, 1);
    assert!(sim.event_log.iter().any(|e| matches!(
        e,
        NetworkEvent::Lost {
            cause: LossCause::TtlExpired,
            node: NodeId(2),
            ..
        }
    )));
}

/// A full pending queue evicts its oldest packets without failing them
#[test]
fn test_queue_overflow_evicts_oldest() {
    let config = SimConfig::default().with_routing(RoutingConfig::default().with_max_queue_len(2));
    let mut sim = line(3, config);
    let uids: Vec<_> = (0..4)
        .map(|_| sim.send(NodeId(0), NodeId(2)).unwrap())
        .collect();
    sim.run_for(Duration::from_secs(2));

    assert_eq!(sim.stats.packets_delivered, 2);
    assert_eq!(sim.stats.packets_failed, 0);
    assert_eq!(sim.in_flight(), 2);
    let stats = sim.engine(NodeId(0)).unwrap().stats();
    assert_eq!(stats.dropped(DropReason::QueueOverflow), 2);

    let delivered: Vec<_> = sim
        .event_log
        .iter()
        .filter_map(|e| match e {
            NetworkEvent::Delivered { uid, .. } => Some(*uid),
            _ => None,
        })
        .collect();
    assert_eq!(delivered, uids[2..].to_vec());
}

/// A packet without a destination is refused through its error continuation
#[test]
fn test_unspecified_destination_fails() {
    let mut sim = line(2, SimConfig::default());
    sim.send_to_address(NodeId(0), Ipv4Addr::UNSPECIFIED).unwrap();
    sim.run_for(Duration::from_millis(100));

    assert_eq!(sim.stats.packets_failed, 1);
    assert_eq!(sim.stats.route_requests, 0);
}

/// A relay with forwarding disabled reports the packet back as failed
#[test]
fn test_forwarding_disabled_at_relay() {
    let mut sim = line(3, SimConfig::default());
    sim.stack(NodeId(1)).unwrap().set_forwarding(false);
    sim.send(NodeId(0), NodeId(2)).unwrap();
    sim.run_for(Duration::from_secs(2));

    assert_eq!(sim.stats.packets_delivered, 0);
    assert_eq!(sim.stats.packets_failed, 1);
    let relay = sim.engine(NodeId(1)).unwrap().stats();
    assert_eq!(relay.dropped(DropReason::ForwardingDisabled), 1);
}

/// A relay that lost its next hop declines transit traffic
#[test]
fn test_relay_without_route_declines() {
    let mut sim = line(3, SimConfig::default());
    sim.send(NodeId(0), NodeId(2)).unwrap();
    sim.run_for(Duration::from_secs(1));
    assert_eq!(sim.stats.packets_delivered, 1);

    // n1 notices the broken link on the next packet, n0 does not
    sim.break_link(NodeId(1), NodeId(2));
    sim.send(NodeId(0), NodeId(2)).unwrap();
    sim.run_for(Duration::from_millis(100));
    sim.send(NodeId(0), NodeId(2)).unwrap();
    sim.run_for(Duration::from_millis(100));

    let causes: Vec<LossCause> = sim
        .event_log
        .iter()
        .filter_map(|e| match e {
            NetworkEvent::Lost { cause, .. } => Some(*cause),
            _ => None,
        })
        .collect();
    assert_eq!(causes, vec![LossCause::LinkLoss, LossCause::Unroutable]);
    assert_eq!(sim.engine(NodeId(1)).unwrap().stats().link_failures, 1);
}

/// Broadcast relays never loop back into a second local delivery
#[test]
fn test_broadcast_on_ring_delivers_once_per_node() {
    let mut sim = Simulation::new(&TopologyBuilder::new(6).ring(), SimConfig::default()).unwrap();
    sim.broadcast(NodeId(3)).unwrap();
    sim.run_for(Duration::from_secs(1));

    assert_eq!(sim.stats.broadcast_deliveries, 5);
    let receivers: std::collections::BTreeSet<NodeId> = sim
        .event_log
        .iter()
        .filter_map(|e| match e {
            NetworkEvent::BroadcastReceived { node, .. } => Some(*node),
            _ => None,
        })
        .collect();
    assert_eq!(receivers.len(), 5);
    assert!(!receivers.contains(&NodeId(3)));
    assert!(sim.engine_totals().dropped(DropReason::Duplicate) > 0);
}
