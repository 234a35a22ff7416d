//! Pre-defined simulation scenarios
//!
//! Each scenario builds a topology, drives traffic through it and returns
//! the finished simulation so callers can inspect statistics and the event
//! log.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

use crate::simulation::{SimConfig, SimError, Simulation};
use crate::topology::{TopologyBuilder, from_edges};
use crate::types::NodeId;

/// Print the end-of-run statistics
pub fn print_summary(sim: &Simulation) {
    let stats = &sim.stats;
    let engines = sim.engine_totals();
    println!("\n=== Final Statistics ===");
    println!("  Packets sent: {}", stats.packets_sent);
    println!("  Packets delivered: {}", stats.packets_delivered);
    println!("  Packets failed: {}", stats.packets_failed);
    println!("  Packets lost: {}", stats.packets_lost);
    println!("  Delivery rate: {:.1}%", stats.delivery_ratio() * 100.0);
    println!("  Average hops: {:.2}", stats.average_hops());
    println!("  Average latency: {:?}", stats.average_latency());
    if stats.broadcasts_sent > 0 {
        println!("  Broadcasts sent: {}", stats.broadcasts_sent);
        println!("  Broadcast deliveries: {}", stats.broadcast_deliveries);
    }
    println!("  Route requests: {}", stats.route_requests);
    println!("  Route replies: {}", stats.route_replies);
    println!("  Forwarded by engines: {}", engines.forwarded);
    println!("  Link failures detected: {}", engines.link_failures);
    println!("  Discoveries exhausted: {}", engines.discoveries_exhausted);
    println!("  Engine drops: {}", engines.total_dropped());
}

/// Scenario: multi-hop delivery along a line
///
/// ```text
/// n0 - n1 - n2 - ... - n(k)
/// ```
///
/// n0 sends `packets` packets to the far end, one every 500 ms. The first
/// one waits for an expanding-ring search; the rest reuse the route.
pub fn run_line_scenario(
    nodes: usize,
    packets: usize,
    config: SimConfig,
) -> Result<Simulation, SimError> {
    info!(nodes, packets, "=== Running Line Scenario ===");
    let topology = TopologyBuilder::new(nodes.max(2)).line();
    println!("{}", topology.visualize());

    let mut sim = Simulation::new(&topology, config)?;
    let last = NodeId(u16::try_from(topology.node_count() - 1).unwrap_or(u16::MAX));
    let interval = Duration::from_millis(500);
    for i in 0..packets {
        let delay = interval.saturating_mul(u32::try_from(i).unwrap_or(u32::MAX));
        sim.send_after(delay, NodeId(0), last)?;
    }

    let horizon = interval.saturating_mul(u32::try_from(packets).unwrap_or(u32::MAX))
        + Duration::from_secs(5);
    sim.run_for(horizon);
    println!("  {}", sim.state_summary());
    if let Some(table) = sim.routing_table_dump(NodeId(0)) {
        println!("\n--- Routing table of n0 ---\n{table}");
    }
    print_summary(&sim);
    Ok(sim)
}

/// Scenario: subnet broadcast across a grid
///
/// n0 broadcasts once. Every node relays the first copy it sees and drops
/// the duplicates, so each other node delivers exactly one copy.
pub fn run_broadcast_scenario(
    width: u16,
    height: u16,
    config: SimConfig,
) -> Result<Simulation, SimError> {
    info!(width, height, "=== Running Broadcast Scenario ===");
    let count = usize::from(width.max(1)) * usize::from(height.max(1));
    let topology = TopologyBuilder::new(count).grid(width);
    println!("{}", topology.visualize());

    let mut sim = Simulation::new(&topology, config)?;
    println!("\n--- n0 broadcasts ---");
    sim.broadcast(NodeId(0))?;
    sim.run_for(Duration::from_secs(2));

    println!(
        "  {} of {} other nodes received the broadcast",
        sim.stats.broadcast_deliveries,
        count - 1
    );
    println!(
        "  Duplicates dropped: {}",
        sim.engine_totals().dropped(qlrn_core::DropReason::Duplicate)
    );
    print_summary(&sim);
    Ok(sim)
}

/// Scenario: destination in another partition
///
/// ```text
/// n0 - n1      n2 - n3
/// ```
///
/// Discovery widens to the network diameter, retries, and finally gives
/// up; the queued packet comes back through its error continuation.
pub fn run_unreachable_scenario(config: SimConfig) -> Result<Simulation, SimError> {
    info!("=== Running Unreachable Scenario ===");
    let topology = from_edges(&[(0, 1), (2, 3)]);
    println!("{}", topology.visualize());

    let mut sim = Simulation::new(&topology, config)?;
    println!("\n--- n0 sends to n3 (no path) ---");
    sim.send(NodeId(0), NodeId(3))?;

    for _ in 0..4 {
        sim.run_for(Duration::from_secs(4));
        println!("  {}", sim.state_summary());
    }
    print_summary(&sim);
    Ok(sim)
}

/// Scenario: link break on an active route
///
/// ```text
///   n0 - n1 - n2
///   |          |
///   n5 - n4 - n3
/// ```
///
/// n0 streams packets to n2 over n1. At 3 s the n0-n1 link breaks: the
/// next packet is lost, the link layer reports the failure, and the
/// following packet triggers rediscovery around the ring.
pub fn run_link_break_scenario(config: SimConfig) -> Result<Simulation, SimError> {
    info!("=== Running Link Break Scenario ===");
    let topology = TopologyBuilder::new(6).ring();
    println!("{}", topology.visualize());

    let mut sim = Simulation::new(&topology, config)?;
    let interval = Duration::from_millis(250);
    for i in 0..32u32 {
        sim.send_after(interval * i, NodeId(0), NodeId(2))?;
    }

    sim.run_for(Duration::from_secs(3));
    println!("\n--- Before break: {} ---", sim.state_summary());
    println!("  Delivered so far: {}", sim.stats.packets_delivered);

    println!("\n--- Link n0 - n1 breaks ---");
    sim.break_link(NodeId(0), NodeId(1));
    sim.run_for(Duration::from_secs(7));
    println!("  {}", sim.state_summary());
    if let Some(table) = sim.routing_table_dump(NodeId(0)) {
        println!("\n--- Routing table of n0 ---\n{table}");
    }
    print_summary(&sim);
    Ok(sim)
}

/// Scenario: partition and reconnect
///
/// Two triangles joined by the n2 - n3 bridge. The bridge goes down long
/// enough for the old route to expire and a new discovery to fail, then
/// comes back and traffic flows again.
pub fn run_partition_scenario(config: SimConfig) -> Result<Simulation, SimError> {
    info!("=== Running Partition Scenario ===");
    let topology = from_edges(&[
        // Cluster 1
        (0, 1),
        (0, 2),
        (1, 2),
        // Cluster 2
        (3, 4),
        (3, 5),
        (4, 5),
        // Bridge
        (2, 3),
    ]);
    println!("{}", topology.visualize());

    let mut sim = Simulation::new(&topology, config)?;

    println!("\n--- n0 sends to n5 (full connectivity) ---");
    sim.send(NodeId(0), NodeId(5))?;
    sim.run_for(Duration::from_secs(1));
    println!("  Delivered: {}", sim.stats.packets_delivered);

    println!("\n--- Bridge n2 - n3 goes down ---");
    sim.break_link(NodeId(2), NodeId(3));
    sim.run_for(Duration::from_secs(4));

    println!("\n--- n0 sends to n5 (partitioned) ---");
    sim.send(NodeId(0), NodeId(5))?;
    sim.run_for(Duration::from_secs(14));
    println!("  Failed: {}", sim.stats.packets_failed);

    println!("\n--- Bridge comes back ---");
    sim.restore_link(NodeId(2), NodeId(3));
    sim.run_for(Duration::from_secs(1));
    sim.send(NodeId(0), NodeId(5))?;
    sim.run_for(Duration::from_secs(3));
    println!("  Delivered: {}", sim.stats.packets_delivered);

    print_summary(&sim);
    Ok(sim)
}

/// Scenario: random flows over a random topology
pub fn run_traffic_scenario(
    nodes: usize,
    link_probability: f64,
    flows: usize,
    seed: u64,
    config: SimConfig,
) -> Result<Simulation, SimError> {
    info!(nodes, flows, seed, "=== Running Traffic Scenario ===");
    let topology = TopologyBuilder::new(nodes.max(2)).random(link_probability, seed);
    println!("{}", topology.visualize());

    let mut sim = Simulation::new(&topology, config)?;
    let ids = topology.node_ids();
    let mut rng = StdRng::seed_from_u64(seed);

    for flow in 0..flows {
        let from = ids[rng.random_range(0..ids.len())];
        let to = ids[rng.random_range(0..ids.len())];
        if from == to {
            continue;
        }
        let start = Duration::from_millis(rng.random_range(0..5_000));
        for i in 0..5u32 {
            sim.send_after(start + Duration::from_millis(200) * i, from, to)?;
        }
        info!(flow, from = %from, to = %to, ?start, "Flow scheduled");
    }

    for second in 1..=15 {
        sim.run_for(Duration::from_secs(1));
        if second % 5 == 0 {
            println!("  {}", sim.state_summary());
        }
    }
    print_summary(&sim);
    Ok(sim)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SimConfig {
        SimConfig::default()
    }

    #[test]
    fn test_line_scenario_delivers_everything() {
        let sim = run_line_scenario(5, 4, config()).unwrap();
        assert_eq!(sim.stats.packets_sent, 4);
        assert_eq!(sim.stats.packets_delivered, 4);
        assert_eq!(sim.stats.total_hops, 16);
    }

    #[test]
    fn test_broadcast_scenario_reaches_each_node_once() {
        let sim = run_broadcast_scenario(3, 3, config()).unwrap();
        assert_eq!(sim.stats.broadcasts_sent, 1);
        assert_eq!(sim.stats.broadcast_deliveries, 8);
    }

    #[test]
    fn test_unreachable_scenario_fails_packet() {
        let sim = run_unreachable_scenario(config()).unwrap();
        assert_eq!(sim.stats.packets_delivered, 0);
        assert_eq!(sim.stats.packets_failed, 1);
        assert_eq!(sim.stats.route_replies, 0);
    }

    #[test]
    fn test_link_break_scenario_recovers() {
        let sim = run_link_break_scenario(config()).unwrap();
        assert!(sim.stats.packets_lost >= 1);
        assert!(sim.engine_totals().link_failures >= 1);
        assert!(sim.stats.packets_delivered >= 25);
        // Packets after the break go around the ring
        assert!(sim
            .event_log
            .iter()
            .any(|e| matches!(e, crate::types::NetworkEvent::Delivered { hops: 4, .. })));
    }

    #[test]
    fn test_partition_scenario() {
        let sim = run_partition_scenario(config()).unwrap();
        assert_eq!(sim.stats.packets_sent, 3);
        assert_eq!(sim.stats.packets_delivered, 2);
        assert_eq!(sim.stats.packets_failed, 1);
    }

    #[test]
    fn test_traffic_scenario_is_reproducible() {
        let a = run_traffic_scenario(10, 0.3, 4, 11, config()).unwrap();
        let b = run_traffic_scenario(10, 0.3, 4, 11, config()).unwrap();
        assert_eq!(a.stats.packets_sent, b.stats.packets_sent);
        assert_eq!(a.stats.packets_delivered, b.stats.packets_delivered);
        assert_eq!(a.event_log, b.event_log);
    }
}
