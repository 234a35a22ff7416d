//! Radio topology definitions
//!
//! A [`Topology`] is the undirected "in radio range" graph between nodes.
//! Builders cover the usual shapes:
//! - Line: each node hears its predecessor and successor
//! - Ring: a line whose ends hear each other
//! - Star: node 0 hears everyone
//! - Grid: rows of fixed width, 4-neighborhood
//! - Random: seeded Erdős–Rényi graph
//! - Custom: built from an edge list

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::types::{MAX_NODES, NodeId};

/// Undirected radio-range graph
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Topology {
    adjacency: BTreeMap<NodeId, BTreeSet<NodeId>>,
}

impl Topology {
    /// Create an empty topology
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node with no links
    pub fn add_node(&mut self, id: NodeId) {
        self.adjacency.entry(id).or_default();
    }

    /// Add a bidirectional link
    pub fn connect(&mut self, a: NodeId, b: NodeId) {
        if a == b {
            return; // No self-loops
        }
        self.adjacency.entry(a).or_default().insert(b);
        self.adjacency.entry(b).or_default().insert(a);
    }

    /// Remove a link; returns whether it existed
    pub fn disconnect(&mut self, a: NodeId, b: NodeId) -> bool {
        let removed = self
            .adjacency
            .get_mut(&a)
            .is_some_and(|set| set.remove(&b));
        if let Some(set) = self.adjacency.get_mut(&b) {
            set.remove(&a);
        }
        removed
    }

    /// Nodes in range of `node`
    pub fn neighbors(&self, node: NodeId) -> Option<&BTreeSet<NodeId>> {
        self.adjacency.get(&node)
    }

    /// Whether two nodes are in range of each other
    pub fn are_connected(&self, a: NodeId, b: NodeId) -> bool {
        self.adjacency
            .get(&a)
            .is_some_and(|neighbors| neighbors.contains(&b))
    }

    /// Whether the node exists
    pub fn contains(&self, node: NodeId) -> bool {
        self.adjacency.contains_key(&node)
    }

    /// All node IDs, ascending
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.adjacency.keys().copied().collect()
    }

    /// Number of nodes
    pub fn node_count(&self) -> usize {
        self.adjacency.len()
    }

    /// Number of links
    pub fn edge_count(&self) -> usize {
        self.adjacency.values().map(BTreeSet::len).sum::<usize>() / 2
    }

    /// All links, each once with the lower ID first
    pub fn edges(&self) -> Vec<(NodeId, NodeId)> {
        self.adjacency
            .iter()
            .flat_map(|(a, set)| set.iter().filter(move |b| a < *b).map(move |b| (*a, *b)))
            .collect()
    }

    /// Fewest-hop path from `from` to `to`, both ends included
    ///
    /// Neighbors are explored in ascending order, so among equal-length
    /// paths the one through lower IDs wins.
    pub fn shortest_path(&self, from: NodeId, to: NodeId) -> Option<Vec<NodeId>> {
        if !self.contains(from) || !self.contains(to) {
            return None;
        }
        let mut previous: BTreeMap<NodeId, NodeId> = BTreeMap::new();
        let mut visited = BTreeSet::from([from]);
        let mut frontier = VecDeque::from([from]);

        while let Some(node) = frontier.pop_front() {
            if node == to {
                let mut path = vec![to];
                let mut cursor = to;
                while let Some(prev) = previous.get(&cursor) {
                    path.push(*prev);
                    cursor = *prev;
                }
                path.reverse();
                return Some(path);
            }
            for next in self.adjacency.get(&node).into_iter().flatten() {
                if visited.insert(*next) {
                    previous.insert(*next, node);
                    frontier.push_back(*next);
                }
            }
        }
        None
    }

    /// Print a simple ASCII visualization
    pub fn visualize(&self) -> String {
        let mut output = String::new();
        output.push_str("Topology:\n");
        output.push_str(&format!("  Nodes: {}\n", self.node_count()));
        output.push_str(&format!("  Links: {}\n\n", self.edge_count()));

        for (node, neighbors) in &self.adjacency {
            let neighbor_str: Vec<String> = neighbors.iter().map(|n| n.to_string()).collect();
            output.push_str(&format!(
                "  {} ({}) -> [{}]\n",
                node,
                node.address(),
                neighbor_str.join(", ")
            ));
        }
        output
    }
}

/// Builder for common topologies
pub struct TopologyBuilder {
    node_count: u16,
}

impl TopologyBuilder {
    /// Create a builder for `node_count` nodes, capped at what the subnet
    /// can address
    pub fn new(node_count: usize) -> Self {
        let node_count = u16::try_from(node_count)
            .unwrap_or(MAX_NODES)
            .min(MAX_NODES);
        Self { node_count }
    }

    fn empty(&self) -> Topology {
        let mut topology = Topology::new();
        for id in 0..self.node_count {
            topology.add_node(NodeId(id));
        }
        topology
    }

    /// n0 - n1 - n2 - ...
    pub fn line(self) -> Topology {
        let mut topology = self.empty();
        for id in 1..self.node_count {
            topology.connect(NodeId(id - 1), NodeId(id));
        }
        topology
    }

    /// n0 - n1 - ... - n(k) - n0
    pub fn ring(self) -> Topology {
        let count = self.node_count;
        let mut topology = self.line();
        if count > 2 {
            topology.connect(NodeId(count - 1), NodeId(0));
        }
        topology
    }

    /// n0 in the center, every other node hears only n0
    pub fn star(self) -> Topology {
        let mut topology = self.empty();
        for id in 1..self.node_count {
            topology.connect(NodeId(0), NodeId(id));
        }
        topology
    }

    /// Rows of `width` nodes; each node hears its left, right, upper and
    /// lower neighbor
    pub fn grid(self, width: u16) -> Topology {
        let mut topology = self.empty();
        let width = width.max(1);
        for id in 0..self.node_count {
            if id % width != 0 {
                topology.connect(NodeId(id - 1), NodeId(id));
            }
            if id >= width {
                topology.connect(NodeId(id - width), NodeId(id));
            }
        }
        topology
    }

    /// Each pair is linked with probability `link_probability`
    ///
    /// Isolated nodes get one extra link so the graph has no singletons.
    pub fn random(self, link_probability: f64, seed: u64) -> Topology {
        let mut topology = self.empty();
        let mut rng = StdRng::seed_from_u64(seed);
        let p = link_probability.clamp(0.0, 1.0);

        for a in 0..self.node_count {
            for b in (a + 1)..self.node_count {
                if rng.random_bool(p) {
                    topology.connect(NodeId(a), NodeId(b));
                }
            }
        }

        if self.node_count > 1 {
            for id in 0..self.node_count {
                let isolated = topology
                    .neighbors(NodeId(id))
                    .is_none_or(BTreeSet::is_empty);
                if isolated {
                    let offset = rng.random_range(1..self.node_count);
                    let other = (u32::from(id) + u32::from(offset)) % u32::from(self.node_count);
                    topology.connect(NodeId(id), NodeId(other as u16));
                }
            }
        }
        topology
    }
}

/// Create a custom topology from an edge list
pub fn from_edges(edges: &[(u16, u16)]) -> Topology {
    let mut topology = Topology::new();
    for (a, b) in edges {
        topology.add_node(NodeId(*a));
        topology.add_node(NodeId(*b));
        topology.connect(NodeId(*a), NodeId(*b));
    }
    topology
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_topology() {
        let topology = TopologyBuilder::new(4).line();
        assert_eq!(topology.node_count(), 4);
        assert_eq!(topology.edge_count(), 3);
        assert!(topology.are_connected(NodeId(1), NodeId(2)));
        assert!(!topology.are_connected(NodeId(0), NodeId(3)));
    }

    #[test]
    fn test_ring_topology() {
        let topology = TopologyBuilder::new(4).ring();
        assert_eq!(topology.edge_count(), 4);
        assert!(topology.are_connected(NodeId(3), NodeId(0))); // Wrap around
        assert!(!topology.are_connected(NodeId(0), NodeId(2)));
    }

    #[test]
    fn test_grid_topology() {
        // 0 1 2
        // 3 4 5
        let topology = TopologyBuilder::new(6).grid(3);
        assert_eq!(topology.edge_count(), 7);
        assert!(topology.are_connected(NodeId(1), NodeId(4)));
        assert!(!topology.are_connected(NodeId(2), NodeId(3))); // No row wrap
        assert_eq!(topology.neighbors(NodeId(4)).map(BTreeSet::len), Some(3));
    }

    #[test]
    fn test_random_is_seeded_and_connected_enough() {
        let a = TopologyBuilder::new(12).random(0.2, 7);
        let b = TopologyBuilder::new(12).random(0.2, 7);
        assert_eq!(a, b);
        for id in a.node_ids() {
            assert!(!a.neighbors(id).unwrap().is_empty());
        }
    }

    #[test]
    fn test_shortest_path_prefers_lower_ids() {
        // 0 - 1 - 3 and 0 - 2 - 3
        let topology = from_edges(&[(0, 1), (1, 3), (0, 2), (2, 3)]);
        assert_eq!(
            topology.shortest_path(NodeId(0), NodeId(3)),
            Some(vec![NodeId(0), NodeId(1), NodeId(3)])
        );
        assert_eq!(
            topology.shortest_path(NodeId(2), NodeId(2)),
            Some(vec![NodeId(2)])
        );
    }

    #[test]
    fn test_shortest_path_none_when_partitioned() {
        let mut topology = from_edges(&[(0, 1), (2, 3)]);
        assert!(topology.shortest_path(NodeId(0), NodeId(3)).is_none());

        topology.connect(NodeId(1), NodeId(2));
        assert_eq!(topology.shortest_path(NodeId(0), NodeId(3)).map(|p| p.len()), Some(4));

        assert!(topology.disconnect(NodeId(2), NodeId(1)));
        assert!(!topology.disconnect(NodeId(2), NodeId(1)));
        assert!(topology.shortest_path(NodeId(0), NodeId(3)).is_none());
    }

    #[test]
    fn test_edges_listed_once() {
        let topology = TopologyBuilder::new(3).ring();
        assert_eq!(
            topology.edges(),
            vec![(NodeId(0), NodeId(1)), (NodeId(0), NodeId(2)), (NodeId(1), NodeId(2))]
        );
    }
}
