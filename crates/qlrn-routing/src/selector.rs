//! Extension points for learned route selection and route discovery
//!
//! The engine does not define how routes are scored or how route requests
//! look on the wire. It consumes two narrow traits instead:
//!
//! - [`NextHopSelector`]: given the usable one-hop neighbors, name the
//!   preferred next hop toward a destination. This is where a learned
//!   score (for example a Q-table) plugs in.
//! - [`RouteDiscovery`]: send a route request with a given search TTL.
//!   Fire-and-forget; replies come back through
//!   [`RoutingEngine::on_route_discovered`](crate::RoutingEngine::on_route_discovered).

use std::net::Ipv4Addr;

use qlrn_core::InterfaceIndex;
use tracing::debug;

use crate::table::RouteEntry;

/// A usable one-hop neighbor offered to a [`NextHopSelector`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteCandidate {
    /// Neighbor address
    pub next_hop: Ipv4Addr,
    /// Interface the neighbor is reachable on
    pub interface: InterfaceIndex,
    /// Hop count of the table route through this neighbor, if any
    pub hop_count: u16,
    /// Learned cost, lower is better
    pub cost: Option<u32>,
}

impl From<&RouteEntry> for RouteCandidate {
    fn from(entry: &RouteEntry) -> Self {
        Self {
            next_hop: entry.next_hop,
            interface: entry.interface,
            hop_count: entry.hop_count,
            cost: entry.cost,
        }
    }
}

/// Chooses the next hop for forwarded and dequeued packets
pub trait NextHopSelector: Send + Sync {
    /// Preferred next hop toward `destination`
    ///
    /// `candidates` are VALID, non-blacklisted one-hop routes. Returning
    /// `None`, or an address not among the candidates, falls back to the
    /// table's own route.
    fn select(&self, destination: Ipv4Addr, candidates: &[RouteCandidate]) -> Option<Ipv4Addr>;
}

/// Always defers to the routing table
#[derive(Debug, Clone, Copy, Default)]
pub struct TableSelector;

impl NextHopSelector for TableSelector {
    fn select(&self, _destination: Ipv4Addr, _candidates: &[RouteCandidate]) -> Option<Ipv4Addr> {
        None
    }
}

/// Prefers the candidate with the lowest learned cost
///
/// Ties are broken by hop count, then by address. Candidates without a
/// cost are never preferred; if no candidate has one, the table decides.
#[derive(Debug, Clone, Copy, Default)]
pub struct LowestCostSelector;

impl NextHopSelector for LowestCostSelector {
    fn select(&self, _destination: Ipv4Addr, candidates: &[RouteCandidate]) -> Option<Ipv4Addr> {
        candidates
            .iter()
            .filter_map(|c| c.cost.map(|cost| (cost, c.hop_count, u32::from(c.next_hop), c)))
            .min_by_key(|(cost, hops, addr, _)| (*cost, *hops, *addr))
            .map(|(_, _, _, c)| c.next_hop)
    }
}

/// A route request to be put on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteRequest {
    /// Destination being searched for
    pub destination: Ipv4Addr,
    /// Search radius
    pub ttl: u16,
    /// Attempts at network diameter so far
    pub attempt: u8,
    /// Last known destination sequence number, if any
    pub known_seq_no: Option<u32>,
}

/// Sends route requests
pub trait RouteDiscovery: Send + Sync {
    /// Broadcast a route request; must not block
    fn send_request(&self, request: RouteRequest);
}

/// Discovery hook that only logs
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingDiscovery;

impl RouteDiscovery for LoggingDiscovery {
    fn send_request(&self, request: RouteRequest) {
        debug!(
            dst = %request.destination,
            ttl = request.ttl,
            attempt = request.attempt,
            "Route request"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(last: u8, hops: u16, cost: Option<u32>) -> RouteCandidate {
        RouteCandidate {
            next_hop: Ipv4Addr::new(10, 0, 0, last),
            interface: InterfaceIndex::new(1),
            hop_count: hops,
            cost,
        }
    }

    #[test]
    fn test_table_selector_defers() {
        let candidates = [candidate(2, 1, Some(1))];
        assert_eq!(TableSelector.select(Ipv4Addr::new(10, 0, 0, 9), &candidates), None);
    }

    #[test]
    fn test_lowest_cost_wins() {
        let candidates = [
            candidate(2, 1, Some(30)),
            candidate(3, 1, Some(10)),
            candidate(4, 1, None),
        ];
        assert_eq!(
            LowestCostSelector.select(Ipv4Addr::new(10, 0, 0, 9), &candidates),
            Some(Ipv4Addr::new(10, 0, 0, 3))
        );
    }

    #[test]
    fn test_cost_tie_broken_by_hops() {
        let candidates = [candidate(2, 3, Some(10)), candidate(3, 1, Some(10))];
        assert_eq!(
            LowestCostSelector.select(Ipv4Addr::new(10, 0, 0, 9), &candidates),
            Some(Ipv4Addr::new(10, 0, 0, 3))
        );
    }

    #[test]
    fn test_no_costs_defers() {
        let candidates = [candidate(2, 1, None)];
        assert_eq!(
            LowestCostSelector.select(Ipv4Addr::new(10, 0, 0, 9), &candidates),
            None
        );
    }
}
