//! Routing table with route lifecycle states
//!
//! The [`RoutingTable`] holds at most one [`RouteEntry`] per destination.
//! Each entry moves through the states of [`RouteFlag`]:
//!
//! ```text
//! (none) --discovery--> IN_SEARCH --reply--> VALID --timeout/failure--> INVALID --delete period--> (none)
//! ```
//!
//! ## Lazy expiry
//!
//! Validity is checked against the clock at read time.
//! [`RoutingTable::lookup_valid_route`] never returns an entry whose
//! lifetime has passed, and downgrades such an entry to INVALID as a side
//! effect. [`RoutingTable::purge`] only exists to bound memory.

use std::fmt::{self, Write as _};
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use qlrn_core::{Expiry, InterfaceAddress, InterfaceIndex, Route};
use tracing::{debug, trace};

use crate::error::{TableError, TableResult};

/// Lifecycle state of a route
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteFlag {
    /// Usable for forwarding
    Valid,
    /// Known but not usable; kept for its history until deleted
    Invalid,
    /// Discovery in progress
    InSearch,
}

impl fmt::Display for RouteFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Valid => "UP",
            Self::Invalid => "DOWN",
            Self::InSearch => "IN_SEARCH",
        };
        f.write_str(s)
    }
}

/// Unit used when printing lifetimes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeUnit {
    #[default]
    Seconds,
    Milliseconds,
}

impl TimeUnit {
    fn format(self, d: Duration) -> String {
        match self {
            Self::Seconds => format!("{:.3}s", d.as_secs_f64()),
            Self::Milliseconds => format!("{}ms", d.as_millis()),
        }
    }
}

/// A route to one destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEntry {
    /// Destination address, the table key
    pub destination: Ipv4Addr,
    /// Next hop toward the destination
    pub next_hop: Ipv4Addr,
    /// Output interface
    pub interface: InterfaceIndex,
    /// Address of the output interface
    pub local: InterfaceAddress,
    /// Hops to the destination; the current search TTL while IN_SEARCH
    pub hop_count: u16,
    /// Lifecycle state
    pub flag: RouteFlag,
    /// Whether `seq_no` carries information
    pub seq_known: bool,
    /// Destination sequence number
    pub seq_no: u32,
    /// Learned route cost, lower is better
    pub cost: Option<u32>,
    /// Absolute expiry
    pub lifetime: Expiry,
    /// Discovery attempts at network diameter since the last reset
    pub rreq_count: u8,
    /// Unidirectional-link blacklist expiry
    pub blacklist_until: Option<Instant>,
}

impl RouteEntry {
    /// Create a VALID route
    pub fn new(
        destination: Ipv4Addr,
        next_hop: Ipv4Addr,
        interface: InterfaceIndex,
        local: InterfaceAddress,
        hop_count: u16,
        lifetime: Expiry,
    ) -> Self {
        Self {
            destination,
            next_hop,
            interface,
            local,
            hop_count,
            flag: RouteFlag::Valid,
            seq_known: false,
            seq_no: 0,
            cost: None,
            lifetime,
            rreq_count: 0,
            blacklist_until: None,
        }
    }

    /// Create an IN_SEARCH placeholder for a destination under discovery
    pub fn searching(
        destination: Ipv4Addr,
        interface: InterfaceIndex,
        local: InterfaceAddress,
        ttl: u16,
        lifetime: Expiry,
    ) -> Self {
        Self {
            flag: RouteFlag::InSearch,
            ..Self::new(
                destination,
                Ipv4Addr::UNSPECIFIED,
                interface,
                local,
                ttl,
                lifetime,
            )
        }
    }

    /// Attach a known sequence number
    pub fn with_sequence(mut self, seq_no: u32) -> Self {
        self.seq_known = true;
        self.seq_no = seq_no;
        self
    }

    /// Attach a learned cost
    pub fn with_cost(mut self, cost: Option<u32>) -> Self {
        self.cost = cost;
        self
    }

    /// The forwarding decision this entry represents
    pub fn route(&self) -> Route {
        Route {
            destination: self.destination,
            source: self.local.local(),
            gateway: self.next_hop,
            output_interface: self.interface,
        }
    }

    /// VALID and not past its lifetime
    pub fn is_usable(&self, now: Instant) -> bool {
        self.flag == RouteFlag::Valid && !self.lifetime.is_expired(now)
    }

    /// Whether the next hop is currently blacklisted
    pub fn is_blacklisted(&self, now: Instant) -> bool {
        self.blacklist_until.is_some_and(|until| now <= until)
    }

    /// Whether the entry carries freshness information (sequence or score)
    pub fn has_freshness(&self) -> bool {
        self.seq_known || self.cost.is_some()
    }

    /// Downgrade to INVALID, keeping the entry for `grace`
    pub fn invalidate(&mut self, now: Instant, grace: Duration) {
        if self.flag == RouteFlag::Invalid {
            return;
        }
        self.flag = RouteFlag::Invalid;
        self.lifetime = Expiry::after(now, grace);
    }
}

/// Destination-keyed routing table
pub struct RoutingTable {
    /// Routes indexed by destination
    routes: DashMap<Ipv4Addr, RouteEntry>,
    /// How long an expired VALID route lingers as INVALID
    bad_link_lifetime: Duration,
}

impl RoutingTable {
    /// Create a new routing table
    ///
    /// # Arguments
    /// * `bad_link_lifetime` - How long an expired route is kept as INVALID before deletion
    pub fn new(bad_link_lifetime: Duration) -> Self {
        Self {
            routes: DashMap::new(),
            bad_link_lifetime,
        }
    }

    /// Insert a route
    ///
    /// Replacing an INVALID or expired entry is allowed. Replacing a live
    /// one is a contract violation.
    pub fn add_route(&self, entry: RouteEntry, now: Instant) -> TableResult<()> {
        let destination = entry.destination;
        match self.routes.entry(destination) {
            Entry::Occupied(mut slot) => {
                let existing = slot.get();
                if existing.flag != RouteFlag::Invalid && !existing.lifetime.is_expired(now) {
                    return Err(TableError::DuplicateDestination(destination));
                }
                trace!(dst = %destination, "Replacing stale route");
                slot.insert(entry);
            }
            Entry::Vacant(slot) => {
                trace!(dst = %destination, next_hop = %entry.next_hop, "Adding route");
                slot.insert(entry);
            }
        }
        Ok(())
    }

    /// Get the entry for a destination regardless of its state
    pub fn lookup_route(&self, destination: Ipv4Addr) -> Option<RouteEntry> {
        self.routes.get(&destination).map(|entry| entry.value().clone())
    }

    /// Get the entry for a destination only if it is usable now
    ///
    /// An expired VALID entry is downgraded to INVALID before returning `None`.
    pub fn lookup_valid_route(&self, destination: Ipv4Addr, now: Instant) -> Option<RouteEntry> {
        let mut entry = self.routes.get_mut(&destination)?;
        if entry.flag != RouteFlag::Valid {
            return None;
        }
        if entry.lifetime.is_expired(now) {
            debug!(dst = %destination, "Route expired on lookup");
            entry.invalidate(now, self.bad_link_lifetime);
            return None;
        }
        Some(entry.value().clone())
    }

    /// Replace the stored entry for `entry.destination`
    pub fn update(&self, entry: RouteEntry) -> TableResult<()> {
        match self.routes.get_mut(&entry.destination) {
            Some(mut slot) => {
                *slot = entry;
                Ok(())
            }
            None => Err(TableError::NoSuchRoute(entry.destination)),
        }
    }

    /// Remove the entry for a destination
    ///
    /// Returns `true` if an entry was removed.
    pub fn delete_route(&self, destination: Ipv4Addr) -> bool {
        self.routes.remove(&destination).is_some()
    }

    /// Remove every entry that points out of `iface`
    pub fn delete_all_routes_from_interface(&self, iface: InterfaceIndex) -> usize {
        let before = self.routes.len();
        self.routes.retain(|_, entry| entry.interface != iface);
        let removed = before.saturating_sub(self.routes.len());
        debug!(iface = %iface, removed, "Deleted routes from interface");
        removed
    }

    /// Blacklist every route whose next hop is `neighbor`
    ///
    /// Returns the number of entries marked.
    pub fn mark_link_as_unidirectional(
        &self,
        neighbor: Ipv4Addr,
        blacklist: Duration,
        now: Instant,
    ) -> usize {
        let until = now + blacklist;
        let mut marked = 0;
        for mut entry in self.routes.iter_mut() {
            if entry.next_hop == neighbor {
                entry.blacklist_until = Some(until);
                marked += 1;
            }
        }
        debug!(neighbor = %neighbor, marked, ?blacklist, "Link marked unidirectional");
        marked
    }

    /// Lift the blacklist on routes through `neighbor`
    pub fn clear_blacklist(&self, neighbor: Ipv4Addr) {
        for mut entry in self.routes.iter_mut() {
            if entry.next_hop == neighbor {
                entry.blacklist_until = None;
            }
        }
    }

    /// Invalidate every VALID route whose next hop is `next_hop`
    ///
    /// Returns the affected destinations.
    pub fn invalidate_routes_via(&self, next_hop: Ipv4Addr, now: Instant) -> Vec<Ipv4Addr> {
        let mut affected = Vec::new();
        for mut entry in self.routes.iter_mut() {
            if entry.next_hop == next_hop
                && entry.flag == RouteFlag::Valid
                && !entry.lifetime.is_never()
            {
                entry.invalidate(now, self.bad_link_lifetime);
                affected.push(entry.destination);
            }
        }
        affected
    }

    /// VALID one-hop routes to neighbors that are not blacklisted
    ///
    /// Permanent entries (loopback, broadcast) are not neighbors.
    pub fn neighbor_routes(&self, now: Instant) -> Vec<RouteEntry> {
        self.routes
            .iter()
            .filter(|entry| {
                entry.hop_count == 1
                    && entry.next_hop == entry.destination
                    && !entry.lifetime.is_never()
                    && entry.is_usable(now)
                    && !entry.is_blacklisted(now)
            })
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Sweep expired entries
    ///
    /// An expired VALID entry is first downgraded to INVALID for the
    /// bad-link lifetime; an expired INVALID entry is dropped. IN_SEARCH
    /// entries belong to the route request timer and are never purged.
    pub fn purge(&self, now: Instant) {
        let bad_link_lifetime = self.bad_link_lifetime;
        self.routes.retain(|_, entry| {
            if entry.flag == RouteFlag::InSearch || !entry.lifetime.is_expired(now) {
                return true;
            }
            if entry.flag == RouteFlag::Valid {
                entry.invalidate(now, bad_link_lifetime);
                return true;
            }
            trace!(dst = %entry.destination, "Purging expired route");
            false
        });
    }

    /// Remove all entries
    pub fn clear(&self) {
        self.routes.clear();
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// All destinations with an entry
    pub fn destinations(&self) -> Vec<Ipv4Addr> {
        self.routes.iter().map(|entry| *entry.key()).collect()
    }

    /// Write a human-readable dump of the table
    pub fn print(&self, out: &mut impl fmt::Write, now: Instant, unit: TimeUnit) -> fmt::Result {
        let mut entries: Vec<RouteEntry> = self.routes.iter().map(|e| e.value().clone()).collect();
        entries.sort_by_key(|e| u32::from(e.destination));

        writeln!(
            out,
            "{:<16}{:<16}{:<8}{:<18}{:<10}{:<12}{:<6}{}",
            "Destination", "Gateway", "If", "Local", "Flag", "Expire", "Hops", "Cost"
        )?;
        for entry in entries {
            let expire = match entry.lifetime.remaining(now) {
                Some(left) => unit.format(left),
                None => "never".to_string(),
            };
            let mut flag = entry.flag.to_string();
            if entry.is_blacklisted(now) {
                flag.push('!');
            }
            let cost = entry.cost.map_or_else(|| "-".to_string(), |c| c.to_string());
            writeln!(
                out,
                "{:<16}{:<16}{:<8}{:<18}{:<10}{:<12}{:<6}{}",
                entry.destination.to_string(),
                entry.next_hop.to_string(),
                entry.interface.to_string(),
                entry.local.to_string(),
                flag,
                expire,
                entry.hop_count,
                cost
            )?;
        }
        Ok(())
    }

    /// Convenience wrapper returning the dump as a string
    pub fn dump(&self, now: Instant, unit: TimeUnit) -> String {
        let mut out = String::new();
        let _ = self.print(&mut out, now, unit);
        out
    }
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_addr(last: u8) -> Ipv4Addr {
        Ipv4Addr::new(10, 0, 0, last)
    }

    fn local() -> InterfaceAddress {
        InterfaceAddress::new(make_addr(1), 24)
    }

    fn make_route(dest: u8, next_hop: u8, hops: u16, now: Instant, secs: u64) -> RouteEntry {
        RouteEntry::new(
            make_addr(dest),
            make_addr(next_hop),
            InterfaceIndex::new(1),
            local(),
            hops,
            Expiry::after(now, Duration::from_secs(secs)),
        )
    }

    #[test]
    fn test_add_and_lookup() {
        let table = RoutingTable::default();
        let now = Instant::now();

        table.add_route(make_route(3, 2, 2, now, 10), now).unwrap();

        let entry = table.lookup_route(make_addr(3)).unwrap();
        assert_eq!(entry.next_hop, make_addr(2));
        assert_eq!(entry.hop_count, 2);
        assert_eq!(entry.route().gateway, make_addr(2));
        assert_eq!(entry.route().source, make_addr(1));
        assert!(table.lookup_valid_route(make_addr(3), now).is_some());
    }

    #[test]
    fn test_add_duplicate_rejected() {
        let table = RoutingTable::default();
        let now = Instant::now();

        table.add_route(make_route(3, 2, 2, now, 10), now).unwrap();
        let err = table.add_route(make_route(3, 4, 1, now, 10), now).unwrap_err();
        assert_eq!(err, TableError::DuplicateDestination(make_addr(3)));
        assert_eq!(table.len(), 1);
        assert_eq!(table.lookup_route(make_addr(3)).unwrap().next_hop, make_addr(2));
    }

    #[test]
    fn test_add_replaces_expired_or_invalid() {
        let table = RoutingTable::default();
        let now = Instant::now();

        table.add_route(make_route(3, 2, 2, now, 1), now).unwrap();
        let later = now + Duration::from_secs(2);
        table.add_route(make_route(3, 4, 1, later, 10), later).unwrap();
        assert_eq!(table.lookup_route(make_addr(3)).unwrap().next_hop, make_addr(4));

        let mut invalid = table.lookup_route(make_addr(3)).unwrap();
        invalid.invalidate(later, Duration::from_secs(30));
        table.update(invalid).unwrap();
        table.add_route(make_route(3, 5, 1, later, 10), later).unwrap();
        assert_eq!(table.lookup_route(make_addr(3)).unwrap().next_hop, make_addr(5));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_lazy_expiry_without_purge() {
        let table = RoutingTable::new(Duration::from_secs(5));
        let now = Instant::now();

        table.add_route(make_route(3, 2, 2, now, 3), now).unwrap();
        let later = now + Duration::from_secs(4);

        assert!(table.lookup_valid_route(make_addr(3), later).is_none());
        let entry = table.lookup_route(make_addr(3)).unwrap();
        assert_eq!(entry.flag, RouteFlag::Invalid);
        assert!(!entry.lifetime.is_expired(later));
    }

    #[test]
    fn test_update_missing_fails() {
        let table = RoutingTable::default();
        let now = Instant::now();
        let err = table.update(make_route(9, 2, 1, now, 1)).unwrap_err();
        assert_eq!(err, TableError::NoSuchRoute(make_addr(9)));
        assert!(table.is_empty());
    }

    #[test]
    fn test_delete_route() {
        let table = RoutingTable::default();
        let now = Instant::now();
        table.add_route(make_route(3, 2, 2, now, 10), now).unwrap();
        assert!(table.delete_route(make_addr(3)));
        assert!(!table.delete_route(make_addr(3)));
        assert!(table.lookup_route(make_addr(3)).is_none());
    }

    #[test]
    fn test_delete_all_routes_from_interface() {
        let table = RoutingTable::default();
        let now = Instant::now();
        table.add_route(make_route(3, 2, 2, now, 10), now).unwrap();
        let mut other = make_route(4, 2, 2, now, 10);
        other.interface = InterfaceIndex::new(2);
        table.add_route(other, now).unwrap();

        assert_eq!(table.delete_all_routes_from_interface(InterfaceIndex::new(1)), 1);
        assert!(table.lookup_route(make_addr(3)).is_none());
        assert!(table.lookup_route(make_addr(4)).is_some());
    }

    #[test]
    fn test_mark_link_as_unidirectional() {
        let table = RoutingTable::default();
        let now = Instant::now();
        table.add_route(make_route(2, 2, 1, now, 10), now).unwrap();
        table.add_route(make_route(3, 2, 2, now, 10), now).unwrap();
        table.add_route(make_route(4, 5, 2, now, 10), now).unwrap();

        let marked = table.mark_link_as_unidirectional(make_addr(2), Duration::from_secs(2), now);
        assert_eq!(marked, 2);
        assert!(table.lookup_route(make_addr(3)).unwrap().is_blacklisted(now));
        assert!(!table.lookup_route(make_addr(4)).unwrap().is_blacklisted(now));
        assert!(
            !table
                .lookup_route(make_addr(3))
                .unwrap()
                .is_blacklisted(now + Duration::from_secs(3))
        );
        // History is kept
        assert_eq!(table.lookup_route(make_addr(3)).unwrap().flag, RouteFlag::Valid);
        assert!(table.neighbor_routes(now).is_empty());
    }

    #[test]
    fn test_invalidate_routes_via() {
        let table = RoutingTable::default();
        let now = Instant::now();
        table.add_route(make_route(2, 2, 1, now, 10), now).unwrap();
        table.add_route(make_route(3, 2, 2, now, 10), now).unwrap();
        table.add_route(make_route(4, 5, 2, now, 10), now).unwrap();

        let mut affected = table.invalidate_routes_via(make_addr(2), now);
        affected.sort();
        assert_eq!(affected, vec![make_addr(2), make_addr(3)]);
        assert!(table.lookup_valid_route(make_addr(3), now).is_none());
        assert!(table.lookup_valid_route(make_addr(4), now).is_some());
    }

    #[test]
    fn test_purge_two_stage() {
        let table = RoutingTable::new(Duration::from_secs(1));
        let now = Instant::now();
        table.add_route(make_route(3, 2, 2, now, 1), now).unwrap();
        table
            .add_route(
                RouteEntry::new(
                    Ipv4Addr::LOCALHOST,
                    Ipv4Addr::LOCALHOST,
                    InterfaceIndex::new(0),
                    InterfaceAddress::loopback(),
                    1,
                    Expiry::Never,
                ),
                now,
            )
            .unwrap();

        let t1 = now + Duration::from_secs(2);
        table.purge(t1);
        assert_eq!(table.lookup_route(make_addr(3)).unwrap().flag, RouteFlag::Invalid);

        let t2 = t1 + Duration::from_secs(2);
        table.purge(t2);
        assert!(table.lookup_route(make_addr(3)).is_none());
        assert!(table.lookup_valid_route(Ipv4Addr::LOCALHOST, t2).is_some());
    }

    #[test]
    fn test_purge_keeps_searching_entries() {
        let table = RoutingTable::new(Duration::from_secs(1));
        let now = Instant::now();
        let searching = RouteEntry::searching(
            make_addr(9),
            InterfaceIndex::new(1),
            local(),
            35,
            Expiry::after(now, Duration::from_secs(5)),
        );
        table.add_route(searching, now).unwrap();

        table.purge(now + Duration::from_secs(30));
        assert_eq!(table.lookup_route(make_addr(9)).unwrap().flag, RouteFlag::InSearch);
    }

    #[test]
    fn test_at_most_one_entry_per_destination() {
        let table = RoutingTable::default();
        let now = Instant::now();
        for i in 0..20u8 {
            let _ = table.add_route(make_route(3, i, 1, now, 10), now);
            let _ = table.update(make_route(3, i, 2, now, 10));
            if i % 3 == 0 {
                table.delete_route(make_addr(3));
            }
            assert!(table.len() <= 1);
        }
    }

    #[test]
    fn test_print() {
        let table = RoutingTable::default();
        let now = Instant::now();
        table.add_route(make_route(3, 2, 2, now, 10), now).unwrap();
        let dump = table.dump(now, TimeUnit::Milliseconds);
        assert!(dump.starts_with("Destination"));
        assert!(dump.contains("10.0.0.3"));
        assert!(dump.contains("10000ms"));
        assert!(dump.contains("UP"));
    }
}
