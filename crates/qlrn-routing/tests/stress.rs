//! Stress tests for qlrn-routing
//!
//! These tests exercise the routing table, duplicate detector and pending
//! queue under volume and concurrent access.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use qlrn_core::{
    Expiry, InterfaceAddress, InterfaceIndex, Ipv4Header, Packet, PacketId, Route, SocketError,
};
use qlrn_routing::{
    DuplicatePacketDetection, PendingPacketQueue, QueueEntry, RouteEntry, RouteFlag, RoutingTable,
};

// Test helpers
fn make_addr(i: u32) -> Ipv4Addr {
    Ipv4Addr::from(0x0A00_0000 | (i & 0x00FF_FFFF))
}

fn make_route(dest: u32, next_hop: u32, hops: u16, now: Instant) -> RouteEntry {
    RouteEntry::new(
        make_addr(dest),
        make_addr(next_hop),
        InterfaceIndex::new(1),
        InterfaceAddress::new(make_addr(1), 8),
        hops,
        Expiry::after(now, Duration::from_secs(30)),
    )
}

#[test]
fn test_routing_table_throughput() {
    const ROUTE_COUNT: u32 = 10_000;

    let table = RoutingTable::new(Duration::from_secs(1));
    let now = Instant::now();

    let start = Instant::now();
    for i in 0..ROUTE_COUNT {
        table
            .add_route(make_route(i + 2, (i % 50) + 2, (i % 30) as u16 + 1, now), now)
            .unwrap();
    }
    println!("Inserted {} routes in {:?}", ROUTE_COUNT, start.elapsed());
    assert_eq!(table.len(), ROUTE_COUNT as usize);

    let start = Instant::now();
    for i in 0..ROUTE_COUNT {
        assert!(table.lookup_valid_route(make_addr(i + 2), now).is_some());
    }
    println!("Looked up {} routes in {:?}", ROUTE_COUNT, start.elapsed());

    // Every route through next hop .2 goes down together
    let affected = table.invalidate_routes_via(make_addr(2), now);
    assert_eq!(affected.len(), (ROUTE_COUNT / 50) as usize);
    for dst in affected {
        assert_eq!(table.lookup_route(dst).unwrap().flag, RouteFlag::Invalid);
    }
}

#[test]
fn test_routing_table_concurrent_access() {
    const THREADS: u32 = 8;
    const PER_THREAD: u32 = 1_000;

    let table = Arc::new(RoutingTable::new(Duration::from_secs(1)));
    let now = Instant::now();

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let table = Arc::clone(&table);
            thread::spawn(move || {
                for i in 0..PER_THREAD {
                    let dest = t * PER_THREAD + i + 2;
                    table.add_route(make_route(dest, 2, 2, now), now).unwrap();
                    assert!(table.lookup_valid_route(make_addr(dest), now).is_some());
                    if i % 4 == 0 {
                        assert!(table.delete_route(make_addr(dest)));
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(table.len(), (THREADS * PER_THREAD * 3 / 4) as usize);
}

#[test]
fn test_lazy_expiry_at_scale() {
    let table = RoutingTable::new(Duration::from_secs(5));
    let now = Instant::now();
    for i in 0..5_000 {
        table.add_route(make_route(i + 2, 2, 1, now), now).unwrap();
    }

    let later = now + Duration::from_secs(31);
    for i in 0..5_000 {
        assert!(table.lookup_valid_route(make_addr(i + 2), later).is_none());
    }
    // Downgraded, not yet deleted
    assert_eq!(table.len(), 5_000);

    table.purge(later + Duration::from_secs(6));
    assert!(table.is_empty());
}

#[test]
fn test_duplicate_detection_concurrent_first_wins() {
    const THREADS: usize = 8;
    const PACKETS: u64 = 2_000;

    let dpd = Arc::new(DuplicatePacketDetection::new(Duration::from_secs(20)));
    let fresh = Arc::new(AtomicUsize::new(0));
    let now = Instant::now();

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let dpd = Arc::clone(&dpd);
            let fresh = Arc::clone(&fresh);
            thread::spawn(move || {
                for uid in 0..PACKETS {
                    if !dpd.is_duplicate(PacketId::new(uid), make_addr(5), now) {
                        fresh.fetch_add(1, Ordering::Relaxed);
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(fresh.load(Ordering::Relaxed), PACKETS as usize);
    assert_eq!(dpd.len(), PACKETS as usize);
    assert_eq!(dpd.duplicates(), PACKETS * (THREADS as u64 - 1));
}

#[test]
fn test_pending_queue_never_exceeds_capacity() {
    const CAPACITY: usize = 64;
    const PACKETS: u64 = 10_000;

    let failed = Arc::new(AtomicUsize::new(0));
    let mut queue = PendingPacketQueue::new(CAPACITY, Duration::from_secs(10));
    let now = Instant::now();

    for uid in 0..PACKETS {
        let on_error = Arc::clone(&failed);
        let entry = QueueEntry::new(
            Packet::new(PacketId::new(uid), vec![0u8; 32]),
            Ipv4Header::udp(make_addr(1), make_addr((uid % 16) as u32 + 2), 64),
            Box::new(|_: Route, _: Packet, _: Ipv4Header| {}),
            Box::new(move |_: Packet, _: Ipv4Header, _: SocketError| {
                on_error.fetch_add(1, Ordering::Relaxed);
            }),
        );
        assert!(queue.enqueue(entry, now));
        assert!(queue.len() <= CAPACITY);
    }

    assert_eq!(queue.len(), CAPACITY);
    assert_eq!(queue.evicted(), PACKETS - CAPACITY as u64);
    // Evictions are silent
    assert_eq!(failed.load(Ordering::Relaxed), 0);

    // The survivors are the newest packets
    let mut survivors = Vec::new();
    for dst in 2..18 {
        while let Some(entry) = queue.dequeue(make_addr(dst), now) {
            survivors.push(entry.packet.id.0);
        }
    }
    survivors.sort_unstable();
    let expected: Vec<u64> = (PACKETS - CAPACITY as u64..PACKETS).collect();
    assert_eq!(survivors, expected);
}
