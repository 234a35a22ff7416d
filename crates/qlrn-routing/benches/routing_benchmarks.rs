//! Routing engine performance benchmarks
//!
//! Benchmarks for the per-packet hot paths:
//! - Routing table lookups
//! - Duplicate detection
//! - Pending queue churn
//! - Control message encoding
//!
//! Run with: cargo bench -p qlrn-routing

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use qlrn_core::{
    Expiry, InterfaceAddress, InterfaceIndex, Ipv4Header, Packet, PacketId, Route, SocketError,
};
use qlrn_routing::{
    ControlMessage, DuplicatePacketDetection, Hello, PendingPacketQueue, QueueEntry, RouteEntry,
    RoutingTable,
};

fn make_addr(i: u32) -> Ipv4Addr {
    Ipv4Addr::from(0x0A00_0000 | (i & 0x00FF_FFFF))
}

fn populated_table(routes: u32, now: Instant) -> RoutingTable {
    let table = RoutingTable::new(Duration::from_secs(1));
    for i in 0..routes {
        let entry = RouteEntry::new(
            make_addr(i + 2),
            make_addr((i % 20) + 2),
            InterfaceIndex::new(1),
            InterfaceAddress::new(make_addr(1), 8),
            (i % 10) as u16 + 1,
            Expiry::after(now, Duration::from_secs(600)),
        );
        let _ = table.add_route(entry, now);
    }
    table
}

// ============================================================================
// Routing Table Benchmarks
// ============================================================================

fn bench_table(c: &mut Criterion) {
    let mut group = c.benchmark_group("routing_table");
    let now = Instant::now();

    for size in [100u32, 10_000] {
        let table = populated_table(size, now);
        group.bench_function(format!("lookup_valid_{size}"), |b| {
            let mut i = 0u32;
            b.iter(|| {
                i = (i + 1) % size;
                black_box(table.lookup_valid_route(make_addr(i + 2), now))
            })
        });
    }

    let table = populated_table(1_000, now);
    group.bench_function("neighbor_routes_1000", |b| {
        b.iter(|| black_box(table.neighbor_routes(now)))
    });

    group.finish();
}

// ============================================================================
// Duplicate Detection Benchmarks
// ============================================================================

fn bench_dpd(c: &mut Criterion) {
    let mut group = c.benchmark_group("duplicate_detection");
    let now = Instant::now();

    group.bench_function("fresh_packets", |b| {
        let dpd = DuplicatePacketDetection::new(Duration::from_secs(20));
        let mut uid = 0u64;
        b.iter(|| {
            uid += 1;
            // Keep the cache bounded so the sweep cost stays comparable
            if uid % 1_000 == 0 {
                dpd.sweep(now + Duration::from_secs(21));
            }
            black_box(dpd.is_duplicate(PacketId::new(uid), make_addr(5), now))
        })
    });

    group.bench_function("repeated_packet", |b| {
        let dpd = DuplicatePacketDetection::new(Duration::from_secs(20));
        dpd.is_duplicate(PacketId::new(42), make_addr(5), now);
        b.iter(|| black_box(dpd.is_duplicate(PacketId::new(42), make_addr(5), now)))
    });

    group.finish();
}

// ============================================================================
// Pending Queue Benchmarks
// ============================================================================

fn bench_queue(c: &mut Criterion) {
    let mut group = c.benchmark_group("pending_queue");
    let now = Instant::now();

    group.bench_function("enqueue_at_capacity", |b| {
        let mut queue = PendingPacketQueue::new(100, Duration::from_secs(10));
        let mut uid = 0u64;
        b.iter(|| {
            uid += 1;
            let entry = QueueEntry::new(
                Packet::new(PacketId::new(uid), vec![0u8; 64]),
                Ipv4Header::udp(make_addr(1), make_addr((uid % 8) as u32 + 2), 64),
                Box::new(|_: Route, _: Packet, _: Ipv4Header| {}),
                Box::new(|_: Packet, _: Ipv4Header, _: SocketError| {}),
            );
            black_box(queue.enqueue(entry, now))
        })
    });

    group.finish();
}

// ============================================================================
// Codec Benchmarks
// ============================================================================

fn bench_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("control_codec");
    let hello = ControlMessage::Hello(Hello {
        origin: make_addr(1),
        seq_no: 99,
        lifetime_ms: 4_000,
        ack_requested: true,
        cost: Some(17),
    });
    let Ok(encoded) = hello.encode() else {
        return;
    };

    group.bench_function("encode_hello", |b| b.iter(|| black_box(hello.encode())));
    group.bench_function("decode_hello", |b| {
        b.iter(|| black_box(ControlMessage::decode(&encoded)))
    });

    group.finish();
}

criterion_group!(benches, bench_table, bench_dpd, bench_queue, bench_codec);
criterion_main!(benches);
