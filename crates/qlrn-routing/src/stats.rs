//! Engine counters

use std::sync::atomic::{AtomicU64, Ordering};

use qlrn_core::DropReason;

/// Running counters for one engine instance
#[derive(Debug, Default)]
pub struct EngineStats {
    forwarded: AtomicU64,
    delivered: AtomicU64,
    relayed_broadcasts: AtomicU64,
    route_requests: AtomicU64,
    discoveries_exhausted: AtomicU64,
    link_failures: AtomicU64,
    drops: [AtomicU64; DropReason::ALL.len()],
}

/// Point-in-time copy of [`EngineStats`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub forwarded: u64,
    pub delivered: u64,
    pub relayed_broadcasts: u64,
    pub route_requests: u64,
    pub discoveries_exhausted: u64,
    pub link_failures: u64,
    pub drops: Vec<(DropReason, u64)>,
}

impl StatsSnapshot {
    /// Drops recorded for one reason
    pub fn dropped(&self, reason: DropReason) -> u64 {
        self.drops
            .iter()
            .find(|(r, _)| *r == reason)
            .map_or(0, |(_, n)| *n)
    }

    /// Drops across all reasons
    pub fn total_dropped(&self) -> u64 {
        self.drops.iter().map(|(_, n)| n).sum()
    }
}

impl EngineStats {
    pub(crate) fn forwarded(&self) {
        self.forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn relayed_broadcast(&self) {
        self.relayed_broadcasts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn route_request(&self) {
        self.route_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn discovery_exhausted(&self) {
        self.discoveries_exhausted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn link_failure(&self) {
        self.link_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn dropped(&self, reason: DropReason, count: u64) {
        self.drops[reason.index()].fetch_add(count, Ordering::Relaxed);
    }

    /// Copy the current counters
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            forwarded: self.forwarded.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            relayed_broadcasts: self.relayed_broadcasts.load(Ordering::Relaxed),
            route_requests: self.route_requests.load(Ordering::Relaxed),
            discoveries_exhausted: self.discoveries_exhausted.load(Ordering::Relaxed),
            link_failures: self.link_failures.load(Ordering::Relaxed),
            drops: DropReason::ALL
                .iter()
                .map(|r| (*r, self.drops[r.index()].load(Ordering::Relaxed)))
                .collect(),
        }
    }
}
