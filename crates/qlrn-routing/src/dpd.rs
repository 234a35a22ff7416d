//! Duplicate packet detection
//!
//! Broadcast and control packets can reach a node along several paths.
//! [`DuplicatePacketDetection`] remembers each `(packet id, source)` pair
//! for a fixed window so that only the first copy is processed.
//!
//! The check and the insert happen under a single shard lock, so two
//! concurrent copies of the same packet can never both be reported as new.
//! Expired records are swept at most once per window; an expired record
//! that is still present counts as unseen.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use qlrn_core::PacketId;
use tracing::trace;

/// Time-bounded cache of already-seen packets
pub struct DuplicatePacketDetection {
    /// Expiry per seen (id, source) pair
    seen: DashMap<(PacketId, Ipv4Addr), Instant>,
    /// How long a pair is remembered
    window: Duration,
    /// Number of duplicates rejected so far
    duplicates: AtomicU64,
    /// Earliest instant of the next inline sweep
    next_sweep: Mutex<Option<Instant>>,
}

impl DuplicatePacketDetection {
    /// Create a detector remembering packets for `window`
    pub fn new(window: Duration) -> Self {
        Self {
            seen: DashMap::new(),
            window,
            duplicates: AtomicU64::new(0),
            next_sweep: Mutex::new(None),
        }
    }

    /// Register `(id, source)` and report whether it was already present
    ///
    /// Returns `false` exactly once per pair within the window.
    pub fn is_duplicate(&self, id: PacketId, source: Ipv4Addr, now: Instant) -> bool {
        let sweep_due = {
            let mut next = self.next_sweep.lock();
            let due = next.is_none_or(|at| now >= at);
            if due {
                *next = Some(now + self.window);
            }
            due
        };
        if sweep_due {
            self.sweep(now);
        }

        let expiry = now + self.window;
        match self.seen.entry((id, source)) {
            Entry::Occupied(mut slot) => {
                if now <= *slot.get() {
                    self.duplicates.fetch_add(1, Ordering::Relaxed);
                    trace!(uid = %id, src = %source, "Duplicate packet");
                    true
                } else {
                    slot.insert(expiry);
                    false
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(expiry);
                false
            }
        }
    }

    /// Drop records whose window has passed
    pub fn sweep(&self, now: Instant) {
        self.seen.retain(|_, expiry| now <= *expiry);
    }

    /// Number of remembered pairs
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Whether nothing is remembered
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Total duplicates rejected
    pub fn duplicates(&self) -> u64 {
        self.duplicates.load(Ordering::Relaxed)
    }

    /// The configured window
    pub fn window(&self) -> Duration {
        self.window
    }
}
