//! Absolute deadlines
//!
//! Lifetimes are stored as absolute instants so that validity can be
//! checked at read time against whatever the clock says now. Permanent
//! entries (loopback, local broadcast) use [`Expiry::Never`].

use std::time::{Duration, Instant};

/// An absolute expiry deadline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Expiry {
    /// Expires at the given instant
    At(Instant),
    /// Never expires
    Never,
}

impl Expiry {
    /// Deadline `lifetime` after `now`
    ///
    /// Saturates to [`Expiry::Never`] if the addition overflows.
    pub fn after(now: Instant, lifetime: Duration) -> Self {
        now.checked_add(lifetime).map_or(Self::Never, Self::At)
    }

    /// Whether the deadline has passed at `now`
    pub fn is_expired(&self, now: Instant) -> bool {
        match self {
            Self::At(deadline) => now > *deadline,
            Self::Never => false,
        }
    }

    /// Time left before expiry, `None` for permanent deadlines
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        match self {
            Self::At(deadline) => Some(deadline.saturating_duration_since(now)),
            Self::Never => None,
        }
    }

    /// Whether this deadline is permanent
    pub fn is_never(&self) -> bool {
        matches!(self, Self::Never)
    }

    /// Extend the deadline to at least `lifetime` after `now`
    ///
    /// Never shortens an existing deadline.
    pub fn extend_to(self, now: Instant, lifetime: Duration) -> Self {
        match (self, Self::after(now, lifetime)) {
            (Self::Never, _) | (_, Self::Never) => Self::Never,
            (Self::At(current), Self::At(candidate)) => Self::At(current.max(candidate)),
        }
    }
}
