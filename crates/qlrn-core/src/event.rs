//! Routing events and drop reasons

use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Reasons a packet might be dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DropReason {
    /// No usable route and none could be discovered
    NoRoute,
    /// Route exists but is not currently valid
    RouteInvalid,
    /// Broadcast or control packet already processed
    Duplicate,
    /// Packet waited in the pending queue longer than allowed
    Expired,
    /// Evicted from a full pending queue
    QueueOverflow,
    /// Forwarding disabled on the input interface
    ForwardingDisabled,
    /// Header is structurally unusable
    Malformed,
}

impl Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::NoRoute => "no route",
            Self::RouteInvalid => "route invalid",
            Self::Duplicate => "duplicate",
            Self::Expired => "expired in queue",
            Self::QueueOverflow => "queue overflow",
            Self::ForwardingDisabled => "forwarding disabled",
            Self::Malformed => "malformed",
        };
        f.write_str(s)
    }
}

impl DropReason {
    /// All drop reasons, in a stable order
    pub const ALL: [DropReason; 7] = [
        Self::NoRoute,
        Self::RouteInvalid,
        Self::Duplicate,
        Self::Expired,
        Self::QueueOverflow,
        Self::ForwardingDisabled,
        Self::Malformed,
    ];

    /// Stable index into [`DropReason::ALL`]
    pub fn index(self) -> usize {
        match self {
            Self::NoRoute => 0,
            Self::RouteInvalid => 1,
            Self::Duplicate => 2,
            Self::Expired => 3,
            Self::QueueOverflow => 4,
            Self::ForwardingDisabled => 5,
            Self::Malformed => 6,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_matches_all() {
        for (i, reason) in DropReason::ALL.iter().enumerate() {
            assert_eq!(reason.index(), i);
        }
    }
}
