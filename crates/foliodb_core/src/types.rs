//! Core identifier and position types.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Identifier of one WAL segment file.
///
/// Segment ids are monotonically increasing non-negative integers;
/// replay traverses segments in ascending id order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct SegmentId(u64);

impl SegmentId {
    /// Creates a segment id.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw id.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next segment id.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl std::fmt::Display for SegmentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Durability coordinates of one WAL entry.
///
/// `(segment, position)` is a total order over entries and uniquely
/// identifies an entry for its whole lifetime.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct WalPosition {
    /// Segment holding the entry.
    pub segment: SegmentId,
    /// Byte offset of the entry within its segment.
    pub position: u64,
}

impl WalPosition {
    /// Creates a WAL position.
    #[must_use]
    pub const fn new(segment: SegmentId, position: u64) -> Self {
        Self { segment, position }
    }
}

impl std::fmt::Display for WalPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.segment, self.position)
    }
}

/// Returns the current wall-clock time as milliseconds since the epoch.
#[must_use]
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_id_ordering() {
        assert!(SegmentId::new(1) < SegmentId::new(2));
        assert_eq!(SegmentId::new(3).next(), SegmentId::new(4));
    }

    #[test]
    fn wal_position_total_order() {
        let a = WalPosition::new(SegmentId::new(0), 100);
        let b = WalPosition::new(SegmentId::new(1), 0);
        let c = WalPosition::new(SegmentId::new(1), 50);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn unix_millis_is_nonzero() {
        assert!(unix_millis() > 0);
    }
}
