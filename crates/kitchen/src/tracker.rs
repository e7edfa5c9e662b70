//! Commit watermarks for concurrently processed deliveries.

use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Default)]
struct PartitionOffsets {
    in_flight: BTreeSet<i64>,
    /// One past the highest offset ever started.
    next: i64,
    /// The last position returned for commit.
    committed: i64,
}

/// Tracks in-flight offsets per partition and yields safe commit positions.
///
/// Deliveries complete out of order, but a commit position never passes an
/// offset that is still in flight.
#[derive(Debug, Default)]
pub struct OffsetTracker {
    partitions: HashMap<(String, i32), PartitionOffsets>,
}

impl OffsetTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a fetched offset as in flight.
    pub fn start(&mut self, topic: &str, partition: i32, offset: i64) {
        let state = self
            .partitions
            .entry((topic.to_string(), partition))
            .or_insert_with(|| PartitionOffsets {
                committed: offset,
                ..Default::default()
            });
        state.in_flight.insert(offset);
        state.next = state.next.max(offset + 1);
    }

    /// Marks an offset done and returns the new commit position, if it moved.
    ///
    /// The position is the next offset to consume: everything below it is done.
    pub fn complete(&mut self, topic: &str, partition: i32, offset: i64) -> Option<i64> {
        let state = self.partitions.get_mut(&(topic.to_string(), partition))?;
        if !state.in_flight.remove(&offset) {
            return None;
        }

        let watermark = state.in_flight.first().copied().unwrap_or(state.next);
        if watermark > state.committed {
            state.committed = watermark;
            Some(watermark)
        } else {
            None
        }
    }

    /// Number of offsets still in flight across all partitions.
    pub fn in_flight(&self) -> usize {
        self.partitions.values().map(|p| p.in_flight.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOPIC: &str = "orders.created";

    #[test]
    fn in_order_completion_commits_each_offset() {
        let mut tracker = OffsetTracker::new();
        tracker.start(TOPIC, 0, 0);
        tracker.start(TOPIC, 0, 1);

        assert_eq!(tracker.complete(TOPIC, 0, 0), Some(1));
        assert_eq!(tracker.complete(TOPIC, 0, 1), Some(2));
        assert_eq!(tracker.in_flight(), 0);
    }

    #[test]
    fn out_of_order_completion_waits_for_gap() {
        let mut tracker = OffsetTracker::new();
        for offset in 5..8 {
            tracker.start(TOPIC, 0, offset);
        }

        assert_eq!(tracker.complete(TOPIC, 0, 7), None);
        assert_eq!(tracker.complete(TOPIC, 0, 6), None);
        assert_eq!(tracker.complete(TOPIC, 0, 5), Some(8));
    }

    #[test]
    fn partitions_are_independent() {
        let mut tracker = OffsetTracker::new();
        tracker.start(TOPIC, 0, 10);
        tracker.start(TOPIC, 1, 3);

        assert_eq!(tracker.complete(TOPIC, 1, 3), Some(4));
        assert_eq!(tracker.in_flight(), 1);
        assert_eq!(tracker.complete(TOPIC, 0, 10), Some(11));
    }

    #[test]
    fn unknown_or_repeated_completion_is_ignored() {
        let mut tracker = OffsetTracker::new();
        assert_eq!(tracker.complete(TOPIC, 0, 0), None);

        tracker.start(TOPIC, 0, 0);
        assert_eq!(tracker.complete(TOPIC, 0, 0), Some(1));
        assert_eq!(tracker.complete(TOPIC, 0, 0), None);
    }

    #[test]
    fn later_fetches_hold_back_the_watermark() {
        let mut tracker = OffsetTracker::new();
        tracker.start(TOPIC, 0, 0);
        assert_eq!(tracker.complete(TOPIC, 0, 0), Some(1));

        tracker.start(TOPIC, 0, 1);
        tracker.start(TOPIC, 0, 2);
        assert_eq!(tracker.complete(TOPIC, 0, 2), None);
        assert_eq!(tracker.complete(TOPIC, 0, 1), Some(3));
    }
}
