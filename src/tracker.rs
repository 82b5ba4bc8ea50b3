//! Per-stream recency window of object identifiers.
//!
//! A `StreamTracker` answers "has this object already triggered a capture
//! recently on this stream?" with a fixed memory footprint. It is a recency
//! window, not an exact set: once an id ages out it may trigger again.

use std::collections::{HashSet, VecDeque};

/// Object identifier assigned by the upstream tracker.
pub type ObjectId = u64;

/// Bounded FIFO set of recently captured object ids for one stream.
///
/// - `recent_ids` keeps insertion order; the front is evicted first.
/// - `members` mirrors `recent_ids` for O(1) membership.
/// - Size never exceeds `capacity` and no id appears twice.
#[derive(Debug, Clone)]
pub struct StreamTracker {
    capacity: usize,
    recent_ids: VecDeque<ObjectId>,
    members: HashSet<ObjectId>,
}

impl StreamTracker {
    /// Create a tracker holding at most `capacity` ids. A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            recent_ids: VecDeque::new(),
            members: HashSet::new(),
        }
    }

    /// Membership test. Does not mutate the window.
    pub fn seen(&self, id: ObjectId) -> bool {
        self.members.contains(&id)
    }

    /// Record an id. No-op when already present; otherwise evicts the oldest
    /// entry when full, then appends.
    pub fn record(&mut self, id: ObjectId) {
        if self.members.contains(&id) {
            return;
        }
        while self.recent_ids.len() >= self.capacity {
            match self.recent_ids.pop_front() {
                Some(evicted) => {
                    self.members.remove(&evicted);
                }
                None => break,
            }
        }
        self.recent_ids.push_back(id);
        self.members.insert(id);
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.recent_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recent_ids.is_empty()
    }

    /// Ids in the window, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.recent_ids.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn huge_capacity_does_not_preallocate() {
        let mut tracker = StreamTracker::new(usize::MAX);
        for id in [3, 1, 4, 1, 5] {
            tracker.record(id);
        }
        assert_eq!(tracker.capacity(), usize::MAX);
        assert_eq!(tracker.len(), 4);
        assert!(tracker.seen(4));
        assert!(!tracker.seen(9));
    }

    #[test]
    fn size_never_exceeds_capacity() {
        let mut tracker = StreamTracker::new(5);
        for id in 0..100u64 {
            tracker.record(id % 13);
            assert!(tracker.len() <= tracker.capacity());
        }
        assert_eq!(tracker.len(), 5);
    }

    #[test]
    fn evicts_oldest_first() {
        let mut tracker = StreamTracker::new(3);
        for id in [10, 11, 12, 13] {
            tracker.record(id);
        }
        assert!(!tracker.seen(10));
        assert!(tracker.seen(11));
        assert!(tracker.seen(12));
        assert!(tracker.seen(13));
        assert_eq!(tracker.iter().collect::<Vec<_>>(), vec![11, 12, 13]);
    }

    #[test]
    fn recording_present_id_is_noop() {
        let mut tracker = StreamTracker::new(2);
        tracker.record(1);
        tracker.record(2);
        tracker.record(1);
        assert_eq!(tracker.len(), 2);
        assert_eq!(tracker.iter().collect::<Vec<_>>(), vec![1, 2]);

        // Re-recording does not refresh position: 1 is still evicted first.
        tracker.record(3);
        assert!(!tracker.seen(1));
        assert!(tracker.seen(2));
    }

    #[test]
    fn seen_does_not_mutate() {
        let tracker = StreamTracker::new(4);
        assert!(!tracker.seen(7));
        assert!(tracker.is_empty());
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        let mut tracker = StreamTracker::new(0);
        assert_eq!(tracker.capacity(), 1);
        tracker.record(1);
        tracker.record(2);
        assert_eq!(tracker.iter().collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn aged_out_id_can_trigger_again() {
        let mut tracker = StreamTracker::new(2);
        tracker.record(1);
        tracker.record(2);
        tracker.record(3);
        assert!(!tracker.seen(1));
        tracker.record(1);
        assert!(tracker.seen(1));
        assert!(!tracker.seen(2));
    }
}
