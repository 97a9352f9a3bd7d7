use std::collections::BTreeSet;

/// What an inbound sequence number told us about the sending device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SequenceUpdate {
    /// The next expected number.
    InOrder,
    /// Ahead of the next expected number; this many were skipped.
    Gap(u64),
    /// Fills a previously recorded gap.
    Recovered,
    /// Already seen, or older than anything still tracked.
    Replay,
}

/// Receive-side sequence state for one sending device.
///
/// Sequence numbers start at 1. Gaps are remembered up to `max_missing`;
/// when that bound is exceeded the oldest gaps are forgotten.
#[derive(Clone, Debug)]
pub struct SequenceTracker {
    max_seen: u64,
    missing: BTreeSet<u64>,
    max_missing: usize,
}

impl SequenceTracker {
    pub fn new(max_missing: usize) -> Self {
        Self {
            max_seen: 0,
            missing: BTreeSet::new(),
            max_missing,
        }
    }

    pub fn max_seen(&self) -> u64 {
        self.max_seen
    }

    /// Sequence numbers skipped over and not yet received.
    pub fn missing(&self) -> impl Iterator<Item = u64> + '_ {
        self.missing.iter().copied()
    }

    pub fn record(&mut self, sequence: u64) -> SequenceUpdate {
        if sequence > self.max_seen {
            let skipped = sequence - self.max_seen - 1;
            let first_missing = self.max_seen + 1;
            self.max_seen = sequence;

            if skipped == 0 {
                return SequenceUpdate::InOrder;
            }

            // Only the newest `max_missing` numbers can survive the trim below.
            let keep_from = sequence.saturating_sub(self.max_missing as u64).max(first_missing);
            self.missing.extend(keep_from..sequence);
            while self.missing.len() > self.max_missing {
                self.missing.pop_first();
            }

            return SequenceUpdate::Gap(skipped);
        }

        if self.missing.remove(&sequence) {
            SequenceUpdate::Recovered
        } else {
            SequenceUpdate::Replay
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_order() {
        let mut tracker = SequenceTracker::new(16);
        assert_eq!(tracker.record(1), SequenceUpdate::InOrder);
        assert_eq!(tracker.record(2), SequenceUpdate::InOrder);
        assert_eq!(tracker.max_seen(), 2);
        assert_eq!(tracker.missing().count(), 0);
    }

    #[test]
    fn test_gap_then_recovery() {
        let mut tracker = SequenceTracker::new(16);
        assert_eq!(tracker.record(1), SequenceUpdate::InOrder);
        assert_eq!(tracker.record(5), SequenceUpdate::Gap(3));
        assert_eq!(tracker.missing().collect::<Vec<_>>(), vec![2, 3, 4]);

        assert_eq!(tracker.record(3), SequenceUpdate::Recovered);
        assert_eq!(tracker.missing().collect::<Vec<_>>(), vec![2, 4]);
        assert_eq!(tracker.record(3), SequenceUpdate::Replay);
        assert_eq!(tracker.record(5), SequenceUpdate::Replay);
    }

    #[test]
    fn test_missing_set_is_bounded() {
        let mut tracker = SequenceTracker::new(3);
        assert_eq!(tracker.record(1_000_000), SequenceUpdate::Gap(999_999));
        assert_eq!(
            tracker.missing().collect::<Vec<_>>(),
            vec![999_997, 999_998, 999_999]
        );

        assert_eq!(tracker.record(1_000_003), SequenceUpdate::Gap(2));
        assert_eq!(
            tracker.missing().collect::<Vec<_>>(),
            vec![999_999, 1_000_001, 1_000_002]
        );
        assert_eq!(tracker.record(10), SequenceUpdate::Replay);
    }
}
