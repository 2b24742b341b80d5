use crate::fleet::{ComputedRange, ReaderSeed};
use crate::messages::BlockRangeData;

/// Hands out block ranges to readers as they finish, keeping at most
/// `max_readers` in flight.
///
/// `last_assigned_block` always advances by the full batch size, so it can
/// overshoot the head on the final clamped range; the `< head` guard makes
/// the overshoot harmless.
#[derive(Debug)]
pub struct ReaderDispatcher {
    max_readers: u32,
    batch_size: u64,
    head: u64,
    active_readers: u32,
    last_assigned_block: u64,
    allow_more_readers: bool,
}

impl ReaderDispatcher {
    pub fn new(range: &ComputedRange, batch_size: u64, seed: &ReaderSeed) -> Self {
        Self {
            max_readers: range.max_readers,
            batch_size,
            head: range.head,
            active_readers: seed.active_readers,
            last_assigned_block: seed.last_assigned_block,
            allow_more_readers: true,
        }
    }

    pub fn active_readers(&self) -> u32 {
        self.active_readers
    }

    pub fn last_assigned_block(&self) -> u64 {
        self.last_assigned_block
    }

    /// Called by the stop handler so completions stop producing new ranges.
    pub fn stop_dispatching(&mut self) {
        self.allow_more_readers = false;
    }

    /// Handles a reader completion. Returns the next range for that reader,
    /// or `None` when the run is exhausted (the reader stays idle until the
    /// shutdown drain).
    pub fn on_reader_completed(&mut self) -> Option<BlockRangeData> {
        self.active_readers = self.active_readers.saturating_sub(1);

        if self.active_readers < self.max_readers
            && self.last_assigned_block < self.head
            && self.allow_more_readers
        {
            let first_block = self.last_assigned_block;
            let last_block = std::cmp::min(self.last_assigned_block + self.batch_size, self.head);
            self.last_assigned_block += self.batch_size;
            self.active_readers += 1;
            return Some(BlockRangeData {
                first_block,
                last_block,
            });
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dispatcher(start: u64, head: u64, batch: u64, readers: u32) -> ReaderDispatcher {
        // Seed mirrors the planner: initial readers already assigned.
        let mut active = 0;
        let mut last_assigned = start;
        while active < readers && last_assigned < head {
            last_assigned += batch;
            active += 1;
        }
        ReaderDispatcher::new(
            &ComputedRange {
                starting_block: start,
                head,
                max_readers: readers,
                total_range: head - start,
            },
            batch,
            &ReaderSeed {
                active_readers: active,
                last_assigned_block: last_assigned,
            },
        )
    }

    #[test]
    fn test_completion_dispatches_clamped_final_range() {
        let mut d = dispatcher(100, 340, 100, 2);
        assert_eq!(d.last_assigned_block(), 300);

        let range = d.on_reader_completed().unwrap();
        assert_eq!(range.first_block, 300);
        assert_eq!(range.last_block, 340);
        // Advance is by batch_size, past the head.
        assert_eq!(d.last_assigned_block(), 400);

        assert_eq!(d.on_reader_completed(), None);
        assert_eq!(d.on_reader_completed(), None);
    }

    #[test]
    fn test_reader_bound_is_never_exceeded() {
        let mut d = dispatcher(0, 10000, 100, 3);
        for _ in 0..200 {
            d.on_reader_completed();
            assert!(d.active_readers() <= 3);
        }
    }

    #[test]
    fn test_stop_dispatching_blocks_new_ranges() {
        let mut d = dispatcher(0, 10000, 100, 2);
        d.stop_dispatching();
        assert_eq!(d.on_reader_completed(), None);
        assert_eq!(d.active_readers(), 1);
    }

    #[test]
    fn test_ranges_partition_the_run() {
        let start = 17;
        let head = 2350;
        let batch = 100;

        // Collect the planner's initial ranges the same way build_fleet does.
        let mut ranges = Vec::new();
        let mut active = 0;
        let mut last_assigned = start;
        while active < 2 && last_assigned < head {
            ranges.push((last_assigned, std::cmp::min(last_assigned + batch, head)));
            last_assigned += batch;
            active += 1;
        }
        let mut d = ReaderDispatcher::new(
            &ComputedRange {
                starting_block: start,
                head,
                max_readers: 2,
                total_range: head - start,
            },
            batch,
            &ReaderSeed {
                active_readers: active,
                last_assigned_block: last_assigned,
            },
        );

        while let Some(range) = d.on_reader_completed() {
            ranges.push((range.first_block, range.last_block));
        }

        // Half-open intervals must tile [start, head) with no gaps or overlaps.
        ranges.sort();
        let mut expected_next = start;
        for (first, last) in &ranges {
            assert_eq!(*first, expected_next);
            assert!(*last > *first);
            expected_next = *last;
        }
        assert_eq!(expected_next, head);
    }
}
