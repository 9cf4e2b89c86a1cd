use std::collections::VecDeque;

/// A half-open index range `[start, start + count)` waiting to be fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchRange {
    pub start: usize,
    pub count: usize,
}

impl FetchRange {
    pub fn end(&self) -> usize {
        self.start + self.count
    }
}

/// FIFO backlog of uncovered ranges for one stream. The head entry is the one
/// being fetched (or about to be); it stays queued until its fetch settles so
/// it keeps counting towards coverage.
#[derive(Debug, Default, Clone)]
pub struct FetchQueue {
    entries: VecDeque<FetchRange>,
}

impl FetchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn head(&self) -> Option<FetchRange> {
        self.entries.front().copied()
    }

    pub fn pop_head(&mut self) -> Option<FetchRange> {
        self.entries.pop_front()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn pending_total(&self) -> usize {
        self.entries.iter().map(|entry| entry.count).sum()
    }

    /// Queue whatever part of `[start, start + count)` lies past `fetched`
    /// items plus everything already queued. Pages are appended behind a
    /// cursor, so a range that starts beyond coverage still has to pull the
    /// gap in front of it. Returns the queued residual, if any.
    pub fn enqueue_residual(
        &mut self,
        fetched: usize,
        start: usize,
        count: usize,
    ) -> Option<FetchRange> {
        let covered = fetched + self.pending_total();
        let end = start.saturating_add(count);
        if count == 0 || end <= covered {
            return None;
        }

        let residual = FetchRange {
            start: covered,
            count: end - covered,
        };
        self.entries.push_back(residual);
        Some(residual)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_request_queues_whole_range() {
        let mut queue = FetchQueue::new();
        assert_eq!(
            queue.enqueue_residual(0, 0, 20),
            Some(FetchRange { start: 0, count: 20 })
        );
        assert_eq!(queue.pending_total(), 20);
    }

    #[test]
    fn overlapping_request_only_queues_uncovered_tail() {
        let mut queue = FetchQueue::new();
        queue.enqueue_residual(20, 10, 20);
        assert_eq!(queue.head(), Some(FetchRange { start: 20, count: 10 }));
    }

    #[test]
    fn covered_request_is_a_no_op() {
        let mut queue = FetchQueue::new();
        queue.enqueue_residual(0, 0, 20);
        assert_eq!(queue.enqueue_residual(0, 5, 10), None);
        assert_eq!(queue.enqueue_residual(0, 0, 0), None);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn queued_entries_count_towards_coverage() {
        let mut queue = FetchQueue::new();
        queue.enqueue_residual(0, 0, 20);
        queue.enqueue_residual(0, 15, 15);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pending_total(), 30);
        assert_eq!(queue.pop_head(), Some(FetchRange { start: 0, count: 20 }));
        assert_eq!(queue.head(), Some(FetchRange { start: 20, count: 10 }));
    }

    #[test]
    fn gap_before_range_is_pulled_in() {
        let mut queue = FetchQueue::new();
        assert_eq!(
            queue.enqueue_residual(10, 40, 10),
            Some(FetchRange { start: 10, count: 40 })
        );
    }
}
