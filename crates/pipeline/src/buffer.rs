//! Pending record buffer.
//!
//! Ordered, contiguous run of drained-but-not-finalized records. The drain
//! worker is the only forward-extender; finalization consumes from the
//! front; a sync rebase replaces the content wholesale.

use blockflow_types::BlockTransaction;
use std::collections::VecDeque;

/// Contiguous, height-ordered buffer of pending records.
///
/// Invariants:
///
/// - Record heights are exactly `[base, base + len)`, strictly ascending.
/// - `base` equals the last finalized height plus one.
/// - `len <= capacity` as long as only [`push`](Self::push) extends the
///   buffer; a sync rebase may adopt a longer prefix, which temporarily
///   overrides the cap (capacity is a drain-side backpressure lever, not a
///   hard limit on adopted prefixes).
#[derive(Debug)]
pub struct RecordBuffer {
    base: i64,
    capacity: usize,
    records: VecDeque<BlockTransaction>,
}

impl RecordBuffer {
    /// Create an empty buffer whose first record will have height `base`.
    pub fn new(base: i64, capacity: usize) -> Self {
        Self {
            base,
            capacity,
            records: VecDeque::with_capacity(capacity.min(1024)),
        }
    }

    /// Height of the first buffered record (last finalized + 1).
    pub fn base(&self) -> i64 {
        self.base
    }

    /// Height the next drained record must carry.
    pub fn next_height(&self) -> i64 {
        self.base + self.records.len() as i64
    }

    /// Number of buffered records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the buffer holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Whether the drain worker must stop reading.
    pub fn is_full(&self) -> bool {
        self.records.len() >= self.capacity
    }

    /// Append the next record. The caller checks the height contract.
    pub fn push(&mut self, record: BlockTransaction) {
        debug_assert_eq!(record.height, self.next_height());
        self.records.push_back(record);
    }

    /// Whether every height in `[from, to]` is buffered.
    pub fn covers(&self, from: i64, to: i64) -> bool {
        from >= self.base && to < self.next_height() && from <= to
    }

    /// Clone the records for heights `[from, to]`.
    ///
    /// Returns an empty vector unless [`covers`](Self::covers) holds.
    pub fn slice(&self, from: i64, to: i64) -> Vec<BlockTransaction> {
        if !self.covers(from, to) {
            return Vec::new();
        }
        let start = (from - self.base) as usize;
        let end = (to - self.base) as usize + 1;
        self.records.range(start..end).cloned().collect()
    }

    /// Clone the buffer prefix, up to `max` records.
    pub fn prefix(&self, max: usize) -> Vec<BlockTransaction> {
        self.records.iter().take(max).cloned().collect()
    }

    /// Iterate the records for heights `[base, to]`.
    pub fn iter_through(&self, to: i64) -> impl Iterator<Item = &BlockTransaction> {
        let end = (to - self.base + 1).max(0) as usize;
        self.records.iter().take(end)
    }

    /// Remove and return the records for heights `[base, to]`, advancing
    /// the base past them.
    pub fn drain_through(&mut self, to: i64) -> Vec<BlockTransaction> {
        let count = (to - self.base + 1).clamp(0, self.records.len() as i64) as usize;
        let drained: Vec<_> = self.records.drain(..count).collect();
        self.base += drained.len() as i64;
        drained
    }

    /// Whether the buffer starts with the given records, byte for byte.
    pub fn starts_with(&self, prefix: &[BlockTransaction]) -> bool {
        prefix.len() <= self.records.len()
            && self
                .records
                .iter()
                .zip(prefix.iter())
                .all(|(ours, theirs)| ours == theirs)
    }

    /// Replace the content with an adopted prefix starting at `base`.
    pub fn reset(&mut self, base: i64, records: Vec<BlockTransaction>) {
        debug_assert!(records
            .iter()
            .enumerate()
            .all(|(i, r)| r.height == base + i as i64));
        self.base = base;
        self.records = records.into();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockflow_types::test_utils::test_records;

    fn filled(base: i64, to: i64, capacity: usize) -> RecordBuffer {
        let mut buffer = RecordBuffer::new(base, capacity);
        for record in test_records(base, to, "OK") {
            buffer.push(record);
        }
        buffer
    }

    #[test]
    fn push_extends_contiguously() {
        let buffer = filled(0, 4, 16);
        assert_eq!(buffer.base(), 0);
        assert_eq!(buffer.next_height(), 5);
        assert_eq!(buffer.len(), 5);
        assert!(!buffer.is_full());
    }

    #[test]
    fn capacity_bounds_the_drain() {
        let buffer = filled(0, 2, 3);
        assert!(buffer.is_full());
    }

    #[test]
    fn covers_and_slice() {
        let buffer = filled(3, 9, 16);
        assert!(buffer.covers(3, 9));
        assert!(buffer.covers(5, 7));
        assert!(!buffer.covers(2, 5));
        assert!(!buffer.covers(5, 10));

        let slice = buffer.slice(5, 7);
        assert_eq!(slice, test_records(5, 7, "OK"));
        assert!(buffer.slice(5, 10).is_empty());
    }

    #[test]
    fn prefix_is_capped() {
        let buffer = filled(0, 9, 16);
        assert_eq!(buffer.prefix(4), test_records(0, 3, "OK"));
        assert_eq!(buffer.prefix(100), test_records(0, 9, "OK"));

        let empty = RecordBuffer::new(0, 16);
        assert!(empty.prefix(4).is_empty());
    }

    #[test]
    fn drain_through_advances_base() {
        let mut buffer = filled(0, 9, 16);
        let drained = buffer.drain_through(4);
        assert_eq!(drained, test_records(0, 4, "OK"));
        assert_eq!(buffer.base(), 5);
        assert_eq!(buffer.len(), 5);
        assert!(buffer.covers(5, 9));
    }

    #[test]
    fn starts_with_is_byte_wise() {
        let buffer = filled(0, 4, 16);
        assert!(buffer.starts_with(&test_records(0, 2, "OK")));
        assert!(buffer.starts_with(&test_records(0, 4, "OK")));
        assert!(buffer.starts_with(&[]));
        assert!(!buffer.starts_with(&test_records(0, 2, "OTHER")));
        // Longer than the buffer content: not a prefix match.
        assert!(!buffer.starts_with(&test_records(0, 5, "OK")));
    }

    #[test]
    fn reset_adopts_a_new_prefix() {
        let mut buffer = filled(0, 4, 16);
        buffer.reset(0, test_records(0, 2, "OTHER"));
        assert_eq!(buffer.base(), 0);
        assert_eq!(buffer.next_height(), 3);
        assert_eq!(buffer.slice(0, 2), test_records(0, 2, "OTHER"));
    }

    #[test]
    fn iter_through_stops_at_target() {
        let buffer = filled(2, 6, 16);
        let heights: Vec<i64> = buffer.iter_through(4).map(|r| r.height).collect();
        assert_eq!(heights, vec![2, 3, 4]);
    }
}
