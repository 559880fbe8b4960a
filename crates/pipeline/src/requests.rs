//! Outstanding `get_transactions` requests.
//!
//! Entries are removed under the executor lock and their callbacks invoked
//! outside it, which is what makes the exactly-once guarantee hold: every
//! path that completes a request first takes the entry out of the queue.

use crate::error::PipelineError;
use blockflow_types::BlockTransaction;

/// Completion callback of a `get_transactions` request.
pub type TransactionCallback =
    Box<dyn FnOnce(Result<Vec<BlockTransaction>, PipelineError>) + Send + 'static>;

/// One outstanding request for a height range.
pub struct RequestEntry {
    /// Identifier handed to the request's canceler.
    pub id: u64,
    /// First requested height.
    pub from: i64,
    /// Last requested height.
    pub to: i64,
    /// Callback, invoked exactly once after the entry leaves the queue.
    pub callback: TransactionCallback,
}

impl std::fmt::Debug for RequestEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestEntry")
            .field("id", &self.id)
            .field("from", &self.from)
            .field("to", &self.to)
            .finish_non_exhaustive()
    }
}

/// Registration-ordered queue of outstanding requests.
#[derive(Debug, Default)]
pub struct RequestQueue {
    entries: Vec<RequestEntry>,
}

impl RequestQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of outstanding requests.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no requests are outstanding.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Register a request at the back of the queue.
    pub fn push(&mut self, entry: RequestEntry) {
        self.entries.push(entry);
    }

    /// Remove and return the entries matching `pred`, preserving
    /// registration order.
    pub fn take_where<F>(&mut self, mut pred: F) -> Vec<RequestEntry>
    where
        F: FnMut(&RequestEntry) -> bool,
    {
        let mut taken = Vec::new();
        let mut kept = Vec::with_capacity(self.entries.len());
        for entry in self.entries.drain(..) {
            if pred(&entry) {
                taken.push(entry);
            } else {
                kept.push(entry);
            }
        }
        self.entries = kept;
        taken
    }

    /// Remove and return the entry with the given id, if still queued.
    pub fn take_by_id(&mut self, id: u64) -> Option<RequestEntry> {
        self.take_where(|entry| entry.id == id).pop()
    }

    /// Remove and return every outstanding entry.
    pub fn drain(&mut self) -> Vec<RequestEntry> {
        std::mem::take(&mut self.entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: u64, from: i64, to: i64) -> RequestEntry {
        RequestEntry {
            id,
            from,
            to,
            callback: Box::new(|_| {}),
        }
    }

    #[test]
    fn take_where_preserves_order() {
        let mut queue = RequestQueue::new();
        queue.push(entry(1, 0, 9));
        queue.push(entry(2, 5, 7));
        queue.push(entry(3, 0, 4));

        let taken = queue.take_where(|e| e.from == 0);
        assert_eq!(taken.iter().map(|e| e.id).collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn take_by_id_removes_exactly_one() {
        let mut queue = RequestQueue::new();
        queue.push(entry(1, 0, 9));
        queue.push(entry(2, 5, 7));

        let taken = queue.take_by_id(2);
        assert_eq!(taken.map(|e| e.id), Some(2));
        assert!(queue.take_by_id(2).is_none());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn drain_empties_the_queue() {
        let mut queue = RequestQueue::new();
        queue.push(entry(1, 0, 9));
        queue.push(entry(2, 5, 7));

        assert_eq!(queue.drain().len(), 2);
        assert!(queue.is_empty());
    }
}
