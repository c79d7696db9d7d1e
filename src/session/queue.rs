//! FIFO of requests awaiting transmission.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;

use crate::identifiers::CorrelationId;

// ============================================================================
// OutboundQueue
// ============================================================================

/// Requests submitted while no session is open, plus in-flight requests
/// reclaimed from a lost connection.
///
/// Holds only ids; the request bodies live in the multiplexer.
#[derive(Debug, Default)]
pub struct OutboundQueue {
    entries: VecDeque<CorrelationId>,
}

impl OutboundQueue {
    /// Creates an empty queue.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a newly submitted request.
    #[inline]
    pub fn push_back(&mut self, id: CorrelationId) {
        self.entries.push_back(id);
    }

    /// Puts reclaimed requests at the front, keeping their relative order.
    pub fn requeue_front(&mut self, ids: impl IntoIterator<Item = CorrelationId>) {
        let ids: Vec<_> = ids.into_iter().collect();
        for id in ids.into_iter().rev() {
            self.entries.push_front(id);
        }
    }

    /// Removes a request, returning `true` if it was queued.
    pub fn remove(&mut self, id: CorrelationId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|queued| *queued != id);
        self.entries.len() != before
    }

    /// Takes every queued id in transmission order.
    pub fn drain(&mut self) -> Vec<CorrelationId> {
        self.entries.drain(..).collect()
    }

    /// Drops all entries.
    #[inline]
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Returns `true` if `id` is queued.
    #[must_use]
    pub fn contains(&self, id: CorrelationId) -> bool {
        self.entries.contains(&id)
    }

    /// Returns the number of queued requests.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is queued.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(raw: &[u64]) -> Vec<CorrelationId> {
        raw.iter().copied().map(CorrelationId::new).collect()
    }

    #[test]
    fn test_requeued_go_first_in_order() {
        let mut queue = OutboundQueue::new();
        queue.push_back(CorrelationId::new(10));
        queue.push_back(CorrelationId::new(11));

        queue.requeue_front(ids(&[3, 4, 5]));

        assert_eq!(queue.drain(), ids(&[3, 4, 5, 10, 11]));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_remove() {
        let mut queue = OutboundQueue::new();
        queue.push_back(CorrelationId::new(1));
        queue.push_back(CorrelationId::new(2));

        assert!(queue.remove(CorrelationId::new(1)));
        assert!(!queue.remove(CorrelationId::new(1)));
        assert!(!queue.contains(CorrelationId::new(1)));
        assert_eq!(queue.len(), 1);
    }
}
