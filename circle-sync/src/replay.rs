//! Buffer for events that race a snapshot load.
//!
//! Events received while a view is still loading are queued here and
//! replayed, in arrival order, exactly once after the snapshot seeds the
//! view. The queue is bounded: once full it rejects further events and
//! remembers that it overflowed, so the owner knows the replay is
//! incomplete and must load another snapshot.

use std::collections::VecDeque;

/// Bounded FIFO flushed exactly once.
pub struct ReplayQueue<T> {
    queue: VecDeque<T>,
    max_size: usize,
    overflowed: bool,
    flushed: bool,
}

/// What a flush hands back.
#[derive(Debug)]
pub struct Replay<T> {
    pub events: Vec<T>,
    /// Some events were rejected; the replay alone is not enough.
    pub overflowed: bool,
}

impl<T> ReplayQueue<T> {
    /// Create a new replay queue with max capacity.
    pub fn new(max_size: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(max_size.min(1024)),
            max_size,
            overflowed: false,
            flushed: false,
        }
    }

    /// Queue an event. Returns `false` if it was rejected (full or already
    /// flushed).
    pub fn enqueue(&mut self, event: T) -> bool {
        if self.flushed {
            return false;
        }
        if self.queue.len() >= self.max_size {
            self.overflowed = true;
            return false;
        }
        self.queue.push_back(event);
        true
    }

    /// Drain everything in arrival order. Only the first call yields events.
    pub fn flush(&mut self) -> Replay<T> {
        if self.flushed {
            return Replay {
                events: Vec::new(),
                overflowed: false,
            };
        }
        self.flushed = true;
        Replay {
            events: self.queue.drain(..).collect(),
            overflowed: self.overflowed,
        }
    }

    /// Number of queued events.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn is_flushed(&self) -> bool {
        self.flushed
    }

    pub fn has_overflowed(&self) -> bool {
        self.overflowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replay_in_arrival_order() {
        let mut queue = ReplayQueue::new(100);
        assert!(queue.is_empty());

        queue.enqueue("a");
        queue.enqueue("b");
        queue.enqueue("c");
        assert_eq!(queue.len(), 3);

        let replay = queue.flush();
        assert_eq!(replay.events, vec!["a", "b", "c"]);
        assert!(!replay.overflowed);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_flushed_exactly_once() {
        let mut queue = ReplayQueue::new(100);
        queue.enqueue(1);

        assert_eq!(queue.flush().events, vec![1]);
        assert!(queue.is_flushed());

        // Late events are not accepted once the replay happened.
        assert!(!queue.enqueue(2));
        assert!(queue.flush().events.is_empty());
    }

    #[test]
    fn test_capacity_marks_overflow() {
        let mut queue = ReplayQueue::new(3);

        assert!(queue.enqueue(1));
        assert!(queue.enqueue(2));
        assert!(queue.enqueue(3));
        assert!(!queue.enqueue(4)); // Full

        assert_eq!(queue.len(), 3);
        assert!(queue.has_overflowed());

        let replay = queue.flush();
        assert_eq!(replay.events, vec![1, 2, 3]);
        assert!(replay.overflowed);
    }
}
