//! # Drop-oldest queue
//!
//! A bounded multi-producer queue which never blocks the producer. When the queue is full the
//! oldest item is discarded to make room for the new one, so consumers always see the freshest
//! data.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::time::Duration;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Bounded queue which drops the oldest item on overflow.
///
/// Clones share the same underlying queue.
#[derive(Debug)]
pub struct DropOldestQueue<T> {
    tx: Sender<T>,

    /// Held by the producer side as well so the oldest item can be evicted
    rx: Receiver<T>,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Result of pushing into a [`DropOldestQueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// The item was queued without loss
    Queued,

    /// The item was queued and the given number of older items were discarded
    DroppedOldest(usize),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl<T> DropOldestQueue<T> {
    /// Create a new queue holding at most `capacity` items. A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity.max(1));
        Self { tx, rx }
    }

    /// Push an item, evicting the oldest items until it fits.
    pub fn push(&self, item: T) -> PushOutcome {
        let mut item = item;
        let mut dropped = 0;

        loop {
            match self.tx.try_send(item) {
                Ok(()) => break,
                Err(TrySendError::Full(i)) => {
                    item = i;
                    if self.rx.try_recv().is_ok() {
                        dropped += 1;
                    }
                },
                // Both ends are owned by the queue so it can't be disconnected
                Err(TrySendError::Disconnected(_)) => break
            }
        }

        match dropped {
            0 => PushOutcome::Queued,
            n => PushOutcome::DroppedOldest(n)
        }
    }

    /// Pop the oldest item if there is one.
    pub fn try_pop(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Pop the oldest item, waiting up to `timeout` for one to arrive.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        match self.rx.recv_timeout(timeout) {
            Ok(i) => Some(i),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None
        }
    }

    /// Remove every queued item, returning them oldest first.
    pub fn drain(&self) -> Vec<T> {
        self.rx.try_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.tx.capacity().unwrap_or(0)
    }
}

impl<T> Clone for DropOldestQueue<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            rx: self.rx.clone(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_drop_oldest() {
        let q = DropOldestQueue::new(3);

        for i in 0..3 {
            assert_eq!(q.push(i), PushOutcome::Queued);
        }
        assert_eq!(q.push(3), PushOutcome::DroppedOldest(1));
        assert_eq!(q.push(4), PushOutcome::DroppedOldest(1));

        assert_eq!(q.len(), 3);
        assert_eq!(q.drain(), vec![2, 3, 4]);
        assert!(q.is_empty());
        assert_eq!(q.try_pop(), None);
    }

    #[test]
    fn test_shared_between_clones() {
        let q = DropOldestQueue::new(1);
        let producer = q.clone();

        producer.push("a");
        producer.push("b");

        assert_eq!(q.pop_timeout(Duration::from_millis(10)), Some("b"));
        assert_eq!(q.pop_timeout(Duration::from_millis(1)), None);
    }

    #[test]
    fn test_zero_capacity() {
        let q = DropOldestQueue::new(0);
        assert_eq!(q.capacity(), 1);
        q.push(1);
        assert_eq!(q.push(2), PushOutcome::DroppedOldest(1));
        assert_eq!(q.try_pop(), Some(2));
    }
}
