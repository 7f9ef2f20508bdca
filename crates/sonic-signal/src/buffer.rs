//! Bounded FIFO buffers.

use std::collections::VecDeque;

/// Fixed-capacity FIFO. Pushing past capacity silently evicts the oldest
/// element.
#[derive(Debug, Clone)]
pub struct BoundedBuffer<T> {
    capacity: usize,
    items: VecDeque<T>,
}

impl<T> BoundedBuffer<T> {
    /// A zero capacity is bumped to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            items: VecDeque::with_capacity(capacity.min(8192)),
        }
    }

    /// Append `item`, returning the evicted element if the buffer was full
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.items.len() >= self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest first
    pub fn iter(&self) -> impl ExactSizeIterator<Item = &T> + '_ {
        self.items.iter()
    }

    pub fn latest(&self) -> Option<&T> {
        self.items.back()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Contiguous view, oldest first
    pub fn as_slice(&mut self) -> &[T] {
        self.items.make_contiguous()
    }
}

impl<T: Clone> BoundedBuffer<T> {
    pub fn to_vec(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }
}

/// Smoothed-velocity history for visualization (never sign-flipped)
pub type HistoryBuffer = BoundedBuffer<f64>;
