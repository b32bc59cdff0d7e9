//! Min-heap of acknowledged keys waiting for their turn.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// Min-heap over `u64` keys
///
/// Holds keys acknowledged out of turn. Its size is bounded by the maximum
/// outstanding reordering depth.
#[derive(Debug, Default, Clone)]
pub struct AckHeap {
    min: BinaryHeap<Reverse<u64>>,
}

impl AckHeap {
    /// Create an empty heap
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty heap with room for `capacity` keys
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            min: BinaryHeap::with_capacity(capacity),
        }
    }

    #[inline]
    pub fn push(&mut self, key: u64) {
        self.min.push(Reverse(key));
    }

    #[inline]
    pub fn pop(&mut self) -> Option<u64> {
        self.min.pop().map(|Reverse(key)| key)
    }

    #[inline]
    pub fn peek(&self) -> Option<u64> {
        self.min.peek().map(|Reverse(key)| *key)
    }

    /// Linear membership check
    pub fn contains(&self, key: u64) -> bool {
        self.min.iter().any(|Reverse(k)| *k == key)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.min.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.min.is_empty()
    }

    pub fn clear(&mut self) {
        self.min.clear();
    }
}
