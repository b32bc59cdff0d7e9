//! Checkpoint reconciliation.
//!
//! Turns acknowledgments arriving in arbitrary order into a monotonic
//! checkpoint: the largest id `N` such that every id in `1..=N` is
//! acknowledged. Ids acknowledged out of turn wait in a min-heap until the
//! gap below them closes.

use crate::heap::AckHeap;

/// Result of a single acknowledgment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// Checkpoint advanced by this many ids
    Advanced(u64),
    /// Acknowledged out of turn, waiting for lower ids
    Deferred,
    /// Already covered by the checkpoint or already waiting
    Duplicate,
}

/// Monotonic checkpoint over contiguous ids
#[derive(Debug, Default, Clone)]
pub struct Checkpoint {
    value: u64,
    pending: AckHeap,
}

impl Checkpoint {
    /// Checkpoint starting from zero (nothing acknowledged)
    pub fn new() -> Self {
        Self::default()
    }

    /// Checkpoint resuming after `value`
    pub fn starting_at(value: u64) -> Self {
        Self {
            value,
            pending: AckHeap::new(),
        }
    }

    /// Highest id such that it and all lower ids are acknowledged
    #[inline]
    pub fn value(&self) -> u64 {
        self.value
    }

    /// Ids acknowledged out of turn
    #[inline]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Apply one acknowledgment
    pub fn acknowledge(&mut self, id: u64) -> AckOutcome {
        if id <= self.value {
            return AckOutcome::Duplicate;
        }

        // common case: in-order acknowledgment
        if id == self.value + 1 {
            self.value += 1;
            return AckOutcome::Advanced(1 + self.drain_contiguous());
        }

        if self.pending.contains(id) {
            return AckOutcome::Duplicate;
        }
        self.pending.push(id);
        match self.drain_contiguous() {
            0 => AckOutcome::Deferred,
            n => AckOutcome::Advanced(n),
        }
    }

    fn drain_contiguous(&mut self) -> u64 {
        let mut advanced = 0;
        while self.pending.peek() == Some(self.value + 1) {
            self.pending.pop();
            self.value += 1;
            advanced += 1;
        }
        advanced
    }
}
