//! Reorder buffer for strict arrival-order playback.
//!
//! Productions finish in whatever order the external services answer. In
//! arrival-order mode each finished production is inserted under its
//! arrival sequence number, and only the contiguous run starting at the next
//! expected sequence is released. Every arrival must eventually be inserted
//! (failures and timeouts included) or the buffer stalls behind the gap.

use std::collections::BTreeMap;

/// Holds out-of-order items until the gap before them is filled.
#[derive(Debug)]
pub struct ArrivalOrderBuffer<T> {
    pending: BTreeMap<u64, T>,
    next_expected: u64,
}

impl<T> ArrivalOrderBuffer<T> {
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    pub fn starting_at(first: u64) -> Self {
        Self {
            pending: BTreeMap::new(),
            next_expected: first,
        }
    }

    /// Insert `item` under `seq` and return everything now releasable, in
    /// sequence order. Sequences already released are discarded.
    pub fn insert(&mut self, seq: u64, item: T) -> Vec<T> {
        if seq < self.next_expected {
            return Vec::new();
        }
        self.pending.insert(seq, item);
        self.flush()
    }

    /// Next sequence the buffer is waiting for.
    pub fn next_expected(&self) -> u64 {
        self.next_expected
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn has_gaps(&self) -> bool {
        !self.pending.is_empty()
    }

    fn flush(&mut self) -> Vec<T> {
        let mut ready = Vec::new();
        while let Some(item) = self.pending.remove(&self.next_expected) {
            ready.push(item);
            self.next_expected += 1;
        }
        ready
    }
}

impl<T> Default for ArrivalOrderBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}
