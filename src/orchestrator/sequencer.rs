//! Ordered-delivery reorder buffer.
//!
//! Synthesis tasks run concurrently and finish in arbitrary order; every
//! payload carries the sequence number assigned at submission, and this
//! buffer releases payloads strictly in that order.

use std::collections::HashMap;

use super::payload::AudioPayload;

/// Reorders `(sequence, payload)` pairs into submission order.
pub struct Sequencer {
    next: u64,
    pending: HashMap<u64, AudioPayload>,
}

impl Sequencer {
    pub fn new(start: u64) -> Self {
        Self {
            next: start,
            pending: HashMap::new(),
        }
    }

    /// Submit a payload; returns every payload now ready for delivery,
    /// in order. Out-of-order arrivals are buffered until their
    /// predecessors show up.
    pub fn submit(&mut self, sequence: u64, payload: AudioPayload) -> Vec<AudioPayload> {
        self.pending.insert(sequence, payload);

        let mut ready = Vec::new();
        while let Some(next) = self.pending.remove(&self.next) {
            ready.push(next);
            self.next += 1;
        }
        ready
    }

    /// Number of payloads parked waiting for predecessors.
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }
}
