//! Merge buffer for batched TTS synthesis.
//!
//! Consecutive sentences are accumulated and synthesized in one provider
//! call, amortizing a tight API rate limit. The progressive policy ramps
//! the buffer size 1→2→3 across a turn: the first sentence flushes alone
//! for the fastest time-to-audio, later rounds batch up to the cap.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::pipeline::{Actions, DisplayText};

/// Merge policy knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Master switch; merging additionally requires a provider that does
    /// not support concurrent synthesis.
    pub enabled: bool,
    /// Cap on sentences per merged call.
    pub max_sentences: usize,
    /// Ramp the per-round buffer size 1→2→…→cap instead of always
    /// waiting for a full buffer.
    pub progressive: bool,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_sentences: 3,
            progressive: true,
        }
    }
}

/// One sentence waiting in the merge buffer.
#[derive(Debug, Clone)]
pub struct MergeItem {
    pub tts_text: String,
    pub display_text: DisplayText,
    pub actions: Option<Actions>,
}

/// Accumulates sentences until the current round's flush threshold.
pub struct MergeBuffer {
    items: Vec<MergeItem>,
    max_sentences: usize,
    progressive: bool,
    /// Sentences seen this turn, driving the progressive ramp.
    sentence_count: usize,
    /// Flush threshold locked when a round begins (buffer was empty).
    current_round_max: usize,
}

impl MergeBuffer {
    pub fn new(config: &MergeConfig) -> Self {
        Self {
            items: Vec::new(),
            max_sentences: config.max_sentences.max(1),
            progressive: config.progressive,
            sentence_count: 0,
            current_round_max: 1,
        }
    }

    /// Add a sentence; returns `true` when the buffer is due for a flush.
    pub fn push(&mut self, item: MergeItem) -> bool {
        self.sentence_count += 1;

        if self.items.is_empty() {
            self.current_round_max = if self.progressive {
                self.sentence_count.min(self.max_sentences)
            } else {
                self.max_sentences
            };
            debug!(round_max = self.current_round_max, "new merge round");
        }

        self.items.push(item);
        self.items.len() >= self.current_round_max
    }

    /// Take the buffered sentences, leaving the buffer empty.
    pub fn take(&mut self) -> Vec<MergeItem> {
        std::mem::take(&mut self.items)
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Restart the progressive ramp for a new turn.
    pub fn reset_turn(&mut self) {
        self.sentence_count = 0;
    }

    /// Drop buffered sentences (barge-in cleanup).
    pub fn clear(&mut self) {
        self.items.clear();
    }
}

/// Apportion a merged audio duration across sentences by character count.
///
/// Every sentence gets `floor(total * chars / total_chars)`; the final
/// sentence absorbs the rounding remainder so the slices sum exactly to
/// `total_ms`.
pub fn apportion_durations(char_counts: &[usize], total_ms: u64) -> Vec<u64> {
    if char_counts.is_empty() {
        return Vec::new();
    }

    let total_chars: usize = char_counts.iter().sum();
    let mut durations = Vec::with_capacity(char_counts.len());
    let mut allotted = 0u64;

    for (i, count) in char_counts.iter().enumerate() {
        let duration = if i == char_counts.len() - 1 {
            total_ms - allotted
        } else if total_chars == 0 {
            total_ms / char_counts.len() as u64
        } else {
            total_ms * *count as u64 / total_chars as u64
        };
        allotted += duration;
        durations.push(duration);
    }

    durations
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(text: &str) -> MergeItem {
        MergeItem {
            tts_text: text.to_string(),
            display_text: DisplayText::new(text),
            actions: None,
        }
    }

    fn buffer(progressive: bool) -> MergeBuffer {
        MergeBuffer::new(&MergeConfig {
            enabled: true,
            max_sentences: 3,
            progressive,
        })
    }

    #[test]
    fn progressive_ramp_flushes_1_2_3_3() {
        let mut buf = buffer(true);
        let mut flush_sizes = Vec::new();

        for label in ["A", "B", "C", "D", "E", "F", "G"] {
            if buf.push(item(label)) {
                flush_sizes.push(buf.take().len());
            }
        }
        // Turn end flushes the residue unconditionally.
        if !buf.is_empty() {
            flush_sizes.push(buf.take().len());
        }

        // A | B,C | D,E,F | G (turn end): thresholds ramp 1→2→3 and stay
        // at the cap.
        assert_eq!(flush_sizes, vec![1, 2, 3, 1]);
    }

    #[test]
    fn non_progressive_waits_for_full_buffer() {
        let mut buf = buffer(false);
        assert!(!buf.push(item("A")));
        assert!(!buf.push(item("B")));
        assert!(buf.push(item("C")));
        assert_eq!(buf.take().len(), 3);
    }

    #[test]
    fn round_max_is_locked_at_round_start() {
        let mut buf = buffer(true);
        assert!(buf.push(item("A"))); // round of 1
        buf.take();

        // Round of 2 locked here; pushing a third sentence keeps the
        // threshold at 2 until the round flushes.
        assert!(!buf.push(item("B")));
        assert!(buf.push(item("C")));
        assert_eq!(buf.take().len(), 2);
    }

    #[test]
    fn reset_turn_restarts_ramp() {
        let mut buf = buffer(true);
        for label in ["A", "B", "C"] {
            if buf.push(item(label)) {
                buf.take();
            }
        }

        buf.reset_turn();
        // First sentence of the new turn flushes alone again.
        assert!(buf.push(item("X")));
    }

    #[test]
    fn clear_drops_items_but_keeps_ramp_position() {
        let mut buf = buffer(true);
        buf.push(item("A"));
        buf.take();
        buf.push(item("B"));
        buf.clear();
        assert!(buf.is_empty());
        assert_eq!(buf.len(), 0);
    }

    #[test]
    fn apportion_sums_to_total() {
        let durations = apportion_durations(&[3, 5, 7], 1000);
        assert_eq!(durations.iter().sum::<u64>(), 1000);
        // floor(1000*3/15)=200, floor(1000*5/15)=333, final absorbs 467.
        assert_eq!(durations, vec![200, 333, 467]);
    }

    #[test]
    fn apportion_single_sentence_takes_all() {
        assert_eq!(apportion_durations(&[10], 730), vec![730]);
    }

    #[test]
    fn apportion_equal_counts() {
        let durations = apportion_durations(&[4, 4], 1001);
        assert_eq!(durations, vec![500, 501]);
    }

    #[test]
    fn apportion_empty_is_empty() {
        assert!(apportion_durations(&[], 500).is_empty());
    }
}
