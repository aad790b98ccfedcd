//! Client-bound audio payloads.

use serde::Serialize;

use crate::pipeline::{Actions, DisplayText};
use crate::tts::audio::SLICE_LENGTH_MS;

/// Timing metadata attached to sentences delivered from a merged
/// synthesis round.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergeInfo {
    pub is_merged: bool,
    pub total_sentences: usize,
    pub sentence_index: usize,
    pub sentence_duration_ms: u64,
    pub total_duration_ms: u64,
    /// Offset from the start of the merged audio at which this sentence's
    /// display should appear. Absent on the first sentence.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay_before_show_ms: Option<u64>,
}

/// One audio message for the client.
///
/// `audio: None` with empty `volumes` is a silent payload: the client
/// shows the text and plays nothing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AudioPayload {
    pub audio: Option<String>,
    pub volumes: Vec<f32>,
    pub slice_length: u64,
    pub display_text: DisplayText,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actions: Option<Actions>,
    pub forwarded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merge_info: Option<MergeInfo>,
}

impl AudioPayload {
    /// A display-only payload with nothing to play.
    pub fn silent(display_text: DisplayText, actions: Option<Actions>) -> Self {
        Self {
            audio: None,
            volumes: Vec::new(),
            slice_length: SLICE_LENGTH_MS,
            display_text,
            actions,
            forwarded: false,
            merge_info: None,
        }
    }

    /// A payload carrying base64 audio and its volume envelope.
    pub fn with_audio(
        audio_base64: String,
        volumes: Vec<f32>,
        display_text: DisplayText,
        actions: Option<Actions>,
    ) -> Self {
        Self {
            audio: Some(audio_base64),
            volumes,
            slice_length: SLICE_LENGTH_MS,
            display_text,
            actions,
            forwarded: false,
            merge_info: None,
        }
    }

    pub fn is_silent(&self) -> bool {
        self.audio.is_none()
    }
}
