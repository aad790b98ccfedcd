//! Input pre-screening: everything that happens between "a message
//! arrived" and "a turn may start".
//!
//! Audio is transcribed and noise-filtered, stop words are checked
//! before wake words (a barge-in outranks a new prompt), and wake-word
//! gating silently drops anything not addressed to the avatar.

use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use super::wakeword::{check_stop_word, check_wake_word};
use crate::asr::AsrEngine;
use crate::server::messages::{OutboundSender, ServerMessage, WordGateConfig};

/// Raw input for one turn.
#[derive(Debug, Clone)]
pub enum TurnInput {
    /// Typed text.
    Text(String),
    /// Buffered microphone PCM.
    Audio(Vec<f32>),
    /// Server-initiated proactive prompt.
    Proactive(String),
}

/// Result of pre-screening.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreScreenOutcome {
    /// Nothing usable (empty, noise, or wake-word miss): drop silently.
    Rejected,
    /// A stop word was heard; the caller cancels the running turn and
    /// starts nothing.
    StopWord {
        matched_word: String,
        transcript: String,
    },
    /// Only the wake word itself was uttered; acknowledged, no turn.
    WakeWordOnly { matched_word: String },
    /// A valid prompt for the model.
    Prompt { text: String, from_voice: bool },
}

/// Transcripts that are single punctuation marks or interjections; ASR
/// noise, not input.
const NOISE_TRANSCRIPTS: &[&str] = &["。", ".", "，", ",", "!", "?", "嗯", "啊", "哦", "呃"];

fn gate_enabled(config: Option<&WordGateConfig>) -> Option<&WordGateConfig> {
    config.filter(|c| c.enabled && !c.words.is_empty())
}

/// Pre-screen one input. Transcription results are reported to the
/// client as a side effect, mirroring what the user actually said.
pub async fn process_user_input(
    input: &TurnInput,
    pre_transcribed: Option<String>,
    asr: &Arc<dyn AsrEngine>,
    out: &OutboundSender,
    wake_config: Option<&WordGateConfig>,
    stop_config: Option<&WordGateConfig>,
) -> Result<PreScreenOutcome> {
    match input {
        TurnInput::Proactive(prompt) => Ok(PreScreenOutcome::Prompt {
            text: prompt.clone(),
            from_voice: false,
        }),

        TurnInput::Text(text) => {
            let text = text.trim();
            if text.is_empty() {
                Ok(PreScreenOutcome::Rejected)
            } else {
                Ok(PreScreenOutcome::Prompt {
                    text: text.to_string(),
                    from_voice: false,
                })
            }
        }

        TurnInput::Audio(samples) => {
            let transcript = match pre_transcribed {
                Some(text) => text,
                None => asr.transcribe(samples).await?,
            };
            let transcript = transcript.trim().to_string();

            if transcript.is_empty() {
                warn!("ASR returned empty text, dropping input");
                return Ok(PreScreenOutcome::Rejected);
            }
            if NOISE_TRANSCRIPTS.contains(&transcript.as_str()) {
                warn!(transcript = %transcript, "ASR returned noise-like text, dropping input");
                return Ok(PreScreenOutcome::Rejected);
            }

            // Stop words outrank wake words.
            if let Some(gate) = gate_enabled(stop_config) {
                if let Some(matched) =
                    check_stop_word(&transcript, &gate.words, gate.fuzzy_pinyin)
                {
                    let _ = out.send(ServerMessage::UserInputTranscription {
                        text: format!("（停止词：{matched}）"),
                        original_text: Some(transcript.clone()),
                        is_stop_word: Some(true),
                    });
                    return Ok(PreScreenOutcome::StopWord {
                        matched_word: matched,
                        transcript,
                    });
                }
            }

            if let Some(gate) = gate_enabled(wake_config) {
                return match check_wake_word(&transcript, &gate.words, gate.fuzzy_pinyin) {
                    None => {
                        info!(transcript = %transcript, "wake word not detected, dropping input");
                        Ok(PreScreenOutcome::Rejected)
                    }
                    Some(m) if m.clean_text.is_empty() => {
                        info!(word = %m.matched_word, "wake word only, waiting for more input");
                        let _ = out.send(ServerMessage::UserInputTranscription {
                            text: format!("（唤醒词：{}）", m.matched_word),
                            original_text: None,
                            is_stop_word: None,
                        });
                        Ok(PreScreenOutcome::WakeWordOnly {
                            matched_word: m.matched_word,
                        })
                    }
                    Some(m) => {
                        info!(word = %m.matched_word, prompt = %m.clean_text, "wake word detected");
                        let _ = out.send(ServerMessage::UserInputTranscription {
                            text: m.clean_text.clone(),
                            original_text: None,
                            is_stop_word: None,
                        });
                        Ok(PreScreenOutcome::Prompt {
                            text: m.clean_text,
                            from_voice: true,
                        })
                    }
                };
            }

            let _ = out.send(ServerMessage::UserInputTranscription {
                text: transcript.clone(),
                original_text: None,
                is_stop_word: None,
            });
            Ok(PreScreenOutcome::Prompt {
                text: transcript,
                from_voice: true,
            })
        }
    }
}
