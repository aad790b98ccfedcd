//! One conversation turn, end to end: pre-screen, model stream,
//! sentence division, transformation, synthesis, and terminal signaling.

use std::sync::Arc;

use anyhow::Result;
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::Notify;
use tracing::{debug, error, info};

use super::prescreen::{process_user_input, PreScreenOutcome, TurnInput};
use super::ServiceContext;
use crate::agent::{AgentEvent, BatchInput};
use crate::divider::{SentenceDivider, StreamItem};
use crate::history::StoredMessage;
use crate::orchestrator::TtsOrchestrator;
use crate::pipeline::{self, PipelineItem};
use crate::server::messages::{
    ControlSignal, ImagePayload, OutboundSender, ServerMessage, WordGateConfig,
};

/// Advisory prefixed to the model input for voice transcripts when
/// voice-prompt injection is enabled. Never persisted to history.
const VOICE_ADVISORY: &str = "【以下是语音输入转译，可能存在谐音字或识别误差，请理解原意】";

/// Everything a turn needs beyond the service context.
pub struct TurnRequest {
    pub input: TurnInput,
    pub images: Option<Vec<ImagePayload>>,
    pub metadata: Option<Value>,
    pub wake_word_config: Option<WordGateConfig>,
    pub stop_word_config: Option<WordGateConfig>,
    /// Transcript already produced by the early stop-word check, so the
    /// audio is not transcribed twice.
    pub pre_transcribed: Option<String>,
}

fn metadata_flag(metadata: &Option<Value>, key: &str) -> bool {
    metadata
        .as_ref()
        .and_then(|m| m.get(key))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Run one turn to completion. Returns the accumulated display text of
/// the response; empty when the input was rejected by pre-screening.
pub async fn process_single_turn(
    context: Arc<ServiceContext>,
    out: OutboundSender,
    orchestrator: Arc<TtsOrchestrator>,
    playback_ack: Arc<Notify>,
    session_emoji: char,
    request: TurnRequest,
) -> Result<String> {
    let outcome = process_user_input(
        &request.input,
        request.pre_transcribed.clone(),
        &context.asr,
        &out,
        request.wake_word_config.as_ref(),
        request.stop_word_config.as_ref(),
    )
    .await?;

    let (input_text, from_voice) = match outcome {
        PreScreenOutcome::Rejected => {
            info!("input rejected by pre-screening, no turn started");
            return Ok(String::new());
        }
        PreScreenOutcome::WakeWordOnly { matched_word } => {
            info!(word = %matched_word, "wake word acknowledged, waiting for a prompt");
            return Ok(String::new());
        }
        PreScreenOutcome::StopWord { matched_word, .. } => {
            // Normally caught by the early check; emit the interrupt
            // signal and start nothing.
            info!(word = %matched_word, "stop word during pre-screen, no turn started");
            let _ = out.send(ServerMessage::Control {
                text: ControlSignal::Interrupt,
            });
            return Ok(String::new());
        }
        PreScreenOutcome::Prompt { text, from_voice } => (text, from_voice),
    };

    let inject_advisory = from_voice
        && request
            .wake_word_config
            .as_ref()
            .is_some_and(|c| c.voice_prompt_injection);
    let model_input = if inject_advisory {
        debug!("voice advisory injected into model input");
        format!("{VOICE_ADVISORY}\n{input_text}")
    } else {
        input_text.clone()
    };

    let _ = out.send(ServerMessage::Control {
        text: ControlSignal::ConversationChainStart,
    });
    let _ = out.send(ServerMessage::FullText {
        text: "Thinking...".to_string(),
    });
    info!(emoji = %session_emoji, input = %input_text, "conversation chain started");

    let character = &context.config.character;
    let skip_history = metadata_flag(&request.metadata, "skip_history");

    // History keeps the raw transcript, not the injected model input.
    if let Some(history_uid) = &context.history_uid {
        if skip_history {
            debug!("skipping history for this turn");
        } else {
            context
                .history
                .store_message(
                    history_uid,
                    StoredMessage {
                        role: "human".to_string(),
                        content: input_text.clone(),
                        name: Some(character.human_name.clone()),
                        avatar: None,
                    },
                )
                .await?;
        }
    }

    let batch = BatchInput::from_text(
        model_input,
        character.human_name.clone(),
        request.images.clone(),
        request.metadata.clone(),
    );

    orchestrator.reset_for_new_turn().await;

    let agent_stream = context.agent.chat(batch).await?;
    let items = agent_stream.map(|event| {
        event.map(|e| match e {
            AgentEvent::Token(text) => StreamItem::Text(text),
            AgentEvent::Record(record) => StreamItem::Record(record),
        })
    });

    let divider = SentenceDivider::new(context.config.divider.clone());
    let divided = divider.divide(Box::pin(items));
    let mut outputs = pipeline::transform(
        divided,
        Arc::clone(&context.emotion),
        context.config.tts_preprocessor.clone(),
    );

    let mut full_response = String::new();

    while let Some(item) = outputs.next().await {
        match item {
            Err(e) => {
                // Already-queued audio still gets finalized below.
                error!(error = %e, "model stream failed");
                let _ = out.send(ServerMessage::Error {
                    message: format!("Error processing response: {e}"),
                });
                break;
            }
            Ok(PipelineItem::Record(mut record)) => {
                if record.get("type").and_then(Value::as_str) == Some("tool_call_status") {
                    record["name"] = Value::String(character.character_name.clone());
                }
                let _ = out.send(ServerMessage::Raw(record));
            }
            Ok(PipelineItem::Sentence(mut sentence)) => {
                sentence.display_text.name = Some(character.character_name.clone());
                if !character.avatar.is_empty() {
                    sentence.display_text.avatar = Some(character.avatar.clone());
                }
                full_response.push_str(&sentence.display_text.text);
                orchestrator.speak(sentence).await?;
            }
        }
    }

    orchestrator.flush_remaining().await;
    orchestrator.finish().await;

    if orchestrator.spoke().await {
        let _ = out.send(ServerMessage::BackendSynthComplete);
        playback_ack.notified().await;
        debug!("client reported playback complete");
    }

    let _ = out.send(ServerMessage::ForceNewMessage);
    let _ = out.send(ServerMessage::Control {
        text: ControlSignal::ConversationChainEnd,
    });
    info!(emoji = %session_emoji, "conversation chain completed");

    if let Some(history_uid) = &context.history_uid {
        if !full_response.is_empty() {
            context
                .history
                .store_message(
                    history_uid,
                    StoredMessage {
                        role: "ai".to_string(),
                        content: full_response.clone(),
                        name: Some(character.character_name.clone()),
                        avatar: (!character.avatar.is_empty())
                            .then(|| character.avatar.clone()),
                    },
                )
                .await?;
        }
    }

    Ok(full_response)
}
