//! Wire message schema for the persistent client channel.
//!
//! JSON text frames both ways; inbound messages are tagged by `type`,
//! outbound messages mirror the shape the avatar frontend expects.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::orchestrator::payload::AudioPayload;

/// Wake-word / stop-word gate configuration, sent per input message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WordGateConfig {
    pub enabled: bool,
    pub words: Vec<String>,
    pub fuzzy_pinyin: bool,
    pub voice_prompt_injection: bool,
}

/// Messages arriving from the client.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Typed text input, optionally with attached images.
    TextInput {
        text: String,
        #[serde(default)]
        images: Option<Vec<Value>>,
        #[serde(default)]
        wake_word_config: Option<WordGateConfig>,
        #[serde(default)]
        stop_word_config: Option<WordGateConfig>,
    },
    /// One chunk of microphone PCM (f32 samples).
    MicAudioData { audio: Vec<f32> },
    /// End of the microphone stream; the buffered chunks form the input.
    MicAudioEnd {
        #[serde(default)]
        wake_word_config: Option<WordGateConfig>,
        #[serde(default)]
        stop_word_config: Option<WordGateConfig>,
    },
    /// Ask the avatar to speak proactively.
    AiSpeakSignal,
    /// Barge-in: `text` carries the response heard so far.
    InterruptSignal {
        #[serde(default)]
        text: String,
    },
    /// Client finished playing all queued audio.
    FrontendPlaybackComplete,
}

/// `control` message payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ControlSignal {
    ConversationChainStart,
    ConversationChainEnd,
    Interrupt,
}

/// Messages sent to the client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    Control {
        text: ControlSignal,
    },
    FullText {
        text: String,
    },
    UserInputTranscription {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        original_text: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        is_stop_word: Option<bool>,
    },
    Audio(AudioPayload),
    BackendSynthComplete,
    ForceNewMessage,
    Error {
        message: String,
    },
    /// Out-of-band records (e.g. `tool_call_status`) forwarded verbatim.
    #[serde(untagged)]
    Raw(Value),
}

/// Channel feeding the per-client writer task.
pub type OutboundSender = mpsc::UnboundedSender<ServerMessage>;

/// A normalized image attachment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImagePayload {
    pub source: String,
    pub data: String,
    pub mime_type: String,
}

/// Normalize a client-supplied image value.
///
/// Clients may send either the full `{source, data, mime_type}` object or
/// a bare data URL string; for the latter the MIME type is derived from
/// the URL header, defaulting to `image/png`.
pub fn normalize_image(value: &Value) -> Option<ImagePayload> {
    match value {
        Value::String(data) => Some(ImagePayload {
            source: "upload".to_string(),
            data: data.clone(),
            mime_type: mime_from_data_url(data),
        }),
        Value::Object(_) => serde_json::from_value(value.clone()).ok(),
        _ => None,
    }
}

/// MIME type from a `data:<mime>;base64,…` header; `image/png` when the
/// string is not a data URL or the header is malformed.
pub fn mime_from_data_url(data: &str) -> String {
    const DEFAULT: &str = "image/png";

    let Some(rest) = data.strip_prefix("data:") else {
        return DEFAULT.to_string();
    };
    let header = rest.split(',').next().unwrap_or("");
    let mime = header.split(';').next().unwrap_or("");
    if mime.is_empty() {
        DEFAULT.to_string()
    } else {
        mime.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_input_deserializes() {
        let msg: ClientMessage = serde_json::from_str(
            r#"{"type": "text-input", "text": "hello", "wake_word_config": {"enabled": true, "words": ["小助手"]}}"#,
        )
        .unwrap();
        let ClientMessage::TextInput {
            text,
            wake_word_config,
            ..
        } = msg
        else {
            panic!("wrong variant");
        };
        assert_eq!(text, "hello");
        let gate = wake_word_config.unwrap();
        assert!(gate.enabled);
        assert_eq!(gate.words, vec!["小助手"]);
        assert!(!gate.fuzzy_pinyin);
    }

    #[test]
    fn mic_audio_end_deserializes_without_configs() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type": "mic-audio-end"}"#).unwrap();
        assert!(matches!(
            msg,
            ClientMessage::MicAudioEnd {
                wake_word_config: None,
                stop_word_config: None,
            }
        ));
    }

    #[test]
    fn interrupt_signal_carries_heard_text() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type": "interrupt-signal", "text": "partial resp"}"#).unwrap();
        let ClientMessage::InterruptSignal { text } = msg else {
            panic!("wrong variant");
        };
        assert_eq!(text, "partial resp");
    }

    #[test]
    fn control_serializes_kebab_case() {
        let json = serde_json::to_value(ServerMessage::Control {
            text: ControlSignal::ConversationChainStart,
        })
        .unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "control", "text": "conversation-chain-start"})
        );
    }

    #[test]
    fn unit_messages_serialize_with_type_only() {
        let json = serde_json::to_value(ServerMessage::BackendSynthComplete).unwrap();
        assert_eq!(json, serde_json::json!({"type": "backend-synth-complete"}));

        let json = serde_json::to_value(ServerMessage::ForceNewMessage).unwrap();
        assert_eq!(json, serde_json::json!({"type": "force-new-message"}));
    }

    #[test]
    fn transcription_omits_optional_fields() {
        let json = serde_json::to_value(ServerMessage::UserInputTranscription {
            text: "hi".to_string(),
            original_text: None,
            is_stop_word: None,
        })
        .unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "user-input-transcription", "text": "hi"})
        );
    }

    #[test]
    fn audio_message_flattens_payload() {
        use crate::pipeline::DisplayText;
        let json = serde_json::to_value(ServerMessage::Audio(AudioPayload::silent(
            DisplayText::new("hello"),
            None,
        )))
        .unwrap();
        assert_eq!(json["type"], "audio");
        assert_eq!(json["display_text"]["text"], "hello");
        assert_eq!(json["audio"], serde_json::Value::Null);
    }

    #[test]
    fn raw_record_serializes_verbatim() {
        let record = serde_json::json!({"type": "tool_call_status", "status": "ok"});
        let json = serde_json::to_value(ServerMessage::Raw(record.clone())).unwrap();
        assert_eq!(json, record);
    }

    #[test]
    fn data_url_mime_is_derived() {
        assert_eq!(
            mime_from_data_url("data:image/jpeg;base64,AAAA"),
            "image/jpeg"
        );
        assert_eq!(mime_from_data_url("data:;base64,AAAA"), "image/png");
        assert_eq!(mime_from_data_url("AAAA"), "image/png");
    }

    #[test]
    fn bare_string_image_normalizes() {
        let value = Value::String("data:image/webp;base64,AAAA".to_string());
        let image = normalize_image(&value).unwrap();
        assert_eq!(image.source, "upload");
        assert_eq!(image.mime_type, "image/webp");
    }

    #[test]
    fn object_image_passes_through() {
        let value = serde_json::json!({
            "source": "camera",
            "data": "AAAA",
            "mime_type": "image/png"
        });
        let image = normalize_image(&value).unwrap();
        assert_eq!(image.source, "camera");
    }

    #[test]
    fn malformed_image_is_dropped() {
        assert!(normalize_image(&serde_json::json!(42)).is_none());
        assert!(normalize_image(&serde_json::json!({"nope": true})).is_none());
    }
}
