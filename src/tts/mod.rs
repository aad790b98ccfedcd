//! TTS provider abstraction and implementations.

pub mod audio;
pub mod cache;
pub mod mock;
pub mod preprocessor;
pub mod rate_limit;
pub mod remote;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Audio container formats the providers can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Wav,
    #[default]
    Mp3,
    Flac,
    Opus,
    Pcm,
}

impl AudioFormat {
    /// Parse a format name; unsupported values fall back to `mp3`.
    pub fn parse_or_default(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "wav" => Self::Wav,
            "mp3" => Self::Mp3,
            "flac" => Self::Flac,
            "opus" => Self::Opus,
            "pcm" => Self::Pcm,
            other => {
                tracing::warn!(format = other, "unsupported audio format, using mp3");
                Self::Mp3
            }
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Wav => "wav",
            Self::Mp3 => "mp3",
            Self::Flac => "flac",
            Self::Opus => "opus",
            Self::Pcm => "pcm",
        }
    }

    pub fn as_str(&self) -> &'static str {
        self.extension()
    }
}

/// Result of one synthesis call.
#[derive(Debug, Clone)]
pub struct TtsAudio {
    pub data: Vec<u8>,
    pub format: AudioFormat,
}

/// Errors a synthesis call can produce.
#[derive(Debug, thiserror::Error)]
pub enum TtsError {
    #[error("provider throttled the request (HTTP 429)")]
    Throttled,
    #[error("synthesis request timed out")]
    Timeout,
    #[error("provider returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("synthesis request failed: {0}")]
    Request(String),
    #[error("empty synthesis text")]
    EmptyText,
}

/// Text-to-speech provider.
#[async_trait]
pub trait TtsProvider: Send + Sync {
    /// Synthesize text into audio.
    async fn synthesize(&self, text: &str) -> Result<TtsAudio, TtsError>;

    /// Human-readable provider name.
    fn name(&self) -> &str;

    /// Whether concurrent synthesis calls are allowed.
    ///
    /// Rate-limited remote engines return `false`; the orchestrator then
    /// synthesizes serially and may batch sentences into merged calls.
    fn supports_concurrency(&self) -> bool {
        true
    }
}
