//! Remote HTTP TTS provider.
//!
//! Speaks the OpenAI-style speech endpoint shape: a JSON POST of
//! `{model, input, voice, [speed], [volume], [response_format]}` with
//! bearer auth, returning raw audio bytes. All calls go through the
//! shared [`RateLimiter`]: one call in flight, six per rolling minute.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error, info, warn};

use super::rate_limit::RateLimiter;
use super::{AudioFormat, TtsAudio, TtsError, TtsProvider};
use crate::utils::ellipsize;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_ATTEMPTS: u32 = 3;
const THROTTLE_BACKOFF: Duration = Duration::from_secs(12);
const TIMEOUT_BACKOFF: Duration = Duration::from_secs(2);

/// Remote engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteTtsConfig {
    pub api_key: String,
    pub model: String,
    pub voice: String,
    pub base_url: String,
    pub response_format: String,
    /// Clamped to [0.5, 2.0].
    pub speed: f64,
    /// Clamped to [0.1, 2.0].
    pub volume: f64,
}

impl Default for RemoteTtsConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: "speech-mini".to_string(),
            voice: "warm-female".to_string(),
            base_url: "https://api.example.com/v1/audio/speech".to_string(),
            response_format: "mp3".to_string(),
            speed: 1.0,
            volume: 1.0,
        }
    }
}

/// Rate-limited remote TTS engine.
pub struct RemoteTts {
    client: reqwest::Client,
    limiter: Arc<RateLimiter>,
    api_key: String,
    model: String,
    voice: String,
    base_url: String,
    format: AudioFormat,
    speed: f64,
    volume: f64,
}

impl RemoteTts {
    pub fn new(config: RemoteTtsConfig, limiter: Arc<RateLimiter>) -> Self {
        if config.api_key.is_empty() {
            warn!("remote TTS api_key is empty, synthesis calls will fail");
        }

        let format = AudioFormat::parse_or_default(&config.response_format);
        let speed = config.speed.clamp(0.5, 2.0);
        let volume = config.volume.clamp(0.1, 2.0);

        info!(
            model = %config.model,
            voice = %config.voice,
            format = format.as_str(),
            speed,
            volume,
            "remote TTS engine initialized"
        );

        Self {
            client: reqwest::Client::new(),
            limiter,
            api_key: config.api_key,
            model: config.model,
            voice: config.voice,
            base_url: config.base_url,
            format,
            speed,
            volume,
        }
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    fn request_body(&self, text: &str) -> serde_json::Value {
        let mut body = json!({
            "model": self.model,
            "input": text,
            "voice": self.voice,
        });
        // Optional fields are sent only when they differ from the API
        // defaults.
        if self.speed != 1.0 {
            body["speed"] = json!(self.speed);
        }
        if self.volume != 1.0 {
            body["volume"] = json!(self.volume);
        }
        if self.format != AudioFormat::Mp3 {
            body["response_format"] = json!(self.format.as_str());
        }
        body
    }

    async fn request_once(&self, text: &str) -> Result<TtsAudio, TtsError> {
        let response = self
            .client
            .post(&self.base_url)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(text))
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TtsError::Timeout
                } else {
                    TtsError::Request(e.to_string())
                }
            })?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(TtsError::Throttled);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TtsError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let data = response
            .bytes()
            .await
            .map_err(|e| TtsError::Request(e.to_string()))?
            .to_vec();

        Ok(TtsAudio {
            data,
            format: self.format,
        })
    }
}

#[async_trait::async_trait]
impl TtsProvider for RemoteTts {
    async fn synthesize(&self, text: &str) -> Result<TtsAudio, TtsError> {
        if text.trim().is_empty() {
            return Err(TtsError::EmptyText);
        }

        let mut last_error = TtsError::Timeout;

        for attempt in 1..=MAX_ATTEMPTS {
            // Window before mutex; every attempt is recorded in the window
            // whether it succeeds or not.
            self.limiter.wait_for_slot().await;
            let _call = self.limiter.lock_call().await;

            debug!(attempt, text = %ellipsize(text, 50), "remote TTS request");

            match self.request_once(text).await {
                Ok(audio) => {
                    debug!(bytes = audio.data.len(), "remote TTS response");
                    return Ok(audio);
                }
                Err(TtsError::Throttled) => {
                    warn!(attempt, "remote TTS throttled, backing off");
                    last_error = TtsError::Throttled;
                    if attempt < MAX_ATTEMPTS {
                        tokio::time::sleep(THROTTLE_BACKOFF).await;
                    }
                }
                Err(TtsError::Timeout) => {
                    warn!(attempt, "remote TTS timed out, retrying");
                    last_error = TtsError::Timeout;
                    if attempt < MAX_ATTEMPTS {
                        tokio::time::sleep(TIMEOUT_BACKOFF).await;
                    }
                }
                Err(e) => {
                    // Other HTTP errors are not retried.
                    error!(error = %e, "remote TTS request failed");
                    return Err(e);
                }
            }
        }

        Err(last_error)
    }

    fn name(&self) -> &str {
        "remote"
    }

    /// The shared mutex admits one call at a time; telling the
    /// orchestrator up front lets it batch instead of queueing.
    fn supports_concurrency(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(config: RemoteTtsConfig) -> RemoteTts {
        RemoteTts::new(config, Arc::new(RateLimiter::default()))
    }

    #[test]
    fn speed_and_volume_are_clamped() {
        let tts = engine(RemoteTtsConfig {
            speed: 5.0,
            volume: 0.0,
            ..RemoteTtsConfig::default()
        });
        assert_eq!(tts.speed, 2.0);
        assert_eq!(tts.volume, 0.1);
    }

    #[test]
    fn invalid_format_falls_back_to_mp3() {
        let tts = engine(RemoteTtsConfig {
            response_format: "ogg".to_string(),
            ..RemoteTtsConfig::default()
        });
        assert_eq!(tts.format(), AudioFormat::Mp3);
    }

    #[test]
    fn body_omits_default_fields() {
        let tts = engine(RemoteTtsConfig::default());
        let body = tts.request_body("hello");
        assert_eq!(body["model"], "speech-mini");
        assert_eq!(body["input"], "hello");
        assert!(body.get("speed").is_none());
        assert!(body.get("volume").is_none());
        assert!(body.get("response_format").is_none());
    }

    #[test]
    fn body_includes_non_default_fields() {
        let tts = engine(RemoteTtsConfig {
            speed: 1.5,
            volume: 0.8,
            response_format: "wav".to_string(),
            ..RemoteTtsConfig::default()
        });
        let body = tts.request_body("hi");
        assert_eq!(body["speed"], 1.5);
        assert_eq!(body["volume"], 0.8);
        assert_eq!(body["response_format"], "wav");
    }

    #[test]
    fn remote_engine_is_not_concurrent() {
        let tts = engine(RemoteTtsConfig::default());
        assert!(!tts.supports_concurrency());
    }

    #[tokio::test]
    async fn empty_text_is_rejected_without_request() {
        let tts = engine(RemoteTtsConfig::default());
        assert!(matches!(
            tts.synthesize("   ").await,
            Err(TtsError::EmptyText)
        ));
        // No rate-limit slot may be consumed for a rejected call.
        assert_eq!(tts.limiter.requests_in_window().await, 0);
    }
}
