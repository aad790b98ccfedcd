//! Mock TTS provider for tests.
//!
//! Produces deterministic WAV audio (silence or a sine wave) whose
//! duration is proportional to the input text length, with optional
//! simulated latency. Lets the orchestrator and conversation tests run
//! without an external TTS server.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;

use super::{audio, AudioFormat, TtsAudio, TtsError, TtsProvider};

/// Waveform generated by the mock.
#[derive(Debug, Clone)]
pub enum MockWaveform {
    Silence,
    Sine { frequency_hz: f32, amplitude: f32 },
}

/// Configuration for [`MockTts`].
#[derive(Debug, Clone)]
pub struct MockTtsConfig {
    pub sample_rate: u32,
    pub ms_per_char: f64,
    pub min_duration_ms: f64,
    pub waveform: MockWaveform,
    pub latency_ms: u64,
    pub concurrent: bool,
}

impl Default for MockTtsConfig {
    fn default() -> Self {
        Self {
            sample_rate: 24000,
            ms_per_char: 100.0,
            min_duration_ms: 40.0,
            waveform: MockWaveform::Silence,
            latency_ms: 0,
            concurrent: true,
        }
    }
}

/// Deterministic in-process TTS provider.
pub struct MockTts {
    config: MockTtsConfig,
    calls: AtomicUsize,
}

impl MockTts {
    pub fn new(config: MockTtsConfig) -> Self {
        Self {
            config,
            calls: AtomicUsize::new(0),
        }
    }

    /// Silent audio with default settings.
    pub fn silent() -> Self {
        Self::new(MockTtsConfig::default())
    }

    /// Sine-wave audio at the given frequency.
    pub fn sine(frequency_hz: f32) -> Self {
        Self::new(MockTtsConfig {
            waveform: MockWaveform::Sine {
                frequency_hz,
                amplitude: 0.8,
            },
            ..MockTtsConfig::default()
        })
    }

    /// Simulate synthesis latency.
    pub fn with_latency(mut self, ms: u64) -> Self {
        self.config.latency_ms = ms;
        self
    }

    /// Report the engine as serial, like the rate-limited remote one.
    pub fn serial(mut self) -> Self {
        self.config.concurrent = false;
        self
    }

    /// Number of synthesize calls made so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TtsProvider for MockTts {
    async fn synthesize(&self, text: &str) -> Result<TtsAudio, TtsError> {
        if text.trim().is_empty() {
            return Err(TtsError::EmptyText);
        }
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self.config.latency_ms > 0 {
            sleep(Duration::from_millis(self.config.latency_ms)).await;
        }

        let char_count = text.chars().count() as f64;
        let duration_ms = (char_count * self.config.ms_per_char).max(self.config.min_duration_ms);
        let sample_count = (self.config.sample_rate as f64 * duration_ms / 1000.0) as usize;

        let samples: Vec<f32> = match &self.config.waveform {
            MockWaveform::Silence => vec![0.0; sample_count],
            MockWaveform::Sine {
                frequency_hz,
                amplitude,
            } => (0..sample_count)
                .map(|i| {
                    let t = i as f32 / self.config.sample_rate as f32;
                    amplitude * (2.0 * std::f32::consts::PI * frequency_hz * t).sin()
                })
                .collect(),
        };

        let data = audio::encode_wav(&samples, self.config.sample_rate)
            .map_err(|e| TtsError::Request(e.to_string()))?;

        Ok(TtsAudio {
            data,
            format: AudioFormat::Wav,
        })
    }

    fn name(&self) -> &str {
        "mock"
    }

    fn supports_concurrency(&self) -> bool {
        self.config.concurrent
    }
}
