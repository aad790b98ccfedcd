//! Speech-recognition interface.
//!
//! The ASR engine itself is an external collaborator; the controller
//! only needs PCM-in, text-out. A scripted mock supports tests.

use anyhow::Result;
use async_trait::async_trait;

/// Transcribes mono f32 PCM into text.
#[async_trait]
pub trait AsrEngine: Send + Sync {
    async fn transcribe(&self, samples: &[f32]) -> Result<String>;

    /// Human-readable engine name.
    fn name(&self) -> &str;
}

/// Mock ASR returning queued transcripts in order (the last one repeats).
pub struct MockAsr {
    transcripts: std::sync::Mutex<Vec<String>>,
}

impl MockAsr {
    pub fn new(transcripts: &[&str]) -> Self {
        Self {
            transcripts: std::sync::Mutex::new(
                transcripts.iter().rev().map(|s| s.to_string()).collect(),
            ),
        }
    }

    /// Always transcribe to the same text.
    pub fn fixed(text: &str) -> Self {
        Self::new(&[text])
    }
}

#[async_trait]
impl AsrEngine for MockAsr {
    async fn transcribe(&self, _samples: &[f32]) -> Result<String> {
        let mut transcripts = self.transcripts.lock().unwrap();
        if transcripts.len() > 1 {
            Ok(transcripts.pop().unwrap())
        } else {
            Ok(transcripts.last().cloned().unwrap_or_default())
        }
    }

    fn name(&self) -> &str {
        "mock-asr"
    }
}
