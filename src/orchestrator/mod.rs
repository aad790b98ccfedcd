//! TTS orchestrator: sentence outputs → ordered audio payloads.
//!
//! Owns a conversation turn's synthesis pipeline: pre-filters sentences
//! that must stay silent, dispatches synthesis (concurrently for engines
//! that allow it, serially otherwise), batches sentences into merged
//! calls for rate-limited engines, and guarantees the client receives
//! payloads in sentence-submission order no matter when synthesis
//! completes.

pub mod merge;
pub mod payload;
pub mod sequencer;

use std::sync::Arc;

use anyhow::Result;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::pipeline::{Actions, DisplayText, SentenceOutput};
use crate::server::messages::{OutboundSender, ServerMessage};
use crate::tts::audio::decode_wav;
use crate::tts::cache::AudioCache;
use crate::tts::{AudioFormat, TtsProvider};
use crate::utils::ellipsize;
pub use merge::MergeConfig;
use merge::{apportion_durations, MergeBuffer, MergeItem};
pub use payload::{AudioPayload, MergeInfo};
use sequencer::Sequencer;

static EMOTION_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[\w+\]").expect("valid emotion tag regex"));
static PUNCTUATION_ONLY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"[\s.,!?，。！？'"』」）】]+"#).expect("valid punctuation regex")
});

struct OrchestratorState {
    sequence_counter: u64,
    payload_tx: Option<mpsc::UnboundedSender<(u64, AudioPayload)>>,
    sender_task: Option<JoinHandle<()>>,
    tasks: Vec<JoinHandle<()>>,
    merge: MergeBuffer,
    spoke: bool,
}

/// Per-turn synthesis coordinator.
pub struct TtsOrchestrator {
    provider: Arc<dyn TtsProvider>,
    cache: Arc<AudioCache>,
    out: OutboundSender,
    merge_enabled: bool,
    state: Mutex<OrchestratorState>,
}

impl TtsOrchestrator {
    pub fn new(
        provider: Arc<dyn TtsProvider>,
        cache: Arc<AudioCache>,
        out: OutboundSender,
        merge_config: &MergeConfig,
    ) -> Self {
        Self {
            provider,
            cache,
            out,
            merge_enabled: merge_config.enabled,
            state: Mutex::new(OrchestratorState {
                sequence_counter: 0,
                payload_tx: None,
                sender_task: None,
                tasks: Vec::new(),
                merge: MergeBuffer::new(merge_config),
                spoke: false,
            }),
        }
    }

    /// Queue one sentence for synthesis and ordered delivery.
    pub async fn speak(&self, output: SentenceOutput) -> Result<()> {
        let SentenceOutput {
            display_text,
            tts_text,
            actions,
        } = output;
        let actions = (!actions.is_empty()).then_some(actions);

        // Headings are shown, never spoken.
        if tts_text.trim_start().starts_with('#') || display_text.text.trim_start().starts_with('#')
        {
            info!(
                display = %ellipsize(&display_text.text, 50),
                "heading content, sending display-only payload"
            );
            self.send_display_only(display_text, actions).await;
            return Ok(());
        }

        // A bare emotion tag drives the avatar but produces no output.
        if is_emotion_tag_only(&tts_text) {
            info!(tts = %tts_text, "emotion-tag-only sentence dropped");
            return Ok(());
        }

        let mut spoken = EMOTION_TAG.replace_all(&tts_text, "").trim().to_string();
        spoken = remove_heading_lines(&spoken);

        if spoken.trim().is_empty() || is_punctuation_only(&spoken) {
            debug!(
                display = %ellipsize(&display_text.text, 50),
                "nothing speakable, sending display-only payload"
            );
            self.send_display_only(display_text, actions).await;
            return Ok(());
        }

        if self.merge_enabled && !self.provider.supports_concurrency() {
            self.speak_merged(spoken, display_text, actions).await;
        } else {
            self.speak_single(spoken, display_text, actions).await;
        }
        Ok(())
    }

    /// Flush any sentences still waiting in the merge buffer. Called at
    /// turn end; flushes even below the round threshold.
    pub async fn flush_remaining(&self) {
        let pending = { self.state.lock().await.merge.len() };
        if pending > 0 {
            debug!(pending, "flushing residual merge buffer");
            self.flush_merge_buffer().await;
        }
    }

    /// Wait for every queued synthesis task and for the sender to drain.
    pub async fn finish(&self) {
        let (tasks, payload_tx, sender_task) = {
            let mut state = self.state.lock().await;
            (
                std::mem::take(&mut state.tasks),
                state.payload_tx.take(),
                state.sender_task.take(),
            )
        };

        for task in tasks {
            let _ = task.await;
        }
        drop(payload_tx);
        if let Some(sender) = sender_task {
            let _ = sender.await;
        }
    }

    /// Whether any synthesis was attempted this turn.
    pub async fn spoke(&self) -> bool {
        self.state.lock().await.spoke
    }

    /// Restart the progressive merge ramp for a new turn.
    pub async fn reset_for_new_turn(&self) {
        self.state.lock().await.merge.reset_turn();
    }

    /// Drop all pending work (barge-in): in-flight tasks are aborted, the
    /// merge buffer is cleared, sequence numbering restarts.
    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        for task in state.tasks.drain(..) {
            task.abort();
        }
        if let Some(sender) = state.sender_task.take() {
            sender.abort();
        }
        state.payload_tx = None;
        state.sequence_counter = 0;
        state.merge.clear();
        state.spoke = false;
    }

    // ── Internals ────────────────────────────────────────────────────

    fn ensure_sender(&self, state: &mut OrchestratorState) {
        let alive = state
            .sender_task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
            && state.payload_tx.is_some();
        if alive {
            return;
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<(u64, AudioPayload)>();
        let out = self.out.clone();
        let start = state.sequence_counter;

        state.payload_tx = Some(tx);
        state.sender_task = Some(tokio::spawn(async move {
            let mut sequencer = Sequencer::new(start);
            while let Some((sequence, payload)) = rx.recv().await {
                for ready in sequencer.submit(sequence, payload) {
                    if out.send(ServerMessage::Audio(ready)).is_err() {
                        return;
                    }
                }
            }
        }));
    }

    async fn send_display_only(&self, display_text: DisplayText, actions: Option<Actions>) {
        let mut state = self.state.lock().await;
        self.ensure_sender(&mut state);
        let sequence = state.sequence_counter;
        state.sequence_counter += 1;

        if let Some(tx) = &state.payload_tx {
            let _ = tx.send((sequence, AudioPayload::silent(display_text, actions)));
        }
    }

    async fn speak_single(
        &self,
        tts_text: String,
        display_text: DisplayText,
        actions: Option<Actions>,
    ) {
        let (sequence, tx) = {
            let mut state = self.state.lock().await;
            self.ensure_sender(&mut state);
            let sequence = state.sequence_counter;
            state.sequence_counter += 1;
            state.spoke = true;
            (
                sequence,
                state.payload_tx.clone().expect("sender just ensured"),
            )
        };

        debug!(sequence, text = %ellipsize(&tts_text, 50), "queueing TTS task");

        let provider = Arc::clone(&self.provider);
        let cache = Arc::clone(&self.cache);
        let task = async move {
            let payload = build_audio_payload(provider, cache, &tts_text, display_text, actions).await;
            let _ = tx.send((sequence, payload));
        };

        if self.provider.supports_concurrency() {
            let handle = tokio::spawn(task);
            self.state.lock().await.tasks.push(handle);
        } else {
            // Serial engines synthesize inline, preserving arrival order.
            task.await;
        }
    }

    async fn speak_merged(
        &self,
        tts_text: String,
        display_text: DisplayText,
        actions: Option<Actions>,
    ) {
        let (due, buffered) = {
            let mut state = self.state.lock().await;
            let due = state.merge.push(MergeItem {
                tts_text,
                display_text,
                actions,
            });
            (due, state.merge.len())
        };

        debug!(buffered, due, "merge buffer accumulating");

        if due {
            self.flush_merge_buffer().await;
        }
    }

    async fn flush_merge_buffer(&self) {
        let items = {
            let mut state = self.state.lock().await;
            state.spoke = true;
            state.merge.take()
        };
        if items.is_empty() {
            return;
        }

        let merged_text: String = items.iter().map(|item| item.tts_text.as_str()).collect();
        let char_counts: Vec<usize> = items
            .iter()
            .map(|item| item.tts_text.chars().count())
            .collect();

        info!(
            sentences = items.len(),
            chars = char_counts.iter().sum::<usize>(),
            "merged synthesis round"
        );

        let audio = match self.provider.synthesize(&merged_text).await {
            Ok(audio) => audio,
            Err(e) => {
                error!(error = %e, "merged synthesis failed, degrading to silent payloads");
                self.send_silent_batch(items).await;
                return;
            }
        };

        let cache_path = self.cache.store(&audio.data, audio.format).ok();
        let emitted = self
            .emit_merged_payloads(&items, &audio.data, audio.format, &char_counts)
            .await;
        if let Some(path) = &cache_path {
            self.cache.remove(path);
        }

        if let Err(e) = emitted {
            warn!(error = %e, "merged audio postprocessing failed, degrading to silent payloads");
            self.send_silent_batch(items).await;
        }
    }

    async fn emit_merged_payloads(
        &self,
        items: &[MergeItem],
        audio_data: &[u8],
        format: AudioFormat,
        char_counts: &[usize],
    ) -> Result<()> {
        if format != AudioFormat::Wav {
            anyhow::bail!("cannot measure duration of {} audio", format.as_str());
        }
        let decoded = decode_wav(audio_data)?;
        let total_ms = decoded.duration_ms();
        let volumes = decoded.volume_envelope();
        let durations = apportion_durations(char_counts, total_ms);
        let audio_base64 = BASE64.encode(audio_data);

        let mut state = self.state.lock().await;
        self.ensure_sender(&mut state);
        let tx = state.payload_tx.clone().expect("sender just ensured");

        let mut offset_ms = 0u64;
        for (i, item) in items.iter().enumerate() {
            let duration = durations[i];
            let merge_info = MergeInfo {
                is_merged: true,
                total_sentences: items.len(),
                sentence_index: i,
                sentence_duration_ms: duration,
                total_duration_ms: total_ms,
                delay_before_show_ms: (i > 0).then_some(offset_ms),
            };

            let mut payload = if i == 0 {
                // The first sentence carries the whole audio plus the full
                // envelope; followers only reveal display text on schedule.
                AudioPayload::with_audio(
                    audio_base64.clone(),
                    volumes.clone(),
                    item.display_text.clone(),
                    item.actions.clone(),
                )
            } else {
                let start = (offset_ms / crate::tts::audio::SLICE_LENGTH_MS) as usize;
                let end = ((offset_ms + duration) / crate::tts::audio::SLICE_LENGTH_MS) as usize;
                let slice = volumes
                    .get(start..end.min(volumes.len()))
                    .unwrap_or_default()
                    .to_vec();

                let mut silent = AudioPayload::silent(item.display_text.clone(), item.actions.clone());
                silent.volumes = slice;
                silent
            };
            payload.merge_info = Some(merge_info);

            debug!(
                index = i,
                duration_ms = duration,
                offset_ms,
                text = %ellipsize(&item.tts_text, 30),
                "merged payload queued"
            );

            let sequence = state.sequence_counter;
            state.sequence_counter += 1;
            let _ = tx.send((sequence, payload));

            offset_ms += duration;
        }

        Ok(())
    }

    async fn send_silent_batch(&self, items: Vec<MergeItem>) {
        for item in items {
            self.send_display_only(item.display_text, item.actions).await;
        }
    }
}

/// Synthesize one sentence and build its payload; failures degrade to a
/// silent payload so display text is never lost.
async fn build_audio_payload(
    provider: Arc<dyn TtsProvider>,
    cache: Arc<AudioCache>,
    tts_text: &str,
    display_text: DisplayText,
    actions: Option<Actions>,
) -> AudioPayload {
    match provider.synthesize(tts_text).await {
        Ok(audio) => {
            let cache_path = cache.store(&audio.data, audio.format).ok();

            let volumes = if audio.format == AudioFormat::Wav {
                match decode_wav(&audio.data) {
                    Ok(decoded) => decoded.volume_envelope(),
                    Err(e) => {
                        warn!(error = %e, "failed to decode audio for volume envelope");
                        Vec::new()
                    }
                }
            } else {
                Vec::new()
            };

            let payload = AudioPayload::with_audio(
                BASE64.encode(&audio.data),
                volumes,
                display_text,
                actions,
            );
            if let Some(path) = &cache_path {
                cache.remove(path);
            }
            payload
        }
        Err(e) => {
            error!(error = %e, text = %ellipsize(tts_text, 50), "synthesis failed, sending silent payload");
            AudioPayload::silent(display_text, actions)
        }
    }
}

/// Whether `text` is nothing but bracketed emotion tags.
fn is_emotion_tag_only(text: &str) -> bool {
    text.contains('[') && EMOTION_TAG.replace_all(text, "").trim().is_empty()
}

/// Drop heading lines embedded in multi-line text.
fn remove_heading_lines(text: &str) -> String {
    text.lines()
        .filter(|line| !line.trim_start().starts_with('#'))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Whether `text` contains nothing but whitespace and punctuation.
fn is_punctuation_only(text: &str) -> bool {
    PUNCTUATION_ONLY.replace_all(text, "").is_empty()
}
