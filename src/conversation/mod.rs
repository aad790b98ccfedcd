//! Conversation lifecycle management.
//!
//! One [`ConversationManager`] per process tracks the active turn of
//! every connected client: triggers start turns (cancelling any turn
//! still running for that client), barge-in interrupts abort them with a
//! bounded shield, and playback acknowledgements release finalization.

pub mod prescreen;
pub mod turn;
pub mod wakeword;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::agent::ChatAgent;
use crate::asr::AsrEngine;
use crate::config::Config;
use crate::history::{HistoryStore, StoredMessage};
use crate::orchestrator::TtsOrchestrator;
use crate::pipeline::EmotionExtractor;
use crate::server::messages::{
    normalize_image, ControlSignal, OutboundSender, ServerMessage, WordGateConfig,
};
use crate::tts::cache::AudioCache;
use crate::tts::TtsProvider;
pub use prescreen::{PreScreenOutcome, TurnInput};
pub use turn::{process_single_turn, TurnRequest};
use wakeword::check_stop_word;

/// How long an aborted turn may take to wind down before its handle is
/// dropped.
const CANCEL_SHIELD: Duration = Duration::from_millis(500);

/// Emoji labels attached to turn log lines, making interleaved turns
/// easy to tell apart.
const SESSION_EMOJIS: &[char] = &[
    '🐶', '🐱', '🐭', '🐹', '🐰', '🦊', '🐻', '🐼', '🐨', '🐯', '🦁', '🐮', '🐷', '🐸', '🐵',
    '🐔', '🐧', '🐦', '🦆', '🦅', '🦉', '🦄', '🐝', '🌵', '🌲', '🌴', '🌱', '🍀', '🍁', '🍄',
    '🌹', '🌸', '🌍', '⭐', '🔥', '🌈', '🎃', '🎉', '🎭', '🎨', '👑',
];

/// Shared service handles for every turn.
pub struct ServiceContext {
    pub config: Config,
    pub asr: Arc<dyn AsrEngine>,
    pub agent: Arc<dyn ChatAgent>,
    pub tts: Arc<dyn TtsProvider>,
    pub history: Arc<dyn HistoryStore>,
    pub emotion: Arc<dyn EmotionExtractor>,
    pub cache: Arc<AudioCache>,
    /// History UID for persistence; `None` disables history writes.
    pub history_uid: Option<String>,
}

/// What kind of input triggered the turn.
#[derive(Debug, Clone)]
pub enum TriggerKind {
    Text {
        text: String,
        images: Option<Vec<Value>>,
    },
    Audio {
        samples: Vec<f32>,
    },
    Proactive,
}

/// A turn trigger with its per-message gate configuration.
#[derive(Debug, Clone)]
pub struct TurnTrigger {
    pub kind: TriggerKind,
    pub wake_word_config: Option<WordGateConfig>,
    pub stop_word_config: Option<WordGateConfig>,
}

struct ActiveTurn {
    handle: JoinHandle<()>,
    orchestrator: Arc<TtsOrchestrator>,
    playback_ack: Arc<Notify>,
}

/// Tracks and controls the active turn of every client.
pub struct ConversationManager {
    context: Arc<ServiceContext>,
    turns: DashMap<String, ActiveTurn>,
}

impl ConversationManager {
    pub fn new(context: Arc<ServiceContext>) -> Self {
        Self {
            context,
            turns: DashMap::new(),
        }
    }

    /// Whether a turn task is currently alive for this client.
    pub fn is_active(&self, client_uid: &str) -> bool {
        self.turns
            .get(client_uid)
            .is_some_and(|turn| !turn.handle.is_finished())
    }

    /// Release a turn waiting on `frontend-playback-complete`.
    pub fn playback_complete(&self, client_uid: &str) {
        if let Some(turn) = self.turns.get(client_uid) {
            turn.playback_ack.notify_one();
        }
    }

    /// Handle an input trigger: run the stop-word pre-check for audio,
    /// cancel any running turn, then start the new one.
    pub async fn handle_trigger(
        &self,
        client_uid: &str,
        out: &OutboundSender,
        trigger: TurnTrigger,
    ) -> Result<()> {
        let wake_config = self.effective_gate(trigger.wake_word_config, &self.context.config.wake_word);
        let stop_config = self.effective_gate(trigger.stop_word_config, &self.context.config.stop_word);

        let mut images = None;
        let mut metadata = None;
        let mut pre_transcribed = None;

        let input = match trigger.kind {
            TriggerKind::Text { text, images: raw } => {
                images = raw.map(|values| {
                    let normalized: Vec<_> =
                        values.iter().filter_map(normalize_image).collect();
                    if normalized.len() < values.len() {
                        warn!(
                            dropped = values.len() - normalized.len(),
                            "dropped malformed image payloads"
                        );
                    }
                    normalized
                });
                TurnInput::Text(text)
            }

            TriggerKind::Audio { samples } => {
                // Stop-word pre-check: transcribe before anything else so a
                // barge-in cancels the running turn instead of starting a
                // new one.
                if let Some(gate) = stop_config.as_ref().filter(|g| g.enabled && !g.words.is_empty())
                {
                    match self.context.asr.transcribe(&samples).await {
                        Ok(transcript) if !transcript.trim().is_empty() => {
                            let transcript = transcript.trim().to_string();
                            if let Some(matched) =
                                check_stop_word(&transcript, &gate.words, gate.fuzzy_pinyin)
                            {
                                info!(word = %matched, "stop word detected early, interrupting");
                                let _ = out.send(ServerMessage::UserInputTranscription {
                                    text: format!("（停止词：{matched}）"),
                                    original_text: Some(transcript),
                                    is_stop_word: Some(true),
                                });
                                self.interrupt(client_uid, "").await;
                                let _ = out.send(ServerMessage::Control {
                                    text: ControlSignal::Interrupt,
                                });
                                return Ok(());
                            }
                            pre_transcribed = Some(transcript);
                        }
                        Ok(_) => {}
                        Err(e) => {
                            // The normal pre-screen will retry transcription.
                            warn!(error = %e, "stop word pre-check transcription failed");
                        }
                    }
                }
                TurnInput::Audio(samples)
            }

            TriggerKind::Proactive => {
                let _ = out.send(ServerMessage::FullText {
                    text: "AI wants to speak something...".to_string(),
                });
                metadata = Some(serde_json::json!({
                    "proactive_speak": true,
                    "skip_memory": true,
                    "skip_history": true,
                }));
                TurnInput::Proactive(self.context.config.proactive_prompt().to_string())
            }
        };

        // A new turn never coexists with the previous one.
        if self.is_active(client_uid) {
            debug!(client_uid, "cancelling previous turn before starting a new one");
            self.interrupt(client_uid, "").await;
        }

        let orchestrator = Arc::new(TtsOrchestrator::new(
            Arc::clone(&self.context.tts),
            Arc::clone(&self.context.cache),
            out.clone(),
            &self.context.config.audio_merge,
        ));
        let playback_ack = Arc::new(Notify::new());
        let session_emoji = SESSION_EMOJIS[rand::random_range(0..SESSION_EMOJIS.len())];

        let request = TurnRequest {
            input,
            images,
            metadata,
            wake_word_config: wake_config,
            stop_word_config: stop_config,
            pre_transcribed,
        };

        let handle = tokio::spawn({
            let context = Arc::clone(&self.context);
            let out = out.clone();
            let orchestrator = Arc::clone(&orchestrator);
            let playback_ack = Arc::clone(&playback_ack);
            async move {
                match process_single_turn(
                    context,
                    out,
                    orchestrator,
                    playback_ack,
                    session_emoji,
                    request,
                )
                .await
                {
                    Ok(response) if response.is_empty() => {
                        debug!(emoji = %session_emoji, "turn ended without a response");
                    }
                    Ok(_) => {}
                    Err(e) => error!(emoji = %session_emoji, error = %e, "turn failed"),
                }
            }
        });

        self.turns.insert(
            client_uid.to_string(),
            ActiveTurn {
                handle,
                orchestrator,
                playback_ack,
            },
        );

        Ok(())
    }

    /// Barge-in: abort the running turn, clear its pending synthesis,
    /// and record the interruption.
    pub async fn interrupt(&self, client_uid: &str, heard_response: &str) {
        if let Some((_, active)) = self.turns.remove(client_uid) {
            if !active.handle.is_finished() {
                active.handle.abort();
                // Bounded shield: give the task a moment to unwind its
                // await points, then drop the handle regardless.
                let _ = tokio::time::timeout(CANCEL_SHIELD, active.handle).await;
                info!(client_uid, "conversation task interrupted");
            }
            active.orchestrator.clear().await;
        }

        self.context.agent.handle_interrupt(heard_response);
        self.context.agent.reset_interrupt();

        if let Some(history_uid) = &self.context.history_uid {
            if !heard_response.is_empty() {
                let character = &self.context.config.character;
                let markers = [
                    StoredMessage {
                        role: "ai".to_string(),
                        content: heard_response.to_string(),
                        name: Some(character.character_name.clone()),
                        avatar: (!character.avatar.is_empty()).then(|| character.avatar.clone()),
                    },
                    StoredMessage {
                        role: "system".to_string(),
                        content: "[Interrupted by user]".to_string(),
                        name: None,
                        avatar: None,
                    },
                ];
                for marker in markers {
                    if let Err(e) = self.context.history.store_message(history_uid, marker).await {
                        error!(error = %e, "failed to store interrupt marker");
                    }
                }
            }
        }
    }

    /// Client disconnect: tear down its turn.
    pub async fn drop_client(&self, client_uid: &str) {
        if self.is_active(client_uid) {
            self.interrupt(client_uid, "").await;
        }
        self.turns.remove(client_uid);
    }

    /// Client-supplied gate config wins; otherwise the server default
    /// applies when it is enabled.
    fn effective_gate(
        &self,
        from_client: Option<WordGateConfig>,
        server_default: &WordGateConfig,
    ) -> Option<WordGateConfig> {
        from_client.or_else(|| server_default.enabled.then(|| server_default.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentStream, BatchInput, ChatAgent, ScriptedAgent};
    use crate::asr::MockAsr;
    use crate::history::MemoryHistory;
    use crate::pipeline::KeywordEmotionExtractor;
    use crate::tts::mock::MockTts;
    use async_trait::async_trait;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    /// Agent whose stream never ends, for interruption tests.
    struct StallingAgent;

    #[async_trait]
    impl ChatAgent for StallingAgent {
        async fn chat(&self, _input: BatchInput) -> Result<AgentStream> {
            Ok(Box::pin(futures::stream::pending()))
        }
        fn handle_interrupt(&self, _heard_response: &str) {}
        fn reset_interrupt(&self) {}
    }

    struct Fixture {
        manager: ConversationManager,
        agent: Arc<ScriptedAgent>,
        history: Arc<MemoryHistory>,
        out: OutboundSender,
        rx: mpsc::UnboundedReceiver<ServerMessage>,
        _tmp: tempfile::TempDir,
    }

    fn fixture_with(
        agent: Arc<dyn ChatAgent>,
        scripted: Arc<ScriptedAgent>,
        asr: Arc<dyn AsrEngine>,
        config: Config,
    ) -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let history = Arc::new(MemoryHistory::new());
        let context = Arc::new(ServiceContext {
            config,
            asr,
            agent,
            tts: Arc::new(MockTts::silent()),
            history: Arc::clone(&history) as Arc<dyn HistoryStore>,
            emotion: Arc::new(KeywordEmotionExtractor::with_defaults()),
            cache: Arc::new(AudioCache::new(tmp.path().join("cache")).unwrap()),
            history_uid: Some("h1".to_string()),
        });
        let (out, rx) = mpsc::unbounded_channel();
        Fixture {
            manager: ConversationManager::new(context),
            agent: scripted,
            history,
            out,
            rx,
            _tmp: tmp,
        }
    }

    fn fixture(fragments: &[&str]) -> Fixture {
        let scripted = Arc::new(ScriptedAgent::from_fragments(fragments));
        fixture_with(
            Arc::clone(&scripted) as Arc<dyn ChatAgent>,
            scripted,
            Arc::new(MockAsr::fixed("unused")),
            Config::default(),
        )
    }

    fn text_trigger(text: &str) -> TurnTrigger {
        TurnTrigger {
            kind: TriggerKind::Text {
                text: text.to_string(),
                images: None,
            },
            wake_word_config: None,
            stop_word_config: None,
        }
    }

    /// Wait until the client's turn task has fully finished.
    async fn wait_idle(f: &Fixture, client: &str) {
        timeout(Duration::from_secs(2), async {
            while f.manager.is_active(client) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("turn did not finish");
    }

    /// Read outbound messages until the chain-end control arrives,
    /// acknowledging playback when synthesis completes.
    async fn collect_turn(f: &mut Fixture, client: &str) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        loop {
            let msg = timeout(Duration::from_secs(5), f.rx.recv())
                .await
                .expect("turn timed out")
                .expect("channel closed");
            match &msg {
                ServerMessage::BackendSynthComplete => {
                    messages.push(msg);
                    f.manager.playback_complete(client);
                }
                ServerMessage::Control {
                    text: ControlSignal::ConversationChainEnd,
                } => {
                    messages.push(msg);
                    return messages;
                }
                _ => messages.push(msg),
            }
        }
    }

    #[tokio::test]
    async fn text_turn_runs_to_completion() {
        let mut f = fixture(&["Hello there. ", "How are you?"]);
        f.manager
            .handle_trigger("c1", &f.out.clone(), text_trigger("hi"))
            .await
            .unwrap();

        let messages = collect_turn(&mut f, "c1").await;
        wait_idle(&f, "c1").await;

        // chain-start, thinking, audio × 2, synth-complete,
        // force-new-message, chain-end.
        assert!(matches!(
            messages[0],
            ServerMessage::Control {
                text: ControlSignal::ConversationChainStart
            }
        ));
        assert!(matches!(&messages[1], ServerMessage::FullText { text } if text == "Thinking..."));

        let audio_texts: Vec<String> = messages
            .iter()
            .filter_map(|m| match m {
                ServerMessage::Audio(p) => Some(p.display_text.text.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(audio_texts, vec!["Hello there.", "How are you?"]);

        assert!(messages
            .iter()
            .any(|m| matches!(m, ServerMessage::BackendSynthComplete)));
        assert!(messages
            .iter()
            .any(|m| matches!(m, ServerMessage::ForceNewMessage)));

        // Both sides of the exchange were persisted.
        let stored = f.history.messages("h1");
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].role, "human");
        assert_eq!(stored[0].content, "hi");
        assert_eq!(stored[1].role, "ai");
        assert_eq!(stored[1].content, "Hello there.How are you?");
    }

    #[tokio::test]
    async fn stop_word_interrupts_without_starting_a_turn() {
        let scripted = Arc::new(ScriptedAgent::from_fragments(&[]));
        let mut f = fixture_with(
            Arc::new(StallingAgent),
            scripted,
            Arc::new(MockAsr::fixed("please stop")),
            Config::default(),
        );

        // A turn is running.
        f.manager
            .handle_trigger("c1", &f.out.clone(), text_trigger("tell me a story"))
            .await
            .unwrap();
        // Drain the start signals.
        let _ = timeout(Duration::from_secs(1), f.rx.recv()).await.unwrap();
        let _ = timeout(Duration::from_secs(1), f.rx.recv()).await.unwrap();
        assert!(f.manager.is_active("c1"));

        // Voice input containing the stop word arrives.
        let stop_gate = WordGateConfig {
            enabled: true,
            words: vec!["stop".to_string()],
            ..WordGateConfig::default()
        };
        f.manager
            .handle_trigger(
                "c1",
                &f.out.clone(),
                TurnTrigger {
                    kind: TriggerKind::Audio {
                        samples: vec![0.0; 160],
                    },
                    wake_word_config: None,
                    stop_word_config: Some(stop_gate),
                },
            )
            .await
            .unwrap();

        // Flagged transcription, then the interrupt control.
        let transcription = timeout(Duration::from_secs(1), f.rx.recv())
            .await
            .unwrap()
            .unwrap();
        let ServerMessage::UserInputTranscription { is_stop_word, .. } = transcription else {
            panic!("expected transcription, got {transcription:?}");
        };
        assert_eq!(is_stop_word, Some(true));

        let control = timeout(Duration::from_secs(1), f.rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            control,
            ServerMessage::Control {
                text: ControlSignal::Interrupt
            }
        ));

        // The old turn is gone and no new one started.
        assert!(!f.manager.is_active("c1"));
    }

    #[tokio::test]
    async fn new_trigger_cancels_previous_turn() {
        let scripted = Arc::new(ScriptedAgent::from_fragments(&[]));
        let mut f = fixture_with(
            Arc::new(StallingAgent),
            scripted,
            Arc::new(MockAsr::fixed("unused")),
            Config::default(),
        );

        f.manager
            .handle_trigger("c1", &f.out.clone(), text_trigger("first"))
            .await
            .unwrap();
        assert!(f.manager.is_active("c1"));

        f.manager
            .handle_trigger("c1", &f.out.clone(), text_trigger("second"))
            .await
            .unwrap();

        // Still exactly one active turn (the new one).
        assert!(f.manager.is_active("c1"));
    }

    #[tokio::test]
    async fn interrupt_records_heard_response() {
        let mut f = fixture(&[]);
        f.manager
            .handle_trigger("c1", &f.out.clone(), text_trigger("hi"))
            .await
            .unwrap();

        f.manager.interrupt("c1", "partial answer").await;

        assert_eq!(f.agent.interrupts(), vec!["partial answer"]);
        let stored = f.history.messages("h1");
        let roles: Vec<&str> = stored.iter().map(|m| m.role.as_str()).collect();
        assert!(roles.contains(&"system"));
        let system = stored.iter().find(|m| m.role == "system").unwrap();
        assert_eq!(system.content, "[Interrupted by user]");
    }

    #[tokio::test]
    async fn interrupt_with_empty_response_stores_nothing() {
        let mut f = fixture(&[]);
        f.manager
            .handle_trigger("c1", &f.out.clone(), text_trigger("hi"))
            .await
            .unwrap();

        f.manager.interrupt("c1", "").await;

        let stored: Vec<_> = f
            .history
            .messages("h1")
            .into_iter()
            .filter(|m| m.role != "human")
            .collect();
        assert!(stored.is_empty());
    }

    #[tokio::test]
    async fn proactive_turn_skips_history() {
        let mut f = fixture(&["Good morning!"]);
        f.manager
            .handle_trigger(
                "c1",
                &f.out.clone(),
                TurnTrigger {
                    kind: TriggerKind::Proactive,
                    wake_word_config: None,
                    stop_word_config: None,
                },
            )
            .await
            .unwrap();

        let messages = collect_turn(&mut f, "c1").await;
        wait_idle(&f, "c1").await;

        assert!(matches!(
            &messages[0],
            ServerMessage::FullText { text } if text.contains("wants to speak")
        ));

        // The user side is never persisted for proactive turns; the AI
        // response still is.
        let stored = f.history.messages("h1");
        assert!(stored.iter().all(|m| m.role != "human"));
        assert!(stored.iter().any(|m| m.role == "ai"));
    }

    #[tokio::test]
    async fn wake_word_gate_drops_unaddressed_audio() {
        let scripted = Arc::new(ScriptedAgent::from_fragments(&["reply."]));
        let mut f = fixture_with(
            Arc::clone(&scripted) as Arc<dyn ChatAgent>,
            scripted,
            Arc::new(MockAsr::fixed("just background chatter")),
            Config::default(),
        );

        let wake_gate = WordGateConfig {
            enabled: true,
            words: vec!["小助手".to_string()],
            ..WordGateConfig::default()
        };
        f.manager
            .handle_trigger(
                "c1",
                &f.out.clone(),
                TurnTrigger {
                    kind: TriggerKind::Audio {
                        samples: vec![0.0; 160],
                    },
                    wake_word_config: Some(wake_gate),
                    stop_word_config: None,
                },
            )
            .await
            .unwrap();

        // The turn task ends without emitting anything.
        timeout(Duration::from_secs(2), async {
            while f.manager.is_active("c1") {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert!(f.rx.try_recv().is_err());
        assert!(f.history.messages("h1").is_empty());
    }

    #[tokio::test]
    async fn drop_client_cleans_up() {
        let scripted = Arc::new(ScriptedAgent::from_fragments(&[]));
        let f = fixture_with(
            Arc::new(StallingAgent),
            scripted,
            Arc::new(MockAsr::fixed("unused")),
            Config::default(),
        );

        f.manager
            .handle_trigger("c1", &f.out.clone(), text_trigger("hi"))
            .await
            .unwrap();
        assert!(f.manager.is_active("c1"));

        f.manager.drop_client("c1").await;
        assert!(!f.manager.is_active("c1"));
    }
}
