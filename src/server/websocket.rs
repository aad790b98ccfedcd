//! Per-connection WebSocket handling.
//!
//! Each connection gets a UUID client id, a writer task draining the
//! outbound channel, and a microphone buffer that accumulates PCM chunks
//! until `mic-audio-end` turns them into a conversation trigger.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::messages::{ClientMessage, ServerMessage};
use super::AppState;
use crate::conversation::{TriggerKind, TurnTrigger};

/// WebSocket upgrade handler.
pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let client_uid = Uuid::new_v4().to_string();
    info!(%client_uid, "client connected");

    let (mut sink, mut stream) = socket.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ServerMessage>();

    // Writer task: serialize outbound messages onto the socket.
    let writer = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "failed to serialize outbound message");
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let mut mic_buffer: Vec<f32> = Vec::new();

    while let Some(frame) = stream.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                debug!(%client_uid, error = %e, "websocket receive error");
                break;
            }
        };

        match frame {
            Message::Text(text) => {
                let message: ClientMessage = match serde_json::from_str(&text) {
                    Ok(message) => message,
                    Err(e) => {
                        warn!(%client_uid, error = %e, "unparseable client message");
                        let _ = out_tx.send(ServerMessage::Error {
                            message: format!("Invalid message: {e}"),
                        });
                        continue;
                    }
                };
                dispatch(&state, &client_uid, &out_tx, &mut mic_buffer, message).await;
            }
            Message::Close(_) => {
                info!(%client_uid, "client closed the connection");
                break;
            }
            // axum answers pings itself; binary frames are not part of
            // the protocol.
            _ => {}
        }
    }

    state.manager.drop_client(&client_uid).await;
    writer.abort();
    info!(%client_uid, "client disconnected");
}

async fn dispatch(
    state: &AppState,
    client_uid: &str,
    out: &mpsc::UnboundedSender<ServerMessage>,
    mic_buffer: &mut Vec<f32>,
    message: ClientMessage,
) {
    match message {
        ClientMessage::TextInput {
            text,
            images,
            wake_word_config,
            stop_word_config,
        } => {
            let trigger = TurnTrigger {
                kind: TriggerKind::Text { text, images },
                wake_word_config,
                stop_word_config,
            };
            if let Err(e) = state.manager.handle_trigger(client_uid, out, trigger).await {
                warn!(client_uid, error = %e, "text trigger failed");
            }
        }

        ClientMessage::MicAudioData { audio } => {
            mic_buffer.extend_from_slice(&audio);
        }

        ClientMessage::MicAudioEnd {
            wake_word_config,
            stop_word_config,
        } => {
            let samples = std::mem::take(mic_buffer);
            debug!(client_uid, samples = samples.len(), "microphone stream ended");
            let trigger = TurnTrigger {
                kind: TriggerKind::Audio { samples },
                wake_word_config,
                stop_word_config,
            };
            if let Err(e) = state.manager.handle_trigger(client_uid, out, trigger).await {
                warn!(client_uid, error = %e, "audio trigger failed");
            }
        }

        ClientMessage::AiSpeakSignal => {
            let trigger = TurnTrigger {
                kind: TriggerKind::Proactive,
                wake_word_config: None,
                stop_word_config: None,
            };
            if let Err(e) = state.manager.handle_trigger(client_uid, out, trigger).await {
                warn!(client_uid, error = %e, "proactive trigger failed");
            }
        }

        ClientMessage::InterruptSignal { text } => {
            info!(client_uid, "interrupt signal received");
            state.manager.interrupt(client_uid, &text).await;
            let _ = out.send(ServerMessage::Control {
                text: super::messages::ControlSignal::Interrupt,
            });
        }

        ClientMessage::FrontendPlaybackComplete => {
            state.manager.playback_complete(client_uid);
        }
    }
}
