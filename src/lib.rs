//! Streaming-response core for an interactive voice avatar.
//!
//! Turns a live token stream from a conversational model into an ordered
//! sequence of (display text, synthesized audio, avatar action) payloads
//! over a persistent WebSocket, with barge-in interruption, wake-word
//! gating, and audio batching under a remote TTS rate limit:
//!
//! - [`divider`]: incremental sentence segmentation with tag grammar,
//!   LaTeX/Markdown protection, and dual-stream `<show>/<say>` support
//! - [`pipeline`]: sentence to (display, actions, TTS text) transforms
//! - [`tts`]: provider abstraction, speech-text projection, the shared
//!   rate limiter, and the remote HTTP engine
//! - [`orchestrator`]: ordered delivery, merge batching, volume envelopes
//! - [`conversation`]: turn lifecycle, wake/stop-word gates, barge-in
//! - [`server`]: WebSocket framing and per-client plumbing

pub mod agent;
pub mod asr;
pub mod config;
pub mod conversation;
pub mod divider;
pub mod history;
pub mod orchestrator;
pub mod pipeline;
pub mod server;
pub mod tts;
pub mod utils;

pub use config::Config;

/// Initialize tracing with `RUST_LOG`-style filtering (defaults to
/// `info` for this crate).
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,avatalk=debug"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
