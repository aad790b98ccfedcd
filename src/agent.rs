//! Conversational model interface.
//!
//! The concrete model client lives outside this crate; the conversation
//! controller only needs a batch-input shape, a token/record event
//! stream, and the interrupt hooks. A scripted agent is provided for
//! tests.

use std::pin::Pin;

use anyhow::Result;
use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::server::messages::ImagePayload;

/// Where a text item originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextSource {
    /// Direct user input.
    Input,
    /// Server-initiated proactive prompt.
    Proactive,
}

/// One text item of a batch input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextData {
    pub source: TextSource,
    pub content: String,
    pub from_name: String,
}

/// Everything the model receives for one turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchInput {
    pub texts: Vec<TextData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<ImagePayload>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl BatchInput {
    /// A batch with a single user text item.
    pub fn from_text(
        content: impl Into<String>,
        from_name: impl Into<String>,
        images: Option<Vec<ImagePayload>>,
        metadata: Option<Value>,
    ) -> Self {
        Self {
            texts: vec![TextData {
                source: TextSource::Input,
                content: content.into(),
                from_name: from_name.into(),
            }],
            images,
            metadata,
        }
    }

    /// Whether the metadata carries a truthy flag.
    pub fn metadata_flag(&self, key: &str) -> bool {
        self.metadata
            .as_ref()
            .and_then(|m| m.get(key))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// One event of the model's output stream.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// A text fragment (token or larger chunk).
    Token(String),
    /// An out-of-band record, forwarded to the client in position.
    Record(Value),
}

/// Stream of agent events.
pub type AgentStream = Pin<Box<dyn Stream<Item = Result<AgentEvent>> + Send>>;

/// A conversational model client.
#[async_trait]
pub trait ChatAgent: Send + Sync {
    /// Run one turn; the stream ends when the model is done.
    async fn chat(&self, input: BatchInput) -> Result<AgentStream>;

    /// Barge-in notification with the response the user actually heard.
    fn handle_interrupt(&self, heard_response: &str);

    /// Clear the interrupt flag before the next turn.
    fn reset_interrupt(&self);
}

/// Test agent replaying a fixed event script.
pub struct ScriptedAgent {
    events: Vec<AgentEvent>,
    interrupts: std::sync::Mutex<Vec<String>>,
}

impl ScriptedAgent {
    pub fn new(events: Vec<AgentEvent>) -> Self {
        Self {
            events,
            interrupts: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// A script of plain text fragments.
    pub fn from_fragments(fragments: &[&str]) -> Self {
        Self::new(
            fragments
                .iter()
                .map(|f| AgentEvent::Token(f.to_string()))
                .collect(),
        )
    }

    /// Interrupt notifications received so far.
    pub fn interrupts(&self) -> Vec<String> {
        self.interrupts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatAgent for ScriptedAgent {
    async fn chat(&self, _input: BatchInput) -> Result<AgentStream> {
        let events = self.events.clone();
        Ok(Box::pin(futures::stream::iter(
            events.into_iter().map(Ok),
        )))
    }

    fn handle_interrupt(&self, heard_response: &str) {
        self.interrupts
            .lock()
            .unwrap()
            .push(heard_response.to_string());
    }

    fn reset_interrupt(&self) {}
}
