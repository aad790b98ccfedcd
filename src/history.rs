//! Chat-history persistence interface.
//!
//! The storage backend is external; the controller records the user
//! prompt, the assistant response, and interrupt markers. An in-memory
//! implementation backs tests and ephemeral deployments.

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;

/// One persisted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub role: String,
    pub content: String,
    pub name: Option<String>,
    pub avatar: Option<String>,
}

/// Appends messages to a conversation history.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn store_message(&self, history_uid: &str, message: StoredMessage) -> Result<()>;
}

/// In-memory history keyed by history UID.
#[derive(Default)]
pub struct MemoryHistory {
    conversations: DashMap<String, Vec<StoredMessage>>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages stored for a history UID, in insertion order.
    pub fn messages(&self, history_uid: &str) -> Vec<StoredMessage> {
        self.conversations
            .get(history_uid)
            .map(|m| m.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl HistoryStore for MemoryHistory {
    async fn store_message(&self, history_uid: &str, message: StoredMessage) -> Result<()> {
        self.conversations
            .entry(history_uid.to_string())
            .or_default()
            .push(message);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(role: &str, content: &str) -> StoredMessage {
        StoredMessage {
            role: role.to_string(),
            content: content.to_string(),
            name: None,
            avatar: None,
        }
    }

    #[tokio::test]
    async fn messages_accumulate_in_order() {
        let history = MemoryHistory::new();
        history
            .store_message("h1", message("human", "hi"))
            .await
            .unwrap();
        history
            .store_message("h1", message("ai", "hello"))
            .await
            .unwrap();

        let stored = history.messages("h1");
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].role, "human");
        assert_eq!(stored[1].content, "hello");
    }

    #[tokio::test]
    async fn histories_are_isolated() {
        let history = MemoryHistory::new();
        history
            .store_message("a", message("human", "hi"))
            .await
            .unwrap();
        assert!(history.messages("b").is_empty());
    }
}
