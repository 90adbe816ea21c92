use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::message::Turn;

/// Append-only conversation history keyed by conversation id.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Append a turn to the conversation, creating it if needed.
    async fn append(&self, conversation_id: &str, turn: Turn);

    /// All turns of the conversation in insertion order. Empty when unknown.
    async fn history(&self, conversation_id: &str) -> Vec<Turn>;

    /// Whether any turn has been recorded for the conversation.
    async fn contains(&self, conversation_id: &str) -> bool;
}

/// In-memory conversation store.
#[derive(Debug, Clone, Default)]
pub struct MemoryConversationStore {
    conversations: Arc<RwLock<HashMap<String, Vec<Turn>>>>,
}

impl MemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for MemoryConversationStore {
    async fn append(&self, conversation_id: &str, turn: Turn) {
        let mut conversations = self.conversations.write().await;
        conversations
            .entry(conversation_id.to_string())
            .or_default()
            .push(turn);
    }

    async fn history(&self, conversation_id: &str) -> Vec<Turn> {
        let conversations = self.conversations.read().await;
        conversations
            .get(conversation_id)
            .cloned()
            .unwrap_or_default()
    }

    async fn contains(&self, conversation_id: &str) -> bool {
        let conversations = self.conversations.read().await;
        conversations.contains_key(conversation_id)
    }
}
