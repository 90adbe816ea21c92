use std::sync::Arc;

use chatrelay_core::config::RelayConfig;
use chatrelay_core::conversation::{ConversationStore, MemoryConversationStore};
use chatrelay_core::model::ChatModel;
use chatrelay_llm::factory::create_chat_model;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub model: Arc<dyn ChatModel>,
    pub conversations: Arc<dyn ConversationStore>,
    pub config: Arc<RelayConfig>,
}

impl AppState {
    pub fn new(config: RelayConfig) -> Self {
        let model: Arc<dyn ChatModel> = Arc::from(create_chat_model(&config));
        Self::with_model(config, model)
    }

    /// Create with a specific model (for testing).
    pub fn with_model(config: RelayConfig, model: Arc<dyn ChatModel>) -> Self {
        Self {
            model,
            conversations: Arc::new(MemoryConversationStore::new()),
            config: Arc::new(config),
        }
    }
}
