use tracing::warn;

use chatrelay_core::config::RelayConfig;
use chatrelay_core::model::ChatModel;

use crate::gemini::GeminiChatModel;
use crate::simulated::SimulatedChatModel;

/// Create the ChatModel the relay forwards to.
///
/// Falls back to [`SimulatedChatModel`] when no API key is configured.
pub fn create_chat_model(config: &RelayConfig) -> Box<dyn ChatModel> {
    match GeminiChatModel::from_config(config) {
        Some(model) => Box::new(model),
        None => {
            warn!("GEMINI_API_KEY not set; using the simulated model");
            Box::new(SimulatedChatModel::default())
        }
    }
}
