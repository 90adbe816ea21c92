use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use chatrelay_core::message::Turn;

// --- Chat ---

/// Body of `POST /api/chat`. `message` is validated by the handler so that
/// a missing field yields a 400 rather than a deserialization rejection.
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub stream: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub message: String,
    pub conversation_id: String,
    pub timestamp: DateTime<Utc>,
    pub user_id: String,
}

// --- Stream payloads ---

#[derive(Debug, Serialize)]
pub struct StartPayload<'a> {
    pub conversation_id: &'a str,
    pub user_id: &'a str,
}

#[derive(Debug, Serialize)]
pub struct DonePayload<'a> {
    pub conversation_id: &'a str,
    pub finish_reason: Option<&'a str>,
    /// Number of characters relayed.
    pub length: usize,
}

// --- Conversations ---

#[derive(Debug, Serialize, Deserialize)]
pub struct ConversationResponse {
    pub conversation_id: String,
    pub turns: Vec<Turn>,
}
