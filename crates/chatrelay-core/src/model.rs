use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::message::Turn;

/// Result of a single-shot generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatReply {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// Items produced while streaming a generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum StreamItem {
    /// A text fragment, in upstream order.
    Text(String),
    /// The upstream reported a finish reason for the candidate.
    Finished(String),
}

/// Finish reasons that mean the provider withheld content.
pub const SAFETY_FINISH_REASONS: &[&str] = &["SAFETY", "BLOCKLIST", "PROHIBITED_CONTENT", "SPII"];

pub fn is_safety_reason(reason: &str) -> bool {
    SAFETY_FINISH_REASONS.contains(&reason)
}

/// Lazy sequence of stream items bound to one upstream call.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<StreamItem>> + Send>>;

/// Trait for chat models the relay can forward to.
///
/// `stream` must fail before yielding anything when the upstream call
/// cannot be established.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Generate a full reply for the given conversation.
    async fn generate(&self, turns: &[Turn]) -> Result<ChatReply>;

    /// Stream a reply fragment by fragment.
    async fn stream(&self, turns: &[Turn]) -> Result<TextStream>;

    /// Return the model name/identifier.
    fn model_name(&self) -> &str;
}
