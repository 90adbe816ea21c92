use std::time::Duration;

use async_trait::async_trait;

use chatrelay_core::error::{RelayError, Result};
use chatrelay_core::message::{Role, Turn};
use chatrelay_core::model::{ChatModel, ChatReply, StreamItem, TextStream};

/// Offline stand-in for the upstream provider.
///
/// Echoes the latest user turn. Streaming emits one character at a time
/// with a fixed delay between characters.
pub struct SimulatedChatModel {
    char_delay: Duration,
}

impl Default for SimulatedChatModel {
    fn default() -> Self {
        Self::new(Duration::from_millis(20))
    }
}

impl SimulatedChatModel {
    pub fn new(char_delay: Duration) -> Self {
        Self { char_delay }
    }

    pub fn reply_for(turns: &[Turn]) -> String {
        let last = turns
            .iter()
            .rev()
            .find(|t| t.role == Role::User)
            .map(|t| t.text.as_str())
            .unwrap_or("");
        format!("You said: {last}")
    }
}

#[async_trait]
impl ChatModel for SimulatedChatModel {
    async fn generate(&self, turns: &[Turn]) -> Result<ChatReply> {
        Ok(ChatReply {
            text: Self::reply_for(turns),
            finish_reason: Some("STOP".into()),
        })
    }

    async fn stream(&self, turns: &[Turn]) -> Result<TextStream> {
        let reply = Self::reply_for(turns);
        let delay = self.char_delay;
        Ok(Box::pin(async_stream::stream! {
            for ch in reply.chars() {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                yield Ok::<_, RelayError>(StreamItem::Text(ch.to_string()));
            }
            yield Ok::<_, RelayError>(StreamItem::Finished("STOP".into()));
        }))
    }

    fn model_name(&self) -> &str {
        "simulated"
    }
}
