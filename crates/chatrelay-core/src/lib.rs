pub mod config;
pub mod conversation;
pub mod error;
pub mod message;
pub mod model;
pub mod request_log;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::RelayConfig;
    pub use crate::conversation::{ConversationStore, MemoryConversationStore};
    pub use crate::error::{RelayError, Result, UpstreamError};
    pub use crate::message::{Role, Turn};
    pub use crate::model::{ChatModel, ChatReply, StreamItem, TextStream};
    pub use crate::request_log::RequestLog;
}
