#![deny(
    clippy::all,
    clippy::nursery,
    clippy::pedantic,
    clippy::style,
    clippy::complexity,
    clippy::perf,
    clippy::correctness,
    clippy::suspicious,
    clippy::unwrap_used,
    clippy::expect_used
)]
#![allow(
    clippy::similar_names,
    clippy::missing_safety_doc,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc
)]

//! Shared data model and the capability traits every Niki component is wired through.

use serde::{Deserialize, Serialize};

pub mod history;
pub mod message;
pub mod provider;
pub mod sink;
pub mod util;

pub use history::{HistoryError, HistoryStore};
pub use message::{ConversationKey, Message, MessageBatch, ReadOptions};
pub use provider::{
    ChatProvider, ChunkStream, GenerationParams, PartialChunk, ProviderError, StreamError,
};
pub use sink::{ChunkSink, SinkError};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

impl Role {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
            Self::Tool => "tool",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A prompt message as sent to the model. Unlike [`Message`] it carries no timestamp.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }
}

impl From<&Message> for ChatMessage {
    fn from(message: &Message) -> Self {
        Self {
            role: message.role,
            content: message.content.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[expect(clippy::expect_used, reason = "Test failure should panic with context")]
    fn test_role_serializes_lowercase() {
        let json = serde_json::to_string(&Role::Assistant).expect("serialize role");
        assert_eq!(json, "\"assistant\"");
        assert_eq!(Role::Tool.to_string(), "tool");
    }

    #[test]
    fn test_chat_message_from_history_drops_timestamp() {
        let stored = Message::with_timestamp(Role::User, "hi", 42);
        let prompt = ChatMessage::from(&stored);
        assert_eq!(prompt, ChatMessage::new(Role::User, "hi"));
    }
}
