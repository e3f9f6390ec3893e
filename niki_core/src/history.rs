use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::{ConversationKey, Message, MessageBatch, ReadOptions};

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("history store unavailable: {context}: {source}")]
    Unavailable {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt history record {}:{line}: {message}", path.display())]
    Corrupt {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("invalid conversation key: {0}")]
    InvalidKey(String),
}

impl HistoryError {
    pub fn unavailable(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Unavailable {
            context: context.into(),
            source,
        }
    }
}

/// Durable per-conversation message log plus one replaceable summary document.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Stored messages in insertion order; empty when the conversation has no record yet.
    async fn get_history(
        &self,
        key: &ConversationKey,
        opts: ReadOptions,
    ) -> Result<MessageBatch, HistoryError>;

    /// Append `messages` in order. Messages without a timestamp are stamped first.
    async fn append_messages(
        &self,
        key: &ConversationKey,
        messages: MessageBatch,
    ) -> Result<(), HistoryError>;

    async fn upsert_summary(
        &self,
        key: &ConversationKey,
        summary: Message,
    ) -> Result<(), HistoryError>;

    async fn get_summary(&self, key: &ConversationKey) -> Result<Option<Message>, HistoryError>;

    /// Remove both the log and the summary. Clearing a missing key succeeds.
    async fn clear(&self, key: &ConversationKey) -> Result<(), HistoryError>;
}

#[async_trait]
impl<T: HistoryStore + ?Sized> HistoryStore for Arc<T> {
    async fn get_history(
        &self,
        key: &ConversationKey,
        opts: ReadOptions,
    ) -> Result<MessageBatch, HistoryError> {
        (**self).get_history(key, opts).await
    }

    async fn append_messages(
        &self,
        key: &ConversationKey,
        messages: MessageBatch,
    ) -> Result<(), HistoryError> {
        (**self).append_messages(key, messages).await
    }

    async fn upsert_summary(
        &self,
        key: &ConversationKey,
        summary: Message,
    ) -> Result<(), HistoryError> {
        (**self).upsert_summary(key, summary).await
    }

    async fn get_summary(&self, key: &ConversationKey) -> Result<Option<Message>, HistoryError> {
        (**self).get_summary(key).await
    }

    async fn clear(&self, key: &ConversationKey) -> Result<(), HistoryError> {
        (**self).clear(key).await
    }
}
