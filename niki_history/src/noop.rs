use async_trait::async_trait;
use niki_core::{ConversationKey, HistoryError, HistoryStore, Message, MessageBatch, ReadOptions};
use tracing::debug;

/// Store that remembers nothing. Reads are always empty and writes are dropped.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHistoryStore;

impl NoopHistoryStore {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl HistoryStore for NoopHistoryStore {
    async fn get_history(
        &self,
        _key: &ConversationKey,
        _opts: ReadOptions,
    ) -> Result<MessageBatch, HistoryError> {
        Ok(Vec::new())
    }

    async fn append_messages(
        &self,
        key: &ConversationKey,
        messages: MessageBatch,
    ) -> Result<(), HistoryError> {
        debug!(conversation = %key, count = messages.len(), "Discarding messages");
        Ok(())
    }

    async fn upsert_summary(
        &self,
        _key: &ConversationKey,
        _summary: Message,
    ) -> Result<(), HistoryError> {
        Ok(())
    }

    async fn get_summary(&self, _key: &ConversationKey) -> Result<Option<Message>, HistoryError> {
        Ok(None)
    }

    async fn clear(&self, _key: &ConversationKey) -> Result<(), HistoryError> {
        Ok(())
    }
}
