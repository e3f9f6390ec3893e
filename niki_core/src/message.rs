//! Conversation records: keys, stored messages and read options.

use serde::{Deserialize, Serialize};

use crate::Role;
use crate::util::now_unix;

/// Identifies one conversation thread between a player and a Niki persona.
///
/// Only ever used as a lookup key; it owns nothing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConversationKey {
    pub player_id: String,
    pub niki_id: String,
}

impl ConversationKey {
    #[must_use]
    pub fn new(player_id: impl Into<String>, niki_id: impl Into<String>) -> Self {
        Self {
            player_id: player_id.into(),
            niki_id: niki_id.into(),
        }
    }
}

impl std::fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.player_id, self.niki_id)
    }
}

/// A single stored conversation turn.
///
/// `timestamp` is seconds since the Unix epoch. `None` means the writer did not
/// supply one; the history store stamps such messages before persisting them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl Message {
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: None,
        }
    }

    #[must_use]
    pub fn with_timestamp(role: Role, content: impl Into<String>, timestamp: i64) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Some(timestamp),
        }
    }

    /// A message stamped with the current time.
    #[must_use]
    pub fn now(role: Role, content: impl Into<String>) -> Self {
        Self::with_timestamp(role, content, now_unix())
    }

    /// Fill in the timestamp if the writer left it empty.
    pub fn stamp_if_missing(&mut self, now: i64) {
        if self.timestamp.is_none() {
            self.timestamp = Some(now);
        }
    }
}

/// Ordered transcript, earliest message first.
pub type MessageBatch = Vec<Message>;

/// Options for [`crate::HistoryStore::get_history`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadOptions {
    /// When set and non-zero, only the newest N messages are returned.
    pub limit_messages: Option<usize>,
    /// Reserved for token-aware reads; the file store ignores it.
    pub limit_tokens: Option<usize>,
}

impl ReadOptions {
    #[must_use]
    pub const fn last(limit: usize) -> Self {
        Self {
            limit_messages: Some(limit),
            limit_tokens: None,
        }
    }

    /// Apply the message limit to a full batch, keeping the newest messages in order.
    #[must_use]
    pub fn apply(&self, mut batch: MessageBatch) -> MessageBatch {
        match self.limit_messages {
            Some(limit) if limit > 0 && batch.len() > limit => batch.split_off(batch.len() - limit),
            _ => batch,
        }
    }
}
