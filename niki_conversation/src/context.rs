//! Context window management.
//!
//! A [`ContextManager`] adapts a built prompt to the target model's window.
//! Implementations may drop or condense messages but never reorder the ones
//! they keep.

use niki_core::{ChatMessage, Role};
use thiserror::Error;
use tracing::debug;

use crate::prompt::BuiltPrompt;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ContextError {
    #[error("prompt cannot be reduced further: {0}")]
    ReducibleNoFurther(String),
}

pub trait ContextManager: Send + Sync {
    fn fit(&self, prompt: BuiltPrompt) -> Result<BuiltPrompt, ContextError>;
}

/// Returns every prompt unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughContext;

impl ContextManager for PassthroughContext {
    fn fit(&self, prompt: BuiltPrompt) -> Result<BuiltPrompt, ContextError> {
        Ok(prompt)
    }
}

/// Budgets for [`WindowedContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowConfig {
    /// Maximum number of messages sent to the model
    pub max_messages: usize,
    /// Maximum characters across all message contents (rough token proxy)
    pub max_chars: usize,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            max_messages: 20,
            max_chars: 8000,
        }
    }
}

impl WindowConfig {
    #[must_use]
    pub const fn with_max_messages(mut self, max: usize) -> Self {
        self.max_messages = max;
        self
    }

    #[must_use]
    pub const fn with_max_chars(mut self, max: usize) -> Self {
        self.max_chars = max;
        self
    }
}

/// Sliding window over the conversational part of a prompt.
///
/// System messages and the final message (the current turn) are pinned.
/// Everything else is dropped oldest-first until both budgets hold.
#[derive(Debug, Clone, Default)]
pub struct WindowedContext {
    config: WindowConfig,
}

impl WindowedContext {
    #[must_use]
    pub const fn new(config: WindowConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub const fn config(&self) -> &WindowConfig {
        &self.config
    }

    fn select(&self, messages: Vec<ChatMessage>) -> Result<Vec<ChatMessage>, ContextError> {
        let Some(last) = messages.len().checked_sub(1) else {
            return Ok(messages);
        };
        let pinned: Vec<bool> = messages
            .iter()
            .enumerate()
            .map(|(i, m)| i == last || m.role == Role::System)
            .collect();

        let pinned_count = pinned.iter().filter(|p| **p).count();
        let pinned_chars: usize = messages
            .iter()
            .zip(&pinned)
            .filter(|(_, p)| **p)
            .map(|(m, _)| char_len(m))
            .sum();

        if pinned_count > self.config.max_messages {
            return Err(ContextError::ReducibleNoFurther(format!(
                "{pinned_count} pinned messages exceed the limit of {}",
                self.config.max_messages
            )));
        }
        if pinned_chars > self.config.max_chars {
            return Err(ContextError::ReducibleNoFurther(format!(
                "{pinned_chars} pinned characters exceed the limit of {}",
                self.config.max_chars
            )));
        }

        let mut count = messages.len();
        let mut chars: usize = messages.iter().map(char_len).sum();
        let mut keep = vec![true; messages.len()];

        for (i, message) in messages.iter().enumerate() {
            if count <= self.config.max_messages && chars <= self.config.max_chars {
                break;
            }
            if pinned[i] {
                continue;
            }
            keep[i] = false;
            count -= 1;
            chars -= char_len(message);
        }

        let dropped = messages.len() - count;
        if dropped > 0 {
            debug!("Context window dropped {dropped} oldest messages");
        }

        Ok(messages
            .into_iter()
            .zip(keep)
            .filter_map(|(m, k)| k.then_some(m))
            .collect())
    }
}

impl ContextManager for WindowedContext {
    fn fit(&self, prompt: BuiltPrompt) -> Result<BuiltPrompt, ContextError> {
        let messages = self.select(prompt.messages)?;
        Ok(BuiltPrompt {
            messages,
            params: prompt.params,
        })
    }
}

fn char_len(message: &ChatMessage) -> usize {
    message.content.chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use niki_core::GenerationParams;

    fn prompt(history: usize) -> BuiltPrompt {
        let mut messages = vec![ChatMessage::system("system")];
        messages.extend((0..history).map(|i| {
            let role = if i % 2 == 0 {
                Role::User
            } else {
                Role::Assistant
            };
            ChatMessage::new(role, format!("Message {i}: {}", "x".repeat(10)))
        }));
        messages.push(ChatMessage::new(Role::User, "current"));
        BuiltPrompt {
            messages,
            params: GenerationParams::for_model("m"),
        }
    }

    fn contents(prompt: &BuiltPrompt) -> Vec<&str> {
        prompt.messages.iter().map(|m| m.content.as_str()).collect()
    }

    #[test]
    fn test_passthrough_is_identity() {
        let input = prompt(6);
        let output = PassthroughContext.fit(input.clone());
        assert_eq!(output, Ok(input));
    }

    #[test]
    fn test_message_budget_drops_oldest_history() {
        let window = WindowedContext::new(WindowConfig::default().with_max_messages(4));
        let Ok(fitted) = window.fit(prompt(6)) else {
            panic!("window should fit");
        };
        // system + 2 newest history + current
        assert_eq!(fitted.messages.len(), 4);
        assert_eq!(fitted.messages[0].content, "system");
        assert!(fitted.messages[1].content.starts_with("Message 4"));
        assert!(fitted.messages[2].content.starts_with("Message 5"));
        assert_eq!(fitted.messages[3].content, "current");
    }

    #[test]
    fn test_char_budget_drops_oldest_history() {
        // Each history message is 21 chars; pinned ones total 13.
        let window = WindowedContext::new(WindowConfig::default().with_max_chars(60));
        let Ok(fitted) = window.fit(prompt(6)) else {
            panic!("window should fit");
        };
        let total: usize = fitted.messages.iter().map(char_len).sum();
        assert!(total <= 60);
        assert_eq!(contents(&fitted).last(), Some(&"current"));
        assert_eq!(contents(&fitted).first(), Some(&"system"));
    }

    #[test]
    fn test_retained_messages_keep_order() {
        let window = WindowedContext::new(WindowConfig::default().with_max_messages(5));
        let Ok(fitted) = window.fit(prompt(8)) else {
            panic!("window should fit");
        };
        let original = prompt(8);
        let mut cursor = original.messages.iter();
        for kept in &fitted.messages {
            assert!(cursor.any(|m| m == kept), "message out of order: {kept:?}");
        }
    }

    #[test]
    fn test_oversized_pinned_messages_cannot_be_reduced() {
        let window = WindowedContext::new(WindowConfig::default().with_max_chars(5));
        let result = window.fit(prompt(2));
        assert!(matches!(result, Err(ContextError::ReducibleNoFurther(_))));

        let window = WindowedContext::new(WindowConfig::default().with_max_messages(1));
        let result = window.fit(prompt(2));
        assert!(matches!(result, Err(ContextError::ReducibleNoFurther(_))));
    }

    #[test]
    fn test_prompt_within_budget_is_untouched() {
        let window = WindowedContext::default();
        let input = prompt(4);
        assert_eq!(window.fit(input.clone()), Ok(input));
    }
}
