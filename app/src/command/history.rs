use std::path::PathBuf;

use chrono::{DateTime, Local};
use niki_config::Config;
use niki_core::{ConversationKey, HistoryStore, Message, ReadOptions};

use super::build_store;

#[derive(Debug, Clone, Copy)]
pub enum HistoryAction {
    Show { limit: Option<usize> },
    Clear,
}

#[derive(Debug, Clone)]
pub struct HistoryInput {
    pub config: Option<PathBuf>,
    pub player_id: String,
    pub niki_id: String,
    pub action: HistoryAction,
}

/// Strategy for inspecting or clearing one stored conversation.
#[derive(Debug, Clone, Copy)]
pub struct HistoryStrategy;

impl super::CommandStrategy for HistoryStrategy {
    type Input = HistoryInput;

    async fn execute(&self, input: Self::Input) -> anyhow::Result<()> {
        let config = Config::load(input.config.as_deref())?;
        let store = build_store(&config).await?;
        let key = ConversationKey::new(input.player_id, input.niki_id);

        match input.action {
            HistoryAction::Show { limit } => {
                let opts = limit.map_or_else(ReadOptions::default, ReadOptions::last);
                let messages = store.get_history(&key, opts).await?;
                if messages.is_empty() {
                    println!("No history for {key}");
                }
                for message in &messages {
                    println!("{}", format_message(message));
                }
                if let Some(summary) = store.get_summary(&key).await? {
                    println!("\nSummary: {}", summary.content);
                }
            }
            HistoryAction::Clear => {
                store.clear(&key).await?;
                println!("Cleared history for {key}");
            }
        }

        Ok(())
    }
}

fn format_message(message: &Message) -> String {
    let when = message
        .timestamp
        .and_then(|ts| DateTime::from_timestamp(ts, 0))
        .map_or_else(
            || "-".to_string(),
            |utc| {
                utc.with_timezone(&Local)
                    .format("%Y-%m-%d %H:%M:%S")
                    .to_string()
            },
        );
    format!("[{when}] {}: {}", message.role, message.content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use niki_core::Role;

    #[test]
    fn test_message_without_timestamp_shows_placeholder() {
        let line = format_message(&Message::new(Role::User, "hi"));
        assert_eq!(line, "[-] user: hi");
    }

    #[test]
    fn test_timestamped_message_shows_date() {
        let line = format_message(&Message::with_timestamp(Role::Assistant, "hello", 0));
        assert!(line.ends_with("] assistant: hello"));
        assert!(line.starts_with("[19"), "unexpected line: {line}");
    }
}
