//! Prompt assembly.
//!
//! Turns system text, the persona directive, stored history and the current
//! turn into the ordered message list sent to the model. Pure: no I/O.

use niki_core::{ChatMessage, GenerationParams, Message, MessageBatch, Role};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PromptError {
    #[error("no model configured and none supplied by the caller")]
    MissingModel,
}

/// Static inputs for [`SimplePromptBuilder`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PromptConfig {
    /// System text placed before everything else.
    pub default_system: Vec<String>,
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub stop: Vec<String>,
}

impl PromptConfig {
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    #[must_use]
    pub fn with_default_system(mut self, system: Vec<String>) -> Self {
        self.default_system = system;
        self
    }
}

/// Everything one request contributes to the prompt.
#[derive(Debug, Clone)]
pub struct BuildContext {
    pub system_messages: Vec<Message>,
    pub persona: Option<Message>,
    pub history: MessageBatch,
    pub current_input: Message,
    /// Keep the current input even when its content is blank.
    pub allow_empty_input: bool,
    /// Overrides the configured model when non-empty.
    pub model: Option<String>,
}

impl BuildContext {
    #[must_use]
    pub fn new(current_input: Message) -> Self {
        Self {
            system_messages: Vec::new(),
            persona: None,
            history: Vec::new(),
            current_input,
            allow_empty_input: false,
            model: None,
        }
    }
}

/// Messages and generation parameters ready for a provider.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltPrompt {
    pub messages: Vec<ChatMessage>,
    pub params: GenerationParams,
}

pub trait PromptBuilder: Send + Sync {
    fn build(&self, context: &BuildContext) -> Result<BuiltPrompt, PromptError>;
}

/// Concatenates in a fixed order: configured system text, request system
/// messages, persona directive, history, current input.
#[derive(Debug, Clone, Default)]
pub struct SimplePromptBuilder {
    config: PromptConfig,
}

impl SimplePromptBuilder {
    #[must_use]
    pub const fn new(config: PromptConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub const fn config(&self) -> &PromptConfig {
        &self.config
    }

    fn params(&self, override_model: Option<&str>) -> Result<GenerationParams, PromptError> {
        let model = override_model
            .filter(|m| !m.trim().is_empty())
            .or_else(|| Some(self.config.model.as_str()).filter(|m| !m.trim().is_empty()))
            .ok_or(PromptError::MissingModel)?;

        Ok(GenerationParams {
            model: model.to_string(),
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            stop: (!self.config.stop.is_empty()).then(|| self.config.stop.clone()),
        })
    }
}

impl PromptBuilder for SimplePromptBuilder {
    fn build(&self, context: &BuildContext) -> Result<BuiltPrompt, PromptError> {
        let params = self.params(context.model.as_deref())?;

        let mut messages =
            Vec::with_capacity(self.config.default_system.len() + context.history.len() + 3);

        let system_text = self
            .config
            .default_system
            .iter()
            .map(String::as_str)
            .chain(context.system_messages.iter().map(|m| m.content.as_str()))
            .chain(context.persona.iter().map(|m| m.content.as_str()));
        for text in system_text {
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                messages.push(ChatMessage::system(trimmed));
            }
        }

        messages.extend(
            context
                .history
                .iter()
                .filter(|m| !m.content.trim().is_empty())
                .map(ChatMessage::from),
        );

        if context.allow_empty_input || !context.current_input.content.trim().is_empty() {
            messages.push(ChatMessage::from(&context.current_input));
        }

        Ok(BuiltPrompt { messages, params })
    }
}

/// System directive naming the persona a reply must come from.
#[must_use]
pub fn persona_directive(niki_name: &str, niki_id: &str, player_nickname: &str) -> Message {
    Message::new(
        Role::System,
        format!(
            "You are {niki_name} (id={niki_id}). Stay in character as {niki_name} while talking with {player_nickname}."
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> SimplePromptBuilder {
        SimplePromptBuilder::new(PromptConfig {
            default_system: vec!["  be kind  ".into(), "   ".into()],
            model: "gpt-test".into(),
            temperature: Some(0.7),
            max_tokens: Some(128),
            stop: Vec::new(),
        })
    }

    fn roles(prompt: &BuiltPrompt) -> Vec<(Role, &str)> {
        prompt
            .messages
            .iter()
            .map(|m| (m.role, m.content.as_str()))
            .collect()
    }

    #[test]
    fn test_messages_follow_fixed_order() {
        let mut context = BuildContext::new(Message::new(Role::User, "now"));
        context.system_messages = vec![Message::new(Role::System, "request system")];
        context.persona = Some(Message::new(Role::System, "persona"));
        context.history = vec![
            Message::with_timestamp(Role::User, "old question", 1),
            Message::with_timestamp(Role::Assistant, "old answer", 2),
        ];

        let Ok(prompt) = builder().build(&context) else {
            panic!("build should succeed");
        };
        assert_eq!(
            roles(&prompt),
            vec![
                (Role::System, "be kind"),
                (Role::System, "request system"),
                (Role::System, "persona"),
                (Role::User, "old question"),
                (Role::Assistant, "old answer"),
                (Role::User, "now"),
            ]
        );
    }

    #[test]
    fn test_blank_messages_are_dropped() {
        let mut context = BuildContext::new(Message::new(Role::User, "  "));
        context.persona = Some(Message::new(Role::System, ""));
        context.history = vec![Message::with_timestamp(Role::Assistant, "\n", 1)];

        let Ok(prompt) = builder().build(&context) else {
            panic!("build should succeed");
        };
        assert_eq!(roles(&prompt), vec![(Role::System, "be kind")]);
    }

    #[test]
    fn test_empty_input_kept_when_allowed() {
        let mut context = BuildContext::new(Message::new(Role::User, ""));
        context.allow_empty_input = true;

        let Ok(prompt) = builder().build(&context) else {
            panic!("build should succeed");
        };
        assert_eq!(prompt.messages.last(), Some(&ChatMessage::new(Role::User, "")));
    }

    #[test]
    fn test_params_come_from_config() {
        let context = BuildContext::new(Message::new(Role::User, "hi"));
        let Ok(prompt) = builder().build(&context) else {
            panic!("build should succeed");
        };
        assert_eq!(prompt.params.model, "gpt-test");
        assert_eq!(prompt.params.max_tokens, Some(128));
        assert_eq!(prompt.params.temperature, Some(0.7));
        assert_eq!(prompt.params.stop, None);
    }

    #[test]
    fn test_caller_model_overrides_config() {
        let mut context = BuildContext::new(Message::new(Role::User, "hi"));
        context.model = Some("other".into());
        let prompt = builder().build(&context);
        assert!(prompt.is_ok_and(|p| p.params.model == "other"));
    }

    #[test]
    fn test_missing_model_is_a_configuration_error() {
        let builder = SimplePromptBuilder::default();
        let context = BuildContext::new(Message::new(Role::User, "hi"));
        assert_eq!(builder.build(&context), Err(PromptError::MissingModel));
    }

    #[test]
    fn test_persona_names_the_niki_and_player() {
        let directive = persona_directive("Mira", "n1", "Sam");
        assert_eq!(directive.role, Role::System);
        assert!(directive.content.contains("Mira"));
        assert!(directive.content.contains("id=n1"));
        assert!(directive.content.contains("Sam"));
    }
}
