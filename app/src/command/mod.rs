//! Static strategy pattern for CLI commands.
//!
//! Each command is a separate strategy type with its own input, dispatched
//! statically from `main`. Shared wiring from [`Config`] to a ready
//! [`Orchestrator`] lives here.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use niki_config::{Config, ContextStrategy, ProviderKind, ProviderSection, StorageBackend};
use niki_conversation::{
    ContextManager, Orchestrator, OrchestratorConfig, PassthroughContext, PromptConfig,
    SimplePromptBuilder, WindowConfig, WindowedContext,
};
use niki_core::{ChatProvider, HistoryStore};
use niki_history::{FileHistoryStore, NoopHistoryStore};
use niki_providers::{NoopProvider, OpenAiConfig, OpenAiProvider, ScriptedProvider};
use tracing::info;

mod chat;
mod history;
mod info;
mod init;
mod serve;
mod version;

pub use chat::{ChatInput, ChatStrategy};
pub use history::{HistoryAction, HistoryInput, HistoryStrategy};
pub use info::InfoStrategy;
pub use init::InitStrategy;
pub use serve::{ServeInput, ServeStrategy};
pub use version::VersionStrategy;

/// Core trait defining the contract for all command strategies.
///
/// Each strategy defines its own input type via the associated type, so
/// parameters are passed without runtime casting or boxing.
pub trait CommandStrategy: Send + Sync + 'static {
    type Input;

    async fn execute(&self, input: Self::Input) -> anyhow::Result<()>;
}

pub async fn build_store(config: &Config) -> anyhow::Result<Arc<dyn HistoryStore>> {
    match config.storage.backend {
        StorageBackend::File => {
            let dir: &Path = &config.storage.data_dir;
            let store = FileHistoryStore::open(dir)
                .await
                .with_context(|| format!("Failed to open history store at {}", dir.display()))?;
            info!("History stored under {}", dir.display());
            Ok(Arc::new(store))
        }
        StorageBackend::None => {
            info!("History persistence disabled");
            Ok(Arc::new(NoopHistoryStore::new()))
        }
    }
}

pub fn build_provider(section: &ProviderSection) -> anyhow::Result<Arc<dyn ChatProvider>> {
    match section.kind {
        ProviderKind::OpenAi => {
            let mut openai = OpenAiConfig::new(section.api_key.clone())
                .with_base_url(section.base_url.clone())
                .with_default_model(section.model.clone());
            openai.connect_timeout = Duration::from_secs(section.connect_timeout_secs);
            openai.read_timeout = Duration::from_secs(section.read_timeout_secs);
            openai.error_body_limit = section.error_body_limit;
            let provider =
                OpenAiProvider::new(openai).context("Failed to create OpenAI provider")?;
            Ok(Arc::new(provider))
        }
        ProviderKind::Scripted => Ok(Arc::new(ScriptedProvider::from_deltas(
            section.script.clone(),
        ))),
        ProviderKind::Noop => Ok(Arc::new(NoopProvider)),
    }
}

pub fn build_context(config: &Config) -> Arc<dyn ContextManager> {
    match config.context.strategy {
        ContextStrategy::Passthrough => Arc::new(PassthroughContext),
        ContextStrategy::Window => Arc::new(WindowedContext::new(
            WindowConfig::default()
                .with_max_messages(config.context.max_messages)
                .with_max_chars(config.context.max_chars),
        )),
    }
}

pub fn build_prompt_config(config: &Config) -> PromptConfig {
    let prompt = &config.prompt;
    PromptConfig {
        default_system: prompt.default_system.clone(),
        model: prompt.model.clone(),
        temperature: Some(prompt.temperature),
        max_tokens: (prompt.max_tokens > 0).then_some(prompt.max_tokens),
        stop: prompt.stop.clone(),
    }
}

pub async fn build_orchestrator(config: &Config) -> anyhow::Result<Arc<Orchestrator>> {
    let store = build_store(config).await?;
    let provider = build_provider(&config.provider)?;

    Ok(Arc::new(Orchestrator::new(
        OrchestratorConfig {
            system_prompts: config.conversation.system_prompts.clone(),
        },
        store,
        Arc::new(SimplePromptBuilder::new(build_prompt_config(config))),
        build_context(config),
        provider,
    )))
}
