use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

const CONFIG_DIR: &str = "niki";
const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub provider: ProviderSection,
    #[serde(default)]
    pub prompt: PromptSection,
    #[serde(default)]
    pub context: ContextSection,
    #[serde(default)]
    pub conversation: ConversationSection,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub server: ServerSection,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    OpenAi,
    Scripted,
    Noop,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct ProviderSection {
    #[serde(default)]
    pub kind: ProviderKind,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "ProviderSection::default_base_url")]
    pub base_url: String,
    /// Fallback when the prompt names no model.
    #[serde(default)]
    pub model: String,
    #[serde(default = "ProviderSection::default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "ProviderSection::default_read_timeout_secs")]
    pub read_timeout_secs: u64,
    #[serde(default = "ProviderSection::default_error_body_limit")]
    pub error_body_limit: usize,
    /// Deltas replayed by the scripted provider.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub script: Vec<String>,
}

impl Default for ProviderSection {
    fn default() -> Self {
        Self {
            kind: ProviderKind::default(),
            api_key: String::new(),
            base_url: Self::default_base_url(),
            model: String::new(),
            connect_timeout_secs: Self::default_connect_timeout_secs(),
            read_timeout_secs: Self::default_read_timeout_secs(),
            error_body_limit: Self::default_error_body_limit(),
            script: Vec::new(),
        }
    }
}

impl ProviderSection {
    fn default_base_url() -> String {
        "https://api.openai.com/v1".to_string()
    }

    const fn default_connect_timeout_secs() -> u64 {
        10
    }

    const fn default_read_timeout_secs() -> u64 {
        60
    }

    const fn default_error_body_limit() -> usize {
        4096
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct PromptSection {
    #[serde(default = "PromptSection::default_model")]
    pub model: String,
    #[serde(default = "PromptSection::default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "PromptSection::default_temperature")]
    pub temperature: f32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
    #[serde(default)]
    pub default_system: Vec<String>,
}

impl Default for PromptSection {
    fn default() -> Self {
        Self {
            model: Self::default_model(),
            max_tokens: Self::default_max_tokens(),
            temperature: Self::default_temperature(),
            stop: Vec::new(),
            default_system: Vec::new(),
        }
    }
}

impl PromptSection {
    fn default_model() -> String {
        "gpt-4o-mini".to_string()
    }

    const fn default_max_tokens() -> u32 {
        512
    }

    const fn default_temperature() -> f32 {
        0.7
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ContextStrategy {
    #[default]
    Passthrough,
    Window,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
pub struct ContextSection {
    #[serde(default)]
    pub strategy: ContextStrategy,
    #[serde(default = "ContextSection::default_max_messages")]
    pub max_messages: usize,
    #[serde(default = "ContextSection::default_max_chars")]
    pub max_chars: usize,
}

impl Default for ContextSection {
    fn default() -> Self {
        Self {
            strategy: ContextStrategy::default(),
            max_messages: Self::default_max_messages(),
            max_chars: Self::default_max_chars(),
        }
    }
}

impl ContextSection {
    const fn default_max_messages() -> usize {
        20
    }

    const fn default_max_chars() -> usize {
        8000
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq, Eq)]
pub struct ConversationSection {
    /// Extra system text sent with every request, after `prompt.default_system`.
    #[serde(default)]
    pub system_prompts: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    File,
    None,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct StorageSection {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default = "StorageSection::default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            data_dir: Self::default_data_dir(),
        }
    }
}

impl StorageSection {
    fn default_data_dir() -> PathBuf {
        PathBuf::from("data/history")
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct ServerSection {
    #[serde(default = "ServerSection::default_host")]
    pub host: String,
    #[serde(default = "ServerSection::default_port")]
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            port: Self::default_port(),
        }
    }
}

impl ServerSection {
    fn default_host() -> String {
        "0.0.0.0".to_string()
    }

    const fn default_port() -> u16 {
        50051
    }

    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Config {
    pub fn default_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join(CONFIG_FILE))
    }

    fn config_dir() -> anyhow::Result<PathBuf> {
        Ok(dirs::home_dir()
            .ok_or_else(|| anyhow::anyhow!("Cannot find home directory"))?
            .join(CONFIG_DIR))
    }

    /// Load from `path` (or the default location), apply environment
    /// overrides and validate.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let config_path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::default_path()?,
        };

        if !config_path.exists() {
            anyhow::bail!(
                "Config file not found at: {}. Please run 'niki init' to create config.",
                config_path.display()
            );
        }

        let content = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;
        let mut config = Self::from_json(&content)
            .with_context(|| format!("Invalid config file {}", config_path.display()))?;

        config.apply_env_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;

        info!("Loaded config from {}", config_path.display());
        Ok(config)
    }

    pub fn from_json(content: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Overlay environment variables read through `lookup`. Blank values are ignored.
    pub fn apply_env_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> anyhow::Result<()> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(key) = get("OPENAI_API_KEY") {
            debug!("OPENAI_API_KEY overrides provider.api_key");
            self.provider.api_key = key;
        }
        if let Some(url) = get("OPENAI_BASE_URL") {
            debug!("OPENAI_BASE_URL overrides provider.base_url");
            self.provider.base_url = url;
        }
        if let Some(model) = get("NIKI_LLM_MODEL") {
            debug!("NIKI_LLM_MODEL overrides prompt.model");
            self.prompt.model = model;
        }
        if let Some(dir) = get("NIKI_HISTORY_DIR") {
            debug!("NIKI_HISTORY_DIR overrides storage.data_dir");
            self.storage.data_dir = PathBuf::from(dir);
        }
        if let Some(port) = get("NIKI_LISTEN_PORT") {
            self.server.port = port
                .trim()
                .parse()
                .with_context(|| format!("NIKI_LISTEN_PORT is not a valid port: {port}"))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.provider.kind == ProviderKind::OpenAi && self.provider.api_key.trim().is_empty() {
            anyhow::bail!(
                "provider.api_key must be set (or OPENAI_API_KEY exported) for the openai provider"
            );
        }
        if self.server.port == 0 {
            anyhow::bail!("server.port must be provided");
        }
        if self.context.strategy == ContextStrategy::Window && self.context.max_messages == 0 {
            anyhow::bail!("context.max_messages must be positive for the window strategy");
        }
        if self.storage.backend == StorageBackend::File
            && self.storage.data_dir.as_os_str().is_empty()
        {
            anyhow::bail!("storage.data_dir must be provided for the file backend");
        }
        Ok(())
    }

    pub fn ensure_config_dir() -> anyhow::Result<PathBuf> {
        let config_dir = Self::config_dir()?;
        std::fs::create_dir_all(&config_dir)?;
        Ok(config_dir)
    }

    /// Write the starter template to `path` (or the default location).
    pub fn create_config(path: Option<&Path>) -> anyhow::Result<PathBuf> {
        let config_path = match path {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                path.to_path_buf()
            }
            None => Self::ensure_config_dir()?.join(CONFIG_FILE),
        };

        if config_path.exists() {
            anyhow::bail!(
                "Config file already exists at: {}. Please edit it directly.",
                config_path.display()
            );
        }

        std::fs::write(&config_path, CONFIG_TEMPLATE)?;
        Ok(config_path)
    }
}

const CONFIG_TEMPLATE: &str = r#"{
  "provider": {
    "kind": "openai",
    "api_key": "your-openai-api-key-here",
    "base_url": "https://api.openai.com/v1",
    "connect_timeout_secs": 10,
    "read_timeout_secs": 60
  },
  "prompt": {
    "model": "gpt-4o-mini",
    "max_tokens": 512,
    "temperature": 0.7,
    "default_system": [
      "You are a friendly in-game companion. Stay in character and keep replies concise."
    ]
  },
  "context": {
    "strategy": "passthrough",
    "max_messages": 20,
    "max_chars": 8000
  },
  "conversation": {
    "system_prompts": []
  },
  "storage": {
    "backend": "file",
    "data_dir": "data/history"
  },
  "server": {
    "host": "0.0.0.0",
    "port": 50051
  }
}"#;
