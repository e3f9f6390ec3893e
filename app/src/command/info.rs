use std::path::PathBuf;

use niki_config::{Config, ContextStrategy, ProviderKind, StorageBackend};

/// Strategy for displaying the effective configuration, secrets masked.
#[derive(Debug, Clone, Copy)]
pub struct InfoStrategy;

impl super::CommandStrategy for InfoStrategy {
    type Input = Option<PathBuf>;

    async fn execute(&self, input: Self::Input) -> anyhow::Result<()> {
        let config = Config::load(input.as_deref())?;

        println!("=== niki Configuration ===\n");

        println!("Provider:");
        let kind = match config.provider.kind {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Scripted => "scripted",
            ProviderKind::Noop => "noop",
        };
        println!("  Kind: {kind}");
        println!("  API Key: {}", mask_secret(&config.provider.api_key));
        println!("  Base URL: {}", config.provider.base_url);
        println!(
            "  Timeouts: connect {}s, read {}s",
            config.provider.connect_timeout_secs, config.provider.read_timeout_secs
        );
        println!();

        println!("Prompt:");
        println!("  Model: {}", config.prompt.model);
        println!("  Max Tokens: {}", config.prompt.max_tokens);
        println!("  Temperature: {}", config.prompt.temperature);
        for system in &config.prompt.default_system {
            println!("  System: {}", niki_core::util::truncate_utf8(system, 60));
        }
        println!();

        println!("Context:");
        match config.context.strategy {
            ContextStrategy::Passthrough => println!("  Strategy: passthrough"),
            ContextStrategy::Window => println!(
                "  Strategy: window ({} messages, {} chars)",
                config.context.max_messages, config.context.max_chars
            ),
        }
        println!();

        println!("Storage:");
        match config.storage.backend {
            StorageBackend::File => {
                println!("  Backend: file");
                println!("  Data Dir: {}", config.storage.data_dir.display());
            }
            StorageBackend::None => println!("  Backend: none"),
        }
        println!();

        println!("Server:");
        println!("  Address: {}", config.server.address());

        Ok(())
    }
}

fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.is_empty() {
        "(not set)".to_string()
    } else if chars.len() > 8 {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{head}...{tail}")
    } else {
        "***".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secrets_are_masked() {
        assert_eq!(mask_secret(""), "(not set)");
        assert_eq!(mask_secret("short"), "***");
        assert_eq!(mask_secret("sk-abcdefghijkl"), "sk-a...ijkl");
    }
}
