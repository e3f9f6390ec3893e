use std::path::PathBuf;

use niki_config::Config;

/// Strategy for writing the starter configuration file.
#[derive(Debug, Clone, Copy)]
pub struct InitStrategy;

impl super::CommandStrategy for InitStrategy {
    type Input = Option<PathBuf>;

    async fn execute(&self, input: Self::Input) -> anyhow::Result<()> {
        let path = Config::create_config(input.as_deref())?;
        println!("Created config at {}", path.display());
        println!("Set provider.api_key (or export OPENAI_API_KEY) before running `niki chat`.");
        Ok(())
    }
}
