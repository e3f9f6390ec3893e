use std::path::PathBuf;

use anyhow::Context;
use niki_config::Config;
use niki_server::{AppState, serve, shutdown_signal};
use tokio::net::TcpListener;

use super::build_orchestrator;

#[derive(Debug, Clone)]
pub struct ServeInput {
    pub config: Option<PathBuf>,
    /// Overrides `server.port` when set
    pub port: Option<u16>,
}

/// Strategy for running the HTTP gateway until Ctrl-C or SIGTERM.
#[derive(Debug, Clone, Copy)]
pub struct ServeStrategy;

impl super::CommandStrategy for ServeStrategy {
    type Input = ServeInput;

    async fn execute(&self, input: Self::Input) -> anyhow::Result<()> {
        let mut config = Config::load(input.config.as_deref())?;
        if let Some(port) = input.port {
            config.server.port = port;
            config.validate()?;
        }

        let orchestrator = build_orchestrator(&config).await?;
        let address = config.server.address();
        let listener = TcpListener::bind(&address)
            .await
            .with_context(|| format!("Failed to bind {address}"))?;

        serve(listener, AppState::new(orchestrator), shutdown_signal()).await?;
        Ok(())
    }
}
