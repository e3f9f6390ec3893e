#![deny(
    clippy::all,
    clippy::nursery,
    clippy::pedantic,
    clippy::style,
    clippy::complexity,
    clippy::perf,
    clippy::correctness,
    clippy::suspicious,
    clippy::unwrap_used,
    clippy::expect_used
)]
#![allow(
    clippy::similar_names,
    clippy::missing_safety_doc,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc
)]

mod command;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use command::{
    ChatInput, ChatStrategy, CommandStrategy, HistoryAction, HistoryInput, HistoryStrategy,
    InfoStrategy, InitStrategy, ServeInput, ServeStrategy, VersionStrategy,
};

#[derive(Parser)]
#[command(name = "niki")]
#[command(about = "Niki companion chat gateway", long_about = None)]
struct Cli {
    /// Config file (defaults to ~/niki/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP gateway
    Serve {
        /// Listen port, overrides server.port
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Talk to a Niki from the terminal
    Chat {
        #[arg(long)]
        player: String,
        #[arg(long)]
        nickname: String,
        #[arg(long)]
        niki: String,
        #[arg(long)]
        niki_name: String,
        /// Single message to send (interactive when omitted)
        #[arg(short = 'm', long)]
        message: Option<String>,
    },
    /// Inspect or clear a stored conversation
    History {
        #[command(subcommand)]
        action: HistoryCommand,
    },
    /// Show the effective configuration
    Info,
    /// Initialize configuration
    Init,
    /// Show version
    Version,
}

#[derive(Subcommand)]
enum HistoryCommand {
    /// Print stored messages
    Show {
        #[arg(long)]
        player: String,
        #[arg(long)]
        niki: String,
        /// Only the newest N messages
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Delete the log and summary
    Clear {
        #[arg(long)]
        player: String,
        #[arg(long)]
        niki: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.config;

    match cli.command {
        Commands::Serve { port } => ServeStrategy.execute(ServeInput { config, port }).await,
        Commands::Chat {
            player,
            nickname,
            niki,
            niki_name,
            message,
        } => {
            ChatStrategy
                .execute(ChatInput {
                    config,
                    player_id: player,
                    player_nickname: nickname,
                    niki_id: niki,
                    niki_name,
                    message,
                })
                .await
        }
        Commands::History { action } => {
            let (player_id, niki_id, action) = match action {
                HistoryCommand::Show {
                    player,
                    niki,
                    limit,
                } => (player, niki, HistoryAction::Show { limit }),
                HistoryCommand::Clear { player, niki } => (player, niki, HistoryAction::Clear),
            };
            HistoryStrategy
                .execute(HistoryInput {
                    config,
                    player_id,
                    niki_id,
                    action,
                })
                .await
        }
        Commands::Info => InfoStrategy.execute(config).await,
        Commands::Init => InitStrategy.execute(config).await,
        Commands::Version => VersionStrategy.execute(()).await,
    }
}
