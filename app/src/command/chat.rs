//! Terminal chat: one turn per line, deltas printed as they arrive.

use std::path::PathBuf;

use async_trait::async_trait;
use niki_config::Config;
use niki_conversation::{ChatRequest, ErrorKind, Orchestrator};
use niki_core::{ChunkSink, SinkError};
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::build_orchestrator;

#[derive(Debug, Clone)]
pub struct ChatInput {
    pub config: Option<PathBuf>,
    pub player_id: String,
    pub player_nickname: String,
    pub niki_id: String,
    pub niki_name: String,
    /// Single message to send (non-interactive mode)
    pub message: Option<String>,
}

/// Strategy for chatting with a Niki in-process.
///
/// Ctrl-C cancels the turn in flight; the conversation continues with the
/// next line and nothing from the cancelled turn is stored.
#[derive(Debug, Clone, Copy)]
pub struct ChatStrategy;

impl super::CommandStrategy for ChatStrategy {
    type Input = ChatInput;

    async fn execute(&self, input: Self::Input) -> anyhow::Result<()> {
        let config = Config::load(input.config.as_deref())?;
        let orchestrator = build_orchestrator(&config).await?;

        let mut request = ChatRequest {
            player_id: input.player_id,
            player_nickname: input.player_nickname,
            niki_id: input.niki_id,
            niki_name: input.niki_name,
            input_text: String::new(),
        };

        if let Some(message) = input.message {
            request.input_text = message;
            return run_turn(&orchestrator, &request).await;
        }

        info!("Chatting with {} as {}", request.niki_name, request.player_nickname);
        println!("Type a message, or 'exit' to quit. Ctrl-C cancels a reply.\n");

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            print_prompt(&request.player_nickname).await?;
            let Some(line) = lines.next_line().await? else {
                break;
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if matches!(line, "exit" | "quit") {
                break;
            }

            request.input_text = line.to_string();
            if let Err(err) = run_turn(&orchestrator, &request).await {
                eprintln!("Error: {err}");
            }
        }

        Ok(())
    }
}

async fn print_prompt(nickname: &str) -> anyhow::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(format!("{nickname}> ").as_bytes()).await?;
    stdout.flush().await?;
    Ok(())
}

async fn run_turn(orchestrator: &Orchestrator, request: &ChatRequest) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let mut sink = WriterSink::new(tokio::io::stdout());

    let turn = orchestrator.handle_chat(request, &mut sink, &cancel);
    tokio::pin!(turn);

    let result = tokio::select! {
        result = &mut turn => result,
        _ = tokio::signal::ctrl_c() => {
            cancel.cancel();
            turn.await
        }
    };
    println!();

    match result {
        Ok(_) => Ok(()),
        Err(err) if err.kind() == ErrorKind::Cancelled => {
            println!("(reply cancelled)");
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}

/// Writes every chunk straight through and flushes so partial replies show up.
struct WriterSink<W> {
    writer: W,
}

impl<W> WriterSink<W> {
    const fn new(writer: W) -> Self {
        Self { writer }
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> ChunkSink for WriterSink<W> {
    async fn send_chunk(&mut self, text: &str) -> Result<(), SinkError> {
        self.writer.write_all(text.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_writer_sink_passes_chunks_through() {
        let mut sink = WriterSink::new(Vec::<u8>::new());
        for text in ["Hel", "lo", " ✨"] {
            assert!(sink.send_chunk(text).await.is_ok());
        }
        assert_eq!(String::from_utf8_lossy(&sink.writer), "Hello ✨");
    }
}
