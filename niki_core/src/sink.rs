//! Per-request output sink the orchestrator forwards deltas into.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("chunk receiver went away")]
    Closed,

    #[error("failed to write chunk: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait ChunkSink: Send {
    /// Deliver one chunk. May suspend while the consumer catches up.
    async fn send_chunk(&mut self, text: &str) -> Result<(), SinkError>;
}

/// Bounded channels give backpressure: the sender waits for free capacity.
#[async_trait]
impl ChunkSink for mpsc::Sender<String> {
    async fn send_chunk(&mut self, text: &str) -> Result<(), SinkError> {
        self.send(text.to_owned())
            .await
            .map_err(|_| SinkError::Closed)
    }
}

/// Collects chunks in memory.
#[async_trait]
impl ChunkSink for Vec<String> {
    async fn send_chunk(&mut self, text: &str) -> Result<(), SinkError> {
        self.push(text.to_owned());
        Ok(())
    }
}
