use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use niki_core::{
    ChatMessage, ChatProvider, ChunkStream, GenerationParams, PartialChunk, ProviderError,
};
use tokio_util::sync::CancellationToken;

type FailureFactory = Box<dyn Fn() -> ProviderError + Send + Sync>;

/// A request as the scripted provider received it.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub messages: Vec<ChatMessage>,
    pub params: GenerationParams,
}

/// Deterministic provider that replays a fixed chunk sequence.
///
/// Every call is recorded so callers can inspect the exact prompt that
/// would have gone over the wire.
pub struct ScriptedProvider {
    chunks: Vec<PartialChunk>,
    failure: Option<FailureFactory>,
    chunk_delay: Option<Duration>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedProvider {
    /// Replay `chunks` verbatim, terminal chunk included or not.
    #[must_use]
    pub fn new(chunks: Vec<PartialChunk>) -> Self {
        Self {
            chunks,
            failure: None,
            chunk_delay: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Replay the given deltas followed by `Done`.
    #[must_use]
    pub fn from_deltas<I, S>(deltas: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let chunks = deltas
            .into_iter()
            .map(|d| PartialChunk::Delta(d.into()))
            .chain(std::iter::once(PartialChunk::Done))
            .collect();
        Self::new(chunks)
    }

    /// Fail every call at open time with the error `make` builds.
    #[must_use]
    pub fn failing(make: impl Fn() -> ProviderError + Send + Sync + 'static) -> Self {
        Self {
            failure: Some(Box::new(make)),
            ..Self::new(Vec::new())
        }
    }

    /// Sleep before each chunk, so there is time to cancel mid-stream.
    #[must_use]
    pub const fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }

    #[must_use]
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn call_count(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl ChatProvider for ScriptedProvider {
    async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        params: &GenerationParams,
        cancel: CancellationToken,
    ) -> Result<ChunkStream, ProviderError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedRequest {
                messages: messages.to_vec(),
                params: params.clone(),
            });

        if let Some(make) = &self.failure {
            return Err(make());
        }
        if messages.is_empty() {
            return Err(ProviderError::EmptyPrompt);
        }

        let chunks = self.chunks.clone();
        let delay = self.chunk_delay;
        let stream = async_stream::stream! {
            for chunk in chunks {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                yield chunk;
            }
        };

        Ok(Box::pin(stream.take_until(cancel.cancelled_owned())))
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}
