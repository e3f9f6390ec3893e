//! The streaming completion seam.
//!
//! A [`ChatProvider`] opens one streaming completion and hands back a
//! [`ChunkStream`]. Consumers pull chunks one at a time, so a slow consumer
//! naturally slows the producer down.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::ChatMessage;

/// Generation knobs sent alongside the prompt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    /// Empty means "use the provider's configured default".
    pub model: String,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub stop: Option<Vec<String>>,
}

impl GenerationParams {
    #[must_use]
    pub fn for_model(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::default()
        }
    }
}

/// One item of a completion stream.
///
/// A provider payload that carries both text and a completion marker is
/// split into a `Delta` followed by `Done`, so deltas always reach the
/// consumer before the terminal signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartialChunk {
    Delta(String),
    Done,
    Error(StreamError),
}

impl PartialChunk {
    #[must_use]
    pub fn delta(text: impl Into<String>) -> Self {
        Self::Delta(text.into())
    }

    /// `Done` and `Error` end the stream; nothing follows them.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error(_))
    }
}

pub type ChunkStream = Pin<Box<dyn Stream<Item = PartialChunk> + Send>>;

/// Failures while a stream is already flowing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    #[error("failed to decode stream event: {0}")]
    Decode(String),

    #[error("failed to read response body: {0}")]
    Read(String),

    #[error("provider reported an error mid-stream: {0}")]
    Provider(String),
}

/// Failures before any chunk is produced.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("API key must be provided")]
    MissingApiKey,

    #[error("no model given and no default model configured")]
    MissingModel,

    #[error("at least one message must be provided")]
    EmptyPrompt,

    #[error("provider returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// Transport failure, boxed so this crate stays free of any HTTP client.
    #[error("request failed: {0}")]
    Request(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),
}

impl ProviderError {
    pub fn request(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Request(Box::new(err))
    }
}

/// Capability interface for completion backends.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Open a streaming completion.
    ///
    /// Errors returned here happen before any chunk exists. Once a stream is
    /// returned it yields zero or more `Delta`s and then exactly one terminal
    /// chunk, unless `cancel` fires first, in which case it simply ends.
    async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        params: &GenerationParams,
        cancel: CancellationToken,
    ) -> Result<ChunkStream, ProviderError>;

    fn name(&self) -> &'static str;
}

#[async_trait]
impl<T: ChatProvider + ?Sized> ChatProvider for Arc<T> {
    async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        params: &GenerationParams,
        cancel: CancellationToken,
    ) -> Result<ChunkStream, ProviderError> {
        (**self).stream_chat(messages, params, cancel).await
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_chunks() {
        assert!(!PartialChunk::delta("x").is_terminal());
        assert!(PartialChunk::Done.is_terminal());
        assert!(PartialChunk::Error(StreamError::Decode("bad".into())).is_terminal());
    }

    #[test]
    fn test_status_error_includes_body() {
        let err = ProviderError::Status {
            status: 400,
            body: "bad request".to_string(),
        };
        assert_eq!(err.to_string(), "provider returned status 400: bad request");
    }
}
