use async_trait::async_trait;
use niki_core::{
    ChatMessage, ChatProvider, ChunkStream, GenerationParams, PartialChunk, ProviderError,
};
use tokio_util::sync::CancellationToken;

/// Placeholder provider: every completion is empty and finishes immediately.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProvider;

#[async_trait]
impl ChatProvider for NoopProvider {
    async fn stream_chat(
        &self,
        _messages: &[ChatMessage],
        _params: &GenerationParams,
        _cancel: CancellationToken,
    ) -> Result<ChunkStream, ProviderError> {
        Ok(Box::pin(futures::stream::once(async { PartialChunk::Done })))
    }

    fn name(&self) -> &'static str {
        "noop"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_yields_only_done() {
        let Ok(stream) = NoopProvider
            .stream_chat(&[], &GenerationParams::default(), CancellationToken::new())
            .await
        else {
            panic!("noop stream should open");
        };
        let chunks: Vec<_> = stream.collect().await;
        assert_eq!(chunks, vec![PartialChunk::Done]);
    }
}
