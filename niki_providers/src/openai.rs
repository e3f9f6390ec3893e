use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use niki_core::{
    ChatMessage, ChatProvider, ChunkStream, GenerationParams, PartialChunk, ProviderError,
    StreamError,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::sse::{SseEvent, SseLineBuffer};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_ERROR_BODY_LIMIT: usize = 4096;

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    /// Used when a request does not name a model. May be empty.
    pub default_model: String,
    pub connect_timeout: Duration,
    /// Longest silence tolerated between two reads of the response body.
    pub read_timeout: Duration,
    /// How much of a failed response body is kept for diagnostics.
    pub error_body_limit: usize,
}

impl OpenAiConfig {
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            default_model: String::new(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            error_body_limit: DEFAULT_ERROR_BODY_LIMIT,
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    #[must_use]
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }
}

/// Streaming client for OpenAI-compatible `chat/completions` endpoints.
pub struct OpenAiProvider {
    client: Client,
    endpoint: String,
    config: OpenAiConfig,
}

impl OpenAiProvider {
    pub fn new(config: OpenAiConfig) -> Result<Self, ProviderError> {
        if config.api_key.trim().is_empty() {
            return Err(ProviderError::MissingApiKey);
        }

        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.read_timeout)
            .build()
            .map_err(ProviderError::request)?;

        let base = if config.base_url.trim().is_empty() {
            DEFAULT_BASE_URL
        } else {
            config.base_url.trim_end_matches('/')
        };
        let endpoint = format!("{base}/chat/completions");

        info!("Creating OpenAiProvider for {endpoint}");
        Ok(Self {
            client,
            endpoint,
            config,
        })
    }

    fn resolve_model<'a>(&'a self, params: &'a GenerationParams) -> Result<&'a str, ProviderError> {
        [params.model.as_str(), self.config.default_model.as_str()]
            .into_iter()
            .find(|m| !m.trim().is_empty())
            .ok_or(ProviderError::MissingModel)
    }
}

#[async_trait]
impl ChatProvider for OpenAiProvider {
    async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        params: &GenerationParams,
        cancel: CancellationToken,
    ) -> Result<ChunkStream, ProviderError> {
        if messages.is_empty() {
            return Err(ProviderError::EmptyPrompt);
        }
        let model = self.resolve_model(params)?;

        let body = CompletionRequest {
            model,
            messages,
            stream: true,
            max_tokens: params.max_tokens.filter(|n| *n > 0),
            temperature: params.temperature,
            stop: params.stop.as_deref().filter(|s| !s.is_empty()),
        };

        debug!(
            "Sending streaming completion: model={model}, messages={}",
            messages.len()
        );

        let request = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send();

        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!("Cancelled before the provider answered");
                return Ok(Box::pin(futures::stream::empty()));
            }
            response = request => response.map_err(ProviderError::request)?,
        };

        let status = response.status();
        if !status.is_success() {
            let body = read_bounded(response, self.config.error_body_limit, &cancel).await;
            warn!("Provider returned status {status}: {body}");
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(into_chunk_stream(response, cancel))
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

/// Turn a successful response into chunks. Ends with exactly one terminal
/// chunk unless `cancel` fires first.
fn into_chunk_stream(response: reqwest::Response, cancel: CancellationToken) -> ChunkStream {
    let stream = async_stream::stream! {
        let mut body = response.bytes_stream();
        let mut framer = SseLineBuffer::new();

        'read: loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                next = body.next() => Some(next),
            };
            let Some(next) = next else {
                debug!("Stream cancelled, dropping connection");
                break 'read;
            };

            let events = match next {
                Some(Ok(bytes)) => framer.feed(&bytes),
                Some(Err(e)) => {
                    warn!("Error reading stream: {e}");
                    yield PartialChunk::Error(StreamError::Read(e.to_string()));
                    break 'read;
                }
                None => {
                    for event in framer.flush() {
                        for chunk in decode_event(event) {
                            let terminal = chunk.is_terminal();
                            yield chunk;
                            if terminal {
                                break 'read;
                            }
                        }
                    }
                    debug!("Stream closed without a completion marker");
                    yield PartialChunk::Done;
                    break 'read;
                }
            };

            for event in events {
                for chunk in decode_event(event) {
                    let terminal = chunk.is_terminal();
                    yield chunk;
                    if terminal {
                        break 'read;
                    }
                }
            }
        }
    };

    Box::pin(stream)
}

/// Map one event to the chunks it produces, in order. A terminal chunk, if
/// any, is always last.
fn decode_event(event: SseEvent) -> Vec<PartialChunk> {
    let data = match event {
        SseEvent::Done => return vec![PartialChunk::Done],
        SseEvent::Data(data) => data,
    };

    let payload: StreamPayload = match serde_json::from_str(&data) {
        Ok(payload) => payload,
        Err(e) => {
            warn!("Failed to parse stream chunk: {e}");
            return vec![PartialChunk::Error(StreamError::Decode(e.to_string()))];
        }
    };

    if let Some(error) = payload.error {
        let message = error
            .get("message")
            .and_then(serde_json::Value::as_str)
            .map_or_else(|| error.to_string(), str::to_owned);
        return vec![PartialChunk::Error(StreamError::Provider(message))];
    }

    let mut chunks = Vec::new();
    for choice in payload.choices {
        if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
            chunks.push(PartialChunk::Delta(content));
        }
        if choice.finish_reason.is_some() {
            chunks.push(PartialChunk::Done);
            break;
        }
    }
    chunks
}

/// Read up to `limit` bytes of an error body. Stops early on cancellation
/// and keeps whatever arrived.
async fn read_bounded(
    response: reqwest::Response,
    limit: usize,
    cancel: &CancellationToken,
) -> String {
    let mut body = response.bytes_stream();
    let mut kept = Vec::new();
    while kept.len() < limit {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!("Cancelled while reading error body");
                break;
            }
            next = body.next() => next,
        };
        match next {
            Some(Ok(bytes)) => {
                let take = bytes.len().min(limit - kept.len());
                kept.extend_from_slice(&bytes[..take]);
            }
            _ => break,
        }
    }
    String::from_utf8_lossy(&kept).trim().to_string()
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<&'a [String]>,
}

#[derive(Debug, Deserialize)]
struct StreamPayload {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}
