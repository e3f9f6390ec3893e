//! Per-request chat orchestration.
//!
//! One call to [`Orchestrator::handle_chat`] walks a request through
//! `Validating → LoadingHistory → BuildingPrompt → ManagingContext →
//! Streaming → Persisting → Done`. Any stage may fail; nothing is retried.

use std::sync::Arc;

use futures::StreamExt;
use niki_core::{
    ChatProvider, ChunkSink, ConversationKey, HistoryError, HistoryStore, Message, PartialChunk,
    ProviderError, ReadOptions, Role, SinkError, StreamError,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::context::{ContextError, ContextManager};
use crate::prompt::{BuildContext, PromptBuilder, PromptError, persona_directive};

/// One chat turn as received from the transport.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub player_id: String,
    pub player_nickname: String,
    pub niki_id: String,
    pub niki_name: String,
    pub input_text: String,
}

impl ChatRequest {
    /// Check required fields in declaration order and name the first blank one.
    pub fn validate(&self) -> Result<(), OrchestratorError> {
        let fields = [
            ("player_id", &self.player_id),
            ("player_nickname", &self.player_nickname),
            ("niki_id", &self.niki_id),
            ("niki_name", &self.niki_name),
            ("input_text", &self.input_text),
        ];
        match fields.into_iter().find(|(_, value)| value.trim().is_empty()) {
            Some((field, _)) => Err(OrchestratorError::Validation { field }),
            None => Ok(()),
        }
    }

    #[must_use]
    pub fn key(&self) -> ConversationKey {
        ConversationKey::new(&self.player_id, &self.niki_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Validating,
    LoadingHistory,
    BuildingPrompt,
    ManagingContext,
    Streaming,
    Persisting,
    Done,
}

impl Stage {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Validating => "validating",
            Self::LoadingHistory => "loading_history",
            Self::BuildingPrompt => "building_prompt",
            Self::ManagingContext => "managing_context",
            Self::Streaming => "streaming",
            Self::Persisting => "persisting",
            Self::Done => "done",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("{field} must be provided")]
    Validation { field: &'static str },

    #[error("failed to load history: {0}")]
    Store(#[source] HistoryError),

    #[error("failed to build prompt: {0}")]
    Prompt(#[from] PromptError),

    #[error("failed to fit context window: {0}")]
    Context(#[from] ContextError),

    #[error("completion request failed: {0}")]
    Upstream(#[source] ProviderError),

    #[error("completion stream failed after {delivered} chunks: {source}")]
    StreamDecode {
        delivered: usize,
        #[source]
        source: StreamError,
    },

    #[error("failed to deliver chunk to caller: {0}")]
    Sink(#[from] SinkError),

    /// The whole reply reached the caller but was not saved.
    #[error("reply was delivered but could not be saved: {0}")]
    Persistence(#[source] HistoryError),

    #[error("request cancelled while {stage}")]
    Cancelled { stage: Stage },
}

/// Coarse classification callers use to decide on a retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Store,
    Configuration,
    Context,
    Upstream,
    StreamDecode,
    Sink,
    Persistence,
    Cancelled,
}

impl ErrorKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Store => "store",
            Self::Configuration => "configuration",
            Self::Context => "context",
            Self::Upstream => "upstream",
            Self::StreamDecode => "stream_decode",
            Self::Sink => "sink",
            Self::Persistence => "persistence",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether re-running the whole exchange can neither duplicate visible
    /// text nor history.
    #[must_use]
    pub const fn is_retry_safe(self) -> bool {
        matches!(self, Self::Store | Self::Upstream)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl OrchestratorError {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::Store(_) => ErrorKind::Store,
            Self::Prompt(_) => ErrorKind::Configuration,
            Self::Context(_) => ErrorKind::Context,
            Self::Upstream(_) => ErrorKind::Upstream,
            Self::StreamDecode { .. } => ErrorKind::StreamDecode,
            Self::Sink(_) => ErrorKind::Sink,
            Self::Persistence(_) => ErrorKind::Persistence,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }
}

/// Result of a completed turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatOutcome {
    pub reply: String,
    /// Chunks forwarded to the sink.
    pub chunks: usize,
    /// 2 normally; 1 when the model produced no text.
    pub persisted_messages: usize,
}

/// Request-independent settings.
#[derive(Debug, Clone, Default)]
pub struct OrchestratorConfig {
    pub system_prompts: Vec<String>,
}

/// Wires the history store, prompt builder, context manager and provider
/// together for one request at a time. Shared across concurrent requests.
pub struct Orchestrator<H = Arc<dyn HistoryStore>, P = Arc<dyn ChatProvider>>
where
    H: HistoryStore,
    P: ChatProvider,
{
    store: H,
    provider: P,
    prompt_builder: Arc<dyn PromptBuilder>,
    context: Arc<dyn ContextManager>,
    system_messages: Vec<Message>,
}

impl<H, P> Orchestrator<H, P>
where
    H: HistoryStore,
    P: ChatProvider,
{
    pub fn new(
        config: OrchestratorConfig,
        store: H,
        prompt_builder: Arc<dyn PromptBuilder>,
        context: Arc<dyn ContextManager>,
        provider: P,
    ) -> Self {
        let system_messages = config
            .system_prompts
            .iter()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .map(|p| Message::new(Role::System, p))
            .collect();

        info!("Creating orchestrator with provider {}", provider.name());
        Self {
            store,
            provider,
            prompt_builder,
            context,
            system_messages,
        }
    }

    pub const fn store(&self) -> &H {
        &self.store
    }

    /// Run one chat turn, forwarding every delta to `sink` as it arrives.
    ///
    /// Once `cancel` fires no further chunk is sent and nothing is persisted.
    pub async fn handle_chat<S>(
        &self,
        request: &ChatRequest,
        sink: &mut S,
        cancel: &CancellationToken,
    ) -> Result<ChatOutcome, OrchestratorError>
    where
        S: ChunkSink + ?Sized,
    {
        if let Err(err) = request.validate() {
            warn!(stage = %Stage::Validating, "Rejected chat request: {err}");
            return Err(err);
        }

        let span = info_span!(
            "chat",
            player_id = %request.player_id,
            niki_id = %request.niki_id,
        );
        self.run(request, sink, cancel).instrument(span).await
    }

    async fn run<S>(
        &self,
        request: &ChatRequest,
        sink: &mut S,
        cancel: &CancellationToken,
    ) -> Result<ChatOutcome, OrchestratorError>
    where
        S: ChunkSink + ?Sized,
    {
        info!("Received chat request");
        let key = request.key();

        debug!(stage = %Stage::LoadingHistory);
        let prior = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(cancelled(Stage::LoadingHistory)),
            prior = self.store.get_history(&key, ReadOptions::default()) => {
                prior.map_err(|e| failed(Stage::LoadingHistory, OrchestratorError::Store(e)))?
            }
        };
        debug!(prior = prior.len(), "Loaded history");

        debug!(stage = %Stage::BuildingPrompt);
        let current_input = Message::now(Role::User, request.input_text.clone());
        let build = BuildContext {
            system_messages: self.system_messages.clone(),
            persona: Some(persona_directive(
                &request.niki_name,
                &request.niki_id,
                &request.player_nickname,
            )),
            history: prior,
            current_input: current_input.clone(),
            allow_empty_input: false,
            model: None,
        };
        let built = self
            .prompt_builder
            .build(&build)
            .map_err(|e| failed(Stage::BuildingPrompt, e.into()))?;

        debug!(stage = %Stage::ManagingContext);
        let fitted = self
            .context
            .fit(built)
            .map_err(|e| failed(Stage::ManagingContext, e.into()))?;

        debug!(
            stage = %Stage::Streaming,
            messages = fitted.messages.len(),
            model = %fitted.params.model,
        );
        let mut stream = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(cancelled(Stage::Streaming)),
            opened = self.provider.stream_chat(&fitted.messages, &fitted.params, cancel.clone()) => {
                opened.map_err(|e| failed(Stage::Streaming, OrchestratorError::Upstream(e)))?
            }
        };

        let mut reply = String::new();
        let mut chunks = 0_usize;
        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(cancelled(Stage::Streaming)),
                next = stream.next() => next,
            };

            match next {
                Some(PartialChunk::Delta(text)) => {
                    if text.is_empty() {
                        continue;
                    }
                    reply.push_str(&text);
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => return Err(cancelled(Stage::Streaming)),
                        sent = sink.send_chunk(&text) => {
                            sent.map_err(|e| failed(Stage::Streaming, e.into()))?;
                        }
                    }
                    chunks += 1;
                }
                Some(PartialChunk::Done) => break,
                Some(PartialChunk::Error(source)) => {
                    return Err(failed(
                        Stage::Streaming,
                        OrchestratorError::StreamDecode {
                            delivered: chunks,
                            source,
                        },
                    ));
                }
                None => {
                    debug!("Stream ended without a terminal chunk");
                    break;
                }
            }
        }
        drop(stream);

        if cancel.is_cancelled() {
            return Err(cancelled(Stage::Persisting));
        }

        debug!(stage = %Stage::Persisting);
        let mut batch = vec![current_input];
        if !reply.trim().is_empty() {
            batch.push(Message::now(Role::Assistant, reply.clone()));
        }
        let persisted_messages = batch.len();
        self.store
            .append_messages(&key, batch)
            .await
            .map_err(|e| failed(Stage::Persisting, OrchestratorError::Persistence(e)))?;

        info!(
            stage = %Stage::Done,
            chunks,
            bytes = reply.len(),
            "Chat completed"
        );
        Ok(ChatOutcome {
            reply,
            chunks,
            persisted_messages,
        })
    }
}

fn failed(stage: Stage, err: OrchestratorError) -> OrchestratorError {
    warn!(stage = %stage, kind = %err.kind(), "Chat request failed: {err}");
    err
}

fn cancelled(stage: Stage) -> OrchestratorError {
    info!(stage = %stage, "Chat request cancelled");
    OrchestratorError::Cancelled { stage }
}
