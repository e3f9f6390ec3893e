//! `POST /v1/chat`: one chat turn streamed back as server-sent events.

use std::convert::Infallible;

use axum::Json;
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use niki_conversation::{ChatRequest, OrchestratorError};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::AppState;
use crate::error::ServerError;

/// Deltas buffered between the orchestrator and a slow client.
const CHUNK_BUFFER: usize = 16;

pub async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ServerError> {
    request.validate()?;

    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();
    let (tx, mut rx) = mpsc::channel::<String>(CHUNK_BUFFER);

    let orchestrator = state.orchestrator.clone();
    let task = tokio::spawn(async move {
        let mut sink = tx;
        orchestrator.handle_chat(&request, &mut sink, &cancel).await
    });

    let stream = async_stream::stream! {
        // Dropped with the response body, which cancels the turn.
        let _guard = guard;

        while let Some(text) = rx.recv().await {
            yield Ok(chunk_event(&text));
        }

        yield Ok(match task.await {
            Ok(Ok(outcome)) => {
                debug!("Chat turn streamed {} chunks", outcome.chunks);
                done_event()
            }
            Ok(Err(err)) => error_event(&err),
            Err(err) => join_error_event(&err),
        });
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn chunk_event(text: &str) -> Event {
    Event::default()
        .event("chunk")
        .data(json!({ "text": text }).to_string())
}

fn done_event() -> Event {
    Event::default().event("done").data("{}")
}

fn error_event(err: &OrchestratorError) -> Event {
    let kind = err.kind();
    Event::default().event("error").data(
        json!({
            "kind": kind.as_str(),
            "message": err.to_string(),
            "retry_safe": kind.is_retry_safe(),
        })
        .to_string(),
    )
}

fn join_error_event(err: &JoinError) -> Event {
    warn!("Chat task aborted: {err}");
    Event::default().event("error").data(
        json!({
            "kind": "internal",
            "message": "chat task aborted",
            "retry_safe": false,
        })
        .to_string(),
    )
}
