//! Read and maintenance endpoints for stored conversations.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use niki_core::{ConversationKey, HistoryStore, Message, ReadOptions, Role};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::AppState;
use crate::error::ServerError;

#[derive(Debug, Deserialize)]
pub struct ConversationPath {
    pub player_id: String,
    pub niki_id: String,
}

impl ConversationPath {
    fn key(&self) -> ConversationKey {
        ConversationKey::new(&self.player_id, &self.niki_id)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub player_id: String,
    pub niki_id: String,
    pub messages: Vec<Message>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SummaryResponse {
    pub summary: Option<Message>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SummaryBody {
    pub content: String,
}

pub async fn history(
    State(state): State<AppState>,
    Path(path): Path<ConversationPath>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, ServerError> {
    let opts = query.limit.map_or_else(ReadOptions::default, ReadOptions::last);
    let messages = state.store().get_history(&path.key(), opts).await?;
    Ok(Json(HistoryResponse {
        player_id: path.player_id,
        niki_id: path.niki_id,
        messages,
    }))
}

pub async fn get_summary(
    State(state): State<AppState>,
    Path(path): Path<ConversationPath>,
) -> Result<Json<SummaryResponse>, ServerError> {
    let summary = state.store().get_summary(&path.key()).await?;
    Ok(Json(SummaryResponse { summary }))
}

pub async fn put_summary(
    State(state): State<AppState>,
    Path(path): Path<ConversationPath>,
    Json(body): Json<SummaryBody>,
) -> Result<StatusCode, ServerError> {
    if body.content.trim().is_empty() {
        return Err(ServerError::BadRequest("summary content is empty".into()));
    }
    state
        .store()
        .upsert_summary(&path.key(), Message::new(Role::System, body.content))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn clear(
    State(state): State<AppState>,
    Path(path): Path<ConversationPath>,
) -> Result<StatusCode, ServerError> {
    let key = path.key();
    state.store().clear(&key).await?;
    info!("Cleared conversation {key}");
    Ok(StatusCode::NO_CONTENT)
}
