//! Error responses for the HTTP surface.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use niki_conversation::OrchestratorError;
use niki_core::HistoryError;
use serde_json::json;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ServerError {
    /// Request rejected before any work started.
    #[error(transparent)]
    Rejected(#[from] OrchestratorError),

    #[error(transparent)]
    History(#[from] HistoryError),

    #[error("{0}")]
    BadRequest(String),
}

impl ServerError {
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Rejected(OrchestratorError::Validation { .. })
            | Self::History(HistoryError::InvalidKey(_))
            | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Rejected(_) | Self::History(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            Self::Rejected(err) => {
                let field = match err {
                    OrchestratorError::Validation { field } => Some(*field),
                    _ => None,
                };
                json!({
                    "kind": err.kind().as_str(),
                    "field": field,
                    "message": err.to_string(),
                })
            }
            Self::History(HistoryError::InvalidKey(message)) => json!({
                "kind": "invalid_key",
                "message": message,
            }),
            Self::History(err) => json!({
                "kind": "store",
                "message": err.to_string(),
            }),
            Self::BadRequest(message) => json!({
                "kind": "bad_request",
                "message": message,
            }),
        };

        if status.is_server_error() {
            warn!("Request failed: {self}");
        }
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_maps_to_bad_request() {
        let err = ServerError::from(OrchestratorError::Validation { field: "niki_id" });
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_store_failures_map_to_internal_error() {
        let err = ServerError::from(HistoryError::unavailable(
            "reading history",
            std::io::Error::other("disk gone"),
        ));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let err = ServerError::from(HistoryError::InvalidKey("empty".into()));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}
