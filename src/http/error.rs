//! Errors returned by API handlers.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::services::GraphError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("graph store unavailable")]
    GraphUnavailable,

    #[error("graph query failed: {0}")]
    Graph(GraphError),

    #[error("unexpected record shape: {0}")]
    Decode(#[from] serde_json::Error),
}

impl From<GraphError> for ApiError {
    fn from(e: GraphError) -> Self {
        match e {
            GraphError::NotConnected => ApiError::GraphUnavailable,
            other => ApiError::Graph(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::GraphUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Graph(_) | ApiError::Decode(_) => StatusCode::BAD_GATEWAY,
        };
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
