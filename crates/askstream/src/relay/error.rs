//! Relay error taxonomy and its client-facing rendering
//!
//! Errors raised before the event stream starts become one structured JSON
//! response. Once streaming has begun the same errors are delivered as a
//! terminal `{"error": ...}` event instead (see [`super::RelayEvent`]).
//! Malformed upstream records and history failures never reach this type:
//! the former are logged and skipped, the latter are logged by the
//! background history task.

use axum::{
    body::Body,
    http::{Response, StatusCode},
    response::IntoResponse,
};
use thiserror::Error;

use super::question::QuestionError;

/// Errors that can occur while relaying one question
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RelayError {
    /// The inbound request was missing a usable question
    #[error("Validation error: {0}")]
    Validation(String),

    /// The upstream provider answered with a non-success status
    #[error("Upstream returned {status}: {body}")]
    Upstream { status: u16, body: String },

    /// Network-level failure talking to the upstream (connect, read, idle timeout)
    #[error("Network error: {0}")]
    Network(String),

    /// The upstream delivered an error object inside the event stream
    #[error("Upstream reported an error: {0}")]
    Provider(String),

    /// The upstream closed the stream without sending the terminator
    #[error("Upstream stream ended before completion")]
    Truncated,
}

impl RelayError {
    /// Convert to a structured JSON error response
    pub fn into_response(self) -> Response<Body> {
        let status = match self {
            RelayError::Validation(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::BAD_GATEWAY,
        };

        let mut error = serde_json::json!({
            "type": self.category(),
            "message": self.to_string(),
        });
        if let RelayError::Upstream {
            status: upstream_status,
            ..
        } = &self
        {
            error["upstream_status"] = serde_json::json!(upstream_status);
        }

        let body = serde_json::json!({ "error": error });

        Response::builder()
            .status(status)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap_or_else(|_| {
                let mut fallback = Response::new(Body::empty());
                *fallback.status_mut() = status;
                fallback
            })
    }

    /// Get the error category for logging and the `type` field of error bodies
    pub fn category(&self) -> &'static str {
        match self {
            RelayError::Validation(_) => "validation_error",
            RelayError::Upstream { .. } => "upstream_error",
            RelayError::Network(_) => "network_error",
            RelayError::Provider(_) => "provider_error",
            RelayError::Truncated => "truncated_stream",
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response<Body> {
        self.into_response()
    }
}

impl From<QuestionError> for RelayError {
    fn from(error: QuestionError) -> Self {
        RelayError::Validation(error.to_string())
    }
}
