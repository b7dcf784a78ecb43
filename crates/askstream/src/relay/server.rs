//! HTTP surface of the relay
//!
//! - `POST /ask` streams the answer to `{"question": "..."}` as SSE
//! - `GET /history?limit=N` lists recent exchanges, newest first
//! - `GET /health` reports liveness

use axum::{
    Json, Router,
    extract::{Query, State, rejection::JsonRejection},
    http::StatusCode,
    response::{
        IntoResponse, Response,
        sse::{Event, Sse},
    },
    routing::{get, post},
};
use futures::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, warn};

use crate::config::ServerConfig;
use crate::error::{AskStreamError, Result};
use crate::history::{HistoryEntry, HistoryRecorder, HistorySink};

use super::error::RelayError;
use super::events::RelayEvent;
use super::question::Question;
use super::session::RelaySession;
use super::upstream::CompletionUpstream;

/// Shared application state for all handlers
#[derive(Clone)]
pub struct AppState {
    /// Server configuration
    pub config: ServerConfig,
    /// Upstream completion provider, shared read-only by every request
    pub upstream: Arc<dyn CompletionUpstream>,
    /// Background history writer
    pub recorder: HistoryRecorder,
    /// Longest tolerated silence between two upstream chunks
    pub idle_timeout: Duration,
}

/// The relay HTTP server
pub struct RelayServer {
    config: ServerConfig,
    upstream: Arc<dyn CompletionUpstream>,
    history: Arc<dyn HistorySink>,
    idle_timeout: Duration,
}

impl RelayServer {
    /// Create a new server from components constructed at process start
    pub fn new(
        config: ServerConfig,
        upstream: Arc<dyn CompletionUpstream>,
        history: Arc<dyn HistorySink>,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            config,
            upstream,
            history,
            idle_timeout,
        }
    }

    /// Start the server and listen for requests until Ctrl+C or SIGTERM
    pub async fn serve(&self) -> Result<()> {
        let app_state = Arc::new(AppState {
            config: self.config.clone(),
            upstream: Arc::clone(&self.upstream),
            recorder: HistoryRecorder::new(Arc::clone(&self.history)),
            idle_timeout: self.idle_timeout,
        });

        let app = create_router(app_state);

        let addr: SocketAddr = self
            .config
            .listen_addr
            .parse()
            .map_err(|e| AskStreamError::Config(format!("Invalid listen address: {e}")))?;

        tracing::info!("Starting relay server on {addr}");
        tracing::info!("Upstream provider: {}", self.upstream.name());

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| AskStreamError::Server(format!("Failed to bind to {addr}: {e}")))?;

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| AskStreamError::Server(format!("Server error: {e}")))?;

        tracing::info!("Relay server shut down gracefully");
        Ok(())
    }
}

/// Create the router with all routes configured
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ask", post(ask_handler))
        .route("/history", get(history_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint - returns JSON status
async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

/// Body of `POST /ask`
#[derive(Debug, Deserialize, Serialize)]
pub struct AskRequest {
    #[serde(default)]
    pub question: Option<String>,
}

/// Validate the question, open the upstream stream, then hand the response
/// over to a relay session
///
/// The response is committed as an event stream only once the session has
/// produced its first successful event. Every failure before that point,
/// including one inside the upstream body, is answered with a structured
/// JSON error; later failures arrive as a terminal error event.
async fn ask_handler(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<AskRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            debug!("Rejected ask request body: {}", rejection.body_text());
            return RelayError::Validation(rejection.body_text()).into_response();
        }
    };

    let question = match Question::try_from(request.question.unwrap_or_default()) {
        Ok(question) => question,
        Err(e) => {
            debug!("Rejected question: {e}");
            return RelayError::from(e).into_response();
        }
    };

    let upstream = match state.upstream.open_stream(&question).await {
        Ok(upstream) => upstream,
        Err(e) => {
            warn!(
                error_type = e.category(),
                error_message = %e,
                provider = state.upstream.name(),
                "Upstream request failed before streaming"
            );
            return e.into_response();
        }
    };

    let mut session = RelaySession::new(
        question,
        upstream,
        state.recorder.clone(),
        state.idle_timeout,
    );

    let first = session.next_event().await;
    if let Some(error) = session.failure() {
        return error.clone().into_response();
    }

    relay_response(first, session).into_response()
}

fn relay_response(
    first: Option<RelayEvent>,
    session: RelaySession,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    Sse::new(
        stream::iter(first)
            .chain(session.into_events())
            .map(|event| Ok::<_, Infallible>(event.into_sse_event())),
    )
}

#[derive(Debug, Deserialize, Default)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub entries: Vec<HistoryEntry>,
    pub limit: usize,
}

async fn history_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistoryQuery>,
) -> Response {
    let limit = query
        .limit
        .unwrap_or(state.config.history_default_limit)
        .min(state.config.history_max_limit);

    match state.recorder.sink().list_recent(limit).await {
        Ok(entries) => Json(HistoryResponse { entries, limit }).into_response(),
        Err(e) => {
            error!(error_type = "history", error_message = %e, "Failed to list history");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({
                    "error": {
                        "type": "history_error",
                        "message": e.to_string(),
                    }
                })),
            )
                .into_response()
        }
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::InMemoryHistory;
    use crate::testing::ScriptedUpstream;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn create_test_state(history: Arc<InMemoryHistory>) -> Arc<AppState> {
        Arc::new(AppState {
            config: ServerConfig {
                listen_addr: "127.0.0.1:0".to_string(),
                history_default_limit: 2,
                history_max_limit: 3,
            },
            upstream: Arc::new(ScriptedUpstream::tokens(&["unused"])),
            recorder: HistoryRecorder::new(history),
            idle_timeout: Duration::from_secs(5),
        })
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn seeded_history(count: usize) -> Arc<InMemoryHistory> {
        let history = Arc::new(InMemoryHistory::new());
        for i in 0..count {
            history
                .append(HistoryEntry::new(format!("q{i}"), format!("a{i}")))
                .await
                .unwrap();
        }
        history
    }

    #[tokio::test]
    async fn test_health_check() {
        let app = create_router(create_test_state(Arc::new(InMemoryHistory::new())));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_history_uses_default_limit() {
        let app = create_router(create_test_state(seeded_history(5).await));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/history")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["limit"], 2);
        assert_eq!(json["entries"].as_array().unwrap().len(), 2);
        assert_eq!(json["entries"][0]["question"], "q4");
    }

    #[tokio::test]
    async fn test_history_clamps_limit() {
        let app = create_router(create_test_state(seeded_history(5).await));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/history?limit=50")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let json = body_json(response).await;
        assert_eq!(json["limit"], 3);
        assert_eq!(json["entries"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_ask_rejects_get() {
        let app = create_router(create_test_state(Arc::new(InMemoryHistory::new())));

        let response = app
            .oneshot(Request::builder().uri("/ask").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
