//! Integration tests for the relay HTTP surface
//!
//! Exercises `/ask`, `/history` and `/health` through the router with
//! scripted upstreams and an in-memory history.

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
    response::Response,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tower::ServiceExt;

use askstream::config::ServerConfig;
use askstream::history::{HistoryRecorder, HistoryTask, InMemoryHistory};
use askstream::relay::{AppState, CompletionUpstream, MAX_QUESTION_CHARS, RelayError, create_router};
use askstream::testing::{FailingHistory, FailingUpstream, ScriptedUpstream, content_chunk};

// =============================================================================
// Test Fixtures
// =============================================================================

struct TestApp {
    router: Router,
    history: Arc<InMemoryHistory>,
    tasks: mpsc::UnboundedReceiver<HistoryTask>,
}

fn test_app(upstream: Arc<dyn CompletionUpstream>) -> TestApp {
    let history = Arc::new(InMemoryHistory::new());
    let (tx, tasks) = mpsc::unbounded_channel();
    let state = Arc::new(AppState {
        config: ServerConfig::default(),
        upstream,
        recorder: HistoryRecorder::new(history.clone()).with_observer(tx),
        idle_timeout: Duration::from_secs(5),
    });

    TestApp {
        router: create_router(state),
        history,
        tasks,
    }
}

fn ask_request(body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/ask")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn ask_question(question: &str) -> Request<Body> {
    ask_request(&serde_json::json!({ "question": question }).to_string())
}

async fn body_text(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn body_json(response: Response) -> serde_json::Value {
    serde_json::from_str(&body_text(response).await).unwrap()
}

// =============================================================================
// Validation Tests
// =============================================================================

mod validation_tests {
    use super::*;

    async fn assert_rejected(request: Request<Body>) {
        let upstream = Arc::new(ScriptedUpstream::tokens(&["4"]));
        let app = test_app(upstream.clone());

        let response = app.router.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["error"]["type"], "validation_error");
        assert!(json["error"]["message"].is_string());
        assert_eq!(upstream.open_count(), 0, "upstream must not be contacted");
    }

    #[tokio::test]
    async fn test_whitespace_question_rejected() {
        assert_rejected(ask_question("   \n\t ")).await;
    }

    #[tokio::test]
    async fn test_empty_question_rejected() {
        assert_rejected(ask_question("")).await;
    }

    #[tokio::test]
    async fn test_missing_question_rejected() {
        assert_rejected(ask_request("{}")).await;
    }

    #[tokio::test]
    async fn test_invalid_json_rejected() {
        assert_rejected(ask_request("{\"question\":")).await;
    }

    #[tokio::test]
    async fn test_overlong_question_rejected() {
        assert_rejected(ask_question(&"x".repeat(MAX_QUESTION_CHARS + 1))).await;
    }
}

// =============================================================================
// Ask Endpoint Tests
// =============================================================================

mod ask_tests {
    use super::*;

    #[tokio::test]
    async fn test_two_plus_two_stream() {
        let upstream = Arc::new(ScriptedUpstream::tokens(&["4"]));
        let mut app = test_app(upstream.clone());

        let response = app
            .router
            .oneshot(ask_question("What is 2+2?"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/event-stream"
        );
        assert_eq!(
            body_text(response).await,
            "data: {\"token\":\"4\"}\n\ndata: [DONE]\n\n"
        );
        assert_eq!(upstream.open_count(), 1);

        app.tasks.recv().await.unwrap().outcome().await.unwrap();
        let entries = app.history.entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].question, "What is 2+2?");
        assert_eq!(entries[0].answer, "4");
    }

    #[tokio::test]
    async fn test_question_is_trimmed_before_relay() {
        let mut app = test_app(Arc::new(ScriptedUpstream::tokens(&["4"])));

        let response = app
            .router
            .oneshot(ask_question("  What is 2+2?  "))
            .await
            .unwrap();
        body_text(response).await;

        app.tasks.recv().await.unwrap().outcome().await.unwrap();
        assert_eq!(app.history.entries().await[0].question, "What is 2+2?");
    }

    #[tokio::test]
    async fn test_upstream_rejection_is_structured_error() {
        let app = test_app(Arc::new(FailingUpstream(RelayError::Upstream {
            status: 401,
            body: "invalid api key".to_string(),
        })));

        let response = app
            .router
            .oneshot(ask_question("What is 2+2?"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let text = body_text(response).await;
        assert!(!text.contains("[DONE]"));

        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json["error"]["type"], "upstream_error");
        assert_eq!(json["error"]["upstream_status"], 401);
        assert!(
            json["error"]["message"]
                .as_str()
                .unwrap()
                .contains("invalid api key")
        );
    }

    #[tokio::test]
    async fn test_upstream_unreachable_is_network_error() {
        let app = test_app(Arc::new(FailingUpstream(RelayError::Network(
            "connection refused".to_string(),
        ))));

        let response = app
            .router
            .oneshot(ask_question("What is 2+2?"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(body_json(response).await["error"]["type"], "network_error");
    }

    #[tokio::test]
    async fn test_provider_error_before_first_token_is_structured_error() {
        let mut app = test_app(Arc::new(ScriptedUpstream::from_chunks(vec![
            "data: {\"error\":{\"message\":\"overloaded\"}}\n\n".to_string(),
        ])));

        let response = app
            .router
            .oneshot(ask_question("What is 2+2?"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/json"
        );
        let json = body_json(response).await;
        assert_eq!(json["error"]["type"], "provider_error");
        assert_eq!(
            json["error"]["message"],
            "Upstream reported an error: overloaded"
        );
        assert!(app.tasks.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_empty_upstream_body_is_structured_error() {
        let app = test_app(Arc::new(ScriptedUpstream::from_chunks(vec![])));

        let response = app
            .router
            .oneshot(ask_question("What is 2+2?"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let text = body_text(response).await;
        assert!(!text.contains("[DONE]"));
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json["error"]["type"], "truncated_stream");
        assert!(app.history.is_empty().await);
    }

    #[tokio::test]
    async fn test_malformed_first_record_still_streams() {
        let app = test_app(Arc::new(ScriptedUpstream::from_chunks(vec![
            "data: {not json\n\n".to_string(),
            content_chunk("4"),
            "data: [DONE]\n\n".to_string(),
        ])));

        let response = app
            .router
            .oneshot(ask_question("What is 2+2?"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_text(response).await,
            "data: {\"token\":\"4\"}\n\ndata: [DONE]\n\n"
        );
    }

    #[tokio::test]
    async fn test_empty_answer_streams_terminator_only() {
        let app = test_app(Arc::new(ScriptedUpstream::tokens(&[])));

        let response = app
            .router
            .oneshot(ask_question("Say nothing"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "data: [DONE]\n\n");
    }

    #[tokio::test]
    async fn test_truncated_upstream_ends_with_error_event() {
        let mut app = test_app(Arc::new(ScriptedUpstream::from_chunks(vec![
            content_chunk("4"),
        ])));

        let response = app
            .router
            .oneshot(ask_question("What is 2+2?"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_text(response).await,
            "data: {\"token\":\"4\"}\n\ndata: {\"error\":\"Upstream stream ended before completion\"}\n\n"
        );
        assert!(app.tasks.try_recv().is_err());
        assert!(app.history.is_empty().await);
    }
}

// =============================================================================
// History and Health Endpoint Tests
// =============================================================================

mod history_endpoint_tests {
    use super::*;

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint_returns_200_ok() {
        let app = test_app(Arc::new(ScriptedUpstream::tokens(&["4"])));

        let response = app.router.oneshot(get("/health")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, serde_json::json!({"status": "ok"}));
    }

    #[tokio::test]
    async fn test_history_lists_completed_exchange() {
        let mut app = test_app(Arc::new(ScriptedUpstream::tokens(&["Par", "is"])));

        let response = app
            .router
            .clone()
            .oneshot(ask_question("Capital of France?"))
            .await
            .unwrap();
        body_text(response).await;
        app.tasks.recv().await.unwrap().outcome().await.unwrap();

        let response = app.router.oneshot(get("/history?limit=5")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["limit"], 5);
        assert_eq!(json["entries"][0]["question"], "Capital of France?");
        assert_eq!(json["entries"][0]["answer"], "Paris");
    }

    #[tokio::test]
    async fn test_history_sink_failure_returns_500() {
        let state = Arc::new(AppState {
            config: ServerConfig::default(),
            upstream: Arc::new(ScriptedUpstream::tokens(&["4"])),
            recorder: HistoryRecorder::new(Arc::new(FailingHistory)),
            idle_timeout: Duration::from_secs(5),
        });

        let response = create_router(state)
            .oneshot(get("/history"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(response).await["error"]["type"], "history_error");
    }

    #[tokio::test]
    async fn test_history_rejects_invalid_limit() {
        let app = test_app(Arc::new(ScriptedUpstream::tokens(&["4"])));

        let response = app.router.oneshot(get("/history?limit=abc")).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
