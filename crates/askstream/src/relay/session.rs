//! Relay session: one question, one upstream stream, one client event stream
//!
//! ```text
//! Open ──token──> Streaming ──[DONE]──> Completed
//!   │                 │
//!   ├─────error───────┴──────────────> Failed
//!   └──── dropped before a terminal state ──> ClientAborted
//! ```
//!
//! The session is pulled by the client response: each [`RelaySession::next_event`]
//! reads upstream only as far as the next client-visible event, so tokens go
//! out in arrival order with nothing buffered in between. When the client
//! disconnects the response body is dropped, which drops the session and with
//! it the upstream body; there is no background reader left behind.
//!
//! A client abort discards the partial answer. History only ever receives
//! answers whose `[DONE]` was handed to the client.

use futures::stream::{self, Stream, StreamExt};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::history::HistoryRecorder;

use super::decoder::PayloadStream;
use super::error::RelayError;
use super::events::RelayEvent;
use super::extractor::{StreamRecord, extract_record};
use super::question::Question;
use super::upstream::{ByteStream, UpstreamStream};

/// Lifecycle of a relay session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Upstream accepted the request; no token relayed yet
    Open,
    /// At least one token has been relayed
    Streaming,
    /// Terminator relayed and history handed off
    Completed,
    /// Upstream or decode failure relayed as an error event
    Failed,
    /// Client went away before a terminal event
    ClientAborted,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Failed | SessionState::ClientAborted
        )
    }
}

/// Per-request orchestration of upstream decoding, client events and history
pub struct RelaySession {
    id: Uuid,
    question: Question,
    records: PayloadStream<ByteStream>,
    answer: String,
    tokens_sent: usize,
    state: SessionState,
    failure: Option<RelayError>,
    recorder: HistoryRecorder,
    idle_timeout: Duration,
}

impl RelaySession {
    pub fn new(
        question: Question,
        upstream: UpstreamStream,
        recorder: HistoryRecorder,
        idle_timeout: Duration,
    ) -> Self {
        let id = Uuid::new_v4();
        debug!(
            session_id = %id,
            upstream_status = upstream.status,
            "Relay session opened"
        );

        Self {
            id,
            question,
            records: PayloadStream::new(upstream.body),
            answer: String::new(),
            tokens_sent: 0,
            state: SessionState::Open,
            failure: None,
            recorder,
            idle_timeout,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Answer accumulated so far, exactly as relayed
    pub fn answer(&self) -> &str {
        &self.answer
    }

    pub fn tokens_sent(&self) -> usize {
        self.tokens_sent
    }

    /// The error that moved the session to `Failed`, if it failed
    pub fn failure(&self) -> Option<&RelayError> {
        self.failure.as_ref()
    }

    /// Produce the next client event, or `None` once a terminal event has been produced
    pub async fn next_event(&mut self) -> Option<RelayEvent> {
        loop {
            if self.state.is_terminal() {
                return None;
            }

            let next = match tokio::time::timeout(self.idle_timeout, self.records.next()).await {
                Ok(next) => next,
                Err(_) => {
                    return Some(self.fail(RelayError::Network(format!(
                        "Upstream sent nothing for {:?}",
                        self.idle_timeout
                    ))));
                }
            };

            let payload = match next {
                Some(Ok(payload)) => payload,
                Some(Err(e)) => return Some(self.fail(e)),
                None => return Some(self.fail(RelayError::Truncated)),
            };

            match extract_record(&payload) {
                StreamRecord::Token(token) => {
                    self.answer.push_str(&token);
                    self.tokens_sent += 1;
                    self.state = SessionState::Streaming;
                    return Some(RelayEvent::Token(token));
                }
                StreamRecord::Empty => continue,
                StreamRecord::Malformed(reason) => {
                    warn!(
                        session_id = %self.id,
                        error_type = "decode",
                        error_message = %reason,
                        "Dropping malformed upstream record"
                    );
                    continue;
                }
                StreamRecord::ProviderError(message) => {
                    return Some(self.fail(RelayError::Provider(message)));
                }
                StreamRecord::Done => return Some(self.complete()),
            }
        }
    }

    /// Turn the session into the client event stream
    ///
    /// The stream is lazy: nothing is read upstream until it is polled, and
    /// dropping it cancels the upstream read.
    pub fn into_events(self) -> impl Stream<Item = RelayEvent> + Send + 'static {
        stream::unfold(self, |mut session| async move {
            let event = session.next_event().await?;
            Some((event, session))
        })
    }

    fn complete(&mut self) -> RelayEvent {
        self.state = SessionState::Completed;
        self.release_upstream();

        info!(
            session_id = %self.id,
            tokens = self.tokens_sent,
            answer_chars = self.answer.chars().count(),
            "Relay session completed"
        );

        self.recorder.record(&self.question, &self.answer);
        RelayEvent::Done
    }

    fn fail(&mut self, error: RelayError) -> RelayEvent {
        self.state = SessionState::Failed;
        self.release_upstream();

        warn!(
            session_id = %self.id,
            error_type = error.category(),
            error_message = %error,
            tokens_sent = self.tokens_sent,
            "Relay session failed"
        );

        let event = RelayEvent::Error(error.to_string());
        self.failure = Some(error);
        event
    }

    fn release_upstream(&mut self) {
        self.records = PayloadStream::new(stream::empty().boxed());
    }
}

impl Drop for RelaySession {
    fn drop(&mut self) {
        if !self.state.is_terminal() {
            self.state = SessionState::ClientAborted;
            info!(
                session_id = %self.id,
                tokens_sent = self.tokens_sent,
                "Client disconnected mid-stream, upstream read cancelled and partial answer discarded"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::InMemoryHistory;
    use crate::testing::{content_chunk, upstream_from_chunks};
    use std::sync::Arc;

    fn session_for(chunks: Vec<String>) -> (RelaySession, Arc<InMemoryHistory>) {
        let sink = Arc::new(InMemoryHistory::new());
        let session = RelaySession::new(
            Question::try_from("What is 2+2?").unwrap(),
            upstream_from_chunks(chunks),
            HistoryRecorder::new(sink.clone()),
            Duration::from_secs(5),
        );
        (session, sink)
    }

    #[tokio::test]
    async fn test_state_transitions_to_completed() {
        let (mut session, _sink) = session_for(vec![
            content_chunk("4"),
            "data: [DONE]\n\n".to_string(),
        ]);
        assert_eq!(session.state(), SessionState::Open);

        assert_eq!(
            session.next_event().await,
            Some(RelayEvent::Token("4".to_string()))
        );
        assert_eq!(session.state(), SessionState::Streaming);

        assert_eq!(session.next_event().await, Some(RelayEvent::Done));
        assert_eq!(session.state(), SessionState::Completed);
        assert_eq!(session.answer(), "4");

        assert_eq!(session.next_event().await, None);
    }

    #[tokio::test]
    async fn test_state_transitions_to_failed_on_truncation() {
        let (mut session, _sink) = session_for(vec![content_chunk("partial")]);

        session.next_event().await;
        assert_eq!(
            session.next_event().await,
            Some(RelayEvent::Error(RelayError::Truncated.to_string()))
        );
        assert_eq!(session.state(), SessionState::Failed);
        assert_eq!(session.next_event().await, None);
    }

    #[tokio::test]
    async fn test_failure_before_first_token_keeps_error() {
        let (mut session, _sink) = session_for(vec![]);
        assert!(session.failure().is_none());

        assert!(matches!(
            session.next_event().await,
            Some(RelayEvent::Error(_))
        ));
        assert_eq!(session.state(), SessionState::Failed);
        assert_eq!(session.tokens_sent(), 0);
        assert_eq!(session.failure(), Some(&RelayError::Truncated));
    }

    #[tokio::test]
    async fn test_provider_error_fails_session() {
        let (mut session, _sink) = session_for(vec![
            content_chunk("Hel"),
            "data: {\"error\":{\"message\":\"overloaded\"}}\n\n".to_string(),
            content_chunk("lo"),
        ]);

        session.next_event().await;
        assert_eq!(
            session.next_event().await,
            Some(RelayEvent::Error(
                "Upstream reported an error: overloaded".to_string()
            ))
        );
        assert_eq!(session.next_event().await, None);
        assert_eq!(session.answer(), "Hel");
    }

    #[tokio::test]
    async fn test_idle_timeout_fails_session() {
        let sink = Arc::new(InMemoryHistory::new());
        let body = stream::pending().boxed();
        let mut session = RelaySession::new(
            Question::try_from("slow?").unwrap(),
            UpstreamStream::new(200, Default::default(), body),
            HistoryRecorder::new(sink),
            Duration::from_millis(20),
        );

        match session.next_event().await {
            Some(RelayEvent::Error(message)) => assert!(message.contains("Upstream sent nothing")),
            other => panic!("expected idle timeout error, got {other:?}"),
        }
        assert_eq!(session.state(), SessionState::Failed);
    }
}
