//! Test doubles for the relay's collaborators
//!
//! Used by unit tests and by the integration tests under `tests/`.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::history::{HistoryEntry, HistoryError, HistorySink};
use crate::relay::{CompletionUpstream, Question, RelayError, UpstreamStream};

/// One SSE record carrying a content delta, as an OpenAI-compatible API sends it
pub fn content_chunk(token: &str) -> String {
    let chunk = serde_json::json!({
        "id": "chatcmpl-test",
        "object": "chat.completion.chunk",
        "choices": [{"index": 0, "delta": {"content": token}, "finish_reason": null}]
    });
    format!("data: {chunk}\n\n")
}

/// The terminator record
pub fn done_chunk() -> String {
    "data: [DONE]\n\n".to_string()
}

/// Complete upstream body streaming `tokens` and then the terminator
pub fn sse_body(tokens: &[&str]) -> String {
    let mut body: String = tokens.iter().map(|token| content_chunk(token)).collect();
    body.push_str(&done_chunk());
    body
}

/// Split `body` into network chunks of at most `size` bytes, ignoring UTF-8 boundaries
pub fn rechunk(body: &[u8], size: usize) -> Vec<Bytes> {
    body.chunks(size.max(1))
        .map(Bytes::copy_from_slice)
        .collect()
}

/// Split `body` into two network chunks at byte offset `at`
pub fn split_at(body: &[u8], at: usize) -> Vec<Bytes> {
    let (head, tail) = body.split_at(at.min(body.len()));
    vec![Bytes::copy_from_slice(head), Bytes::copy_from_slice(tail)]
}

/// Successful upstream response delivering `chunks` as they are
pub fn upstream_from_chunks(chunks: Vec<String>) -> UpstreamStream {
    upstream_from_bytes(chunks.into_iter().map(Bytes::from).collect())
}

/// Successful upstream response delivering raw byte chunks
pub fn upstream_from_bytes(chunks: Vec<Bytes>) -> UpstreamStream {
    let body = stream::iter(chunks.into_iter().map(Ok)).boxed();
    UpstreamStream::new(200, Default::default(), body)
}

/// Upstream that replays the same body for every request and counts opens
pub struct ScriptedUpstream {
    chunks: Vec<Bytes>,
    opened: AtomicUsize,
}

impl ScriptedUpstream {
    /// Replay a well-formed stream of `tokens` followed by `[DONE]`
    pub fn tokens(tokens: &[&str]) -> Self {
        Self::from_bytes(vec![Bytes::from(sse_body(tokens))])
    }

    pub fn from_chunks(chunks: Vec<String>) -> Self {
        Self::from_bytes(chunks.into_iter().map(Bytes::from).collect())
    }

    pub fn from_bytes(chunks: Vec<Bytes>) -> Self {
        Self {
            chunks,
            opened: AtomicUsize::new(0),
        }
    }

    /// Number of upstream requests made so far
    pub fn open_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionUpstream for ScriptedUpstream {
    async fn open_stream(&self, _question: &Question) -> Result<UpstreamStream, RelayError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(upstream_from_bytes(self.chunks.clone()))
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// Upstream that refuses every request with the same error
pub struct FailingUpstream(pub RelayError);

#[async_trait]
impl CompletionUpstream for FailingUpstream {
    async fn open_stream(&self, _question: &Question) -> Result<UpstreamStream, RelayError> {
        Err(self.0.clone())
    }

    fn name(&self) -> &'static str {
        "failing"
    }
}

/// Upstream whose body is fed by the test through a channel
///
/// Serves a single request. The sender side observes cancellation: once the
/// relay drops the body, `Sender::closed()` resolves.
pub struct ChannelUpstream {
    receiver: Mutex<Option<mpsc::Receiver<Result<Bytes, RelayError>>>>,
}

impl ChannelUpstream {
    pub fn new() -> (Self, mpsc::Sender<Result<Bytes, RelayError>>) {
        let (tx, rx) = mpsc::channel(16);
        let upstream = Self {
            receiver: Mutex::new(Some(rx)),
        };
        (upstream, tx)
    }
}

#[async_trait]
impl CompletionUpstream for ChannelUpstream {
    async fn open_stream(&self, _question: &Question) -> Result<UpstreamStream, RelayError> {
        let receiver = self
            .receiver
            .lock()
            .map_err(|_| RelayError::Network("channel upstream poisoned".to_string()))?
            .take()
            .ok_or_else(|| RelayError::Network("channel upstream already used".to_string()))?;

        let body = ReceiverStream::new(receiver).boxed();
        Ok(UpstreamStream::new(200, Default::default(), body))
    }

    fn name(&self) -> &'static str {
        "channel"
    }
}

/// History sink that rejects every operation
pub struct FailingHistory;

#[async_trait]
impl HistorySink for FailingHistory {
    async fn append(&self, _entry: HistoryEntry) -> Result<(), HistoryError> {
        Err(HistoryError::Storage("disk full".to_string()))
    }

    async fn list_recent(&self, _limit: usize) -> Result<Vec<HistoryEntry>, HistoryError> {
        Err(HistoryError::Storage("disk full".to_string()))
    }
}
