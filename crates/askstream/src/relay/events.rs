//! Client-visible relay events
//!
//! Every event is one SSE `data:` line:
//! ```text
//! data: {"token":"Hel"}
//!
//! data: {"error":"Network error: connection reset"}
//!
//! data: [DONE]
//! ```

use axum::response::sse::Event;
use serde::{Deserialize, Serialize};

use super::extractor::DONE_SENTINEL;

/// One event pushed to the client
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    /// An incremental piece of the answer
    Token(String),
    /// Terminal failure after streaming began
    Error(String),
    /// Terminal success marker
    Done,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum EventBody {
    Token { token: String },
    Error { error: String },
}

impl RelayEvent {
    /// Render the `data:` payload for this event
    pub fn to_payload(&self) -> String {
        let body = match self {
            RelayEvent::Done => return DONE_SENTINEL.to_string(),
            RelayEvent::Token(token) => EventBody::Token {
                token: token.clone(),
            },
            RelayEvent::Error(error) => EventBody::Error {
                error: error.clone(),
            },
        };

        serde_json::to_string(&body)
            .unwrap_or_else(|_| r#"{"error":"encoding failure"}"#.to_string())
    }

    /// Convert into an axum SSE event
    pub fn into_sse_event(self) -> Event {
        Event::default().data(self.to_payload())
    }

    /// Parse a `data:` payload produced by [`RelayEvent::to_payload`]
    pub fn from_payload(payload: &str) -> Option<Self> {
        let payload = payload.trim();
        if payload == DONE_SENTINEL {
            return Some(RelayEvent::Done);
        }

        match serde_json::from_str::<EventBody>(payload).ok()? {
            EventBody::Token { token } => Some(RelayEvent::Token(token)),
            EventBody::Error { error } => Some(RelayEvent::Error(error)),
        }
    }

    /// Whether the stream ends after this event
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RelayEvent::Token(_))
    }
}
