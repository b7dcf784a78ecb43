//! Token extraction from OpenAI-style streaming chunks
//!
//! Chunks look like:
//! ```json
//! {"id":"chatcmpl-123","choices":[{"index":0,"delta":{"content":"Hello"}}]}
//! ```

use serde::Deserialize;
use serde_json::Value;

/// Payload that marks the end of the upstream stream
pub const DONE_SENTINEL: &str = "[DONE]";

/// Classification of one decoded record payload
#[derive(Debug, Clone, PartialEq)]
pub enum StreamRecord {
    /// An incremental text fragment
    Token(String),
    /// A well-formed chunk that carries no text (role header, finish reason)
    Empty,
    /// The terminator sentinel
    Done,
    /// The provider reported an error inside the stream
    ProviderError(String),
    /// The payload could not be parsed; carries the parse failure
    Malformed(String),
}

#[derive(Debug, Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Classify a record payload (the trimmed text after `data:`)
pub fn extract_record(payload: &str) -> StreamRecord {
    let payload = payload.trim();
    if payload == DONE_SENTINEL {
        return StreamRecord::Done;
    }

    let chunk: CompletionChunk = match serde_json::from_str(payload) {
        Ok(chunk) => chunk,
        Err(e) => return StreamRecord::Malformed(e.to_string()),
    };

    if let Some(error) = chunk.error {
        return StreamRecord::ProviderError(provider_error_message(&error));
    }

    match chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
    {
        Some(content) if !content.is_empty() => StreamRecord::Token(content),
        _ => StreamRecord::Empty,
    }
}

fn provider_error_message(error: &Value) -> String {
    match error {
        Value::String(message) => message.clone(),
        Value::Object(fields) => fields
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string()),
        other => other.to_string(),
    }
}
