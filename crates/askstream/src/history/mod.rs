//! Question/answer history
//!
//! The relay only needs a sink that can append a finished exchange and list
//! recent ones. Appends run as detached background tasks through
//! [`HistoryRecorder`] so a slow or failing store never delays or alters the
//! client-visible answer.

mod lance;
mod memory;

pub use lance::LanceHistoryStore;
pub use memory::InMemoryHistory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::relay::Question;

/// Errors raised by history sinks
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HistoryError {
    /// The backing store rejected the operation
    #[error("History storage error: {0}")]
    Storage(String),

    /// The background append task panicked or was cancelled
    #[error("History task failed: {0}")]
    Task(String),
}

/// One completed exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: Uuid,
    pub question: String,
    pub answer: String,
    pub created_at: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            question: question.into(),
            answer: answer.into(),
            created_at: Utc::now(),
        }
    }
}

/// Durable store for completed question/answer pairs
///
/// Implementations must accept concurrent appends from independent sessions.
#[async_trait]
pub trait HistorySink: Send + Sync {
    /// Append one finished exchange
    async fn append(&self, entry: HistoryEntry) -> Result<(), HistoryError>;

    /// List the most recent entries, newest first
    async fn list_recent(&self, limit: usize) -> Result<Vec<HistoryEntry>, HistoryError>;
}

/// Handle to one background history append
///
/// Dropping the handle detaches the task; it still runs to completion.
pub struct HistoryTask {
    entry_id: Uuid,
    handle: JoinHandle<Result<(), HistoryError>>,
}

impl HistoryTask {
    /// Id of the entry being written
    pub fn entry_id(&self) -> Uuid {
        self.entry_id
    }

    /// Wait for the append to finish and return its outcome
    pub async fn outcome(self) -> Result<(), HistoryError> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) => Err(HistoryError::Task(e.to_string())),
        }
    }
}

/// Spawns fire-and-forget history appends
#[derive(Clone)]
pub struct HistoryRecorder {
    sink: Arc<dyn HistorySink>,
    observer: Option<mpsc::UnboundedSender<HistoryTask>>,
}

impl HistoryRecorder {
    pub fn new(sink: Arc<dyn HistorySink>) -> Self {
        Self {
            sink,
            observer: None,
        }
    }

    /// Forward every spawned task handle to `observer` instead of detaching it
    pub fn with_observer(mut self, observer: mpsc::UnboundedSender<HistoryTask>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// The sink appends are written to
    pub fn sink(&self) -> &Arc<dyn HistorySink> {
        &self.sink
    }

    /// Persist a finished exchange in the background
    ///
    /// The answer is stored trimmed; a blank answer is not stored and `None`
    /// is returned. Failures are logged by the task itself.
    pub fn record(&self, question: &Question, answer: &str) -> Option<Uuid> {
        let answer = answer.trim();
        if answer.is_empty() {
            debug!("Skipping history: empty answer");
            return None;
        }

        let entry = HistoryEntry::new(question.as_str(), answer);
        let entry_id = entry.id;
        let sink = Arc::clone(&self.sink);

        let handle = tokio::spawn(async move {
            let result = sink.append(entry).await;
            match &result {
                Ok(()) => debug!("Stored history entry {}", entry_id),
                Err(e) => warn!(
                    error_type = "history",
                    error_message = %e,
                    entry_id = %entry_id,
                    "History append failed (fire-and-forget), continuing"
                ),
            }
            result
        });

        let task = HistoryTask { entry_id, handle };
        if let Some(observer) = &self.observer {
            let _ = observer.send(task);
        }

        Some(entry_id)
    }
}
