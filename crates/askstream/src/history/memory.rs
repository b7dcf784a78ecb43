use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{HistoryEntry, HistoryError, HistorySink};

/// Process-local history, used for tests and `--ephemeral` runs
#[derive(Debug, Default)]
pub struct InMemoryHistory {
    entries: RwLock<Vec<HistoryEntry>>,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// All entries in insertion order
    pub async fn entries(&self) -> Vec<HistoryEntry> {
        self.entries.read().await.clone()
    }
}

#[async_trait]
impl HistorySink for InMemoryHistory {
    async fn append(&self, entry: HistoryEntry) -> Result<(), HistoryError> {
        self.entries.write().await.push(entry);
        Ok(())
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<HistoryEntry>, HistoryError> {
        let entries = self.entries.read().await;
        Ok(entries.iter().rev().take(limit).cloned().collect())
    }
}
