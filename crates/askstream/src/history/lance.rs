use std::path::Path;
use std::sync::Arc;

use arrow_array::{RecordBatch, RecordBatchIterator, StringArray, TimestampMicrosecondArray};
use arrow_schema::{DataType, Field, Schema, TimeUnit};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use futures::TryStreamExt;
use lancedb::Table;
use lancedb::connection::Connection;
use lancedb::query::ExecutableQuery;
use uuid::Uuid;

use super::{HistoryEntry, HistoryError, HistorySink};

const HISTORY_TABLE: &str = "history";

/// LanceDB-backed history store
///
/// Appends go straight to the table; LanceDB commits concurrent appends
/// without any locking on our side.
pub struct LanceHistoryStore {
    table: Table,
}

impl LanceHistoryStore {
    /// Connect to the database under `path`, creating the history table if needed
    pub async fn open(path: &Path) -> Result<Self, HistoryError> {
        let uri = path
            .to_str()
            .ok_or_else(|| HistoryError::Storage("Invalid path encoding".to_string()))?;

        let connection = lancedb::connect(uri)
            .execute()
            .await
            .map_err(|e| HistoryError::Storage(format!("Failed to connect to LanceDB: {e}")))?;

        let table = if Self::table_exists(&connection).await? {
            tracing::debug!("Opening existing history table");
            connection
                .open_table(HISTORY_TABLE)
                .execute()
                .await
                .map_err(|e| HistoryError::Storage(format!("Failed to open history table: {e}")))?
        } else {
            tracing::info!("Creating history table");
            let schema = Self::history_schema();
            let batch = Self::entries_to_batch(&[], schema.clone())?;
            let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);
            connection
                .create_table(HISTORY_TABLE, Box::new(batches))
                .execute()
                .await
                .map_err(|e| {
                    HistoryError::Storage(format!("Failed to create history table: {e}"))
                })?
        };

        Ok(Self { table })
    }

    async fn table_exists(connection: &Connection) -> Result<bool, HistoryError> {
        let names = connection
            .table_names()
            .execute()
            .await
            .map_err(|e| HistoryError::Storage(format!("Failed to list tables: {e}")))?;

        Ok(names.iter().any(|name| name == HISTORY_TABLE))
    }

    fn history_schema() -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("question", DataType::Utf8, false),
            Field::new("answer", DataType::Utf8, false),
            Field::new(
                "created_at",
                DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
                false,
            ),
        ]))
    }

    fn entries_to_batch(
        entries: &[HistoryEntry],
        schema: Arc<Schema>,
    ) -> Result<RecordBatch, HistoryError> {
        let ids: Vec<String> = entries.iter().map(|e| e.id.to_string()).collect();
        let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let questions: Vec<&str> = entries.iter().map(|e| e.question.as_str()).collect();
        let answers: Vec<&str> = entries.iter().map(|e| e.answer.as_str()).collect();
        let created_at: Vec<i64> = entries
            .iter()
            .map(|e| e.created_at.timestamp_micros())
            .collect();

        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(id_refs)),
                Arc::new(StringArray::from(questions)),
                Arc::new(StringArray::from(answers)),
                Arc::new(TimestampMicrosecondArray::from(created_at).with_timezone("UTC")),
            ],
        )
        .map_err(|e| HistoryError::Storage(format!("Failed to create history RecordBatch: {e}")))
    }

    /// Convert every row of an Arrow RecordBatch back into entries
    fn batch_to_entries(batch: &RecordBatch) -> Result<Vec<HistoryEntry>, HistoryError> {
        let string_column = |name: &str| {
            batch
                .column_by_name(name)
                .and_then(|c| c.as_any().downcast_ref::<StringArray>())
                .ok_or_else(|| HistoryError::Storage(format!("Failed to get {name} column")))
        };

        let ids = string_column("id")?;
        let questions = string_column("question")?;
        let answers = string_column("answer")?;
        let timestamps = batch
            .column_by_name("created_at")
            .and_then(|c| c.as_any().downcast_ref::<TimestampMicrosecondArray>())
            .ok_or_else(|| HistoryError::Storage("Failed to get created_at column".to_string()))?;

        let mut entries = Vec::with_capacity(batch.num_rows());
        for row in 0..batch.num_rows() {
            let id = Uuid::parse_str(ids.value(row))
                .map_err(|e| HistoryError::Storage(format!("Failed to parse UUID: {e}")))?;
            let created_at = Utc
                .timestamp_micros(timestamps.value(row))
                .single()
                .ok_or_else(|| {
                    HistoryError::Storage("Failed to parse created_at timestamp".to_string())
                })?;

            entries.push(HistoryEntry {
                id,
                question: questions.value(row).to_string(),
                answer: answers.value(row).to_string(),
                created_at,
            });
        }

        Ok(entries)
    }

    /// Total number of stored entries
    pub async fn count(&self) -> Result<usize, HistoryError> {
        self.table
            .count_rows(None)
            .await
            .map_err(|e| HistoryError::Storage(format!("Failed to count rows: {e}")))
    }
}

#[async_trait]
impl HistorySink for LanceHistoryStore {
    async fn append(&self, entry: HistoryEntry) -> Result<(), HistoryError> {
        let schema = Self::history_schema();
        let batch = Self::entries_to_batch(std::slice::from_ref(&entry), schema.clone())?;
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);

        self.table
            .add(Box::new(batches))
            .execute()
            .await
            .map_err(|e| HistoryError::Storage(format!("Failed to insert history entry: {e}")))?;

        Ok(())
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<HistoryEntry>, HistoryError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        // TODO: push the ordering down into the query once lancedb exposes
        // ORDER BY on plain scans; today every row is read and sorted here.
        let stream = self
            .table
            .query()
            .execute()
            .await
            .map_err(|e| HistoryError::Storage(format!("Failed to query history: {e}")))?;

        let batches: Vec<RecordBatch> = stream
            .try_collect()
            .await
            .map_err(|e| HistoryError::Storage(format!("Failed to collect history: {e}")))?;

        let mut entries = Vec::new();
        for batch in &batches {
            entries.extend(Self::batch_to_entries(batch)?);
        }

        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        entries.truncate(limit);
        Ok(entries)
    }
}
