//! SQLite-backed checkpoint persistence.
//!
//! Checkpoints normally live in memory for the duration of a run; this store
//! writes them out so a host can recover a task after a crash. Rows are
//! append-only, matching the in-memory checkpoint log.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::task::StepStatus;

use super::store::{Checkpoint, MemoryEntry};

const SCHEMA: &str = r#"
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS checkpoints (
    id TEXT PRIMARY KEY NOT NULL,
    task_id TEXT NOT NULL,
    step_index INTEGER NOT NULL,
    entries TEXT NOT NULL,
    step_statuses TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_checkpoints_task ON checkpoints(task_id, step_index);
"#;

/// Errors from checkpoint persistence.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("Failed to open checkpoint store: {0}")]
    Open(String),

    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Append-only checkpoint log on disk.
pub struct CheckpointStore {
    conn: Arc<Mutex<Connection>>,
}

impl CheckpointStore {
    /// Open (or create) a checkpoint database at the given path.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, CheckpointError> {
        let path = path.into();
        let conn = tokio::task::spawn_blocking(move || -> Result<Connection, CheckpointError> {
            let conn = Connection::open(&path)?;
            conn.execute_batch(SCHEMA)?;
            Ok(conn)
        })
        .await
        .map_err(|e| CheckpointError::Open(format!("task join error: {}", e)))??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Persist one checkpoint.
    pub async fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let entries = serde_json::to_string(&checkpoint.entries)?;
        let statuses = serde_json::to_string(&checkpoint.step_statuses)?;

        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO checkpoints (id, task_id, step_index, entries, step_statuses, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                checkpoint.id.to_string(),
                checkpoint.task_id,
                checkpoint.step_index as i64,
                entries,
                statuses,
                checkpoint.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Load the most recent checkpoint for a task, if any.
    pub async fn latest(&self, task_id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        let conn = self.conn.lock().await;
        let row = conn
            .query_row(
                "SELECT id, task_id, step_index, entries, step_statuses, created_at
                 FROM checkpoints WHERE task_id = ?1
                 ORDER BY step_index DESC, created_at DESC LIMIT 1",
                params![task_id],
                row_to_checkpoint,
            )
            .optional()?;
        Ok(row)
    }

    /// Load every checkpoint for a task, oldest first.
    pub async fn load_all(&self, task_id: &str) -> Result<Vec<Checkpoint>, CheckpointError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, task_id, step_index, entries, step_statuses, created_at
             FROM checkpoints WHERE task_id = ?1
             ORDER BY step_index ASC, created_at ASC",
        )?;
        let rows = stmt.query_map(params![task_id], row_to_checkpoint)?;
        let mut checkpoints = Vec::new();
        for row in rows {
            checkpoints.push(row?);
        }
        Ok(checkpoints)
    }
}

fn row_to_checkpoint(row: &rusqlite::Row<'_>) -> rusqlite::Result<Checkpoint> {
    let id: String = row.get(0)?;
    let task_id: String = row.get(1)?;
    let step_index: i64 = row.get(2)?;
    let entries_json: String = row.get(3)?;
    let statuses_json: String = row.get(4)?;
    let created_at: String = row.get(5)?;

    let entries: BTreeMap<String, MemoryEntry> = serde_json::from_str(&entries_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e)))?;
    let step_statuses: Vec<(String, StepStatus)> = serde_json::from_str(&statuses_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e)))?;

    Ok(Checkpoint {
        id: Uuid::parse_str(&id).unwrap_or_else(|_| Uuid::nil()),
        task_id,
        step_index: step_index as usize,
        entries,
        step_statuses,
        created_at: created_at
            .parse::<DateTime<Utc>>()
            .unwrap_or_else(|_| Utc::now()),
    })
}
