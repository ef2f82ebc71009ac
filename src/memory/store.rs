//! Per-task key/value store with checkpoint snapshots.
//!
//! # Invariants
//! - Entries are only added or overwritten, never partially mutated
//! - Checkpoints are immutable once created (append-only log)
//! - `restore` fully replaces the current entries; it is a recovery
//!   operation, never part of normal forward progress

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::task::{Step, StepStatus};

/// A single value written by a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub key: String,
    /// Opaque payload; the orchestrator stores step results here
    pub value: serde_json::Value,
    /// Id of the step that wrote the entry
    pub writer_step_id: String,
    pub written_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

/// An immutable snapshot of the store plus the task's step statuses.
///
/// Created automatically immediately before each step executes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: Uuid,
    pub task_id: String,
    /// Index of the step about to execute when the snapshot was taken
    pub step_index: usize,
    pub entries: BTreeMap<String, MemoryEntry>,
    pub step_statuses: Vec<(String, StepStatus)>,
    pub created_at: DateTime<Utc>,
}

/// Errors from memory operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MemoryError {
    #[error("Memory key cannot be empty")]
    EmptyKey,
}

/// Key/value store scoped to a single task execution.
///
/// Deliberately not shared: the orchestrator constructs a fresh store per
/// run and tears it down with the task. There is no process-wide instance.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: BTreeMap<String, MemoryEntry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert or overwrite a value.
    ///
    /// # Errors
    /// Returns `Err` if the key is empty.
    pub fn set(
        &mut self,
        key: impl Into<String>,
        value: serde_json::Value,
        writer_step_id: impl Into<String>,
    ) -> Result<(), MemoryError> {
        let key = key.into();
        if key.is_empty() {
            return Err(MemoryError::EmptyKey);
        }
        let entry = MemoryEntry {
            key: key.clone(),
            value,
            writer_step_id: writer_step_id.into(),
            written_at: Utc::now(),
            metadata: BTreeMap::new(),
        };
        self.entries.insert(key, entry);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.entries.get(key).map(|e| &e.value)
    }

    pub fn entry(&self, key: &str) -> Option<&MemoryEntry> {
        self.entries.get(key)
    }

    pub fn entries(&self) -> &BTreeMap<String, MemoryEntry> {
        &self.entries
    }

    /// Gather the values written by each of the step's declared dependencies.
    ///
    /// Dependencies that wrote nothing are omitted; the orchestrator only
    /// schedules a step once its dependencies are verified, so in normal
    /// operation every dependency has an entry under its own id.
    pub fn build_context(&self, step: &Step) -> BTreeMap<String, serde_json::Value> {
        step.dependencies
            .iter()
            .filter_map(|dep| self.get(dep).map(|v| (dep.clone(), v.clone())))
            .collect()
    }

    /// Take an immutable snapshot of the store and the given step statuses.
    pub fn create_checkpoint(
        &self,
        task_id: impl Into<String>,
        step_index: usize,
        step_statuses: Vec<(String, StepStatus)>,
    ) -> Checkpoint {
        Checkpoint {
            id: Uuid::new_v4(),
            task_id: task_id.into(),
            step_index,
            entries: self.entries.clone(),
            step_statuses,
            created_at: Utc::now(),
        }
    }

    /// Replace the store contents with a checkpoint's entries.
    ///
    /// The caller is responsible for applying the checkpoint's
    /// `step_statuses` to the task (`Task::apply_status_vector`).
    pub fn restore(&mut self, checkpoint: &Checkpoint) {
        self.entries = checkpoint.entries.clone();
    }
}
