//! Backup/restore interchange document.
//!
//! # Invariants
//! - Exports carry every collection including tombstones, so a restore
//!   cannot resurrect deleted items on other devices.
//! - The subtask collection is read from `subtasks`, `subTasks` or
//!   `sub_tasks`; it is always written as `subtasks`.
//! - Restores bypass the sync guards: they are explicit user actions.

use crate::model::{IdCounters, Note, Snapshot, Subtask, Task};
use crate::store::{LocalStore, StoreError};
use crate::sync::reconcile::{ImportOptions, ImportOutcome, SyncGuards};
use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub const EXPORT_FORMAT_VERSION: &str = "1.0";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportDocument {
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub notes: Vec<Note>,
    #[serde(default, alias = "subTasks", alias = "sub_tasks")]
    pub subtasks: Vec<Subtask>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(flatten)]
    pub counters: IdCounters,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ExportMetadata>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportMetadata {
    pub exported_at: DateTime<Utc>,
    pub version: String,
    #[serde(default)]
    pub device_id: Option<String>,
    pub task_count: usize,
    pub note_count: usize,
    pub subtask_count: usize,
}

#[derive(Debug)]
pub enum BackupError {
    Serialization(serde_json::Error),
    Store(StoreError),
}

impl Display for BackupError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Serialization(err) => write!(f, "backup document is not valid: {err}"),
            Self::Store(err) => write!(f, "restore failed: {err}"),
        }
    }
}

impl Error for BackupError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Serialization(err) => Some(err),
            Self::Store(err) => Some(err),
        }
    }
}

impl From<serde_json::Error> for BackupError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(value)
    }
}

impl From<StoreError> for BackupError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl ExportDocument {
    pub fn to_json(&self) -> Result<String, BackupError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn into_snapshot(self) -> Snapshot {
        Snapshot {
            tasks: self.tasks,
            notes: self.notes,
            subtasks: self.subtasks,
            counters: self.counters,
        }
    }
}

/// Builds a backup of the whole store. Counts cover live entities only.
pub fn export_document(store: &LocalStore) -> ExportDocument {
    let snapshot = store.export_snapshot();
    let counts = store.counts();
    let metadata = ExportMetadata {
        exported_at: store.now(),
        version: EXPORT_FORMAT_VERSION.to_string(),
        device_id: Some(store.device_id().to_string()),
        task_count: counts.tasks,
        note_count: counts.notes,
        subtask_count: counts.subtasks,
    };
    ExportDocument {
        tasks: snapshot.tasks,
        notes: snapshot.notes,
        subtasks: snapshot.subtasks,
        tags: store.get_tags(),
        counters: snapshot.counters,
        metadata: Some(metadata),
    }
}

pub fn parse_document(raw: &str) -> Result<ExportDocument, BackupError> {
    Ok(serde_json::from_str(raw)?)
}

/// Imports a backup. `clear_existing` replaces local collections;
/// otherwise the document is merged like a sync snapshot.
pub fn restore_document(
    store: &mut LocalStore,
    document: ExportDocument,
    clear_existing: bool,
) -> Result<ImportOutcome, BackupError> {
    let outcome = store.import_snapshot(
        document.into_snapshot(),
        ImportOptions { clear_existing },
        &SyncGuards::open(),
    )?;
    info!(
        "event=backup_restore module=backup status=ok clear_existing={clear_existing} message=\"{}\"",
        outcome.message()
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::parse_document;

    #[test]
    fn legacy_subtask_key_variants_are_accepted() {
        for key in ["subtasks", "subTasks", "sub_tasks"] {
            let raw = format!(
                r#"{{"tasks":[],"notes":[],"{key}":[{{"id":7,"task_id":1,"title":"step","completed":false,"created_at":"2024-01-01T00:00:00Z"}}]}}"#
            );
            let document = parse_document(&raw).expect("document should parse");
            assert_eq!(document.subtasks.len(), 1, "key {key}");
            assert_eq!(document.subtasks[0].id, 7);
        }
    }

    #[test]
    fn missing_sections_default_to_empty() {
        let document = parse_document("{}").expect("empty document");
        assert!(document.tasks.is_empty());
        assert!(document.metadata.is_none());
        assert_eq!(document.counters.next_task_id, 0);
    }
}
