//! Free-form note attached to a task.

use crate::model::entity::{impl_sync_entity, ChildEntity, EntityId, EntityKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub id: EntityId,
    /// Weak reference; the task may be missing (orphan) until swept.
    pub task_id: EntityId,
    #[serde(default)]
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl_sync_entity!(Note, EntityKind::Note);

impl ChildEntity for Note {
    fn task_id(&self) -> EntityId {
        self.task_id
    }
}

impl Note {
    pub fn apply(&mut self, patch: NotePatch, now: DateTime<Utc>) {
        if let Some(content) = patch.content {
            self.content = content;
        }
        self.updated_at = Some(now);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewNote {
    pub task_id: EntityId,
    pub content: String,
}

impl NewNote {
    pub fn new(task_id: EntityId, content: impl Into<String>) -> Self {
        Self {
            task_id,
            content: content.into(),
        }
    }

    pub(crate) fn into_note(self, id: EntityId, now: DateTime<Utc>) -> Note {
        Note {
            id,
            task_id: self.task_id,
            content: self.content,
            created_at: now,
            updated_at: Some(now),
            deleted: false,
            deleted_at: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotePatch {
    pub content: Option<String>,
}
