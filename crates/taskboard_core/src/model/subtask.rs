//! Checklist item attached to a task.

use crate::model::entity::{impl_sync_entity, ChildEntity, EntityId, EntityKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subtask {
    pub id: EntityId,
    pub task_id: EntityId,
    pub title: String,
    #[serde(default)]
    pub completed: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl_sync_entity!(Subtask, EntityKind::Subtask);

impl ChildEntity for Subtask {
    fn task_id(&self) -> EntityId {
        self.task_id
    }
}

impl Subtask {
    pub fn apply(&mut self, patch: SubtaskPatch, now: DateTime<Utc>) {
        if let Some(title) = patch.title {
            self.title = title;
        }
        if let Some(completed) = patch.completed {
            self.completed = completed;
        }
        self.updated_at = Some(now);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewSubtask {
    pub task_id: EntityId,
    pub title: String,
}

impl NewSubtask {
    pub fn new(task_id: EntityId, title: impl Into<String>) -> Self {
        Self {
            task_id,
            title: title.into(),
        }
    }

    pub(crate) fn into_subtask(self, id: EntityId, now: DateTime<Utc>) -> Subtask {
        Subtask {
            id,
            task_id: self.task_id,
            title: self.title,
            completed: false,
            created_at: now,
            updated_at: Some(now),
            deleted: false,
            deleted_at: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubtaskPatch {
    pub title: Option<String>,
    pub completed: Option<bool>,
}
