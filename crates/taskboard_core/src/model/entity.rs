//! Common view over syncable records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Device-derived numeric identifier, unique within its entity kind.
pub type EntityId = u128;

/// Record collections known to the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Task,
    Note,
    Subtask,
}

impl EntityKind {
    pub const ALL: [EntityKind; 3] = [Self::Task, Self::Note, Self::Subtask];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::Note => "note",
            Self::Subtask => "subtask",
        }
    }
}

impl Display for EntityKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record that participates in last-writer-wins reconciliation.
pub trait SyncEntity: Clone {
    const KIND: EntityKind;

    fn id(&self) -> EntityId;
    fn created_at(&self) -> DateTime<Utc>;
    fn updated_at(&self) -> Option<DateTime<Utc>>;
    fn is_deleted(&self) -> bool;
    fn deleted_at(&self) -> Option<DateTime<Utc>>;

    /// Turns the record into a tombstone stamped at `at`.
    fn mark_deleted(&mut self, at: DateTime<Utc>);

    /// `updated_at` when present, else `created_at`.
    fn effective_timestamp(&self) -> DateTime<Utc> {
        self.updated_at().unwrap_or_else(|| self.created_at())
    }
}

/// Record weakly attached to a task through `task_id`.
pub trait ChildEntity: SyncEntity {
    fn task_id(&self) -> EntityId;
}

macro_rules! impl_sync_entity {
    ($ty:ty, $kind:expr) => {
        impl $crate::model::entity::SyncEntity for $ty {
            const KIND: $crate::model::entity::EntityKind = $kind;

            fn id(&self) -> $crate::model::entity::EntityId {
                self.id
            }

            fn created_at(&self) -> chrono::DateTime<chrono::Utc> {
                self.created_at
            }

            fn updated_at(&self) -> Option<chrono::DateTime<chrono::Utc>> {
                self.updated_at
            }

            fn is_deleted(&self) -> bool {
                self.deleted
            }

            fn deleted_at(&self) -> Option<chrono::DateTime<chrono::Utc>> {
                self.deleted_at
            }

            fn mark_deleted(&mut self, at: chrono::DateTime<chrono::Utc>) {
                self.deleted = true;
                self.deleted_at = Some(at);
                self.updated_at = Some(at);
            }
        }
    };
}

pub(crate) use impl_sync_entity;
