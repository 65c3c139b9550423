//! Board domain model: tasks, notes, subtasks and sync snapshots.
//!
//! # Responsibility
//! - Define the records owned by the local store and exchanged with cloud
//!   providers.
//! - Provide the common `SyncEntity` view used by reconciliation.
//!
//! # Invariants
//! - Every record is identified by a device-derived `EntityId`.
//! - Deletion is represented by soft-delete tombstones (`deleted=true` plus
//!   `deleted_at`), not by removal.
//! - Every mutation refreshes `updated_at`.

pub mod entity;
pub mod note;
pub mod snapshot;
pub mod subtask;
pub mod task;

pub use entity::{ChildEntity, EntityId, EntityKind, SyncEntity};
pub use note::{NewNote, Note, NotePatch};
pub use snapshot::{IdCounters, Snapshot, SyncEnvelope};
pub use subtask::{NewSubtask, Subtask, SubtaskPatch};
pub use task::{normalize_tags, NewTask, Priority, Task, TaskPatch, TaskStatus};
