//! Change-listener registry.
//!
//! # Invariants
//! - A panicking listener is logged and skipped; the remaining listeners
//!   still run.

use crate::model::{EntityId, EntityKind};
use log::error;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// What happened to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Updated,
    Deleted,
    /// Remote or backup data merged in.
    Imported,
    /// Tombstones hard-deleted by the retention sweeper.
    Purged,
    /// Orphans removed by the integrity check.
    Repaired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreChange {
    pub kind: ChangeKind,
    pub entity: Option<EntityKind>,
    pub id: Option<EntityId>,
}

impl StoreChange {
    pub(crate) fn entity(kind: ChangeKind, entity: EntityKind, id: EntityId) -> Self {
        Self {
            kind,
            entity: Some(entity),
            id: Some(id),
        }
    }

    pub(crate) fn bulk(kind: ChangeKind) -> Self {
        Self {
            kind,
            entity: None,
            id: None,
        }
    }
}

pub type ChangeCallback = Box<dyn Fn(&StoreChange) + Send + Sync>;

/// Handle returned on registration, used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
pub(crate) struct ChangeListeners {
    next_id: u64,
    entries: Vec<(ListenerId, ChangeCallback)>,
}

impl ChangeListeners {
    pub(crate) fn add(&mut self, callback: ChangeCallback) -> ListenerId {
        self.next_id += 1;
        let id = ListenerId(self.next_id);
        self.entries.push((id, callback));
        id
    }

    pub(crate) fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry_id, _)| *entry_id != id);
        self.entries.len() != before
    }

    pub(crate) fn notify(&self, change: &StoreChange) {
        for (id, callback) in &self.entries {
            if catch_unwind(AssertUnwindSafe(|| callback(change))).is_err() {
                error!(
                    "event=listener_notify module=store status=error listener_id={} change={:?}",
                    id.0, change.kind
                );
            }
        }
    }
}
