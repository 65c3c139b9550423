//! Data-integrity check over the local store.
//!
//! Orphans (notes/subtasks whose task is gone from the collection) are
//! removed and persisted. Duplicate ids are only reported: which copy is
//! authoritative cannot be decided locally.

use crate::model::{EntityId, EntityKind};
use crate::store::{EntityCounts, LocalStore, StoreResult};
use log::{info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntegrityReport {
    pub duplicates: Vec<(EntityKind, EntityId)>,
    pub orphans_removed: EntityCounts,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.duplicates.is_empty() && self.orphans_removed.total() == 0
    }
}

pub fn check_integrity(store: &mut LocalStore) -> StoreResult<IntegrityReport> {
    let duplicates = store.duplicate_ids();
    for (kind, id) in &duplicates {
        warn!("event=integrity_check module=integrity status=duplicate kind={kind} id={id}");
    }

    let orphans_removed = store.remove_orphans()?;
    if orphans_removed.total() > 0 {
        info!(
            "event=integrity_check module=integrity status=repaired orphan_notes={} orphan_subtasks={}",
            orphans_removed.notes, orphans_removed.subtasks
        );
    }

    Ok(IntegrityReport {
        duplicates,
        orphans_removed,
    })
}
