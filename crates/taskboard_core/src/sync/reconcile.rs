//! Snapshot reconciliation (last-writer-wins with tombstones).
//!
//! # Responsibility
//! - Merge incoming collections into local ones per entity id.
//! - Reconcile next-id counters.
//! - Decide whether an import must be skipped to protect local edits.
//!
//! # Invariants
//! - Incoming replaces local iff its effective timestamp is `>=` the local
//!   one; ties favour the incoming record.
//! - Unknown incoming records, tombstones included, are always adopted.
//! - Local records absent from the incoming side are kept.
//! - Merging without `clear_existing` never lowers a counter.

use crate::model::{EntityId, IdCounters, SyncEntity};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::fmt::{Display, Formatter};

/// Grace period after a local edit during which inbound imports are ignored.
pub const DEFAULT_DEBOUNCE_SECS: i64 = 10;

/// Per-kind merge counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Incoming records with no local counterpart.
    pub adopted: usize,
    /// Local records overwritten by a newer-or-equal incoming record.
    pub replaced: usize,
    /// Local records that beat their incoming counterpart.
    pub kept_local: usize,
}

impl MergeStats {
    pub fn changed(&self) -> usize {
        self.adopted + self.replaced
    }
}

impl std::ops::AddAssign for MergeStats {
    fn add_assign(&mut self, rhs: Self) {
        self.adopted += rhs.adopted;
        self.replaced += rhs.replaced;
        self.kept_local += rhs.kept_local;
    }
}

/// Merges `incoming` into `local`, returning the union keyed by id.
///
/// Output order: local records in their original order (winners swapped in
/// place), then adopted records in incoming order.
pub fn merge_entities<T: SyncEntity>(local: &[T], incoming: &[T]) -> (Vec<T>, MergeStats) {
    let mut merged: Vec<T> = local.to_vec();
    let mut index: HashMap<EntityId, usize> = merged
        .iter()
        .enumerate()
        .map(|(position, entity)| (entity.id(), position))
        .collect();
    let mut stats = MergeStats::default();

    for candidate in incoming {
        match index.get(&candidate.id()).copied() {
            None => {
                index.insert(candidate.id(), merged.len());
                merged.push(candidate.clone());
                stats.adopted += 1;
            }
            Some(position) => {
                if incoming_wins(&merged[position], candidate) {
                    merged[position] = candidate.clone();
                    stats.replaced += 1;
                } else {
                    stats.kept_local += 1;
                }
            }
        }
    }

    (merged, stats)
}

/// Tie-break rule: equal effective timestamps favour the incoming record.
pub fn incoming_wins<T: SyncEntity>(local: &T, incoming: &T) -> bool {
    incoming.effective_timestamp() >= local.effective_timestamp()
}

/// Counter rule: full replace adopts incoming (zero falls back to local),
/// merge takes the per-kind maximum.
pub fn reconcile_counters(
    local: IdCounters,
    incoming: IdCounters,
    clear_existing: bool,
) -> IdCounters {
    if clear_existing {
        incoming.or_fallback(local)
    } else {
        local.max(incoming)
    }
}

/// Concurrency-control flags consulted before any import.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncGuards {
    /// Raised while a local edit is in flight.
    pub suspended: bool,
    pub last_local_change: Option<DateTime<Utc>>,
    pub debounce_window: Duration,
}

impl Default for SyncGuards {
    fn default() -> Self {
        Self {
            suspended: false,
            last_local_change: None,
            debounce_window: Duration::seconds(DEFAULT_DEBOUNCE_SECS),
        }
    }
}

impl SyncGuards {
    /// Guards that never block (backup restore, first load).
    pub fn open() -> Self {
        Self::default()
    }

    /// Returns why an import at `now` must be skipped, if it must.
    pub fn check(&self, now: DateTime<Utc>) -> Option<SkipReason> {
        if self.suspended {
            return Some(SkipReason::SyncSuspended);
        }
        match self.last_local_change {
            Some(changed_at) if now - changed_at < self.debounce_window => {
                Some(SkipReason::RecentLocalEdit {
                    elapsed: now - changed_at,
                })
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    SyncSuspended,
    RecentLocalEdit { elapsed: Duration },
}

impl Display for SkipReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SyncSuspended => write!(f, "sync suspended while a local edit is in flight"),
            Self::RecentLocalEdit { elapsed } => write!(
                f,
                "local edit {}ms ago is inside the debounce window",
                elapsed.num_milliseconds()
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportOptions {
    /// Replace local collections instead of merging.
    pub clear_existing: bool,
}

/// Structured import result; skipping is not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportOutcome {
    Applied(MergeStats),
    Skipped(SkipReason),
}

impl ImportOutcome {
    pub fn success(&self) -> bool {
        matches!(self, Self::Applied(_))
    }

    pub fn message(&self) -> String {
        match self {
            Self::Applied(stats) => format!(
                "imported: adopted={} replaced={} kept_local={}",
                stats.adopted, stats.replaced, stats.kept_local
            ),
            Self::Skipped(reason) => format!("skipped: {reason}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{merge_entities, reconcile_counters, SkipReason, SyncGuards};
    use crate::model::{EntityId, IdCounters, NewTask, Task};
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn at(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 2, 1, 10, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    fn task(id: EntityId, title: &str, updated: i64) -> Task {
        let mut task = NewTask::new(title).into_task(id, at(0));
        task.updated_at = Some(at(updated));
        task
    }

    #[test]
    fn legacy_record_without_updated_at_uses_created_at() {
        let mut legacy = task(1, "legacy", 0);
        legacy.updated_at = None;
        legacy.created_at = at(5);
        let incoming = task(1, "incoming", 4);

        let (merged, stats) = merge_entities(&[legacy.clone()], &[incoming]);
        assert_eq!(merged, vec![legacy]);
        assert_eq!(stats.kept_local, 1);
    }

    #[test]
    fn local_only_records_survive_merge() {
        let local = vec![task(1, "local", 1)];
        let (merged, stats) = merge_entities(&local, &[task(2, "remote", 1)]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].title, "local");
        assert_eq!(stats.adopted, 1);
    }

    #[test]
    fn full_replace_counters_fall_back_per_kind() {
        let local = IdCounters {
            next_task_id: 5,
            next_note_id: 6,
            next_subtask_id: 7,
        };
        let incoming = IdCounters {
            next_task_id: 2,
            next_note_id: 0,
            next_subtask_id: 9,
        };
        assert_eq!(
            reconcile_counters(local, incoming, true),
            IdCounters {
                next_task_id: 2,
                next_note_id: 6,
                next_subtask_id: 9,
            }
        );
    }

    #[test]
    fn guards_block_suspended_and_debounced_imports() {
        let suspended = SyncGuards {
            suspended: true,
            ..SyncGuards::default()
        };
        assert_eq!(suspended.check(at(0)), Some(SkipReason::SyncSuspended));

        let recent = SyncGuards {
            last_local_change: Some(at(0)),
            ..SyncGuards::default()
        };
        assert!(matches!(
            recent.check(at(0) + Duration::seconds(9)),
            Some(SkipReason::RecentLocalEdit { .. })
        ));
        assert_eq!(recent.check(at(0) + Duration::seconds(10)), None);
    }
}
