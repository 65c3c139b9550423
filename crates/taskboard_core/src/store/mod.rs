//! Local store: the single in-memory source of truth for the board.
//!
//! # Responsibility
//! - Own task/note/subtask collections and their id counters.
//! - Expose the only sanctioned mutation APIs (add/update/delete, import,
//!   purge, repair).
//! - Write every mutation through to the local key-value store, then notify
//!   change listeners.
//!
//! # Invariants
//! - In-memory state is updated before persistence is attempted; a failed
//!   write is returned to the caller as `StoreError::Persistence`.
//! - Deletion is soft and cascades from a task to its notes and subtasks.
//! - Read APIs never return tombstones.
//! - The store never talks to the network; pushing is the orchestrator's job.

pub mod listeners;
pub mod query;

pub use listeners::{ChangeKind, ListenerId, StoreChange};
pub use query::{TaskQuery, TaskSort};

use crate::clock::Clock;
use crate::identity::{DeviceId, IdGenerator};
use crate::model::{
    ChildEntity, EntityId, EntityKind, IdCounters, NewNote, NewSubtask, NewTask, Note, NotePatch,
    Snapshot, Subtask, SubtaskPatch, SyncEntity, Task, TaskPatch,
};
use crate::persistence::{keys, KeyValueStore, PersistenceError};
use crate::sync::reconcile::{
    merge_entities, reconcile_counters, ImportOptions, ImportOutcome, MergeStats, SyncGuards,
};
use chrono::{DateTime, Utc};
use listeners::ChangeListeners;
use log::{debug, error, info};
use query::run_query;
use serde::de::DeserializeOwned;
use std::collections::{BTreeSet, HashSet};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug)]
pub enum StoreError {
    Persistence(PersistenceError),
    Serialization(serde_json::Error),
    /// A persisted value could not be decoded.
    CorruptData { key: &'static str, message: String },
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Persistence(err) => write!(f, "local persistence failed: {err}"),
            Self::Serialization(err) => write!(f, "serialization failed: {err}"),
            Self::CorruptData { key, message } => {
                write!(f, "corrupt persisted value for `{key}`: {message}")
            }
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Persistence(err) => Some(err),
            Self::Serialization(err) => Some(err),
            Self::CorruptData { .. } => None,
        }
    }
}

impl From<PersistenceError> for StoreError {
    fn from(value: PersistenceError) -> Self {
        Self::Persistence(value)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(value)
    }
}

/// Per-kind record counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntityCounts {
    pub tasks: usize,
    pub notes: usize,
    pub subtasks: usize,
}

impl EntityCounts {
    pub fn total(&self) -> usize {
        self.tasks + self.notes + self.subtasks
    }
}

pub struct LocalStore {
    tasks: Vec<Task>,
    notes: Vec<Note>,
    subtasks: Vec<Subtask>,
    ids: IdGenerator,
    kv: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    listeners: ChangeListeners,
}

impl LocalStore {
    /// Loads collections and counters from `kv`; missing keys start empty.
    ///
    /// # Errors
    /// - `Persistence` when reading fails.
    /// - `CorruptData` when a stored value cannot be decoded.
    pub fn open(kv: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> StoreResult<Self> {
        let tasks: Vec<Task> = load_collection(kv.as_ref(), keys::TASKS)?;
        let notes: Vec<Note> = load_collection(kv.as_ref(), keys::NOTES)?;
        let subtasks: Vec<Subtask> = load_collection(kv.as_ref(), keys::SUBTASKS)?;
        let counters = IdCounters {
            next_task_id: load_counter(kv.as_ref(), keys::NEXT_TASK_ID)?,
            next_note_id: load_counter(kv.as_ref(), keys::NEXT_NOTE_ID)?,
            next_subtask_id: load_counter(kv.as_ref(), keys::NEXT_SUBTASK_ID)?,
        };

        info!(
            "event=store_open module=store status=ok tasks={} notes={} subtasks={}",
            tasks.len(),
            notes.len(),
            subtasks.len()
        );

        Ok(Self {
            tasks,
            notes,
            subtasks,
            ids: IdGenerator::new(clock.clone(), counters),
            kv,
            clock,
            listeners: ChangeListeners::default(),
        })
    }

    /// Installs the installation identity used for id generation.
    pub fn install_device(&self, device: DeviceId) -> bool {
        self.ids.install_device(device)
    }

    pub fn device_id(&self) -> &DeviceId {
        self.ids.device()
    }

    pub fn counters(&self) -> IdCounters {
        self.ids.counters()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // ---- tasks -----------------------------------------------------------

    pub fn add_task(&mut self, fields: NewTask) -> StoreResult<Task> {
        let id = self.ids.next_id(EntityKind::Task);
        let task = fields.into_task(id, self.clock.now());
        self.tasks.push(task.clone());
        self.commit(
            &[EntityKind::Task],
            StoreChange::entity(ChangeKind::Added, EntityKind::Task, id),
        )?;
        Ok(task)
    }

    /// Applies `patch` to a live task. Unknown or deleted ids yield `Ok(None)`.
    pub fn update_task(&mut self, id: EntityId, patch: TaskPatch) -> StoreResult<Option<Task>> {
        let now = self.clock.now();
        let Some(task) = find_live_mut(&mut self.tasks, id) else {
            debug!("event=task_update module=store status=not_found id={id}");
            return Ok(None);
        };
        task.apply(patch, now);
        let updated = task.clone();
        self.commit(
            &[EntityKind::Task],
            StoreChange::entity(ChangeKind::Updated, EntityKind::Task, id),
        )?;
        Ok(Some(updated))
    }

    /// Soft-deletes a task and cascades to its notes and subtasks.
    ///
    /// Returns `Ok(false)` when no live task has this id.
    pub fn delete_task(&mut self, id: EntityId) -> StoreResult<bool> {
        let now = self.clock.now();
        let Some(task) = find_live_mut(&mut self.tasks, id) else {
            debug!("event=task_delete module=store status=not_found id={id}");
            return Ok(false);
        };
        task.mark_deleted(now);
        let cascaded_notes = cascade_delete(&mut self.notes, id, now);
        let cascaded_subtasks = cascade_delete(&mut self.subtasks, id, now);
        info!(
            "event=task_delete module=store status=ok id={id} cascaded_notes={cascaded_notes} cascaded_subtasks={cascaded_subtasks}"
        );
        self.commit(
            &EntityKind::ALL,
            StoreChange::entity(ChangeKind::Deleted, EntityKind::Task, id),
        )?;
        Ok(true)
    }

    pub fn get_task(&self, id: EntityId) -> Option<Task> {
        find_live(&self.tasks, id).cloned()
    }

    /// Live tasks matching `query`, in the requested order.
    pub fn get_tasks(&self, query: &TaskQuery) -> Vec<Task> {
        run_query(&self.tasks, query).into_iter().cloned().collect()
    }

    /// Union of tags over live tasks.
    pub fn get_tags(&self) -> BTreeSet<String> {
        self.tasks
            .iter()
            .filter(|task| !task.deleted)
            .flat_map(|task| task.tags.iter().cloned())
            .collect()
    }

    // ---- notes -----------------------------------------------------------

    pub fn add_note(&mut self, fields: NewNote) -> StoreResult<Note> {
        let id = self.ids.next_id(EntityKind::Note);
        let note = fields.into_note(id, self.clock.now());
        self.notes.push(note.clone());
        self.commit(
            &[EntityKind::Note],
            StoreChange::entity(ChangeKind::Added, EntityKind::Note, id),
        )?;
        Ok(note)
    }

    pub fn update_note(&mut self, id: EntityId, patch: NotePatch) -> StoreResult<Option<Note>> {
        let now = self.clock.now();
        let Some(note) = find_live_mut(&mut self.notes, id) else {
            debug!("event=note_update module=store status=not_found id={id}");
            return Ok(None);
        };
        note.apply(patch, now);
        let updated = note.clone();
        self.commit(
            &[EntityKind::Note],
            StoreChange::entity(ChangeKind::Updated, EntityKind::Note, id),
        )?;
        Ok(Some(updated))
    }

    pub fn delete_note(&mut self, id: EntityId) -> StoreResult<bool> {
        let now = self.clock.now();
        let Some(note) = find_live_mut(&mut self.notes, id) else {
            return Ok(false);
        };
        note.mark_deleted(now);
        self.commit(
            &[EntityKind::Note],
            StoreChange::entity(ChangeKind::Deleted, EntityKind::Note, id),
        )?;
        Ok(true)
    }

    pub fn get_note(&self, id: EntityId) -> Option<Note> {
        find_live(&self.notes, id).cloned()
    }

    pub fn get_notes_by_task_id(&self, task_id: EntityId) -> Vec<Note> {
        live_children(&self.notes, task_id)
    }

    // ---- subtasks --------------------------------------------------------

    pub fn add_subtask(&mut self, fields: NewSubtask) -> StoreResult<Subtask> {
        let id = self.ids.next_id(EntityKind::Subtask);
        let subtask = fields.into_subtask(id, self.clock.now());
        self.subtasks.push(subtask.clone());
        self.commit(
            &[EntityKind::Subtask],
            StoreChange::entity(ChangeKind::Added, EntityKind::Subtask, id),
        )?;
        Ok(subtask)
    }

    pub fn update_subtask(
        &mut self,
        id: EntityId,
        patch: SubtaskPatch,
    ) -> StoreResult<Option<Subtask>> {
        let now = self.clock.now();
        let Some(subtask) = find_live_mut(&mut self.subtasks, id) else {
            debug!("event=subtask_update module=store status=not_found id={id}");
            return Ok(None);
        };
        subtask.apply(patch, now);
        let updated = subtask.clone();
        self.commit(
            &[EntityKind::Subtask],
            StoreChange::entity(ChangeKind::Updated, EntityKind::Subtask, id),
        )?;
        Ok(Some(updated))
    }

    pub fn delete_subtask(&mut self, id: EntityId) -> StoreResult<bool> {
        let now = self.clock.now();
        let Some(subtask) = find_live_mut(&mut self.subtasks, id) else {
            return Ok(false);
        };
        subtask.mark_deleted(now);
        self.commit(
            &[EntityKind::Subtask],
            StoreChange::entity(ChangeKind::Deleted, EntityKind::Subtask, id),
        )?;
        Ok(true)
    }

    pub fn get_subtask(&self, id: EntityId) -> Option<Subtask> {
        find_live(&self.subtasks, id).cloned()
    }

    pub fn get_subtasks(&self, task_id: EntityId) -> Vec<Subtask> {
        live_children(&self.subtasks, task_id)
    }

    /// `(completed, total)` over live subtasks of `task_id`.
    pub fn subtask_progress(&self, task_id: EntityId) -> (usize, usize) {
        let subtasks = self.get_subtasks(task_id);
        let completed = subtasks.iter().filter(|subtask| subtask.completed).count();
        (completed, subtasks.len())
    }

    /// Live record counts.
    pub fn counts(&self) -> EntityCounts {
        EntityCounts {
            tasks: self.tasks.iter().filter(|task| !task.deleted).count(),
            notes: self.notes.iter().filter(|note| !note.deleted).count(),
            subtasks: self.subtasks.iter().filter(|item| !item.deleted).count(),
        }
    }

    // ---- snapshots -------------------------------------------------------

    /// Full state including tombstones.
    pub fn export_snapshot(&self) -> Snapshot {
        Snapshot {
            tasks: self.tasks.clone(),
            notes: self.notes.clone(),
            subtasks: self.subtasks.clone(),
            counters: self.ids.counters(),
        }
    }

    /// Merges (or, with `clear_existing`, replaces) local state with
    /// `snapshot`, then persists locally. Never pushes.
    ///
    /// Skips without touching state when `guards` block the import.
    pub fn import_snapshot(
        &mut self,
        snapshot: Snapshot,
        options: ImportOptions,
        guards: &SyncGuards,
    ) -> StoreResult<ImportOutcome> {
        if let Some(reason) = guards.check(self.clock.now()) {
            info!("event=snapshot_import module=store status=skipped reason=\"{reason}\"");
            return Ok(ImportOutcome::Skipped(reason));
        }

        let Snapshot {
            tasks,
            notes,
            subtasks,
            counters: incoming_counters,
        } = snapshot;
        let local_counters = self.ids.counters();

        let stats = if options.clear_existing {
            let stats = MergeStats {
                adopted: tasks.len() + notes.len() + subtasks.len(),
                ..MergeStats::default()
            };
            self.tasks = tasks;
            self.notes = notes;
            self.subtasks = subtasks;
            stats
        } else {
            let (merged_tasks, mut stats) = merge_entities(&self.tasks, &tasks);
            let (merged_notes, note_stats) = merge_entities(&self.notes, &notes);
            let (merged_subtasks, subtask_stats) = merge_entities(&self.subtasks, &subtasks);
            stats += note_stats;
            stats += subtask_stats;
            self.tasks = merged_tasks;
            self.notes = merged_notes;
            self.subtasks = merged_subtasks;
            stats
        };
        self.ids.set_counters(reconcile_counters(
            local_counters,
            incoming_counters,
            options.clear_existing,
        ));

        info!(
            "event=snapshot_import module=store status=ok clear_existing={} adopted={} replaced={} kept_local={}",
            options.clear_existing, stats.adopted, stats.replaced, stats.kept_local
        );
        self.commit(&EntityKind::ALL, StoreChange::bulk(ChangeKind::Imported))?;
        Ok(ImportOutcome::Applied(stats))
    }

    // ---- maintenance -----------------------------------------------------

    /// Hard-deletes tombstones whose `deleted_at` is strictly before
    /// `cutoff`. Tombstones without `deleted_at` are kept. Persists only when
    /// something was removed.
    pub fn purge_tombstones(&mut self, cutoff: DateTime<Utc>) -> StoreResult<EntityCounts> {
        let expired = |deleted: bool, deleted_at: Option<DateTime<Utc>>| {
            deleted && deleted_at.is_some_and(|at| at < cutoff)
        };
        let removed = EntityCounts {
            tasks: retain_count(&mut self.tasks, |t| !expired(t.deleted, t.deleted_at)),
            notes: retain_count(&mut self.notes, |n| !expired(n.deleted, n.deleted_at)),
            subtasks: retain_count(&mut self.subtasks, |s| !expired(s.deleted, s.deleted_at)),
        };
        if removed.total() > 0 {
            self.commit(&EntityKind::ALL, StoreChange::bulk(ChangeKind::Purged))?;
        }
        Ok(removed)
    }

    /// Hard-deletes notes and subtasks whose task is absent from the task
    /// collection. Persists only when something was removed.
    pub fn remove_orphans(&mut self) -> StoreResult<EntityCounts> {
        let task_ids: HashSet<EntityId> = self.tasks.iter().map(|task| task.id).collect();
        let removed = EntityCounts {
            tasks: 0,
            notes: retain_count(&mut self.notes, |note| task_ids.contains(&note.task_id)),
            subtasks: retain_count(&mut self.subtasks, |item| task_ids.contains(&item.task_id)),
        };
        if removed.total() > 0 {
            self.commit(
                &[EntityKind::Note, EntityKind::Subtask],
                StoreChange::bulk(ChangeKind::Repaired),
            )?;
        }
        Ok(removed)
    }

    /// Ids appearing more than once within a collection, per kind.
    pub fn duplicate_ids(&self) -> Vec<(EntityKind, EntityId)> {
        let mut duplicates = duplicates_of(&self.tasks);
        duplicates.extend(duplicates_of(&self.notes));
        duplicates.extend(duplicates_of(&self.subtasks));
        duplicates
    }

    // ---- listeners -------------------------------------------------------

    pub fn add_change_listener<F>(&mut self, callback: F) -> ListenerId
    where
        F: Fn(&StoreChange) + Send + Sync + 'static,
    {
        self.listeners.add(Box::new(callback))
    }

    pub fn remove_change_listener(&mut self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    fn commit(&self, kinds: &[EntityKind], change: StoreChange) -> StoreResult<()> {
        self.persist(kinds)?;
        self.listeners.notify(&change);
        Ok(())
    }

    /// Writes the given collections plus all counters in one batch.
    fn persist(&self, kinds: &[EntityKind]) -> StoreResult<()> {
        let mut entries: Vec<(&str, String)> = Vec::with_capacity(kinds.len() + 3);
        for kind in kinds {
            let entry = match kind {
                EntityKind::Task => (keys::TASKS, serde_json::to_string(&self.tasks)?),
                EntityKind::Note => (keys::NOTES, serde_json::to_string(&self.notes)?),
                EntityKind::Subtask => (keys::SUBTASKS, serde_json::to_string(&self.subtasks)?),
            };
            entries.push(entry);
        }
        let counters = self.ids.counters();
        entries.push((keys::NEXT_TASK_ID, counters.next_task_id.to_string()));
        entries.push((keys::NEXT_NOTE_ID, counters.next_note_id.to_string()));
        entries.push((keys::NEXT_SUBTASK_ID, counters.next_subtask_id.to_string()));

        self.kv.set_many(&entries).map_err(|err| {
            error!(
                "event=store_persist module=store status=error error_code=persist_failed error={err}"
            );
            StoreError::Persistence(err)
        })
    }
}

/// Cloneable handle to the process-wide store.
///
/// The lock is never held across an `.await`.
#[derive(Clone)]
pub struct SharedStore(Arc<Mutex<LocalStore>>);

impl SharedStore {
    pub fn new(store: LocalStore) -> Self {
        Self(Arc::new(Mutex::new(store)))
    }

    pub fn lock(&self) -> MutexGuard<'_, LocalStore> {
        // Store methods leave collections consistent between statements.
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn load_collection<T: DeserializeOwned>(
    kv: &dyn KeyValueStore,
    key: &'static str,
) -> StoreResult<Vec<T>> {
    match kv.get(key)? {
        Some(raw) => serde_json::from_str(&raw).map_err(|err| StoreError::CorruptData {
            key,
            message: err.to_string(),
        }),
        None => Ok(Vec::new()),
    }
}

fn load_counter(kv: &dyn KeyValueStore, key: &'static str) -> StoreResult<u64> {
    match kv.get(key)? {
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map_err(|err| StoreError::CorruptData {
                key,
                message: err.to_string(),
            }),
        None => Ok(0),
    }
}

fn find_live<T: SyncEntity>(items: &[T], id: EntityId) -> Option<&T> {
    items
        .iter()
        .find(|item| item.id() == id && !item.is_deleted())
}

fn find_live_mut<T: SyncEntity>(items: &mut [T], id: EntityId) -> Option<&mut T> {
    items
        .iter_mut()
        .find(|item| item.id() == id && !item.is_deleted())
}

fn live_children<T: ChildEntity>(items: &[T], task_id: EntityId) -> Vec<T> {
    items
        .iter()
        .filter(|item| item.task_id() == task_id && !item.is_deleted())
        .cloned()
        .collect()
}

fn cascade_delete<T: ChildEntity>(items: &mut [T], task_id: EntityId, now: DateTime<Utc>) -> usize {
    let mut count = 0;
    for item in items
        .iter_mut()
        .filter(|item| item.task_id() == task_id && !item.is_deleted())
    {
        item.mark_deleted(now);
        count += 1;
    }
    count
}

/// Retains items matching `keep`; returns how many were removed.
fn retain_count<T>(items: &mut Vec<T>, keep: impl FnMut(&T) -> bool) -> usize {
    let before = items.len();
    items.retain(keep);
    before - items.len()
}

fn duplicates_of<T: SyncEntity>(items: &[T]) -> Vec<(EntityKind, EntityId)> {
    let mut seen = HashSet::new();
    let mut reported = BTreeSet::new();
    for item in items {
        if !seen.insert(item.id()) {
            reported.insert(item.id());
        }
    }
    reported.into_iter().map(|id| (T::KIND, id)).collect()
}
