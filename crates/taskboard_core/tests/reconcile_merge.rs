use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use taskboard_core::model::IdCounters;
use taskboard_core::sync::reconcile::{merge_entities, SkipReason, SyncGuards};
use taskboard_core::{
    DeviceId, EntityId, ImportOptions, ImportOutcome, LocalStore, ManualClock,
    MemoryKeyValueStore, NewNote, NewTask, Snapshot, Task, TaskPatch, TaskStatus,
};

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
}

fn device_store(device: &str, clock: &Arc<ManualClock>) -> LocalStore {
    let store = LocalStore::open(Arc::new(MemoryKeyValueStore::new()), clock.clone()).unwrap();
    store.install_device(DeviceId::new(device).unwrap());
    store
}

fn task_at(id: EntityId, title: &str, updated_at: DateTime<Utc>) -> Task {
    Task {
        id,
        title: title.to_string(),
        description: String::new(),
        status: TaskStatus::Todo,
        priority: Default::default(),
        tags: Default::default(),
        pending_reason: None,
        due_date: None,
        created_at: start(),
        updated_at: Some(updated_at),
        deleted: false,
        deleted_at: None,
    }
}

fn merge_open(store: &mut LocalStore, snapshot: Snapshot) -> ImportOutcome {
    store
        .import_snapshot(snapshot, ImportOptions::default(), &SyncGuards::open())
        .unwrap()
}

#[test]
fn incoming_wins_when_newer_or_equal_and_local_wins_when_newer() {
    let t1 = start() + Duration::minutes(5);
    let cases = [
        (t1 + Duration::seconds(1), "incoming"),
        (t1, "incoming"),
        (t1 - Duration::seconds(1), "local"),
    ];
    for (t2, expected) in cases {
        let local = [task_at(1, "local", t1)];
        let incoming = [task_at(1, "incoming", t2)];
        let (merged, _) = merge_entities(&local, &incoming);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].title, expected, "incoming updated_at {t2}");
    }
}

#[test]
fn legacy_records_compare_by_created_at() {
    let mut legacy = task_at(7, "legacy", start());
    legacy.updated_at = None;
    legacy.created_at = start() + Duration::hours(2);
    let local = [task_at(7, "local", start() + Duration::hours(1))];

    let (merged, stats) = merge_entities(&local, &[legacy]);
    assert_eq!(merged[0].title, "legacy");
    assert_eq!(stats.replaced, 1);
}

#[test]
fn merge_keeps_union_of_local_and_incoming_ids() {
    let local = [task_at(1, "only local", start()), task_at(2, "shared", start())];
    let incoming = [task_at(2, "shared remote", start()), task_at(3, "only remote", start())];

    let (merged, stats) = merge_entities(&local, &incoming);
    let mut titles: Vec<_> = merged.iter().map(|task| (task.id, task.title.as_str())).collect();
    titles.sort();
    assert_eq!(
        titles,
        vec![(1, "only local"), (2, "shared remote"), (3, "only remote")]
    );
    assert_eq!(stats.adopted, 1);
    assert_eq!(stats.replaced, 1);
}

#[test]
fn unseen_remote_tombstone_is_adopted() {
    let clock = Arc::new(ManualClock::new(start()));
    let mut store = device_store("phone-100", &clock);

    let mut tombstone = task_at(99, "deleted elsewhere", start());
    tombstone.deleted = true;
    tombstone.deleted_at = Some(start());
    let snapshot = Snapshot {
        tasks: vec![tombstone.clone()],
        ..Snapshot::default()
    };

    assert!(merge_open(&mut store, snapshot).success());
    assert_eq!(store.get_task(99), None);
    assert_eq!(store.export_snapshot().tasks, vec![tombstone]);
}

#[test]
fn counters_never_regress_and_new_ids_avoid_both_inputs() {
    let clock = Arc::new(ManualClock::new(start()));
    let mut phone = device_store("phone-100", &clock);
    let mut laptop = device_store("laptop-200", &clock);

    for index in 0..5 {
        phone.add_task(NewTask::new(format!("phone {index}"))).unwrap();
    }
    for index in 0..9 {
        laptop.add_task(NewTask::new(format!("laptop {index}"))).unwrap();
    }
    let local_before = phone.counters();
    let incoming = laptop.export_snapshot();
    let incoming_counters = incoming.counters;
    let mut known: HashSet<EntityId> = incoming.tasks.iter().map(|task| task.id).collect();
    known.extend(phone.export_snapshot().tasks.iter().map(|task| task.id));

    merge_open(&mut phone, incoming);

    let after = phone.counters();
    assert!(after.next_task_id >= local_before.next_task_id.max(incoming_counters.next_task_id));
    assert_eq!(after.next_task_id, 9);
    for index in 0..20 {
        let task = phone.add_task(NewTask::new(format!("after {index}"))).unwrap();
        assert!(known.insert(task.id), "id {} collided", task.id);
    }
}

#[test]
fn clear_existing_adopts_incoming_counters_with_fallback() {
    let clock = Arc::new(ManualClock::new(start()));
    let mut store = device_store("phone-100", &clock);
    for _ in 0..4 {
        store.add_task(NewTask::new("local")).unwrap();
    }
    store.add_note(NewNote::new(1, "local note")).unwrap();

    let snapshot = Snapshot {
        tasks: vec![task_at(5, "remote", start())],
        counters: IdCounters {
            next_task_id: 2,
            next_note_id: 0,
            next_subtask_id: 6,
        },
        ..Snapshot::default()
    };
    let outcome = store
        .import_snapshot(
            snapshot,
            ImportOptions {
                clear_existing: true,
            },
            &SyncGuards::open(),
        )
        .unwrap();

    assert!(outcome.success());
    assert_eq!(store.counts().tasks, 1);
    assert_eq!(store.counts().notes, 0);
    assert_eq!(
        store.counters(),
        IdCounters {
            next_task_id: 2,
            next_note_id: 1,
            next_subtask_id: 6,
        }
    );
}

#[test]
fn import_inside_debounce_window_is_skipped_and_changes_nothing() {
    let clock = Arc::new(ManualClock::new(start()));
    let mut store = device_store("phone-100", &clock);
    let task = store.add_task(NewTask::new("Local edit")).unwrap();
    let edited_at = start();

    let mut remote = task_at(task.id, "Remote overwrite", start() + Duration::hours(1));
    remote.status = TaskStatus::Done;
    let snapshot = Snapshot {
        tasks: vec![remote],
        ..Snapshot::default()
    };
    let guards = SyncGuards {
        last_local_change: Some(edited_at),
        ..SyncGuards::default()
    };

    clock.advance(Duration::seconds(5));
    let outcome = store
        .import_snapshot(snapshot.clone(), ImportOptions::default(), &guards)
        .unwrap();
    assert!(!outcome.success());
    assert!(matches!(
        outcome,
        ImportOutcome::Skipped(SkipReason::RecentLocalEdit { .. })
    ));
    assert!(outcome.message().starts_with("skipped"));
    assert_eq!(store.get_task(task.id).unwrap().title, "Local edit");

    clock.advance(Duration::seconds(6));
    let outcome = store
        .import_snapshot(snapshot, ImportOptions::default(), &guards)
        .unwrap();
    assert!(outcome.success());
    assert_eq!(store.get_task(task.id).unwrap().title, "Remote overwrite");
}

#[test]
fn suspended_sync_skips_import() {
    let clock = Arc::new(ManualClock::new(start()));
    let mut store = device_store("phone-100", &clock);
    let guards = SyncGuards {
        suspended: true,
        ..SyncGuards::default()
    };
    let snapshot = Snapshot {
        tasks: vec![task_at(1, "remote", start())],
        ..Snapshot::default()
    };

    let outcome = store
        .import_snapshot(snapshot, ImportOptions::default(), &guards)
        .unwrap();
    assert_eq!(outcome, ImportOutcome::Skipped(SkipReason::SyncSuspended));
    assert_eq!(store.counts().tasks, 0);
}

#[test]
fn later_delete_beats_earlier_edit_in_either_merge_order() {
    let clock = Arc::new(ManualClock::new(start()));
    let mut phone = device_store("phone-100", &clock);
    let mut laptop = device_store("laptop-200", &clock);

    let task = phone.add_task(NewTask::new("Task X")).unwrap();
    phone.add_note(NewNote::new(task.id, "context")).unwrap();
    merge_open(&mut laptop, phone.export_snapshot());

    clock.advance(Duration::minutes(1));
    phone
        .update_task(
            task.id,
            TaskPatch {
                description: Some("edited on phone".to_string()),
                ..TaskPatch::default()
            },
        )
        .unwrap();
    clock.advance(Duration::minutes(1));
    assert!(laptop.delete_task(task.id).unwrap());

    let phone_snapshot = phone.export_snapshot();
    let laptop_snapshot = laptop.export_snapshot();
    merge_open(&mut phone, laptop_snapshot);
    merge_open(&mut laptop, phone_snapshot);

    for store in [&phone, &laptop] {
        assert_eq!(store.get_task(task.id), None);
        assert!(store.get_notes_by_task_id(task.id).is_empty());
        let snapshot = store.export_snapshot();
        let tombstone = snapshot.tasks.iter().find(|t| t.id == task.id).unwrap();
        assert!(tombstone.deleted);
        assert_eq!(tombstone.deleted_at, Some(start() + Duration::minutes(2)));
    }
}
