use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Arc;
use taskboard_core::{
    DeviceId, EntityId, KeyValueStore, LocalStore, ManualClock, MemoryKeyValueStore, NewNote, NewSubtask,
    NewTask, RetentionSweeper,
};

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap()
}

fn store_with(kv: Arc<MemoryKeyValueStore>, clock: &Arc<ManualClock>) -> LocalStore {
    let store = LocalStore::open(kv, clock.clone()).unwrap();
    store.install_device(DeviceId::new("tablet-330").unwrap());
    store
}

#[test]
fn tombstones_older_than_window_are_purged_and_younger_survive() {
    let kv = Arc::new(MemoryKeyValueStore::new());
    let clock = Arc::new(ManualClock::new(start()));
    let mut store = store_with(kv.clone(), &clock);

    let old = store.add_task(NewTask::new("Deleted long ago")).unwrap();
    store.add_note(NewNote::new(old.id, "old note")).unwrap();
    store.delete_task(old.id).unwrap();

    clock.advance(Duration::days(2));
    let recent = store.add_task(NewTask::new("Deleted recently")).unwrap();
    store.add_subtask(NewSubtask::new(recent.id, "step")).unwrap();
    store.delete_task(recent.id).unwrap();
    let live = store.add_task(NewTask::new("Still here")).unwrap();

    // old: deleted 31 days ago, recent: deleted 29 days ago.
    clock.advance(Duration::days(29));
    let sweeper = RetentionSweeper::with_default_window(clock.clone());
    let removed = sweeper.sweep(&mut store).unwrap();

    assert_eq!(removed.tasks, 1);
    assert_eq!(removed.notes, 1);
    assert_eq!(removed.subtasks, 0);

    let snapshot = store.export_snapshot();
    let ids: Vec<EntityId> = snapshot.tasks.iter().map(|task| task.id).collect();
    assert_eq!(ids, vec![recent.id, live.id]);
    assert_eq!(snapshot.subtasks.len(), 1);

    let reopened = store_with(kv, &clock);
    assert_eq!(reopened.export_snapshot().tasks.len(), 2);
}

#[test]
fn sweep_without_expired_tombstones_does_not_write() {
    let kv = Arc::new(MemoryKeyValueStore::new());
    let clock = Arc::new(ManualClock::new(start()));
    let mut store = store_with(kv.clone(), &clock);
    let task = store.add_task(NewTask::new("Fresh")).unwrap();
    store.delete_task(task.id).unwrap();
    let writes = kv.write_count();

    clock.advance(Duration::days(30));
    let sweeper = RetentionSweeper::with_default_window(clock.clone());
    let removed = sweeper.sweep(&mut store).unwrap();

    assert_eq!(removed.total(), 0);
    assert_eq!(kv.write_count(), writes);
}

#[test]
fn legacy_tombstones_without_deleted_at_are_kept() {
    let kv = Arc::new(MemoryKeyValueStore::new());
    let legacy = format!(
        r#"[{{"id":5,"title":"legacy","created_at":"{}","deleted":true}}]"#,
        start().to_rfc3339()
    );
    kv.set("taskboard.tasks", &legacy).unwrap();
    let clock = Arc::new(ManualClock::new(start() + Duration::days(365)));
    let mut store = store_with(kv, &clock);

    let sweeper = RetentionSweeper::with_default_window(clock.clone());
    assert_eq!(sweeper.sweep(&mut store).unwrap().total(), 0);
    assert_eq!(store.export_snapshot().tasks.len(), 1);
    assert_eq!(store.counts().tasks, 0);
}

#[test]
fn window_longer_than_the_calendar_purges_nothing() {
    let kv = Arc::new(MemoryKeyValueStore::new());
    let clock = Arc::new(ManualClock::new(start()));
    let mut store = store_with(kv, &clock);
    let task = store.add_task(NewTask::new("Deleted")).unwrap();
    store.delete_task(task.id).unwrap();
    clock.advance(Duration::days(10_000));

    let sweeper = RetentionSweeper::new(Duration::MAX, clock.clone());
    assert_eq!(sweeper.cutoff(), DateTime::<Utc>::MIN_UTC);
    assert_eq!(sweeper.sweep(&mut store).unwrap().total(), 0);
    assert_eq!(store.export_snapshot().tasks.len(), 1);

    let sweeper = RetentionSweeper::new(Duration::days(i64::from(u32::MAX)), clock.clone());
    assert_eq!(sweeper.sweep(&mut store).unwrap().total(), 0);
}
