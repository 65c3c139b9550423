use chrono::{TimeZone, Utc};
use std::sync::Arc;
use taskboard_core::{
    check_integrity, DeviceId, EntityKind, KeyValueStore, LocalStore, ManualClock,
    MemoryKeyValueStore, NewNote, NewTask,
};

fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 2, 10, 12, 0, 0).unwrap(),
    ))
}

#[test]
fn orphans_are_removed_and_persisted() {
    let kv = Arc::new(MemoryKeyValueStore::new());
    let clock = clock();
    let orphans = r#"[
        {"id":11,"task_id":404,"content":"lost","created_at":"2024-02-01T00:00:00Z"},
        {"id":12,"task_id":404,"content":"also lost","created_at":"2024-02-01T00:00:00Z"}
    ]"#;
    kv.set("taskboard.notes", orphans).unwrap();
    let subtask_orphan =
        r#"[{"id":21,"task_id":405,"title":"stray","created_at":"2024-02-01T00:00:00Z"}]"#;
    kv.set("taskboard.subtasks", subtask_orphan).unwrap();

    let mut store = LocalStore::open(kv.clone(), clock.clone()).unwrap();
    store.install_device(DeviceId::new("desk-001").unwrap());
    let task = store.add_task(NewTask::new("Anchor")).unwrap();
    let kept = store.add_note(NewNote::new(task.id, "attached")).unwrap();

    let report = check_integrity(&mut store).unwrap();
    assert!(report.duplicates.is_empty());
    assert_eq!(report.orphans_removed.notes, 2);
    assert_eq!(report.orphans_removed.subtasks, 1);
    assert!(!report.is_clean());

    assert_eq!(store.export_snapshot().notes, vec![kept]);
    let persisted = kv.get("taskboard.notes").unwrap().unwrap();
    assert!(!persisted.contains("\"task_id\":404"));

    assert!(check_integrity(&mut store).unwrap().is_clean());
}

#[test]
fn duplicate_ids_are_reported_but_kept() {
    let kv = Arc::new(MemoryKeyValueStore::new());
    let duplicated = r#"[
        {"id":7,"title":"first copy","created_at":"2024-02-01T00:00:00Z"},
        {"id":7,"title":"second copy","created_at":"2024-02-02T00:00:00Z"},
        {"id":8,"title":"unique","created_at":"2024-02-02T00:00:00Z"}
    ]"#;
    kv.set("taskboard.tasks", duplicated).unwrap();
    let mut store = LocalStore::open(kv, clock()).unwrap();

    let report = check_integrity(&mut store).unwrap();
    assert_eq!(report.duplicates, vec![(EntityKind::Task, 7)]);
    assert_eq!(report.orphans_removed.total(), 0);
    assert_eq!(store.export_snapshot().tasks.len(), 3);
}
