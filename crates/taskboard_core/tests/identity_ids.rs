use chrono::{Duration, TimeZone, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use taskboard_core::identity::resolve_device_id;
use taskboard_core::model::IdCounters;
use taskboard_core::persistence::keys;
use taskboard_core::{
    Clock, DeviceId, EntityId, EntityKind, IdGenerator, KeyValueStore, LocalStore, ManualClock,
    MemoryKeyValueStore, NewTask, SqliteKeyValueStore, SyncEnvelope,
};

fn generator(clock: Arc<ManualClock>, device: &str) -> IdGenerator {
    let ids = IdGenerator::new(clock, IdCounters::default());
    assert!(ids.install_device(DeviceId::new(device).unwrap()));
    ids
}

#[test]
fn interleaved_ids_from_two_devices_never_collide() {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap(),
    ));
    let mut phone = generator(clock.clone(), "phone-311");
    let mut laptop = generator(clock.clone(), "laptop-742");

    let mut seen = HashSet::new();
    for round in 0..2_000 {
        // Several ids share each millisecond.
        if round % 7 == 0 {
            clock.advance(Duration::milliseconds(1));
        }
        for kind in EntityKind::ALL {
            assert!(seen.insert((kind, phone.next_id(kind))));
            assert!(seen.insert((kind, laptop.next_id(kind))));
        }
    }
    assert_eq!(seen.len(), 2_000 * 2 * EntityKind::ALL.len());
}

#[test]
fn same_instant_ids_differ_only_in_device_and_counter_digits() {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap(),
    ));
    let mut phone = generator(clock.clone(), "phone-311");
    let mut laptop = generator(clock.clone(), "laptop-742");

    let a = phone.next_id(EntityKind::Task);
    let b = laptop.next_id(EntityKind::Task);
    assert_ne!(a, b);
    assert_eq!(a / 10u128.pow(15), b / 10u128.pow(15));
    assert_eq!((a / 1_000_000) % 1_000_000_000, phone.device().numeric_segment());
    assert_eq!((b / 1_000_000) % 1_000_000_000, laptop.device().numeric_segment());
}

#[test]
fn devices_sharing_trailing_digits_mint_distinct_ids() {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap(),
    ));
    let mut phone = generator(clock.clone(), "phone-1001");
    let mut tablet = generator(clock.clone(), "tablet-2001");
    let mut watch = generator(clock.clone(), "watch-1");
    let mut kiosk = generator(clock.clone(), "kiosk-1");

    let ids: HashSet<EntityId> = [&mut phone, &mut tablet, &mut watch, &mut kiosk]
        .into_iter()
        .map(|ids| ids.next_id(EntityKind::Task))
        .collect();
    assert_eq!(ids.len(), 4);
}

#[test]
fn random_devices_mint_distinct_ids_at_the_same_instant() {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap(),
    ));
    let ids: HashSet<EntityId> = (0..100)
        .map(|_| {
            let mut ids = IdGenerator::new(clock.clone(), IdCounters::default());
            assert!(ids.install_device(DeviceId::random()));
            ids.next_id(EntityKind::Note)
        })
        .collect();
    assert_eq!(ids.len(), 100);
}

#[test]
fn generated_ids_survive_the_sync_envelope_wire_format() {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap(),
    ));
    let mut store = LocalStore::open(Arc::new(MemoryKeyValueStore::new()), clock.clone()).unwrap();
    store.install_device(DeviceId::new("phone-1001").unwrap());
    let task = store.add_task(NewTask::new("Wire")).unwrap();
    assert!(task.id > EntityId::from(u64::MAX));

    let envelope = SyncEnvelope::stamp(store.export_snapshot(), clock.now(), "phone-1001");
    let raw = serde_json::to_string(&envelope).unwrap();
    assert!(raw.contains(&format!("\"id\":{}", task.id)));

    let decoded: SyncEnvelope = serde_json::from_str(&raw).unwrap();
    assert_eq!(decoded, envelope);
    assert_eq!(decoded.snapshot.tasks[0].id, task.id);
}

#[test]
fn counters_are_independent_per_kind() {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap(),
    ));
    let mut ids = generator(clock, "device-5");
    ids.next_id(EntityKind::Task);
    ids.next_id(EntityKind::Task);
    ids.next_id(EntityKind::Note);

    let counters = ids.counters();
    assert_eq!(counters.next_task_id, 2);
    assert_eq!(counters.next_note_id, 1);
    assert_eq!(counters.next_subtask_id, 0);
}

#[test]
fn id_generation_works_before_device_is_installed() {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap(),
    ));
    let mut ids = IdGenerator::new(clock, IdCounters::default());

    let first = ids.next_id(EntityKind::Subtask);
    let second = ids.next_id(EntityKind::Subtask);
    assert_ne!(first, second);
    assert!(ids.device().as_str().starts_with("emergency-"));
    assert!(!ids.install_device(DeviceId::new("late-123").unwrap()));
}

#[test]
fn device_id_prefers_persisted_then_platform_then_random() {
    let kv = MemoryKeyValueStore::new();
    let first = resolve_device_id(&kv, Some("ios-vendor-998")).unwrap();
    assert_eq!(first.as_str(), "ios-vendor-998");

    let again = resolve_device_id(&kv, Some("something-else")).unwrap();
    assert_eq!(again, first);

    let blank_platform = MemoryKeyValueStore::new();
    let random = resolve_device_id(&blank_platform, Some("   ")).unwrap();
    assert!(random.as_str().starts_with("device-"));
    assert_eq!(
        blank_platform.get(keys::DEVICE_ID).unwrap().as_deref(),
        Some(random.as_str())
    );
}

#[test]
fn device_id_survives_reopening_the_database() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ids.sqlite3");

    let first = {
        let kv = SqliteKeyValueStore::open(&path).unwrap();
        resolve_device_id(&kv, None).unwrap()
    };
    let kv = SqliteKeyValueStore::open(&path).unwrap();
    let second = resolve_device_id(&kv, None).unwrap();
    assert_eq!(first, second);
}
