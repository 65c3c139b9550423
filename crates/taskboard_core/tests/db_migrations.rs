use rusqlite::Connection;
use taskboard_core::db::migrations::latest_version;
use taskboard_core::db::{open_db, open_db_in_memory, schema_version, DbError};
use taskboard_core::persistence::PersistenceError;
use taskboard_core::{KeyValueStore, SqliteKeyValueStore};

#[test]
fn open_db_in_memory_applies_all_migrations() {
    let conn = open_db_in_memory().unwrap();

    assert_eq!(schema_version(&conn).unwrap(), latest_version());
    assert_table_exists(&conn, "kv_entries");
}

#[test]
fn opening_same_database_twice_keeps_entries() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("taskboard.sqlite3");

    let first = SqliteKeyValueStore::open(&path).unwrap();
    first.set("taskboard.tasks", "[]").unwrap();
    drop(first);

    let conn = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn).unwrap(), latest_version());
    drop(conn);

    let second = SqliteKeyValueStore::open(&path).unwrap();
    assert_eq!(second.get("taskboard.tasks").unwrap().as_deref(), Some("[]"));
}

#[test]
fn opening_database_with_newer_schema_version_returns_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.sqlite3");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA user_version = 999;").unwrap();
    drop(conn);

    match open_db(&path).unwrap_err() {
        DbError::UnsupportedSchemaVersion {
            db_version,
            latest_supported,
        } => {
            assert_eq!(db_version, 999);
            assert_eq!(latest_supported, latest_version());
        }
        other => panic!("unexpected error: {other}"),
    }
    let message = open_db(&path).unwrap_err().to_string();
    assert!(message.contains("999"), "{message}");
    assert_eq!(schema_version(&Connection::open(&path).unwrap()).unwrap(), 999);

    match SqliteKeyValueStore::open(&path) {
        Err(PersistenceError::Db(DbError::UnsupportedSchemaVersion { .. })) => {}
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("newer schema must be rejected"),
    }
}

#[test]
fn set_many_overwrites_existing_keys() {
    let kv = SqliteKeyValueStore::open_in_memory().unwrap();
    kv.set("taskboard.next_task_id", "1").unwrap();
    kv.set_many(&[
        ("taskboard.next_task_id", "4".to_string()),
        ("taskboard.next_note_id", "2".to_string()),
    ])
    .unwrap();

    assert_eq!(kv.get("taskboard.next_task_id").unwrap().as_deref(), Some("4"));
    assert_eq!(kv.get("taskboard.next_note_id").unwrap().as_deref(), Some("2"));
    assert_eq!(kv.get("taskboard.missing").unwrap(), None);
}

fn assert_table_exists(conn: &Connection, table_name: &str) {
    let exists: i64 = conn
        .query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = 'table' AND name = ?1
            );",
            [table_name],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(exists, 1, "table {table_name} does not exist");
}
