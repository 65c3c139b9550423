//! SQLite-backed key-value store.
//!
//! # Invariants
//! - `set_many` commits all entries in one transaction or none.
//! - `updated_at` is refreshed on every overwrite.

use super::{KeyValueStore, PersistenceResult};
use crate::db::{open_db, open_db_in_memory};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

const UPSERT_SQL: &str = "INSERT INTO kv_entries (key, value, updated_at)
     VALUES (?1, ?2, strftime('%s', 'now') * 1000)
     ON CONFLICT(key) DO UPDATE SET
        value = excluded.value,
        updated_at = excluded.updated_at;";

pub struct SqliteKeyValueStore {
    conn: Mutex<Connection>,
}

impl SqliteKeyValueStore {
    /// Opens (or creates) the database file and applies migrations.
    pub fn open(path: impl AsRef<Path>) -> PersistenceResult<Self> {
        Ok(Self::from_connection(open_db(path)?))
    }

    pub fn open_in_memory() -> PersistenceResult<Self> {
        Ok(Self::from_connection(open_db_in_memory()?))
    }

    /// Wraps an already migrated connection.
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // A panic mid-statement leaves SQLite itself consistent.
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl KeyValueStore for SqliteKeyValueStore {
    fn get(&self, key: &str) -> PersistenceResult<Option<String>> {
        let conn = self.conn();
        let value = conn
            .query_row(
                "SELECT value FROM kv_entries WHERE key = ?1;",
                [key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> PersistenceResult<()> {
        let conn = self.conn();
        conn.execute(UPSERT_SQL, params![key, value])?;
        Ok(())
    }

    fn set_many(&self, entries: &[(&str, String)]) -> PersistenceResult<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(UPSERT_SQL)?;
            for (key, value) in entries {
                stmt.execute(params![key, value])?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::SqliteKeyValueStore;
    use crate::persistence::KeyValueStore;

    #[test]
    fn get_returns_none_for_missing_key() {
        let store = SqliteKeyValueStore::open_in_memory().expect("in-memory db should open");
        assert_eq!(store.get("missing").expect("get should succeed"), None);
    }

    #[test]
    fn set_overwrites_existing_value() {
        let store = SqliteKeyValueStore::open_in_memory().expect("in-memory db should open");
        store.set("k", "one").expect("first set");
        store.set("k", "two").expect("second set");
        assert_eq!(store.get("k").expect("get").as_deref(), Some("two"));
    }

    #[test]
    fn set_many_writes_every_entry() {
        let store = SqliteKeyValueStore::open_in_memory().expect("in-memory db should open");
        store
            .set_many(&[("a", "1".to_string()), ("b", "2".to_string())])
            .expect("set_many should commit");
        assert_eq!(store.get("a").expect("get a").as_deref(), Some("1"));
        assert_eq!(store.get("b").expect("get b").as_deref(), Some("2"));
    }
}
