//! Local key-value persistence adapter.
//!
//! # Responsibility
//! - Define the durable `get`/`set` contract the local store writes through.
//! - Own the fixed set of namespaced keys used on disk.
//!
//! # Invariants
//! - Values are opaque UTF-8 strings (JSON for collections, decimal for
//!   counters).
//! - A failed `set`/`set_many` is reported to the caller, never swallowed.

use crate::db::DbError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod memory_kv;
pub mod sqlite_kv;

pub use memory_kv::MemoryKeyValueStore;
pub use sqlite_kv::SqliteKeyValueStore;

/// Namespaced keys, one per collection and one per id counter.
pub mod keys {
    pub const TASKS: &str = "taskboard.tasks";
    pub const NOTES: &str = "taskboard.notes";
    pub const SUBTASKS: &str = "taskboard.subtasks";
    pub const NEXT_TASK_ID: &str = "taskboard.next_task_id";
    pub const NEXT_NOTE_ID: &str = "taskboard.next_note_id";
    pub const NEXT_SUBTASK_ID: &str = "taskboard.next_subtask_id";
    pub const DEVICE_ID: &str = "taskboard.device_id";
}

pub type PersistenceResult<T> = Result<T, PersistenceError>;

#[derive(Debug)]
pub enum PersistenceError {
    Db(DbError),
    /// Backend refused the operation (e.g. injected failure, read-only medium).
    Unavailable(String),
}

impl Display for PersistenceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Unavailable(message) => write!(f, "persistence unavailable: {message}"),
        }
    }
}

impl Error for PersistenceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Unavailable(_) => None,
        }
    }
}

impl From<DbError> for PersistenceError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for PersistenceError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Durable local key-value storage.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> PersistenceResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> PersistenceResult<()>;

    /// Writes several entries. Implementations should make this atomic.
    fn set_many(&self, entries: &[(&str, String)]) -> PersistenceResult<()> {
        for (key, value) in entries {
            self.set(key, value)?;
        }
        Ok(())
    }
}
