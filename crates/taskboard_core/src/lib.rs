//! Offline-first sync core for the task board.
//! The local store is the source of truth; cloud sync is best-effort.

pub mod backup;
pub mod clock;
pub mod config;
pub mod db;
pub mod identity;
pub mod integrity;
pub mod logging;
pub mod model;
pub mod persistence;
pub mod retention;
pub mod runtime;
pub mod store;
pub mod sync;

pub use backup::{
    export_document, parse_document, restore_document, BackupError, ExportDocument,
    ExportMetadata,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, CoreConfig, LoggingConfig, StorageConfig, SyncConfig};
pub use identity::{DeviceId, IdGenerator};
pub use integrity::{check_integrity, IntegrityReport};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::{
    EntityId, EntityKind, NewNote, NewSubtask, NewTask, Note, NotePatch, Priority, Snapshot,
    Subtask, SubtaskPatch, SyncEnvelope, Task, TaskPatch, TaskStatus,
};
pub use persistence::{KeyValueStore, MemoryKeyValueStore, PersistenceError, SqliteKeyValueStore};
pub use retention::RetentionSweeper;
pub use runtime::{RuntimeError, TaskboardRuntime};
pub use store::{
    EntityCounts, LocalStore, SharedStore, StoreChange, StoreError, StoreResult, TaskQuery,
    TaskSort,
};
pub use sync::{
    CloudSyncProvider, ImportOptions, ImportOutcome, ProviderError, SyncOrchestrator,
    SyncOutcome, SyncSettings, SyncStatus, SyncTrigger,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
