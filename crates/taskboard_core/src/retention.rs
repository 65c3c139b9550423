//! Tombstone retention sweeper.
//!
//! # Invariants
//! - Only tombstones with `deleted_at` older than the retention window are
//!   purged; `now - deleted_at` must strictly exceed the window.
//! - Tombstones lacking `deleted_at` are never purged.

use crate::clock::Clock;
use crate::store::{EntityCounts, LocalStore, StoreResult};
use chrono::{DateTime, Duration, Utc};
use log::{debug, info};
use std::sync::Arc;

pub const DEFAULT_RETENTION_DAYS: i64 = 30;

pub struct RetentionSweeper {
    retention: Duration,
    clock: Arc<dyn Clock>,
}

impl RetentionSweeper {
    pub fn new(retention: Duration, clock: Arc<dyn Clock>) -> Self {
        Self { retention, clock }
    }

    pub fn with_default_window(clock: Arc<dyn Clock>) -> Self {
        Self::new(Duration::days(DEFAULT_RETENTION_DAYS), clock)
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Tombstones deleted strictly before this instant are expired.
    ///
    /// A window reaching past the earliest representable instant expires
    /// nothing.
    pub fn cutoff(&self) -> DateTime<Utc> {
        self.clock
            .now()
            .checked_sub_signed(self.retention)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Purges expired tombstones from `store` (persisting only on change).
    pub fn sweep(&self, store: &mut LocalStore) -> StoreResult<EntityCounts> {
        let cutoff = self.cutoff();
        let removed = store.purge_tombstones(cutoff)?;
        if removed.total() > 0 {
            info!(
                "event=retention_sweep module=retention status=ok purged_tasks={} purged_notes={} purged_subtasks={}",
                removed.tasks, removed.notes, removed.subtasks
            );
        } else {
            debug!("event=retention_sweep module=retention status=ok purged=0");
        }
        Ok(removed)
    }
}
