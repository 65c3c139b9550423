//! Board database schema steps.
//!
//! # Invariants
//! - `MIGRATIONS` is sorted by `version`, starting at 1 without gaps.
//! - All pending steps run in one transaction; a failing step leaves the
//!   file at its previous `user_version`.
//! - A file stamped with a newer version than `latest_version()` is never
//!   touched.

use crate::db::{DbError, DbResult};
use log::info;
use rusqlite::Connection;

#[derive(Debug, Clone, Copy)]
struct Migration {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "kv_entries",
    sql: include_str!("0001_kv_entries.sql"),
}];

/// What one `apply_migrations` call changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    pub from_version: u32,
    pub to_version: u32,
    pub applied: Vec<&'static str>,
}

impl MigrationReport {
    pub fn is_noop(&self) -> bool {
        self.applied.is_empty()
    }
}

/// Highest schema version this build can open.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map_or(0, |migration| migration.version)
}

/// Schema version stamped in the file header (`PRAGMA user_version`).
pub fn schema_version(conn: &Connection) -> DbResult<u32> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get::<_, u32>(0))?)
}

/// Brings `conn` up to `latest_version()`.
///
/// # Errors
/// - `UnsupportedSchemaVersion` when the file is newer than this build.
/// - `Migration` naming the step whose SQL failed.
pub fn apply_migrations(conn: &mut Connection) -> DbResult<MigrationReport> {
    run_steps(conn, MIGRATIONS)
}

fn run_steps(conn: &mut Connection, steps: &[Migration]) -> DbResult<MigrationReport> {
    let from_version = schema_version(conn)?;
    let latest = steps.last().map_or(0, |step| step.version);
    if from_version > latest {
        return Err(DbError::UnsupportedSchemaVersion {
            db_version: from_version,
            latest_supported: latest,
        });
    }

    let pending: Vec<&Migration> = steps
        .iter()
        .filter(|step| step.version > from_version)
        .collect();
    let mut report = MigrationReport {
        from_version,
        to_version: from_version,
        applied: Vec::with_capacity(pending.len()),
    };
    if pending.is_empty() {
        return Ok(report);
    }

    let tx = conn.transaction()?;
    for step in pending {
        tx.execute_batch(step.sql)
            .map_err(|source| DbError::Migration {
                version: step.version,
                name: step.name,
                source,
            })?;
        tx.pragma_update(None, "user_version", step.version)?;
        report.to_version = step.version;
        report.applied.push(step.name);
    }
    tx.commit()?;

    info!(
        "event=db_migrate module=db status=ok from_version={} to_version={} applied={}",
        report.from_version,
        report.to_version,
        report.applied.join(",")
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::{apply_migrations, latest_version, run_steps, schema_version, Migration, MIGRATIONS};
    use crate::db::DbError;
    use rusqlite::Connection;

    #[test]
    fn registry_versions_are_contiguous_from_one() {
        for (index, step) in MIGRATIONS.iter().enumerate() {
            assert_eq!(step.version as usize, index + 1, "step {}", step.name);
        }
        assert_eq!(latest_version() as usize, MIGRATIONS.len());
    }

    #[test]
    fn fresh_file_applies_every_step_once() {
        let mut conn = Connection::open_in_memory().expect("in-memory db");

        let first = apply_migrations(&mut conn).expect("first run");
        assert_eq!(first.from_version, 0);
        assert_eq!(first.to_version, latest_version());
        assert_eq!(first.applied, vec!["kv_entries"]);

        let second = apply_migrations(&mut conn).expect("second run");
        assert!(second.is_noop());
        assert_eq!(schema_version(&conn).expect("version"), latest_version());
    }

    #[test]
    fn failing_step_is_named_and_rolls_back() {
        let mut conn = Connection::open_in_memory().expect("in-memory db");
        let steps = [
            Migration {
                version: 1,
                name: "kv_entries",
                sql: MIGRATIONS[0].sql,
            },
            Migration {
                version: 2,
                name: "broken_index",
                sql: "CREATE INDEX idx_missing ON no_such_table (key);",
            },
        ];

        match run_steps(&mut conn, &steps).expect_err("second step must fail") {
            DbError::Migration { version, name, .. } => {
                assert_eq!(version, 2);
                assert_eq!(name, "broken_index");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(schema_version(&conn).expect("version"), 0);
    }
}
