//! Database migration runner.
//!
//! Migrations run when the store is first opened. Each one is guarded by the
//! `user_version` pragma so it is applied exactly once per database file;
//! later opens find the version already current and skip straight through.
//!
//! Migrations must be additive: a new version may create tables, columns or
//! indexes, but never drops data belonging to collections it does not touch.

pub mod v001_initial;
pub mod v002_labels;

use rusqlite::Connection;

use crate::error::{Result, StoreError};

/// Current schema version.  Bump this and add a new migration module whenever
/// the schema changes.
pub const CURRENT_VERSION: u32 = 2;

type Migration = fn(&Connection) -> std::result::Result<(), rusqlite::Error>;

const MIGRATIONS: [(u32, &str, Migration); 2] = [
    (1, "v001_initial", v001_initial::up),
    (2, "v002_labels", v002_labels::up),
];

/// Run all pending migrations against the open connection.
///
/// Each migration and its version bump commit together, so a failure leaves
/// the database at the last fully applied version.
pub fn run_migrations(conn: &mut Connection) -> Result<()> {
    let current = schema_version(conn)?;

    tracing::info!(
        current_version = current,
        target_version = CURRENT_VERSION,
        "checking database migrations"
    );

    for (version, name, up) in MIGRATIONS {
        if current >= version {
            continue;
        }

        tracing::info!(migration = name, "applying migration");
        let tx = conn.transaction()?;
        up(&tx).map_err(|e| StoreError::Migration(format!("{name}: {e}")))?;
        tx.pragma_update(None, "user_version", version)?;
        tx.commit()?;
    }

    Ok(())
}

/// Read the schema version recorded in the database file.
pub fn schema_version(conn: &Connection) -> Result<u32> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}
