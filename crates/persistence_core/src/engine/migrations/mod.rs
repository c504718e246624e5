//! Store layout migrations.
//!
//! # Responsibility
//! - Register engine table-layout migrations in strictly increasing order.
//! - Apply pending migrations inside the caller's transaction.
//!
//! # Invariants
//! - `version` values must remain monotonic.
//! - Applied layout version is mirrored to `PRAGMA user_version`.
//! - Layout migrations never touch object data shape; schema changes are
//!   rejected, not migrated.

use crate::engine::StoreInitializationError;
use rusqlite::Connection;

#[derive(Debug, Clone, Copy)]
struct Migration {
    version: u32,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    sql: include_str!("0001_store_layout.sql"),
}];

/// Returns the latest layout version known by this binary.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map_or(0, |migration| migration.version)
}

/// Applies all pending layout migrations on `conn`.
///
/// The caller owns the surrounding transaction so a later bootstrap failure
/// rolls migrations back too.
pub fn apply_migrations(conn: &Connection) -> Result<(), StoreInitializationError> {
    let current_version = current_user_version(conn)?;
    let latest = latest_version();

    if current_version > latest {
        return Err(StoreInitializationError::UnsupportedFormatVersion {
            db_version: current_version,
            latest_supported: latest,
        });
    }

    for migration in MIGRATIONS {
        if migration.version <= current_version {
            continue;
        }
        conn.execute_batch(migration.sql)?;
        conn.execute_batch(&format!("PRAGMA user_version = {};", migration.version))?;
    }

    Ok(())
}

/// Reads the layout version recorded in the store file.
pub fn current_user_version(conn: &Connection) -> Result<u32, StoreInitializationError> {
    let version = conn.query_row("PRAGMA user_version;", [], |row| row.get::<_, u32>(0))?;
    Ok(version)
}
