//! Versioned schema migrations.
//!
//! Migrations are embedded in the binary and run automatically on startup.
//! The applied version is tracked in `PRAGMA user_version`.

use rusqlite::Connection;
use thiserror::Error;

use super::schema::{BASELINE_SCHEMA, ONE_ISSUED_VOUCHER_PER_USER};

pub struct Migration {
    /// Version number (sequential, starting from 1).
    pub version: i32,
    pub description: &'static str,
    pub up: fn(&Connection) -> rusqlite::Result<()>,
}

/// All migrations in order. Add new migrations to the end of this list.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "baseline schema",
        up: migration_001_baseline,
    },
    Migration {
        version: 2,
        description: "one issued voucher per user and deal",
        up: migration_002_one_issued_voucher_per_user,
    },
];

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Migration {version} failed: {message}")]
    MigrationFailed { version: i32, message: String },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

pub fn get_version(conn: &Connection) -> rusqlite::Result<i32> {
    conn.pragma_query_value(None, "user_version", |row| row.get(0))
}

fn set_version(conn: &Connection, version: i32) -> rusqlite::Result<()> {
    conn.pragma_update(None, "user_version", version)
}

pub fn latest_version() -> i32 {
    MIGRATIONS.iter().map(|m| m.version).max().unwrap_or(0)
}

/// Run pending migrations, each in its own transaction.
pub fn run_migrations(conn: &mut Connection) -> Result<(), MigrationError> {
    let current_version = get_version(conn)?;

    let pending: Vec<_> = MIGRATIONS
        .iter()
        .filter(|m| m.version > current_version)
        .collect();

    if pending.is_empty() {
        tracing::debug!("Database at version {} (up to date)", current_version);
        return Ok(());
    }

    tracing::info!(
        "Database at version {}, {} migration(s) pending",
        current_version,
        pending.len()
    );

    for migration in pending {
        tracing::info!(
            "Running migration {}: {}",
            migration.version,
            migration.description
        );

        let tx = conn.transaction()?;
        match (migration.up)(&tx) {
            Ok(()) => {
                set_version(&tx, migration.version)?;
                tx.commit()?;
            }
            Err(e) => {
                // Transaction rolls back on drop
                tracing::error!("Migration {} failed: {}", migration.version, e);
                return Err(MigrationError::MigrationFailed {
                    version: migration.version,
                    message: e.to_string(),
                });
            }
        }
    }

    Ok(())
}

fn migration_001_baseline(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(BASELINE_SCHEMA)
}

fn migration_002_one_issued_voucher_per_user(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(ONE_ISSUED_VOUCHER_PER_USER)
}
