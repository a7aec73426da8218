// src/db/schema.rs

//! Journal database schema and migrations
//!
//! Defines the SQLite schema for the two journal tables and provides a
//! migration system to evolve it over time.

use crate::error::Result;
use rusqlite::Connection;
use tracing::{debug, info};

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the schema version tracking table
fn init_schema_version(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;
    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> Result<i32> {
    init_schema_version(conn)?;

    let version = conn
        .query_row(
            "SELECT version FROM schema_version ORDER BY version DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    Ok(version)
}

/// Set the schema version
fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "INSERT INTO schema_version (version) VALUES (?1)",
        [version],
    )?;
    Ok(())
}

/// Apply all pending migrations to bring the database up to date
pub fn migrate(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;
    debug!("Current journal schema version: {}", current_version);

    if current_version >= SCHEMA_VERSION {
        return Ok(());
    }

    for version in (current_version + 1)..=SCHEMA_VERSION {
        info!("Applying journal migration to version {}", version);
        apply_migration(conn, version)?;
        set_schema_version(conn, version)?;
    }

    Ok(())
}

/// Apply a specific migration version
fn apply_migration(conn: &Connection, version: i32) -> Result<()> {
    match version {
        1 => migrate_v1(conn),
        _ => panic!("Unknown migration version: {}", version),
    }
}

/// Initial schema - Version 1
///
/// Creates the two journal tables:
/// - new_files: working-view paths that did not exist in the original tree
/// - historical_files: what happened to each original path, keyed by the
///   original name; the (data, command) index serves inverse-rename lookups
fn migrate_v1(conn: &Connection) -> Result<()> {
    debug!("Creating journal schema version 1");

    conn.execute_batch(
        "
        CREATE TABLE new_files (
            path TEXT PRIMARY KEY,
            command TEXT NOT NULL CHECK(command IN ('create', 'mkdir', 'symlink'))
        );

        CREATE TABLE historical_files (
            path TEXT PRIMARY KEY,
            command TEXT NOT NULL
                CHECK(command IN ('rename', 'erased', 'erased_link', 'rmdir')),
            data
        );

        CREATE INDEX historical_renames ON historical_files (data, command);
        ",
    )?;

    Ok(())
}
