// src/db/mod.rs

//! Journal store
//!
//! A thin wrapper over SQLite holding the two journal tables. All access is
//! single-threaded; mutation handlers bracket their statements in a named
//! savepoint scope that rolls back on drop unless committed, so a failed
//! live mutation never leaves journal records behind.

pub mod models;
pub mod schema;

pub use models::{Change, CreateKind, HistoricalFile, NewFile};

use crate::error::Result;
use rusqlite::{Connection, Savepoint};
use std::path::Path;
use tracing::debug;

/// Handle to the journal database
pub struct Journal {
    conn: Connection,
}

impl Journal {
    /// Open (creating if needed) the journal database at `path` and bring
    /// its schema up to date
    pub fn open(path: &Path) -> Result<Self> {
        debug!("Opening journal store at {}", path.display());
        let conn = Connection::open(path)?;
        // journal_mode returns the resulting mode as a row
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
        conn.execute_batch("PRAGMA synchronous = NORMAL;")?;
        schema::migrate(&conn)?;
        Ok(Journal { conn })
    }

    /// Read-only access for queries
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Begin a transaction scope. The returned savepoint dereferences to the
    /// connection for enclosed statements; it rolls back on drop and is
    /// released into the outer transaction by `commit`.
    pub fn savepoint(&mut self) -> Result<Savepoint<'_>> {
        Ok(self.conn.savepoint()?)
    }
}
