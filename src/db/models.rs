// src/db/models.rs

//! Data models for the journal tables
//!
//! This module defines typed accessors for the two journal tables. A path is
//! in `new_files` when it was created after the overlay first observed the
//! tree; it is in `historical_files` when something happened to an original
//! path. At most one row exists per path, in at most one of the tables.

use crate::codec::StatRecord;
use crate::error::{Error, Result};
use crate::paths;
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, params};

/// Creation kind recorded for a new working-view path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateKind {
    Create,
    Mkdir,
    Symlink,
}

impl CreateKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CreateKind::Create => "create",
            CreateKind::Mkdir => "mkdir",
            CreateKind::Symlink => "symlink",
        }
    }

    fn parse(s: &str) -> Result<Self> {
        match s {
            "create" => Ok(CreateKind::Create),
            "mkdir" => Ok(CreateKind::Mkdir),
            "symlink" => Ok(CreateKind::Symlink),
            other => Err(Error::Corrupt(format!("unknown creation kind: {other}"))),
        }
    }
}

/// What happened to an original path in the working view
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    /// The path now lives at a different working-view name
    Rename { to: String },
    /// A regular file was removed; its stat was captured at erase time
    Erased { stat: StatRecord },
    /// A symbolic link was removed; its target text was captured
    ErasedLink { target: String },
    /// A directory was removed; its stat was captured
    Rmdir { stat: StatRecord },
}

fn text_data(path: &str, data: Value) -> Result<String> {
    match data {
        Value::Text(s) => Ok(s),
        Value::Blob(raw) => String::from_utf8(raw)
            .map_err(|_| Error::Corrupt(format!("non-UTF-8 path data for {path}"))),
        other => Err(Error::Corrupt(format!(
            "unexpected journal data type {:?} for {path}",
            other.data_type()
        ))),
    }
}

fn stat_data(path: &str, data: Value) -> Result<StatRecord> {
    match data {
        Value::Blob(raw) => StatRecord::decode(&raw),
        other => Err(Error::Corrupt(format!(
            "unexpected journal data type {:?} for {path}",
            other.data_type()
        ))),
    }
}

fn decode_change(path: &str, command: &str, data: Value) -> Result<Change> {
    match command {
        "rename" => Ok(Change::Rename {
            to: text_data(path, data)?,
        }),
        "erased" => Ok(Change::Erased {
            stat: stat_data(path, data)?,
        }),
        "erased_link" => Ok(Change::ErasedLink {
            target: text_data(path, data)?,
        }),
        "rmdir" => Ok(Change::Rmdir {
            stat: stat_data(path, data)?,
        }),
        other => Err(Error::Corrupt(format!(
            "unknown journal command {other} for {path}"
        ))),
    }
}

/// Accessors for the `new_files` table
pub struct NewFile;

impl NewFile {
    /// Record a path created after first observation
    pub fn insert(conn: &Connection, path: &str, kind: CreateKind) -> Result<()> {
        conn.execute(
            "INSERT INTO new_files (path, command) VALUES (?1, ?2)",
            params![path, kind.as_str()],
        )?;
        Ok(())
    }

    /// Creation kind for a path, if it is new
    pub fn kind(conn: &Connection, path: &str) -> Result<Option<CreateKind>> {
        let command: Option<String> = conn
            .query_row(
                "SELECT command FROM new_files WHERE path = ?1",
                params![path],
                |row| row.get(0),
            )
            .optional()?;
        command.as_deref().map(CreateKind::parse).transpose()
    }

    /// True when the path was created after first observation
    pub fn contains(conn: &Connection, path: &str) -> Result<bool> {
        Ok(Self::kind(conn, path)?.is_some())
    }

    /// Forget a new path (it was removed before ever becoming historical)
    pub fn remove(conn: &Connection, path: &str) -> Result<()> {
        conn.execute("DELETE FROM new_files WHERE path = ?1", params![path])?;
        Ok(())
    }

    /// Move a new path to its new working-view name
    pub fn rename(conn: &Connection, from: &str, to: &str) -> Result<()> {
        conn.execute(
            "UPDATE new_files SET path = ?1 WHERE path = ?2",
            params![to, from],
        )?;
        Ok(())
    }

    /// Names of new entries directly inside `dir`
    pub fn names_under(conn: &Connection, dir: &str) -> Result<Vec<String>> {
        let (lo, hi) = paths::scan_range(dir);
        let mut stmt =
            conn.prepare("SELECT path FROM new_files WHERE path >= ?1 AND path < ?2")?;
        let rows = stmt.query_map(params![lo, hi], |row| row.get::<_, String>(0))?;
        let mut names = Vec::new();
        for row in rows {
            let path = row?;
            if paths::is_direct_child(&lo, &path) {
                names.push(paths::file_name(&path).to_string());
            }
        }
        Ok(names)
    }
}

/// Accessors for the `historical_files` table
pub struct HistoricalFile;

impl HistoricalFile {
    /// The journal record for an original path, if any
    pub fn get(conn: &Connection, path: &str) -> Result<Option<Change>> {
        let row: Option<(String, Value)> = conn
            .query_row(
                "SELECT command, data FROM historical_files WHERE path = ?1",
                params![path],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        match row {
            Some((command, data)) => decode_change(path, &command, data).map(Some),
            None => Ok(None),
        }
    }

    /// Record the first rename of an original path
    pub fn insert_rename(conn: &Connection, path: &str, to: &str) -> Result<()> {
        conn.execute(
            "INSERT OR IGNORE INTO historical_files (path, command, data)
             VALUES (?1, 'rename', ?2)",
            params![path, to],
        )?;
        Ok(())
    }

    /// Point an existing rename record at a newer destination
    pub fn update_rename(conn: &Connection, path: &str, to: &str) -> Result<()> {
        conn.execute(
            "UPDATE historical_files SET data = ?1 WHERE path = ?2 AND command = 'rename'",
            params![to, path],
        )?;
        Ok(())
    }

    /// Drop a rename record (the path returned to its original name)
    pub fn remove_rename(conn: &Connection, path: &str) -> Result<()> {
        conn.execute(
            "DELETE FROM historical_files WHERE path = ?1 AND command = 'rename'",
            params![path],
        )?;
        Ok(())
    }

    /// Record removal of an original regular file
    pub fn insert_erased(conn: &Connection, path: &str, stat: &StatRecord) -> Result<()> {
        conn.execute(
            "INSERT INTO historical_files (path, command, data)
             VALUES (?1, 'erased', ?2)",
            params![path, stat.encode().as_slice()],
        )?;
        Ok(())
    }

    /// Record removal of an original symbolic link
    pub fn insert_erased_link(conn: &Connection, path: &str, target: &str) -> Result<()> {
        conn.execute(
            "INSERT INTO historical_files (path, command, data)
             VALUES (?1, 'erased_link', ?2)",
            params![path, target],
        )?;
        Ok(())
    }

    /// Record removal of an original directory
    pub fn insert_rmdir(conn: &Connection, path: &str, stat: &StatRecord) -> Result<()> {
        conn.execute(
            "INSERT INTO historical_files (path, command, data)
             VALUES (?1, 'rmdir', ?2)",
            params![path, stat.encode().as_slice()],
        )?;
        Ok(())
    }

    /// Original name of the path currently living at `dest`, when `dest` is
    /// the destination of a recorded rename
    pub fn rename_source(conn: &Connection, dest: &str) -> Result<Option<String>> {
        let path = conn
            .query_row(
                "SELECT path FROM historical_files WHERE data = ?1 AND command = 'rename'",
                params![dest],
                |row| row.get(0),
            )
            .optional()?;
        Ok(path)
    }

    /// Names of erased files and removed directories directly inside `dir`
    pub fn removed_names_under(conn: &Connection, dir: &str) -> Result<Vec<String>> {
        let (lo, hi) = paths::scan_range(dir);
        let mut stmt = conn.prepare(
            "SELECT path FROM historical_files
             WHERE path >= ?1 AND path < ?2 AND command IN ('erased', 'erased_link', 'rmdir')",
        )?;
        let rows = stmt.query_map(params![lo, hi], |row| row.get::<_, String>(0))?;
        let mut names = Vec::new();
        for row in rows {
            let path = row?;
            if paths::is_direct_child(&lo, &path) {
                names.push(paths::file_name(&path).to_string());
            }
        }
        Ok(names)
    }

    /// Rename records whose original path sits directly inside `dir`, as
    /// (original path, destination path) pairs
    pub fn renames_under(conn: &Connection, dir: &str) -> Result<Vec<(String, String)>> {
        let (lo, hi) = paths::scan_range(dir);
        let mut stmt = conn.prepare(
            "SELECT path, data FROM historical_files
             WHERE path >= ?1 AND path < ?2 AND command = 'rename'",
        )?;
        let rows = stmt.query_map(params![lo, hi], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Value>(1)?))
        })?;
        let mut renames = Vec::new();
        for row in rows {
            let (path, data) = row?;
            if paths::is_direct_child(&lo, &path) {
                let to = text_data(&path, data)?;
                renames.push((path, to));
            }
        }
        Ok(renames)
    }
}
