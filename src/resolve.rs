// src/resolve.rs

//! File-info resolution
//!
//! Given a path in either view, work out what it is: new, historical,
//! renamed, removed, or plain live. The resolved record is attached to open
//! handles so reads and writes know which block store holds the path's
//! pre-images and where the live bytes are. It is idempotently recomputable
//! from the journal.

use crate::blocks::BlockMap;
use crate::db::{Change, HistoricalFile, Journal, NewFile};
use crate::error::{Error, Result};
use crate::paths::{self, PathClass};
use std::fs;
use std::path::Path;

/// Resolved identity of one path
#[derive(Debug)]
pub struct FileInfo {
    /// The path addresses the original view
    pub is_original: bool,
    /// The working-view path was created after first observation
    pub is_new: bool,
    /// Journal record for the original path, when one exists
    pub change: Option<Change>,
    /// Original name: the key under which pre-image blocks are stored
    pub oldpath: String,
    /// Working-view location of the live bytes (follows renames for the
    /// original view)
    pub newpath: String,
    /// Pre-image store, attached when the path can carry saved blocks
    pub blocks: Option<BlockMap>,
}

impl FileInfo {
    /// The original path was removed (erased, erased_link or rmdir)
    pub fn removed(&self) -> bool {
        matches!(
            self.change,
            Some(Change::Erased { .. }) | Some(Change::ErasedLink { .. }) | Some(Change::Rmdir { .. })
        )
    }
}

fn is_live_regular_file(origin: &Path, path: &str) -> bool {
    fs::symlink_metadata(paths::live_path(origin, path))
        .map(|meta| meta.file_type().is_file())
        .unwrap_or(false)
}

/// Resolve `path` against the journal and the live tree
pub fn resolve(journal: &Journal, origin: &Path, filedata: &Path, path: &str) -> Result<FileInfo> {
    let conn = journal.conn();
    match paths::classify(path) {
        PathClass::Reserved => Err(Error::errno(libc::ENOENT)),
        PathClass::Working => {
            let is_new = NewFile::contains(conn, path)?;
            let oldpath = HistoricalFile::rename_source(conn, path)?
                .unwrap_or_else(|| path.to_string());
            // a new path never has pre-images; the write path needs the
            // store created and ready for everything else
            let blocks = if !is_new && is_live_regular_file(origin, path) {
                Some(BlockMap::open(filedata, &oldpath)?)
            } else {
                None
            };
            Ok(FileInfo {
                is_original: false,
                is_new,
                change: None,
                oldpath,
                newpath: path.to_string(),
                blocks,
            })
        }
        PathClass::Original(subject) => {
            if paths::classify(&subject) == PathClass::Reserved {
                return Err(Error::errno(libc::ENOENT));
            }
            let change = HistoricalFile::get(conn, &subject)?;
            let newpath = match &change {
                Some(Change::Rename { to }) => to.clone(),
                _ => subject.clone(),
            };
            let blocks = match &change {
                // removal of a regular file captured its whole pre-image
                Some(Change::Erased { .. }) => BlockMap::open_if_exists(filedata, &subject)?,
                Some(Change::ErasedLink { .. }) | Some(Change::Rmdir { .. }) => None,
                Some(Change::Rename { .. }) | None => {
                    if is_live_regular_file(origin, &newpath) {
                        BlockMap::open_if_exists(filedata, &subject)?
                    } else {
                        None
                    }
                }
            };
            Ok(FileInfo {
                is_original: true,
                is_new: false,
                change,
                oldpath: subject,
                newpath,
                blocks,
            })
        }
    }
}
