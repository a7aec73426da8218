// src/overlay/original.rs

//! Original-view reader
//!
//! Reconstructs the tree as it was first observed by merging the live tree
//! with the journal. Paths arriving here are already stripped of the
//! `/.original` prefix. Nothing in this module mutates anything.

use crate::blocks::{BLOCK_SIZE, BlockMap};
use crate::codec::{FileKind, StatRecord};
use crate::db::{Change, HistoricalFile, NewFile};
use crate::error::{Error, Result};
use crate::overlay::{Handle, Overlay};
use crate::paths::{self, PathClass};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;

/// Override a live regular file's size with the captured original size
fn original_size_override(overlay: &Overlay, subject: &str, st: &mut StatRecord) -> Result<()> {
    if let Some(map) = BlockMap::open_if_exists(&overlay.filedata, subject)? {
        if let Some(size) = map.original_size {
            st.size = size as i64;
        }
    }
    Ok(())
}

/// stat an original-view path
pub(crate) fn getattr(overlay: &Overlay, subject: &str) -> Result<StatRecord> {
    if paths::classify(subject) == PathClass::Reserved {
        return Err(Error::errno(libc::ENOENT));
    }
    let conn = overlay.journal.conn();
    match HistoricalFile::get(conn, subject)? {
        Some(Change::Rename { to }) => {
            let meta = fs::symlink_metadata(paths::live_path(&overlay.origin, &to))?;
            let mut st = StatRecord::from_metadata(&meta);
            if meta.file_type().is_file() {
                original_size_override(overlay, subject, &mut st)?;
            }
            Ok(st)
        }
        Some(Change::Erased { stat }) => {
            let mut st = stat.with_kind(FileKind::Regular);
            original_size_override(overlay, subject, &mut st)?;
            Ok(st)
        }
        Some(Change::ErasedLink { target }) => Ok(StatRecord::for_erased_link(target.len())),
        Some(Change::Rmdir { stat }) => Ok(stat.with_kind(FileKind::Directory)),
        None => {
            let meta = fs::symlink_metadata(paths::live_path(&overlay.origin, subject))?;
            if NewFile::contains(conn, subject)? {
                // created after observation: it has no original projection
                return Err(Error::errno(libc::ENOENT));
            }
            if HistoricalFile::rename_source(conn, subject)?.is_some() {
                // the live entry here is some other path's rename target
                return Err(Error::errno(libc::ENOENT));
            }
            let mut st = StatRecord::from_metadata(&meta);
            if meta.file_type().is_file() {
                original_size_override(overlay, subject, &mut st)?;
            }
            Ok(st)
        }
    }
}

/// List the names the original directory `subject` contained.
///
/// Three journal-derived sets drive the merge with the live listing:
/// removed names (live entry gone), renamed names (live entry present under
/// a different name), and new names (live entry that never existed
/// originally, suppressed).
pub(crate) fn readdir(overlay: &Overlay, subject: &str) -> Result<Vec<String>> {
    if paths::classify(subject) == PathClass::Reserved {
        return Err(Error::errno(libc::ENOENT));
    }
    let conn = overlay.journal.conn();

    let mut removed: BTreeSet<String> =
        HistoricalFile::removed_names_under(conn, subject)?.into_iter().collect();

    // current basename -> original basenames for same-directory renames;
    // a rename that left the directory can never match a live entry here
    let mut renamed: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut moved_away: Vec<String> = Vec::new();
    for (orig, dest) in HistoricalFile::renames_under(conn, subject)? {
        let orig_name = paths::file_name(&orig).to_string();
        if paths::parent(&dest) == subject {
            renamed
                .entry(paths::file_name(&dest).to_string())
                .or_default()
                .push(orig_name);
        } else {
            moved_away.push(orig_name);
        }
    }

    let new_names: BTreeSet<String> =
        NewFile::names_under(conn, subject)?.into_iter().collect();

    // the directory itself may live under a different name now
    let live_dir = match HistoricalFile::get(conn, subject)? {
        Some(Change::Rename { to }) => to,
        _ => subject.to_string(),
    };

    let mut names = Vec::new();
    if let Ok(entries) = fs::read_dir(paths::live_path(&overlay.origin, &live_dir)) {
        for entry in entries.flatten() {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if subject == "/" && name == paths::COW_DIR_NAME {
                continue;
            }
            if let Some(orig_names) = renamed.remove(&name) {
                names.extend(orig_names);
            } else if removed.remove(&name) {
                // recorded as removed yet still live; surface it anyway
                names.push(name);
            } else if !new_names.contains(&name) {
                names.push(name);
            }
        }
    }
    names.extend(removed);
    names.extend(renamed.into_values().flatten());
    names.extend(moved_away);
    Ok(names)
}

/// Read original bytes: saved pre-image blocks win, untouched ranges come
/// from the live file. A blob shorter than a full block is the original end
/// of file.
pub(crate) fn read(handle: &Handle, offset: u64, size: u32) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(size as usize);
    let mut offset = offset;
    let mut remaining = size as u64;

    while remaining > 0 {
        let block = offset / BLOCK_SIZE * BLOCK_SIZE;
        let within = (offset - block) as usize;

        let stored = match &handle.info.blocks {
            Some(map) => map.store.read_block(block)?,
            None => None,
        };
        match stored {
            Some(data) => {
                if within >= data.len() {
                    break;
                }
                let n = ((data.len() - within) as u64).min(remaining) as usize;
                out.extend_from_slice(&data[within..within + n]);
                offset += n as u64;
                remaining -= n as u64;
                if data.len() < BLOCK_SIZE as usize {
                    break;
                }
            }
            None => {
                let file = handle.file.as_ref().ok_or_else(|| {
                    Error::Corrupt("original data missing from both journal and live tree".into())
                })?;
                let want = remaining.min(BLOCK_SIZE - within as u64) as usize;
                let mut buf = vec![0u8; want];
                let n = crate::blocks::read_full_at(file, &mut buf, offset)?;
                out.extend_from_slice(&buf[..n]);
                offset += n as u64;
                remaining -= n as u64;
                if n < want {
                    break;
                }
            }
        }
    }
    Ok(out)
}

/// Resolve an original-view symlink target
pub(crate) fn readlink(overlay: &Overlay, subject: &str) -> Result<Vec<u8>> {
    use std::os::unix::ffi::OsStrExt;
    if paths::classify(subject) == PathClass::Reserved {
        return Err(Error::errno(libc::ENOENT));
    }
    let conn = overlay.journal.conn();
    match HistoricalFile::get(conn, subject)? {
        Some(Change::ErasedLink { target }) => Ok(target.into_bytes()),
        Some(Change::Rename { to }) => {
            let target = fs::read_link(paths::live_path(&overlay.origin, &to))?;
            Ok(target.as_os_str().as_bytes().to_vec())
        }
        Some(_) => Err(Error::errno(libc::EINVAL)),
        None => {
            let target = fs::read_link(paths::live_path(&overlay.origin, subject))?;
            Ok(target.as_os_str().as_bytes().to_vec())
        }
    }
}
