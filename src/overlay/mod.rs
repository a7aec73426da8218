// src/overlay/mod.rs

//! Overlay core: the mutation pipeline and view dispatch
//!
//! Path-addressed filesystem operations over an origin directory. The
//! working view mutates the origin tree directly; before any byte or entry
//! of an original path changes, just enough pre-image is captured into the
//! sidecar journal to reconstruct the original view later.
//!
//! Every mutation handler runs inside a savepoint scope on the journal:
//! pre-image capture and journal bookkeeping happen first, then the live
//! syscall. If the live syscall fails the scope is dropped and the journal
//! rolls back, so the journal never describes a mutation that did not
//! happen. Control flow is strictly one request at a time.

mod original;

use crate::blocks::{self, BlockMap};
use crate::codec::StatRecord;
use crate::db::{CreateKind, HistoricalFile, Journal, NewFile};
use crate::error::{Error, Result};
use crate::paths::{self, PathClass};
use crate::resolve::{self, FileInfo};
use fs2::FileExt as _;
use std::fs::{self, File, OpenOptions};
use std::os::unix::fs::{DirBuilderExt, FileExt as _, OpenOptionsExt};
use std::path::{Path, PathBuf};
use tracing::info;

/// An open file: the live descriptor (when the live file exists) plus the
/// resolved identity it was opened under
#[derive(Debug)]
pub struct Handle {
    pub(crate) file: Option<File>,
    pub(crate) info: FileInfo,
}

impl Handle {
    /// The handle addresses the read-only original view
    pub fn is_original(&self) -> bool {
        self.info.is_original
    }
}

/// The copy-on-write overlay over one origin directory
pub struct Overlay {
    pub(crate) origin: PathBuf,
    pub(crate) filedata: PathBuf,
    pub(crate) journal: Journal,
    _lock: File,
}

impl Overlay {
    /// Open the overlay for `origin`, creating the sidecar on first start.
    /// Takes an exclusive lock so two overlays never share an origin.
    pub fn new(origin: impl AsRef<Path>) -> Result<Self> {
        let origin = origin.as_ref().canonicalize()?;
        fs::create_dir_all(paths::cow_dir(&origin))?;
        let filedata = paths::filedata_dir(&origin);
        fs::create_dir_all(&filedata)?;

        let lock = File::create(paths::lock_path(&origin))?;
        lock.try_lock_exclusive()
            .map_err(|_| Error::AlreadyMounted(origin.display().to_string()))?;

        let journal = Journal::open(&paths::history_db_path(&origin))?;
        info!("overlay ready on {}", origin.display());
        Ok(Overlay {
            origin,
            filedata,
            journal,
            _lock: lock,
        })
    }

    /// The journal store (exposed for diagnostics and tests)
    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    fn live(&self, path: &str) -> PathBuf {
        paths::live_path(&self.origin, path)
    }

    fn resolve(&self, path: &str) -> Result<FileInfo> {
        resolve::resolve(&self.journal, &self.origin, &self.filedata, path)
    }

    /// Refuse mutations addressed at the reserved sidecar or the read-only
    /// original view
    fn check_writable(path: &str) -> Result<()> {
        match paths::classify(path) {
            PathClass::Working => Ok(()),
            _ => Err(Error::errno(libc::EACCES)),
        }
    }

    // ------------------------------------------------------------------
    // lookups and reads

    /// stat either view of `path`
    pub fn getattr(&self, path: &str) -> Result<StatRecord> {
        match paths::classify(path) {
            PathClass::Reserved => Err(Error::errno(libc::ENOENT)),
            PathClass::Working => {
                let meta = fs::symlink_metadata(self.live(path))?;
                Ok(StatRecord::from_metadata(&meta))
            }
            PathClass::Original(subject) => original::getattr(self, &subject),
        }
    }

    /// Validate that `path` can be listed
    pub fn opendir(&self, path: &str) -> Result<()> {
        match paths::classify(path) {
            PathClass::Reserved => Err(Error::errno(libc::ENOENT)),
            PathClass::Working => {
                let meta = fs::metadata(self.live(path))?;
                if meta.is_dir() {
                    Ok(())
                } else {
                    Err(Error::errno(libc::ENOTDIR))
                }
            }
            PathClass::Original(subject) => {
                if paths::classify(&subject) == PathClass::Reserved {
                    Err(Error::errno(libc::ENOENT))
                } else {
                    Ok(())
                }
            }
        }
    }

    /// List the names inside `path` for the addressed view
    pub fn readdir(&self, path: &str) -> Result<Vec<String>> {
        match paths::classify(path) {
            PathClass::Reserved => Err(Error::errno(libc::ENOENT)),
            PathClass::Working => {
                let mut names = Vec::new();
                for entry in fs::read_dir(self.live(path))? {
                    let entry = entry?;
                    let Ok(name) = entry.file_name().into_string() else {
                        continue;
                    };
                    if path == "/" && name == paths::COW_DIR_NAME {
                        continue;
                    }
                    names.push(name);
                }
                Ok(names)
            }
            PathClass::Original(subject) => original::readdir(self, &subject),
        }
    }

    /// Open `path` and attach its resolved identity. Working-view opens are
    /// normalised to read-write (capture needs read access on the same
    /// descriptor); original-view opens are read-only, and a missing live
    /// file is tolerated there because reads may be served wholly from the
    /// journal.
    pub fn open(&self, path: &str) -> Result<Handle> {
        if paths::classify(path) == PathClass::Reserved {
            return Err(Error::errno(libc::ENOENT));
        }
        let info = self.resolve(path)?;
        if info.is_original {
            let file = File::open(self.live(&info.newpath)).ok();
            if file.is_none() && info.change.is_none() {
                // never observed and not live: nothing to serve
                return Err(Error::errno(libc::ENOENT));
            }
            Ok(Handle { file, info })
        } else {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .open(self.live(path))?;
            Ok(Handle {
                file: Some(file),
                info,
            })
        }
    }

    /// Read from an open handle
    pub fn read(&self, handle: &Handle, offset: u64, size: u32) -> Result<Vec<u8>> {
        if handle.info.is_original {
            return original::read(handle, offset, size);
        }
        let file = handle.file.as_ref().ok_or(Error::errno(libc::EBADF))?;
        let mut buf = vec![0u8; size as usize];
        let n = blocks::read_full_at(file, &mut buf, offset)?;
        buf.truncate(n);
        Ok(buf)
    }

    /// Resolve the link target of either view of `path`
    pub fn readlink(&self, path: &str) -> Result<Vec<u8>> {
        use std::os::unix::ffi::OsStrExt;
        match paths::classify(path) {
            PathClass::Reserved => Err(Error::errno(libc::ENOENT)),
            PathClass::Working => {
                let target = fs::read_link(self.live(path))?;
                Ok(target.as_os_str().as_bytes().to_vec())
            }
            PathClass::Original(subject) => original::readlink(self, &subject),
        }
    }

    /// Flush an open handle's live data to stable storage
    pub fn fsync(&self, handle: &Handle, datasync: bool) -> Result<()> {
        match &handle.file {
            Some(file) if datasync => file.sync_data().map_err(Into::into),
            Some(file) => file.sync_all().map_err(Into::into),
            None => Ok(()),
        }
    }

    // ------------------------------------------------------------------
    // mutation pipeline

    /// Create a new regular file with exclusive-create semantics
    pub fn create(&mut self, path: &str, mode: u32) -> Result<Handle> {
        Self::check_writable(path)?;
        let live = self.live(path);

        let sp = self.journal.savepoint()?;
        NewFile::insert(&sp, path, CreateKind::Create)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .mode(mode & 0o7777)
            .open(&live)?;
        sp.commit()?;

        Ok(Handle {
            file: Some(file),
            info: FileInfo {
                is_original: false,
                is_new: true,
                change: None,
                oldpath: path.to_string(),
                newpath: path.to_string(),
                blocks: None,
            },
        })
    }

    /// Write to an open handle, capturing pre-images of every touched block
    /// of an original file first
    pub fn write(&mut self, handle: &mut Handle, offset: u64, data: &[u8]) -> Result<usize> {
        if handle.info.is_original {
            return Err(Error::errno(libc::EACCES));
        }
        let file = handle.file.as_ref().ok_or(Error::errno(libc::EBADF))?;

        let sp = self.journal.savepoint()?;
        if !handle.info.is_new {
            if let Some(map) = handle.info.blocks.as_mut() {
                let fsize = map.effective_size(file.metadata()?.len())?;
                map.merge_range(file, offset, data.len() as u64, fsize)?;
            }
        }
        file.write_all_at(data, offset)?;
        sp.commit()?;
        Ok(data.len())
    }

    /// Truncate `path` to `len`, capturing the entire current pre-image
    /// range of an original file first
    pub fn truncate(&mut self, path: &str, len: u64) -> Result<()> {
        Self::check_writable(path)?;
        let mut info = self.resolve(path)?;
        let live = self.live(path);

        let sp = self.journal.savepoint()?;
        if !info.is_new {
            if let Some(map) = info.blocks.as_mut() {
                let file = File::open(&live)?;
                let end = file.metadata()?.len();
                let fsize = map.effective_size(end)?;
                map.merge_range(&file, 0, end, fsize)?;
            }
        }
        let file = OpenOptions::new().write(true).open(&live)?;
        file.set_len(len)?;
        sp.commit()?;
        Ok(())
    }

    /// Remove a file or symlink from the working view
    pub fn unlink(&mut self, path: &str) -> Result<()> {
        Self::check_writable(path)?;
        let live = self.live(path);
        let meta = fs::symlink_metadata(&live)?;

        let sp = self.journal.savepoint()?;
        if NewFile::contains(&sp, path)? {
            // never existed originally: forget it entirely
            NewFile::remove(&sp, path)?;
        } else {
            // removals are journaled under the original name; a path that
            // arrived here by rename gives up its rename row for the record
            let oldpath = match HistoricalFile::rename_source(&sp, path)? {
                Some(key) => {
                    HistoricalFile::remove_rename(&sp, &key)?;
                    key
                }
                None => path.to_string(),
            };
            if meta.file_type().is_symlink() {
                let target = fs::read_link(&live)?;
                HistoricalFile::insert_erased_link(&sp, &oldpath, &target.to_string_lossy())?;
            } else {
                let stat = StatRecord::from_metadata(&meta);
                HistoricalFile::insert_erased(&sp, &oldpath, &stat)?;

                // save whatever of the file's pre-image is still unsaved
                let file = File::open(&live)?;
                let mut map = BlockMap::open(&self.filedata, &oldpath)?;
                let fsize = map.effective_size(meta.len())?;
                map.merge_range(&file, 0, fsize, fsize)?;
            }
        }
        fs::remove_file(&live)?;
        sp.commit()?;
        Ok(())
    }

    /// Create a directory in the working view
    pub fn mkdir(&mut self, path: &str, mode: u32) -> Result<()> {
        Self::check_writable(path)?;
        let live = self.live(path);
        if fs::symlink_metadata(&live).is_ok() {
            return Err(Error::errno(libc::EEXIST));
        }

        let sp = self.journal.savepoint()?;
        NewFile::insert(&sp, path, CreateKind::Mkdir)?;
        fs::DirBuilder::new().mode(mode & 0o7777).create(&live)?;
        sp.commit()?;
        Ok(())
    }

    /// Remove a directory from the working view
    pub fn rmdir(&mut self, path: &str) -> Result<()> {
        Self::check_writable(path)?;
        let live = self.live(path);
        let meta = fs::symlink_metadata(&live)?;

        let sp = self.journal.savepoint()?;
        if NewFile::contains(&sp, path)? {
            NewFile::remove(&sp, path)?;
        } else {
            // journaled under the original name, as in unlink
            let oldpath = match HistoricalFile::rename_source(&sp, path)? {
                Some(key) => {
                    HistoricalFile::remove_rename(&sp, &key)?;
                    key
                }
                None => path.to_string(),
            };
            let stat = StatRecord::from_metadata(&meta);
            HistoricalFile::insert_rmdir(&sp, &oldpath, &stat)?;
        }
        fs::remove_dir(&live)?;
        sp.commit()?;
        Ok(())
    }

    /// Create a symbolic link in the working view
    pub fn symlink(&mut self, target: &str, linkpath: &str) -> Result<()> {
        if paths::classify(target) == PathClass::Reserved {
            return Err(Error::errno(libc::ENOENT));
        }
        Self::check_writable(linkpath)?;

        let live_linkpath = self.live(linkpath);
        let sp = self.journal.savepoint()?;
        NewFile::insert(&sp, linkpath, CreateKind::Symlink)?;
        std::os::unix::fs::symlink(target, live_linkpath)?;
        sp.commit()?;
        Ok(())
    }

    /// Rename within the working view, tracking the path's original name.
    /// Renaming a path back to its original name erases the record.
    pub fn rename(&mut self, src: &str, dst: &str) -> Result<()> {
        if paths::classify(src) == PathClass::Reserved {
            return Err(Error::errno(libc::ENOENT));
        }
        if paths::classify(src) != PathClass::Working {
            return Err(Error::errno(libc::EACCES));
        }
        Self::check_writable(dst)?;
        let live_src = self.live(src);
        fs::symlink_metadata(&live_src)?;

        let live_dst = self.live(dst);
        let sp = self.journal.savepoint()?;
        if NewFile::contains(&sp, src)? {
            NewFile::rename(&sp, src, dst)?;
        } else {
            match HistoricalFile::rename_source(&sp, src)? {
                // moving back under the original name undoes the rename
                Some(key) if key == dst => HistoricalFile::remove_rename(&sp, &key)?,
                Some(key) => HistoricalFile::update_rename(&sp, &key, dst)?,
                None => HistoricalFile::insert_rename(&sp, src, dst)?,
            }
        }
        fs::rename(&live_src, live_dst)?;
        sp.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn overlay() -> (tempfile::TempDir, Overlay) {
        let dir = tempfile::tempdir().unwrap();
        let overlay = Overlay::new(dir.path()).unwrap();
        (dir, overlay)
    }

    #[test]
    fn test_new_creates_sidecar() {
        let (dir, _overlay) = overlay();
        assert!(dir.path().join(".cow").is_dir());
        assert!(dir.path().join(".cow/filedata").is_dir());
        assert!(dir.path().join(".cow/history.db").is_file());
    }

    #[test]
    fn test_second_overlay_on_same_origin_is_refused() {
        let (dir, _overlay) = overlay();
        assert!(matches!(
            Overlay::new(dir.path()),
            Err(Error::AlreadyMounted(_))
        ));
    }

    #[test]
    fn test_reserved_paths_are_hidden() {
        let (_dir, overlay) = overlay();
        assert_eq!(
            overlay.getattr("/.cow").unwrap_err().to_errno(),
            libc::ENOENT
        );
        assert_eq!(
            overlay.readdir("/.cow").unwrap_err().to_errno(),
            libc::ENOENT
        );
        assert_eq!(
            overlay.open("/.cow/history.db").unwrap_err().to_errno(),
            libc::ENOENT
        );
    }

    #[test]
    fn test_reserved_paths_refuse_writes() {
        let (_dir, mut overlay) = overlay();
        assert_eq!(
            overlay.create("/.cow/x", 0o644).unwrap_err().to_errno(),
            libc::EACCES
        );
        assert_eq!(
            overlay.mkdir("/.cow", 0o755).unwrap_err().to_errno(),
            libc::EACCES
        );
    }

    #[test]
    fn test_readdir_hides_sidecar_at_root_only() {
        let (dir, mut overlay) = overlay();
        overlay.mkdir("/sub", 0o755).unwrap();
        overlay.create("/sub/.cow", 0o644).unwrap();

        assert!(!overlay.readdir("/").unwrap().contains(&".cow".to_string()));
        assert!(overlay
            .readdir("/sub")
            .unwrap()
            .contains(&".cow".to_string()));
        drop(dir);
    }

    #[test]
    fn test_mkdir_existing_is_eexist() {
        let (dir, mut overlay) = overlay();
        fs::create_dir(dir.path().join("d")).unwrap();
        assert_eq!(
            overlay.mkdir("/d", 0o755).unwrap_err().to_errno(),
            libc::EEXIST
        );
        // the failed mkdir left no journal row behind
        assert!(!NewFile::contains(overlay.journal().conn(), "/d").unwrap());
    }

    #[test]
    fn test_rmdir_missing_is_enoent() {
        let (_dir, mut overlay) = overlay();
        assert_eq!(
            overlay.rmdir("/missing").unwrap_err().to_errno(),
            libc::ENOENT
        );
    }

    #[test]
    fn test_rmdir_nonempty_rolls_back_journal() {
        let (dir, mut overlay) = overlay();
        fs::create_dir(dir.path().join("d")).unwrap();
        fs::write(dir.path().join("d/x"), b"data").unwrap();

        assert!(overlay.rmdir("/d").is_err());
        assert!(HistoricalFile::get(overlay.journal().conn(), "/d")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_create_refuses_existing() {
        let (dir, mut overlay) = overlay();
        fs::write(dir.path().join("a"), b"data").unwrap();
        assert_eq!(
            overlay.create("/a", 0o644).unwrap_err().to_errno(),
            libc::EEXIST
        );
        assert!(!NewFile::contains(overlay.journal().conn(), "/a").unwrap());
    }

    #[test]
    fn test_rename_missing_source_fails() {
        let (_dir, mut overlay) = overlay();
        assert_eq!(
            overlay.rename("/ghost", "/g2").unwrap_err().to_errno(),
            libc::ENOENT
        );
    }
}
