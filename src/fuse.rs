// src/fuse.rs

//! FUSE adapter
//!
//! Bridges the kernel's inode-addressed protocol onto the path-addressed
//! overlay core. The adapter owns the inode↔path table and the open-handle
//! table; everything filesystem-semantic lives in [`crate::overlay`].
//!
//! Inodes are allocated on first lookup and remain stable for the life of
//! the mount. Renames remap the affected subtree; unlinked paths drop their
//! mapping (open handles keep working through their file handle).

use crate::blocks::BLOCK_SIZE;
use crate::codec::{FileKind, StatRecord};
use crate::error::{Error, Result};
use crate::overlay::{Handle, Overlay};
use crate::paths;
use fuser::{
    FileAttr, FileType, Filesystem, MountOption, ReplyAttr, ReplyCreate, ReplyData,
    ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyWrite, Request, TimeOrNow,
};
use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{error, warn};

const TTL: Duration = Duration::from_secs(1);
const ROOT_INO: u64 = 1;

/// Stable inode numbers for mount-namespace paths
struct InodeTable {
    paths: HashMap<u64, String>,
    inos: HashMap<String, u64>,
    next: u64,
}

impl InodeTable {
    fn new() -> Self {
        let mut table = InodeTable {
            paths: HashMap::new(),
            inos: HashMap::new(),
            next: 2,
        };
        table.paths.insert(ROOT_INO, "/".to_string());
        table.inos.insert("/".to_string(), ROOT_INO);
        table
    }

    fn get(&mut self, path: &str) -> u64 {
        if let Some(&ino) = self.inos.get(path) {
            return ino;
        }
        let ino = self.next;
        self.next += 1;
        self.paths.insert(ino, path.to_string());
        self.inos.insert(path.to_string(), ino);
        ino
    }

    fn path(&self, ino: u64) -> Option<String> {
        self.paths.get(&ino).cloned()
    }

    fn forget_path(&mut self, path: &str) {
        if let Some(ino) = self.inos.remove(path) {
            self.paths.remove(&ino);
        }
    }

    /// Re-key a renamed path and everything beneath it
    fn remap(&mut self, src: &str, dst: &str) {
        let prefix = format!("{src}/");
        let affected: Vec<(String, u64)> = self
            .inos
            .iter()
            .filter(|(path, _)| *path == src || path.starts_with(&prefix))
            .map(|(path, &ino)| (path.clone(), ino))
            .collect();
        for (path, ino) in affected {
            self.inos.remove(&path);
            let new_path = format!("{dst}{}", &path[src.len()..]);
            self.paths.insert(ino, new_path.clone());
            self.inos.insert(new_path, ino);
        }
    }
}

fn system_time(secs: i64) -> SystemTime {
    if secs >= 0 {
        UNIX_EPOCH + Duration::from_secs(secs as u64)
    } else {
        UNIX_EPOCH - Duration::from_secs(secs.unsigned_abs())
    }
}

fn file_type(kind: FileKind) -> FileType {
    match kind {
        FileKind::Directory => FileType::Directory,
        FileKind::Symlink => FileType::Symlink,
        FileKind::Regular | FileKind::Other => FileType::RegularFile,
    }
}

fn to_attr(st: &StatRecord, ino: u64) -> FileAttr {
    FileAttr {
        ino,
        size: st.size.max(0) as u64,
        blocks: st.blocks.max(0) as u64,
        atime: system_time(st.atime),
        mtime: system_time(st.mtime),
        ctime: system_time(st.ctime),
        crtime: system_time(st.ctime),
        kind: file_type(st.kind()),
        perm: (st.mode & 0o7777) as u16,
        nlink: st.nlink.max(1) as u32,
        uid: st.uid as u32,
        gid: st.gid as u32,
        rdev: st.rdev as u32,
        blksize: BLOCK_SIZE as u32,
        flags: 0,
    }
}

/// Report an error to the kernel, logging journal failures on the way out
fn errno_of(err: &Error) -> i32 {
    match err {
        Error::Db(_) | Error::Corrupt(_) => error!("{err}"),
        Error::Io(_) | Error::Errno(_) | Error::AlreadyMounted(_) => {}
    }
    err.to_errno()
}

/// The mounted filesystem: overlay core plus kernel-facing tables
pub struct CowFuse {
    overlay: Overlay,
    inodes: InodeTable,
    handles: HashMap<u64, Handle>,
    next_fh: u64,
}

impl CowFuse {
    pub fn new(overlay: Overlay) -> Self {
        CowFuse {
            overlay,
            inodes: InodeTable::new(),
            handles: HashMap::new(),
            next_fh: 1,
        }
    }

    fn attr(&mut self, path: &str) -> Result<FileAttr> {
        let st = self.overlay.getattr(path)?;
        Ok(to_attr(&st, self.inodes.get(path)))
    }

    fn child_path(&self, parent: u64, name: &OsStr) -> Option<String> {
        let dir = self.inodes.path(parent)?;
        Some(paths::join(&dir, name.to_str()?))
    }

    fn store_handle(&mut self, handle: Handle) -> u64 {
        let fh = self.next_fh;
        self.next_fh += 1;
        self.handles.insert(fh, handle);
        fh
    }
}

impl Filesystem for CowFuse {
    fn lookup(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(path) = self.child_path(parent, name) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.attr(&path) {
            Ok(attr) => reply.entry(&TTL, &attr, 0),
            Err(e) => reply.error(errno_of(&e)),
        }
    }

    fn getattr(&mut self, _req: &Request, ino: u64, reply: ReplyAttr) {
        let Some(path) = self.inodes.path(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.attr(&path) {
            Ok(attr) => reply.attr(&TTL, &attr),
            Err(e) => reply.error(errno_of(&e)),
        }
    }

    fn setattr(
        &mut self,
        _req: &Request,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let Some(path) = self.inodes.path(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        if let Some(len) = size {
            if let Err(e) = self.overlay.truncate(&path, len) {
                reply.error(errno_of(&e));
                return;
            }
        }
        match self.attr(&path) {
            Ok(attr) => reply.attr(&TTL, &attr),
            Err(e) => reply.error(errno_of(&e)),
        }
    }

    fn readlink(&mut self, _req: &Request, ino: u64, reply: ReplyData) {
        let Some(path) = self.inodes.path(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.overlay.readlink(&path) {
            Ok(target) => reply.data(&target),
            Err(e) => reply.error(errno_of(&e)),
        }
    }

    fn mkdir(&mut self, _req: &Request, parent: u64, name: &OsStr, mode: u32, _umask: u32, reply: ReplyEntry) {
        let Some(path) = self.child_path(parent, name) else {
            reply.error(libc::EINVAL);
            return;
        };
        match self.overlay.mkdir(&path, mode) {
            Ok(()) => match self.attr(&path) {
                Ok(attr) => reply.entry(&TTL, &attr, 0),
                Err(e) => reply.error(errno_of(&e)),
            },
            Err(e) => reply.error(errno_of(&e)),
        }
    }

    fn unlink(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(path) = self.child_path(parent, name) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.overlay.unlink(&path) {
            Ok(()) => {
                self.inodes.forget_path(&path);
                reply.ok();
            }
            Err(e) => reply.error(errno_of(&e)),
        }
    }

    fn rmdir(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(path) = self.child_path(parent, name) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.overlay.rmdir(&path) {
            Ok(()) => {
                self.inodes.forget_path(&path);
                reply.ok();
            }
            Err(e) => reply.error(errno_of(&e)),
        }
    }

    fn symlink(&mut self, _req: &Request, parent: u64, name: &OsStr, target: &Path, reply: ReplyEntry) {
        let Some(path) = self.child_path(parent, name) else {
            reply.error(libc::EINVAL);
            return;
        };
        let Some(target) = target.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        match self.overlay.symlink(target, &path) {
            Ok(()) => match self.attr(&path) {
                Ok(attr) => reply.entry(&TTL, &attr, 0),
                Err(e) => reply.error(errno_of(&e)),
            },
            Err(e) => reply.error(errno_of(&e)),
        }
    }

    fn rename(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        let (Some(src), Some(dst)) = (
            self.child_path(parent, name),
            self.child_path(newparent, newname),
        ) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.overlay.rename(&src, &dst) {
            Ok(()) => {
                self.inodes.forget_path(&dst);
                self.inodes.remap(&src, &dst);
                reply.ok();
            }
            Err(e) => reply.error(errno_of(&e)),
        }
    }

    fn open(&mut self, _req: &Request, ino: u64, _flags: i32, reply: ReplyOpen) {
        let Some(path) = self.inodes.path(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.overlay.open(&path) {
            Ok(handle) => {
                let fh = self.store_handle(handle);
                reply.opened(fh, 0);
            }
            Err(e) => reply.error(errno_of(&e)),
        }
    }

    fn read(
        &mut self,
        _req: &Request,
        _ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let Some(handle) = self.handles.get(&fh) else {
            reply.error(libc::EBADF);
            return;
        };
        match self.overlay.read(handle, offset.max(0) as u64, size) {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(errno_of(&e)),
        }
    }

    fn write(
        &mut self,
        _req: &Request,
        _ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let Some(mut handle) = self.handles.remove(&fh) else {
            reply.error(libc::EBADF);
            return;
        };
        let result = self.overlay.write(&mut handle, offset.max(0) as u64, data);
        self.handles.insert(fh, handle);
        match result {
            Ok(n) => reply.written(n as u32),
            Err(e) => reply.error(errno_of(&e)),
        }
    }

    fn flush(&mut self, _req: &Request, _ino: u64, _fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        reply.ok();
    }

    fn release(
        &mut self,
        _req: &Request,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        self.handles.remove(&fh);
        reply.ok();
    }

    fn fsync(&mut self, _req: &Request, _ino: u64, fh: u64, datasync: bool, reply: ReplyEmpty) {
        let Some(handle) = self.handles.get(&fh) else {
            reply.error(libc::EBADF);
            return;
        };
        match self.overlay.fsync(handle, datasync) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(errno_of(&e)),
        }
    }

    fn opendir(&mut self, _req: &Request, ino: u64, _flags: i32, reply: ReplyOpen) {
        let Some(path) = self.inodes.path(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.overlay.opendir(&path) {
            Ok(()) => reply.opened(0, 0),
            Err(e) => reply.error(errno_of(&e)),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let Some(path) = self.inodes.path(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        let names = match self.overlay.readdir(&path) {
            Ok(names) => names,
            Err(e) => {
                reply.error(errno_of(&e));
                return;
            }
        };

        let parent_ino = if path == "/" {
            ROOT_INO
        } else {
            self.inodes.get(paths::parent(&path))
        };
        let mut entries: Vec<(u64, FileType, String)> = vec![
            (ino, FileType::Directory, ".".to_string()),
            (parent_ino, FileType::Directory, "..".to_string()),
        ];
        for name in names {
            let child = paths::join(&path, &name);
            match self.overlay.getattr(&child) {
                Ok(st) => entries.push((self.inodes.get(&child), file_type(st.kind()), name)),
                Err(e) => warn!("skipping unstatable entry {child}: {e}"),
            }
        }

        for (i, (ino, kind, name)) in entries.into_iter().enumerate().skip(offset as usize) {
            if reply.add(ino, (i + 1) as i64, kind, &name) {
                break;
            }
        }
        reply.ok();
    }

    fn releasedir(&mut self, _req: &Request, _ino: u64, _fh: u64, _flags: i32, reply: ReplyEmpty) {
        reply.ok();
    }

    fn create(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        let Some(path) = self.child_path(parent, name) else {
            reply.error(libc::EINVAL);
            return;
        };
        match self.overlay.create(&path, mode) {
            Ok(handle) => {
                let attr = match self.attr(&path) {
                    Ok(attr) => attr,
                    Err(e) => {
                        reply.error(errno_of(&e));
                        return;
                    }
                };
                let fh = self.store_handle(handle);
                reply.created(&TTL, &attr, 0, fh, 0);
            }
            Err(e) => reply.error(errno_of(&e)),
        }
    }
}

/// Mount the overlay for `origin` at `mountpoint` and serve requests until
/// unmounted. Dispatch is single-threaded: one operation at a time.
pub fn mount(origin: &Path, mountpoint: &Path, extra: Vec<MountOption>) -> Result<()> {
    let overlay = Overlay::new(origin)?;
    let fs = CowFuse::new(overlay);
    let mut options = vec![
        MountOption::FSName("cowfs".to_string()),
        MountOption::DefaultPermissions,
    ];
    options.extend(extra);
    fuser::mount2(fs, mountpoint, &options)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inode_table_is_stable() {
        let mut table = InodeTable::new();
        let a = table.get("/a");
        let b = table.get("/b");
        assert_ne!(a, b);
        assert_ne!(a, ROOT_INO);
        assert_eq!(table.get("/a"), a);
        assert_eq!(table.path(a).as_deref(), Some("/a"));
        assert_eq!(table.path(ROOT_INO).as_deref(), Some("/"));
    }

    #[test]
    fn test_inode_table_remap_moves_subtree() {
        let mut table = InodeTable::new();
        let d = table.get("/d");
        let x = table.get("/d/x");
        let deep = table.get("/d/sub/y");
        let other = table.get("/dx");

        table.remap("/d", "/e");
        assert_eq!(table.path(d).as_deref(), Some("/e"));
        assert_eq!(table.path(x).as_deref(), Some("/e/x"));
        assert_eq!(table.path(deep).as_deref(), Some("/e/sub/y"));
        // "/dx" is not under "/d"
        assert_eq!(table.path(other).as_deref(), Some("/dx"));
        assert_eq!(table.get("/e/x"), x);
    }

    #[test]
    fn test_inode_table_forget() {
        let mut table = InodeTable::new();
        let a = table.get("/a");
        table.forget_path("/a");
        assert_eq!(table.path(a), None);
        // a later lookup allocates a fresh inode
        assert_ne!(table.get("/a"), a);
    }

    #[test]
    fn test_to_attr_conversion() {
        let st = StatRecord {
            mode: (libc::S_IFDIR | 0o755) as i64,
            nlink: 2,
            uid: 1000,
            gid: 100,
            size: 4096,
            mtime: 1_700_000_000,
            ..Default::default()
        };
        let attr = to_attr(&st, 7);
        assert_eq!(attr.ino, 7);
        assert_eq!(attr.kind, FileType::Directory);
        assert_eq!(attr.perm, 0o755);
        assert_eq!(attr.uid, 1000);
        assert_eq!(attr.mtime, UNIX_EPOCH + Duration::from_secs(1_700_000_000));
    }

    #[test]
    fn test_negative_time_conversion() {
        let st = StatRecord {
            mtime: -5,
            ..Default::default()
        };
        let attr = to_attr(&st, 2);
        assert_eq!(attr.mtime, UNIX_EPOCH - Duration::from_secs(5));
    }
}
