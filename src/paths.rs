// src/paths.rs

//! Path classification and sidecar layout
//!
//! Every path handed to the overlay is classified into exactly one of three
//! namespaces: the reserved sidecar (`/.cow`, always hidden), the read-only
//! original view (`/.original/...`), or the working view (everything else).
//! Classification is byte-exact; no normalisation is performed.
//!
//! This module also centralises derivation of the on-disk sidecar layout
//! inside `<origin>/.cow/`.

use std::path::{Path, PathBuf};

/// Name of the sidecar directory inside the origin tree
pub const COW_DIR_NAME: &str = ".cow";

/// Reserved sidecar path in the mount namespace
pub const RESERVED: &str = "/.cow";

/// Root of the read-only original view in the mount namespace
pub const ORIGINAL_ROOT: &str = "/.original";

/// Namespace a mount path belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathClass {
    /// The journal sidecar; every operation answers "no such entry"
    Reserved,
    /// The original view; payload is the subpath with its leading `/`
    /// (`/.original` itself becomes `/`)
    Original(String),
    /// The live, mutable view
    Working,
}

/// Classify a mount-namespace path
pub fn classify(path: &str) -> PathClass {
    if path == RESERVED || path.starts_with("/.cow/") {
        return PathClass::Reserved;
    }
    if path == ORIGINAL_ROOT {
        return PathClass::Original("/".to_string());
    }
    if let Some(rest) = path.strip_prefix("/.original/") {
        return PathClass::Original(format!("/{rest}"));
    }
    PathClass::Working
}

/// Final component of a mount path (`/d/x` -> `x`, `/` -> ``)
pub fn file_name(path: &str) -> &str {
    match path.rfind('/') {
        Some(i) => &path[i + 1..],
        None => path,
    }
}

/// Parent directory of a mount path (`/d/x` -> `/d`, `/x` -> `/`)
pub fn parent(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(i) => &path[..i],
    }
}

/// Join a directory path and a child name
pub fn join(dir: &str, name: &str) -> String {
    if dir == "/" {
        format!("/{name}")
    } else {
        format!("{dir}/{name}")
    }
}

/// Half-open key range `[lo, hi)` covering every journal path strictly below
/// `dir`. Callers must still filter for direct children; the range admits
/// deeper descendants too.
pub fn scan_range(dir: &str) -> (String, String) {
    let lo = if dir == "/" {
        "/".to_string()
    } else {
        format!("{dir}/")
    };
    let mut hi = lo.clone().into_bytes();
    // '/' + 1 == '0'; the increment never overflows
    *hi.last_mut().expect("range prefix is never empty") += 1;
    (lo, String::from_utf8(hi).expect("incremented ASCII stays ASCII"))
}

/// True when `path` is a direct child of the scan prefix `lo`
pub fn is_direct_child(lo: &str, path: &str) -> bool {
    match path.strip_prefix(lo) {
        Some(rest) => !rest.is_empty() && !rest.contains('/'),
        None => false,
    }
}

/// Location of a mount path inside the origin tree
pub fn live_path(origin: &Path, path: &str) -> PathBuf {
    origin.join(path.trim_start_matches('/'))
}

/// The sidecar directory for an origin tree
pub fn cow_dir(origin: &Path) -> PathBuf {
    origin.join(COW_DIR_NAME)
}

/// The journal database inside the sidecar
pub fn history_db_path(origin: &Path) -> PathBuf {
    cow_dir(origin).join("history.db")
}

/// The per-file block store tree inside the sidecar
pub fn filedata_dir(origin: &Path) -> PathBuf {
    cow_dir(origin).join("filedata")
}

/// The mount-exclusivity lock file inside the sidecar
pub fn lock_path(origin: &Path) -> PathBuf {
    cow_dir(origin).join("lock")
}

/// Backing database for one original path's pre-image blocks. The block
/// store tree mirrors the origin directory layout.
pub fn block_db_path(filedata: &Path, original_path: &str) -> PathBuf {
    filedata.join(original_path.trim_start_matches('/'))
}
