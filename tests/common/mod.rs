// tests/common/mod.rs

//! Shared fixtures for the overlay integration tests

#![allow(dead_code)]

use cowfs::Overlay;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

/// A fresh overlay over an empty temporary origin
pub fn setup() -> (TempDir, Overlay) {
    let dir = tempfile::tempdir().unwrap();
    let overlay = Overlay::new(dir.path()).unwrap();
    (dir, overlay)
}

/// Put a file into the origin tree directly (pre-mount state)
pub fn seed(dir: &TempDir, rel: &str, content: &[u8]) {
    let path = dir.path().join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

/// Read a whole file through the overlay, from either view
pub fn read_all(overlay: &Overlay, path: &str) -> Vec<u8> {
    let handle = overlay.open(path).unwrap();
    overlay.read(&handle, 0, 1 << 20).unwrap()
}

/// Write through the overlay at an offset
pub fn write_at(overlay: &mut Overlay, path: &str, offset: u64, data: &[u8]) {
    let mut handle = overlay.open(path).unwrap();
    assert_eq!(overlay.write(&mut handle, offset, data).unwrap(), data.len());
}

/// Sorted directory listing through the overlay
pub fn names(overlay: &Overlay, path: &str) -> Vec<String> {
    let mut names = overlay.readdir(path).unwrap();
    names.sort();
    names
}

/// The sidecar's per-file block store tree
pub fn filedata(dir: &TempDir) -> PathBuf {
    cowfs::paths::filedata_dir(dir.path())
}
