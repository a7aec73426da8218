// src/codec.rs

//! Fixed-layout stat record codec
//!
//! The journal stores captured file metadata as an opaque 80-byte blob: ten
//! signed 64-bit big-endian integers in a fixed order. Fields of the live
//! `stat` structure that are not captured decode as zero.

use crate::error::{Error, Result};
use std::fs::Metadata;
use std::os::unix::fs::MetadataExt;

/// Encoded length of a stat record
pub const STAT_RECORD_LEN: usize = 80;

/// File type carried in a stat record's mode bits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Regular,
    Directory,
    Symlink,
    Other,
}

/// Captured file metadata, in encoding order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatRecord {
    pub mode: i64,
    pub nlink: i64,
    pub uid: i64,
    pub gid: i64,
    pub rdev: i64,
    pub size: i64,
    pub blocks: i64,
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
}

impl StatRecord {
    /// Capture a record from live metadata (lstat semantics when the caller
    /// used `symlink_metadata`)
    pub fn from_metadata(meta: &Metadata) -> Self {
        StatRecord {
            mode: meta.mode() as i64,
            nlink: meta.nlink() as i64,
            uid: meta.uid() as i64,
            gid: meta.gid() as i64,
            rdev: meta.rdev() as i64,
            size: meta.size() as i64,
            blocks: meta.blocks() as i64,
            atime: meta.atime(),
            mtime: meta.mtime(),
            ctime: meta.ctime(),
        }
    }

    fn fields(&self) -> [i64; 10] {
        [
            self.mode,
            self.nlink,
            self.uid,
            self.gid,
            self.rdev,
            self.size,
            self.blocks,
            self.atime,
            self.mtime,
            self.ctime,
        ]
    }

    /// Serialise to the fixed 80-byte layout
    pub fn encode(&self) -> [u8; STAT_RECORD_LEN] {
        let mut out = [0u8; STAT_RECORD_LEN];
        for (i, field) in self.fields().into_iter().enumerate() {
            out[i * 8..(i + 1) * 8].copy_from_slice(&field.to_be_bytes());
        }
        out
    }

    /// Deserialise from the fixed 80-byte layout
    pub fn decode(raw: &[u8]) -> Result<Self> {
        if raw.len() != STAT_RECORD_LEN {
            return Err(Error::Corrupt(format!(
                "stat record is {} bytes, expected {}",
                raw.len(),
                STAT_RECORD_LEN
            )));
        }
        let field = |i: usize| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&raw[i * 8..(i + 1) * 8]);
            i64::from_be_bytes(buf)
        };
        Ok(StatRecord {
            mode: field(0),
            nlink: field(1),
            uid: field(2),
            gid: field(3),
            rdev: field(4),
            size: field(5),
            blocks: field(6),
            atime: field(7),
            mtime: field(8),
            ctime: field(9),
        })
    }

    /// File type encoded in the mode bits
    pub fn kind(&self) -> FileKind {
        match self.mode as u32 & libc::S_IFMT {
            libc::S_IFREG => FileKind::Regular,
            libc::S_IFDIR => FileKind::Directory,
            libc::S_IFLNK => FileKind::Symlink,
            _ => FileKind::Other,
        }
    }

    /// Replace the file-type bits, keeping permissions
    pub fn with_kind(mut self, kind: FileKind) -> Self {
        let fmt = match kind {
            FileKind::Regular => libc::S_IFREG,
            FileKind::Directory => libc::S_IFDIR,
            FileKind::Symlink => libc::S_IFLNK,
            FileKind::Other => 0,
        };
        self.mode = (self.mode as u32 & !libc::S_IFMT | fmt) as i64;
        self
    }

    /// Synthesised record for a removed symlink whose only journal payload
    /// is the target text
    pub fn for_erased_link(target_len: usize) -> Self {
        StatRecord {
            mode: (libc::S_IFLNK | 0o777) as i64,
            nlink: 1,
            size: target_len as i64,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> StatRecord {
        StatRecord {
            mode: (libc::S_IFREG | 0o644) as i64,
            nlink: 1,
            uid: 1000,
            gid: 100,
            rdev: 0,
            size: 8193,
            blocks: 17,
            atime: 1_700_000_000,
            mtime: 1_700_000_001,
            ctime: 1_700_000_002,
        }
    }

    #[test]
    fn test_roundtrip() {
        let st = sample();
        let blob = st.encode();
        assert_eq!(blob.len(), STAT_RECORD_LEN);
        assert_eq!(StatRecord::decode(&blob).unwrap(), st);
    }

    #[test]
    fn test_encoding_is_big_endian() {
        let st = StatRecord {
            mode: 1,
            ..Default::default()
        };
        let blob = st.encode();
        assert_eq!(&blob[..8], &[0, 0, 0, 0, 0, 0, 0, 1]);
        assert!(blob[8..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_decode_rejects_bad_length() {
        assert!(StatRecord::decode(&[0u8; 79]).is_err());
        assert!(StatRecord::decode(&[0u8; 81]).is_err());
        assert!(StatRecord::decode(&[]).is_err());
    }

    #[test]
    fn test_negative_fields_roundtrip() {
        let st = StatRecord {
            mtime: -1,
            ..Default::default()
        };
        assert_eq!(StatRecord::decode(&st.encode()).unwrap().mtime, -1);
    }

    #[test]
    fn test_kind() {
        assert_eq!(sample().kind(), FileKind::Regular);
        assert_eq!(
            sample().with_kind(FileKind::Directory).kind(),
            FileKind::Directory
        );
        assert_eq!(
            sample().with_kind(FileKind::Symlink).kind(),
            FileKind::Symlink
        );
        // permission bits survive the retype
        let retyped = sample().with_kind(FileKind::Directory);
        assert_eq!(retyped.mode as u32 & 0o7777, 0o644);
    }

    #[test]
    fn test_for_erased_link() {
        let st = StatRecord::for_erased_link(6);
        assert_eq!(st.kind(), FileKind::Symlink);
        assert_eq!(st.size, 6);
        assert_eq!(st.nlink, 1);
    }

    #[test]
    fn test_from_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, b"hello").unwrap();
        let st = StatRecord::from_metadata(&std::fs::metadata(&path).unwrap());
        assert_eq!(st.kind(), FileKind::Regular);
        assert_eq!(st.size, 5);
        assert!(st.mtime > 0);
    }
}
