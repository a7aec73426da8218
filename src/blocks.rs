// src/blocks.rs

//! Per-file pre-image block store
//!
//! Every original file gets its own small SQLite database under
//! `<origin>/.cow/filedata/`, mirroring the origin tree. The single table
//! maps 4 KiB-aligned offsets to the bytes that lived there before the first
//! mutation touched them. A blob shorter than 4096 bytes marks the original
//! end of file; when the original length was itself a multiple of 4096, an
//! explicit empty blob at that offset records it.
//!
//! Offsets are written at most once (`INSERT OR IGNORE`), so re-running a
//! capture over the same range is harmless and the first-saved pre-image is
//! never overwritten.

use crate::error::Result;
use crate::paths;
use rusqlite::{Connection, OptionalExtension, params};
use std::fs::File;
use std::os::unix::fs::FileExt;
use std::path::Path;
use tracing::debug;

/// Fixed pre-image block size
pub const BLOCK_SIZE: u64 = 4096;

/// Set of saved block numbers (offset / 4096) for one file
#[derive(Debug, Clone, Default)]
pub struct BlockSet {
    words: Vec<u64>,
}

impl BlockSet {
    pub fn new() -> Self {
        BlockSet::default()
    }

    pub fn contains(&self, block: u64) -> bool {
        match self.words.get((block / 64) as usize) {
            Some(word) => word & (1u64 << (block % 64)) != 0,
            None => false,
        }
    }

    pub fn insert(&mut self, block: u64) {
        let index = (block / 64) as usize;
        if index >= self.words.len() {
            self.words.resize(index + 1, 0);
        }
        self.words[index] |= 1u64 << (block % 64);
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }
}

/// Handle to one original path's block database
pub struct BlockStore {
    conn: Connection,
}

impl std::fmt::Debug for BlockStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockStore").finish_non_exhaustive()
    }
}

impl BlockStore {
    /// Open the block store for `original_path`, creating the backing
    /// database (and its parent directories) if absent. Idempotent.
    pub fn open(filedata: &Path, original_path: &str) -> Result<Self> {
        let db_path = paths::block_db_path(filedata, original_path);
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        debug!("Opening block store {}", db_path.display());
        let conn = Connection::open(&db_path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS historical_filedata (
                offset INTEGER PRIMARY KEY,
                data BLOB NOT NULL
            );",
        )?;
        Ok(BlockStore { conn })
    }

    /// Open the block store only when its backing database already exists.
    /// Read paths use this so that merely inspecting the original view does
    /// not litter the sidecar with empty databases.
    pub fn open_if_exists(filedata: &Path, original_path: &str) -> Result<Option<Self>> {
        if paths::block_db_path(filedata, original_path).is_file() {
            Ok(Some(Self::open(filedata, original_path)?))
        } else {
            Ok(None)
        }
    }

    /// The original file size, when the end of file has been captured: the
    /// highest saved offset plus the length of the blob there, provided that
    /// blob is short (or empty). A full-sized top blob means only interior
    /// blocks were saved and the live length still applies.
    pub fn original_size(&self) -> Result<Option<u64>> {
        let top: Option<(i64, i64)> = self
            .conn
            .query_row(
                "SELECT offset, length(data) FROM historical_filedata
                 ORDER BY offset DESC LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(match top {
            Some((offset, len)) if (len as u64) < BLOCK_SIZE => Some(offset as u64 + len as u64),
            _ => None,
        })
    }

    /// Bitset of saved block numbers
    pub fn present(&self) -> Result<BlockSet> {
        let mut stmt = self
            .conn
            .prepare("SELECT offset FROM historical_filedata")?;
        let rows = stmt.query_map([], |row| row.get::<_, i64>(0))?;
        let mut set = BlockSet::new();
        for row in rows {
            set.insert(row? as u64 / BLOCK_SIZE);
        }
        Ok(set)
    }

    /// Save a pre-image block. A block already present at `offset` is left
    /// untouched.
    pub fn save_block(&self, offset: u64, data: &[u8]) -> Result<()> {
        debug_assert_eq!(offset % BLOCK_SIZE, 0);
        debug_assert!(data.len() as u64 <= BLOCK_SIZE);
        self.conn.execute(
            "INSERT OR IGNORE INTO historical_filedata (offset, data) VALUES (?1, ?2)",
            params![offset as i64, data],
        )?;
        Ok(())
    }

    /// All saved offsets in ascending order
    pub fn offsets(&self) -> Result<Vec<u64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT offset FROM historical_filedata ORDER BY offset")?;
        let rows = stmt.query_map([], |row| row.get::<_, i64>(0))?;
        let mut offsets = Vec::new();
        for row in rows {
            offsets.push(row? as u64);
        }
        Ok(offsets)
    }

    /// The exact stored blob at an aligned offset, if any
    pub fn read_block(&self, offset: u64) -> Result<Option<Vec<u8>>> {
        debug_assert_eq!(offset % BLOCK_SIZE, 0);
        let data = self
            .conn
            .query_row(
                "SELECT data FROM historical_filedata WHERE offset = ?1",
                params![offset as i64],
                |row| row.get(0),
            )
            .optional()?;
        Ok(data)
    }
}

/// A block store together with its in-memory derived state, attached to an
/// open file's resolved info
#[derive(Debug)]
pub struct BlockMap {
    pub store: BlockStore,
    pub present: BlockSet,
    pub original_size: Option<u64>,
}

impl BlockMap {
    /// Open the store for `original_path` and derive presence and size
    pub fn open(filedata: &Path, original_path: &str) -> Result<Self> {
        let store = BlockStore::open(filedata, original_path)?;
        let present = store.present()?;
        let original_size = store.original_size()?;
        Ok(BlockMap {
            store,
            present,
            original_size,
        })
    }

    /// As `open`, but without creating a database that does not exist yet
    pub fn open_if_exists(filedata: &Path, original_path: &str) -> Result<Option<Self>> {
        match BlockStore::open_if_exists(filedata, original_path)? {
            Some(store) => {
                let present = store.present()?;
                let original_size = store.original_size()?;
                Ok(Some(BlockMap {
                    store,
                    present,
                    original_size,
                }))
            }
            None => Ok(None),
        }
    }

    /// The original file length to merge against: the pinned original size,
    /// re-checked against the store when unknown (another handle on the
    /// same file may have pinned it since this map was derived), falling
    /// back to the caller's live length
    pub fn effective_size(&mut self, live_len: u64) -> Result<u64> {
        if self.original_size.is_none() {
            self.original_size = self.store.original_size()?;
        }
        Ok(self.original_size.unwrap_or(live_len))
    }

    /// Capture pre-images for every not-yet-saved block overlapping
    /// `[begin, begin + bytes)`, reading from `file`, where `fsize` is the
    /// original file length. A mutation that reaches or moves past `fsize`
    /// also pins the original end of file: the short tail block, or an
    /// explicit empty blob when `fsize` is block-aligned.
    pub fn merge_range(&mut self, file: &File, begin: u64, bytes: u64, fsize: u64) -> Result<()> {
        let mut block = begin / BLOCK_SIZE * BLOCK_SIZE;
        if begin + bytes > fsize {
            // extending past EOF: the tail must be captured even though the
            // write interval itself starts beyond it
            block = block.min(fsize / BLOCK_SIZE * BLOCK_SIZE);
        }

        let mut buf = [0u8; BLOCK_SIZE as usize];
        while block < begin + bytes && block < fsize {
            if !self.present.contains(block / BLOCK_SIZE) {
                let n = read_full_at(file, &mut buf, block)?;
                self.store.save_block(block, &buf[..n])?;
                self.present.insert(block / BLOCK_SIZE);
            }
            block += BLOCK_SIZE;
        }

        if begin + bytes >= fsize
            && fsize % BLOCK_SIZE == 0
            && !self.present.contains(fsize / BLOCK_SIZE)
        {
            self.store.save_block(fsize, &[])?;
            self.present.insert(fsize / BLOCK_SIZE);
        }

        if self.original_size.is_none() && begin + bytes >= fsize {
            self.original_size = Some(fsize);
        }

        Ok(())
    }
}

/// Read at `offset` until `buf` is full or end of file
pub(crate) fn read_full_at(file: &File, buf: &mut [u8], offset: u64) -> Result<usize> {
    let mut read = 0;
    while read < buf.len() {
        let n = file.read_at(&mut buf[read..], offset + read as u64)?;
        if n == 0 {
            break;
        }
        read += n;
    }
    Ok(read)
}
