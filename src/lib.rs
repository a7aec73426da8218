// src/lib.rs

//! cowfs — copy-on-write overlay filesystem
//!
//! Presents a live, mutable *working* view of an origin directory while
//! transparently preserving the pre-mutation state of every file and
//! directory. A second, read-only *original* view rooted at `/.original`
//! reconstructs the tree as it was first observed, synthesised on demand
//! from the live tree plus a sidecar journal kept in `<origin>/.cow/`.
//!
//! # Architecture
//!
//! - Journal-first: pre-image capture and bookkeeping commit before the
//!   live mutation; a failed mutation rolls the journal back
//! - Minimal capture: only 4 KiB blocks actually touched by a mutation are
//!   saved, each at most once
//! - Path-addressed core: the FUSE adapter is a thin inode↔path bridge,
//!   so the engine is testable without a kernel mount

pub mod blocks;
pub mod codec;
pub mod db;
mod error;
pub mod fuse;
pub mod overlay;
pub mod paths;
pub mod resolve;

pub use blocks::{BLOCK_SIZE, BlockMap, BlockSet, BlockStore};
pub use codec::{FileKind, STAT_RECORD_LEN, StatRecord};
pub use db::{Change, CreateKind, Journal};
pub use error::{Error, Result};
pub use fuse::mount;
pub use overlay::{Handle, Overlay};
pub use resolve::FileInfo;
