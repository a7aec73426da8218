// src/error.rs

//! Error types for cowfs
//!
//! Handlers distinguish three failure families: live-tree syscall errors
//! (returned to the kernel verbatim as negated errno), journal failures
//! (rolled back and reported as EIO), and explicit POSIX refusals such as
//! EACCES on the read-only views. "No rows" on a journal lookup is a control
//! signal expressed as `Option` at the query surface, never as an `Error`.

use std::io;
use thiserror::Error;

/// Errors that can occur in the overlay core
#[derive(Error, Debug)]
pub enum Error {
    /// Live-tree I/O error; carries the operating system errno
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Journal store failure (SQLite)
    #[error("journal error: {0}")]
    Db(#[from] rusqlite::Error),

    /// Explicit POSIX error code
    #[error("errno {0}")]
    Errno(i32),

    /// A journal record that should exist is missing or undecodable
    #[error("corrupt journal record: {0}")]
    Corrupt(String),

    /// Another process holds the sidecar lock for this origin
    #[error("origin is already mounted: {0}")]
    AlreadyMounted(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Construct an explicit POSIX error
    pub fn errno(code: i32) -> Self {
        Error::Errno(code)
    }

    /// The positive errno value to report to the kernel for this error
    pub fn to_errno(&self) -> i32 {
        match self {
            Error::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
            Error::Db(_) | Error::Corrupt(_) => libc::EIO,
            Error::Errno(code) => *code,
            Error::AlreadyMounted(_) => libc::EBUSY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_keeps_errno() {
        let err = Error::from(io::Error::from_raw_os_error(libc::ENOENT));
        assert_eq!(err.to_errno(), libc::ENOENT);
    }

    #[test]
    fn test_io_error_without_errno_is_eio() {
        let err = Error::from(io::Error::new(io::ErrorKind::Other, "synthetic"));
        assert_eq!(err.to_errno(), libc::EIO);
    }

    #[test]
    fn test_db_error_is_eio() {
        let err = Error::from(rusqlite::Error::InvalidQuery);
        assert_eq!(err.to_errno(), libc::EIO);
    }

    #[test]
    fn test_explicit_errno() {
        assert_eq!(Error::errno(libc::EACCES).to_errno(), libc::EACCES);
    }
}
