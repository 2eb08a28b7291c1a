//! Error types for archive, filesystem and serving operations.
//!
//! Filesystem errors carry the operation and the path the handle was opened
//! with, so messages read like `read /img/circle.png: file closed`.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The path is not present in the archive.
    #[error("open {path}: file does not exist")]
    NotFound { path: String },

    /// A directory operation was attempted on a regular file.
    #[error("{op} {path}: not a directory")]
    NotADirectory { op: &'static str, path: String },

    /// A content operation was attempted on a directory.
    #[error("{op} {path}: is a directory")]
    IsADirectory { op: &'static str, path: String },

    /// The handle, or the filesystem it came from, has been closed.
    #[error("{op} {path}: file closed")]
    FileClosed { op: &'static str, path: String },

    #[error("filesystem closed")]
    FilesystemClosed,

    /// Neither store (0) nor deflate (8).
    #[error("unsupported zip method: {0}")]
    UnsupportedCompressionMethod(u16),

    #[error("{name}: checksum mismatch")]
    Checksum { name: String },

    #[error("not a valid zip file: {0}")]
    InvalidArchive(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidArchive(msg.into())
    }

    /// True for the closed-handle and closed-filesystem cases.
    pub fn is_closed(&self) -> bool {
        matches!(self, Error::FileClosed { .. } | Error::FilesystemClosed)
    }
}
