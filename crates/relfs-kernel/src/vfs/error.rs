//! VFS error types.

use std::io;
use thiserror::Error;

use crate::pool::BackendError;

/// VFS error type.
#[derive(Debug, Error)]
pub enum VfsError {
    /// Schema, relation, row or column not found, or the relation has no
    /// single-column primary key.
    #[error("not found: {0}")]
    NotFound(String),

    /// Permission denied.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Expected a directory.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// Expected a file.
    #[error("is a directory: {0}")]
    IsADirectory(String),

    /// Invalid path.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// The database could not service the request. Retryable.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// A commit updated zero rows; the row vanished after it was resolved.
    /// The pending buffer is kept.
    #[error("commit conflict: {0}")]
    CommitConflict(String),

    /// Buffered content cannot be stored as text.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// A pending buffer would grow past its limit.
    #[error("file too large: {0}")]
    FileTooLarge(String),

}

impl VfsError {
    /// Create a NotFound error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    /// Create a PermissionDenied error.
    pub fn permission_denied(path: impl Into<String>) -> Self {
        Self::PermissionDenied(path.into())
    }

    /// Create a NotADirectory error.
    pub fn not_a_directory(path: impl Into<String>) -> Self {
        Self::NotADirectory(path.into())
    }

    /// Create an IsADirectory error.
    pub fn is_a_directory(path: impl Into<String>) -> Self {
        Self::IsADirectory(path.into())
    }

    /// Create an InvalidPath error.
    pub fn invalid_path(path: impl Into<String>) -> Self {
        Self::InvalidPath(path.into())
    }

    /// Create a CommitConflict error.
    pub fn commit_conflict(path: impl Into<String>) -> Self {
        Self::CommitConflict(path.into())
    }

    /// Returns true if the caller may retry the same operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::BackendUnavailable(_) | Self::CommitConflict(_))
    }

    /// Returns true for a NotFound error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<BackendError> for VfsError {
    fn from(e: BackendError) -> Self {
        Self::BackendUnavailable(e.to_string())
    }
}

/// Convert VfsError to std::io::Error for compatibility.
impl From<VfsError> for io::Error {
    fn from(e: VfsError) -> Self {
        match e {
            VfsError::NotFound(msg) => io::Error::new(io::ErrorKind::NotFound, msg),
            VfsError::PermissionDenied(msg) => {
                io::Error::new(io::ErrorKind::PermissionDenied, msg)
            }
            VfsError::NotADirectory(msg) => io::Error::new(io::ErrorKind::NotADirectory, msg),
            VfsError::IsADirectory(msg) => io::Error::new(io::ErrorKind::IsADirectory, msg),
            VfsError::InvalidPath(msg) => io::Error::new(io::ErrorKind::InvalidInput, msg),
            VfsError::BackendUnavailable(msg) => io::Error::other(msg),
            VfsError::CommitConflict(msg) => io::Error::other(msg),
            VfsError::InvalidData(msg) => io::Error::new(io::ErrorKind::InvalidData, msg),
            VfsError::FileTooLarge(msg) => io::Error::new(io::ErrorKind::FileTooLarge, msg),
        }
    }
}

/// VFS result type.
pub type VfsResult<T> = Result<T, VfsError>;
