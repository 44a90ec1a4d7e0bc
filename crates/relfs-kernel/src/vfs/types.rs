//! Core VFS types.
//!
//! Path-based, no inodes. Attributes are synthesized per call from the
//! catalog; nothing here is cached between calls.

use serde::{Deserialize, Serialize};

/// File type enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileType {
    /// Regular file (one cell).
    File,
    /// Directory (root, schema, relation or row).
    Directory,
}

impl FileType {
    /// Returns true if this is a regular file.
    pub fn is_file(&self) -> bool {
        matches!(self, FileType::File)
    }

    /// Returns true if this is a directory.
    pub fn is_dir(&self) -> bool {
        matches!(self, FileType::Directory)
    }
}

/// File attributes (metadata).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAttr {
    /// Size in bytes.
    pub size: u64,
    /// File type.
    pub kind: FileType,
    /// Unix permissions (e.g., 0o644).
    pub perm: u32,
    /// Number of hard links.
    pub nlink: u32,
    /// Owning user ID.
    pub uid: u32,
    /// Owning group ID.
    pub gid: u32,
}

impl FileAttr {
    /// Attributes for a file owned by `owner`.
    pub fn file(size: u64, perm: u32, owner: Owner) -> Self {
        Self {
            size,
            kind: FileType::File,
            perm,
            nlink: 1,
            uid: owner.uid,
            gid: owner.gid,
        }
    }

    /// Attributes for a directory owned by `owner`.
    pub fn directory(perm: u32, owner: Owner) -> Self {
        Self {
            size: 0,
            kind: FileType::Directory,
            perm,
            nlink: 2, // . and ..
            uid: owner.uid,
            gid: owner.gid,
        }
    }

    /// Returns true if this is a regular file.
    pub fn is_file(&self) -> bool {
        self.kind.is_file()
    }

    /// Returns true if this is a directory.
    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }
}

/// Identity reported as the owner of every node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    pub uid: u32,
    pub gid: u32,
}

impl Owner {
    /// The effective user and group of the current process.
    #[cfg(unix)]
    pub fn current_process() -> Self {
        Self {
            uid: rustix::process::geteuid().as_raw(),
            gid: rustix::process::getegid().as_raw(),
        }
    }

    #[cfg(not(unix))]
    pub fn current_process() -> Self {
        Self { uid: 0, gid: 0 }
    }
}

/// Directory entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    /// Entry name (not full path).
    pub name: String,
    /// Entry type.
    pub kind: FileType,
}

impl DirEntry {
    /// Create a new directory entry.
    pub fn new(name: impl Into<String>, kind: FileType) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    /// Create a file entry.
    pub fn file(name: impl Into<String>) -> Self {
        Self::new(name, FileType::File)
    }

    /// Create a directory entry.
    pub fn directory(name: impl Into<String>) -> Self {
        Self::new(name, FileType::Directory)
    }

    /// The `.` and `..` entries.
    pub fn relative_pair() -> [Self; 2] {
        [Self::directory("."), Self::directory("..")]
    }

    /// Returns true for `.` and `..`.
    pub fn is_relative(&self) -> bool {
        self.name == "." || self.name == ".."
    }
}
