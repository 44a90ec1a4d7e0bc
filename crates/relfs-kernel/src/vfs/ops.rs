//! VFS operations trait.
//!
//! Path-based, no inodes, explicit offset/size, so a kernel adapter can map
//! its own inode table onto paths.

use async_trait::async_trait;
use std::path::Path;

use super::types::{DirEntry, FileAttr};
use super::VfsResult;

/// Core VFS operations trait.
///
/// Paths are relative to the filesystem root; a leading `/` is accepted.
/// There are no create/remove operations: every node is derived from the
/// database and only discovered, never made.
#[async_trait]
pub trait VfsOps: Send + Sync {
    // ========================================================================
    // Reading
    // ========================================================================

    /// Get file attributes.
    async fn getattr(&self, path: &Path) -> VfsResult<FileAttr>;

    /// Read directory entries.
    ///
    /// Returns all entries in the directory (no pagination).
    async fn readdir(&self, path: &Path) -> VfsResult<Vec<DirEntry>>;

    /// Read file contents.
    ///
    /// Reads up to `size` bytes starting at `offset`.
    /// Returns fewer bytes if EOF is reached.
    async fn read(&self, path: &Path, offset: u64, size: u32) -> VfsResult<Vec<u8>>;

    // ========================================================================
    // Writing
    // ========================================================================

    /// Write data to a file's pending buffer.
    ///
    /// Returns the number of bytes accepted. Nothing reaches the database
    /// until [`flush`](Self::flush) or [`fsync`](Self::fsync).
    async fn write(&self, path: &Path, offset: u64, data: &[u8]) -> VfsResult<u32>;

    /// Truncate a file's pending buffer to the specified size.
    async fn truncate(&self, path: &Path, size: u64) -> VfsResult<()>;

    /// Commit pending writes for a file.
    async fn flush(&self, path: &Path) -> VfsResult<()>;

    /// Commit pending writes for a file. Same contract as `flush`.
    async fn fsync(&self, path: &Path) -> VfsResult<()>;

    /// Drop pending writes for a file without committing them.
    ///
    /// Returns true if anything was pending.
    async fn discard(&self, path: &Path) -> VfsResult<bool>;

    // ========================================================================
    // Metadata
    // ========================================================================

    /// Returns true if this filesystem is read-only.
    fn read_only(&self) -> bool;

    // ========================================================================
    // Convenience methods (default implementations)
    // ========================================================================

    /// Check if a path exists.
    async fn exists(&self, path: &Path) -> bool {
        self.getattr(path).await.is_ok()
    }

    /// Read entire file contents.
    async fn read_all(&self, path: &Path) -> VfsResult<Vec<u8>> {
        let attr = self.getattr(path).await?;
        self.read(path, 0, attr.size.min(u32::MAX as u64) as u32).await
    }

    /// Replace a file's contents and commit.
    ///
    /// All or nothing: if the write or the commit fails, the pending buffer
    /// is discarded so no later flush can commit a partial replacement.
    async fn write_all(&self, path: &Path, data: &[u8]) -> VfsResult<()> {
        self.truncate(path, 0).await?;
        let result = match self.write(path, 0, data).await {
            Ok(_) => self.flush(path).await,
            Err(e) => Err(e),
        };
        if result.is_err() {
            self.discard(path).await.ok();
        }
        result
    }
}
