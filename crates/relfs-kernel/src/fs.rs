//! The filesystem facade.
//!
//! [`RelationalFs`] owns the catalog, the write buffers and the presentation
//! settings. Paths are resolved one segment at a time from the root on every
//! call; there is no node cache.

use async_trait::async_trait;
use std::path::{Component, Path};
use std::sync::Arc;

use crate::buffer::WriteBufferStore;
use crate::catalog::Catalog;
use crate::config::{Config, FilesystemConfig};
use crate::node::Node;
use crate::pool::{BackendResult, ConnectionPool};
use crate::vfs::{DirEntry, FileAttr, Owner, VfsError, VfsOps, VfsResult};

/// A database presented as a directory tree.
///
/// ```text
/// /                       schemas
/// /main                   relations with a single-column primary key
/// /main/users             rows, named by primary key
/// /main/users/7           columns
/// /main/users/7/email     cell content
/// ```
#[derive(Debug)]
pub struct RelationalFs {
    catalog: Catalog,
    buffers: WriteBufferStore,
    settings: FilesystemConfig,
    owner: Owner,
}

impl RelationalFs {
    pub fn new(pool: Arc<ConnectionPool>, settings: FilesystemConfig) -> Self {
        Self {
            catalog: Catalog::new(pool),
            buffers: WriteBufferStore::new(settings.max_buffer_bytes),
            settings,
            owner: Owner::current_process(),
        }
    }

    /// Open the connection pool described by `config` and build a filesystem
    /// on it.
    pub fn open(config: &Config) -> BackendResult<Self> {
        let pool = ConnectionPool::open(&config.database)?;
        Ok(Self::new(Arc::new(pool), config.filesystem.clone()))
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn buffers(&self) -> &WriteBufferStore {
        &self.buffers
    }

    pub fn settings(&self) -> &FilesystemConfig {
        &self.settings
    }

    pub fn owner(&self) -> Owner {
        self.owner
    }

    /// The root node. Needs no database access.
    pub fn root(&self) -> Node {
        Node::Root
    }

    /// Walk `path` from the root, looking up each segment in turn.
    ///
    /// `.` is skipped and `..` steps back to the parent (never above the
    /// root). Any other segment must exist at its level.
    pub async fn resolve(&self, path: &Path) -> VfsResult<Node> {
        let mut ancestors = Vec::new();
        let mut node = self.root();

        for component in path.components() {
            match component {
                Component::RootDir | Component::CurDir => {}
                Component::ParentDir => {
                    if let Some(parent) = ancestors.pop() {
                        node = parent;
                    }
                }
                Component::Normal(name) => {
                    let name = name
                        .to_str()
                        .ok_or_else(|| VfsError::not_found(path.display().to_string()))?;
                    let child = node.lookup(self, name).await?;
                    ancestors.push(std::mem::replace(&mut node, child));
                }
                Component::Prefix(_) => {
                    return Err(VfsError::invalid_path(path.display().to_string()));
                }
            }
        }

        Ok(node)
    }
}

#[async_trait]
impl VfsOps for RelationalFs {
    async fn getattr(&self, path: &Path) -> VfsResult<FileAttr> {
        self.resolve(path).await?.attr(self).await
    }

    async fn readdir(&self, path: &Path) -> VfsResult<Vec<DirEntry>> {
        self.resolve(path).await?.read_dir_all(self).await
    }

    async fn read(&self, path: &Path, offset: u64, size: u32) -> VfsResult<Vec<u8>> {
        let content = self.resolve(path).await?.read_all(self).await?;
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(content.len());
        let end = start.saturating_add(size as usize).min(content.len());
        Ok(content[start..end].to_vec())
    }

    async fn write(&self, path: &Path, offset: u64, data: &[u8]) -> VfsResult<u32> {
        self.resolve(path).await?.write(self, offset, data).await
    }

    async fn truncate(&self, path: &Path, size: u64) -> VfsResult<()> {
        self.resolve(path).await?.truncate(self, size).await
    }

    async fn flush(&self, path: &Path) -> VfsResult<()> {
        self.resolve(path).await?.flush(self).await
    }

    async fn fsync(&self, path: &Path) -> VfsResult<()> {
        self.resolve(path).await?.fsync(self).await
    }

    async fn discard(&self, path: &Path) -> VfsResult<bool> {
        self.resolve(path).await?.discard(self).await
    }

    fn read_only(&self) -> bool {
        self.settings.read_only
    }

    async fn read_all(&self, path: &Path) -> VfsResult<Vec<u8>> {
        self.resolve(path).await?.read_all(self).await
    }

    /// Resolves once, so the cleanup after a failed write or commit reaches
    /// the field even if its row has gone since.
    async fn write_all(&self, path: &Path, data: &[u8]) -> VfsResult<()> {
        let node = self.resolve(path).await?;
        node.truncate(self, 0).await?;
        let result = match node.write(self, 0, data).await {
            Ok(_) => node.flush(self).await,
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            let dropped = node.discard(self).await?;
            tracing::debug!(path = %node, dropped, error = %e, "replacement abandoned");
        }
        result
    }
}
