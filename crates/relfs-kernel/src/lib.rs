//! # relfs-kernel
//!
//! A relational database presented as a read/write directory tree.
//!
//! The tree is derived from the catalog on every call:
//! - `/` lists schemas (the attached databases)
//! - a schema lists relations that have a single-column primary key
//! - a relation lists its rows, named by primary-key value
//! - a row lists its columns, and each column is a file holding the cell
//!
//! Writes collect in a per-field buffer and reach the database as one
//! `UPDATE` when the file is flushed or synced.

pub mod buffer;
pub mod catalog;
pub mod config;
pub mod fs;
pub mod node;
pub mod pool;
pub mod quote;
pub mod vfs;

pub use buffer::{FieldKey, WriteBufferStore, WriteMode};
pub use catalog::{Catalog, RowAddress};
pub use config::{Attachment, Config, ConfigError, DatabaseConfig, FilesystemConfig};
pub use fs::RelationalFs;
pub use node::{FieldNode, Node, RelationNode, RowNode, SchemaNode};
pub use pool::{BackendError, BackendResult, ConnectionPool};
pub use vfs::{DirEntry, FileAttr, FileType, Owner, VfsError, VfsOps, VfsResult};
