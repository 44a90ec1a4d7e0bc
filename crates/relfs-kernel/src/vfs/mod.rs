//! Virtual Filesystem surface.
//!
//! Key components:
//!
//! - [`VfsOps`] - Path-based filesystem operations a kernel adapter drives
//! - [`FileAttr`], [`DirEntry`] - What the adapter reports back to the OS
//! - [`VfsError`] - Error taxonomy, convertible to `std::io::Error`
//!
//! ## Design Decisions
//!
//! - **Path-based, no inodes**: Operations use paths, not inode numbers.
//!   FUSE clients handle inode ↔ path mapping locally.
//! - **Explicit offset/size**: Read/write take offset and size, so handle
//!   state lives in the write buffer keyed by path, not in the adapter.

mod error;
mod ops;
mod types;

pub use error::{VfsError, VfsResult};
pub use ops::VfsOps;
pub use types::{DirEntry, FileAttr, FileType, Owner};
