//! A single-node block storage engine: a fixed size virtual disk, a block
//! allocator over it and inode based files using direct and single indirect
//! block pointers.
//!
//! The engine performs no locking. Callers that share one instance must
//! serialize access to it themselves.
mod alloc;
mod fs;
pub mod io;
mod node;
mod sb;

pub use crate::alloc::{BlockManager, State};
pub use crate::fs::{
    Error, Geometry, InodeManager, Result, BLOCK_NUM, BLOCK_SIZE, INODE_NUM, ROOT_INUM,
};
pub use crate::node::{
    Attributes, FileType, Inode, INODES_PER_BLOCK, MAXFILE, MAX_FILE_SIZE, NDIRECT, NINDIRECT,
};
pub use crate::sb::SuperBlock;
