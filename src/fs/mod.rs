//! FUSE passthrough host
//!
//! Exposes a real directory tree through a mount point, forwarding every
//! operation to it while driving the protection filter from the open, write,
//! and release callbacks.

mod handle;
mod inode;
mod passthrough;
mod volume;

pub use handle::{FileHandle, HandleManager};
pub use inode::{InodeTable, Node, NodeAttributes, NodeKind};
pub use passthrough::SentinelFs;
pub use volume::{Volume, VolumeDirEntry};
