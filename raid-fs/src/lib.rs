/* raid-fs, top-down */

// Operation surface: path resolution, directories, file I/O
mod vfs;

// Disk manager: mount/format, allocators, inode store, block resolver
mod rfs;

// RAID placement policy and read recovery
mod raid;

// On-disk data structures
pub mod layout;

// One memory-mapped disk image
mod disk;

mod error;

pub use self::{
    disk::Disk,
    error::{Error, Result},
    raid::RaidMode,
    rfs::RaidFileSystem,
    vfs::{Dirent, Stat, StatKind},
};

pub const MAGIC: u32 = 0x52414946;
pub const BLOCK_SIZE: usize = 512;

/// Inode number of the root directory, allocated at format time.
pub const ROOT_INODE: u32 = 0;
