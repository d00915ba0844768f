//! # On-disk data structures
//!
//! Every disk image carries one full copy of this layout:
//! superblock | inode bitmap | data bitmap | padding to block alignment |
//! inode table | data block region

mod super_block;
pub use super_block::SuperBlock;

mod bitmap;
pub use bitmap::Bitmap;

mod inode;
pub use inode::{Inode, DIRECT_COUNT, INDIRECT_COUNT, KIND_DIR, KIND_FILE, KIND_MASK, MAX_FILE_BLOCKS};

mod dir_entry;
pub use dir_entry::{DirEntry, NAME_MAX};
