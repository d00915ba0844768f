use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::BLOCK_SIZE;

/// Direct block pointers per inode.
pub const DIRECT_COUNT: usize = 7;
/// Pointer capacity of the single indirect block.
pub const INDIRECT_COUNT: usize = BLOCK_SIZE / 8;
/// Hard limit on a file's logical span, in blocks.
pub const MAX_FILE_BLOCKS: usize = DIRECT_COUNT + INDIRECT_COUNT;

pub const KIND_MASK: u32 = 0o170000;
pub const KIND_DIR: u32 = 0o040000;
pub const KIND_FILE: u32 = 0o100000;

/// One inode. Slots in the inode table are block-sized; the tail of each
/// slot past this structure stays zero.
///
/// Block pointers are absolute byte offsets into a disk image, valid on
/// every disk that hosts the block. Zero means unallocated.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromZeroes, FromBytes, AsBytes)]
pub struct Inode {
    pub num: u32,
    /// Kind bits plus permissions, Unix-style.
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    /// Logical size in bytes.
    pub size: u64,
    pub links: u32,
    _pad: u32,
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
    pub direct: [u64; DIRECT_COUNT],
    /// Pointer to a block of [`INDIRECT_COUNT`] further pointers.
    pub indirect: u64,
}

impl Inode {
    /// On-disk stride of one inode slot.
    pub const STRIDE: usize = BLOCK_SIZE;

    pub fn init(num: u32, mode: u32, uid: u32, gid: u32, links: u32, now: i64) -> Self {
        Self {
            num,
            mode,
            uid,
            gid,
            size: 0,
            links,
            _pad: 0,
            atime: now,
            mtime: now,
            ctime: now,
            direct: [0; DIRECT_COUNT],
            indirect: 0,
        }
    }

    #[inline]
    pub fn is_dir(&self) -> bool {
        self.mode & KIND_MASK == KIND_DIR
    }

    #[inline]
    pub fn is_file(&self) -> bool {
        self.mode & KIND_MASK == KIND_FILE
    }
}
