use std::mem;

use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::raid::RaidMode;
use crate::{BLOCK_SIZE, MAGIC};

/// Allocation counts are rounded up to a multiple of this at format time,
/// so both bitmaps come out whole words long.
const COUNT_ROUND: u64 = 32;

/// Fixed header at offset 0 of every disk image.
///
/// All disks of one filesystem carry byte-identical superblocks except for
/// the trailing `disk_id`; [`SuperBlock::agrees_with`] checks exactly that.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromZeroes, FromBytes, AsBytes)]
pub struct SuperBlock {
    magic: u32,
    raid: u32,
    pub inode_count: u64,
    pub data_block_count: u64,
    /// Byte offset of the inode bitmap.
    pub inode_bitmap: u64,
    /// Byte offset of the data-block bitmap.
    pub data_bitmap: u64,
    /// Byte offset of the inode table, block-aligned.
    pub inode_table: u64,
    /// Byte offset of the data block region.
    pub data_region: u64,
    /// Filesystem instance id, shared by every disk of one set.
    pub fs_id: u32,
    /// Position of this disk within the set, unique per disk.
    pub disk_id: u32,
}

impl SuperBlock {
    pub const SIZE: usize = mem::size_of::<Self>();
    /// Bytes compared for cross-disk agreement: every field before `disk_id`.
    pub const COMMON_LEN: usize = Self::SIZE - mem::size_of::<u32>();

    pub fn new(
        mode: RaidMode,
        inode_count: u64,
        data_block_count: u64,
        fs_id: u32,
        disk_id: u32,
    ) -> Self {
        let inode_count = round_up(inode_count, COUNT_ROUND);
        let data_block_count = round_up(data_block_count, COUNT_ROUND);

        let inode_bitmap = Self::SIZE as u64;
        let data_bitmap = inode_bitmap + inode_count / 8;
        let inode_table = round_up(data_bitmap + data_block_count / 8, BLOCK_SIZE as u64);
        let data_region = inode_table + inode_count * BLOCK_SIZE as u64;

        Self {
            magic: MAGIC,
            raid: mode.as_raw(),
            inode_count,
            data_block_count,
            inode_bitmap,
            data_bitmap,
            inode_table,
            data_region,
            fs_id,
            disk_id,
        }
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.magic == MAGIC
    }

    #[inline]
    pub fn mode(&self) -> Option<RaidMode> {
        RaidMode::from_raw(self.raid)
    }

    /// Smallest image size able to hold the declared layout.
    #[inline]
    pub fn required_len(&self) -> u64 {
        self.data_region + self.data_block_count * BLOCK_SIZE as u64
    }

    /// Byte offset of an inode slot; slots are block-sized.
    #[inline]
    pub fn inode_pos(&self, num: u32) -> u64 {
        self.inode_table + u64::from(num) * BLOCK_SIZE as u64
    }

    /// Byte offset of a data block given its bitmap index.
    #[inline]
    pub fn data_ptr(&self, index: u64) -> u64 {
        self.data_region + index * BLOCK_SIZE as u64
    }

    /// Bitmap index of a data-block pointer, if it lands on a block
    /// boundary inside the data region.
    pub fn data_index(&self, ptr: u64) -> Option<u64> {
        let rel = ptr.checked_sub(self.data_region)?;
        if rel % BLOCK_SIZE as u64 != 0 {
            return None;
        }
        let index = rel / BLOCK_SIZE as u64;
        (index < self.data_block_count).then_some(index)
    }

    pub fn agrees_with(&self, other: &Self) -> bool {
        self.as_bytes()[..Self::COMMON_LEN] == other.as_bytes()[..Self::COMMON_LEN]
    }
}

#[inline]
fn round_up(n: u64, to: u64) -> u64 {
    n.div_ceil(to) * to
}
