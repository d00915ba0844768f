//! # Disk set manager
//!
//! Owns the mapped images, the superblock, and both allocators, and turns
//! (inode, byte offset) pairs into absolute disk addresses. Everything the
//! operation surface in [`crate::vfs`] does goes through here.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, error, info};

use crate::disk::Disk;
use crate::error::{Error, Result};
use crate::layout::{
    Bitmap, Inode, SuperBlock, DIRECT_COUNT, INDIRECT_COUNT, KIND_DIR, MAX_FILE_BLOCKS,
};
use crate::raid::{Placement, RaidMode};
use crate::{BLOCK_SIZE, ROOT_INODE};

pub struct RaidFileSystem {
    /// Indexed by the disk id embedded in each superblock.
    disks: Vec<Disk>,
    sb: SuperBlock,
    mode: RaidMode,
    inode_bitmap: Bitmap,
    data_bitmap: Bitmap,
}

impl RaidFileSystem {
    /// Writes a fresh filesystem onto every image in `paths`.
    ///
    /// Requested counts are rounded up to a multiple of 32. Each image must
    /// already be large enough for the resulting layout. Returns the
    /// generated filesystem id.
    pub fn format(
        paths: &[impl AsRef<Path>],
        mode: RaidMode,
        inodes: u64,
        data_blocks: u64,
        uid: u32,
        gid: u32,
    ) -> Result<u32> {
        if inodes == 0 || data_blocks == 0 {
            return Err(Error::InvalidArgument);
        }
        if paths.len() < mode.min_disks() {
            error!(
                "RAID {mode} needs at least {} disk(s), got {}",
                mode.min_disks(),
                paths.len()
            );
            return Err(Error::InvalidArgument);
        }

        let now = unix_now();
        let fs_id = now as u32;
        for (id, path) in paths.iter().enumerate() {
            let sb = SuperBlock::new(mode, inodes, data_blocks, fs_id, id as u32);
            let mut disk = Disk::open(path.as_ref())?;
            if disk.len() < sb.required_len() {
                error!(
                    "{} is {} bytes, layout needs {}",
                    path.as_ref().display(),
                    disk.len(),
                    sb.required_len()
                );
                return Err(Error::InvalidArgument);
            }
            disk.fill_zero(0, sb.data_region as usize)?;
            disk.write_obj(0, &sb)?;

            let root = Inode::init(ROOT_INODE, KIND_DIR | 0o755, uid, gid, 1, now);
            disk.write_obj(sb.inode_pos(ROOT_INODE), &root)?;
            Bitmap::new(sb.inode_bitmap, sb.inode_count).set(&mut disk, u64::from(ROOT_INODE))?;
            disk.flush()?;
        }

        info!("formatted {} disk(s), RAID {mode}, fs id {fs_id:#x}", paths.len());
        Ok(fs_id)
    }

    /// Opens an existing disk set.
    ///
    /// Every image must carry a superblock matching the others in all
    /// fields but the disk id, and the ids must form a permutation of
    /// `0..paths.len()`. Disks are reordered into id order, so the mount
    /// command may list them in any order.
    pub fn mount(paths: &[impl AsRef<Path>]) -> Result<Self> {
        if paths.is_empty() {
            return Err(Error::InvalidArgument);
        }

        let mut opened = Vec::with_capacity(paths.len());
        for path in paths {
            opened.push(Disk::open(path.as_ref())?);
        }

        let sb: SuperBlock = opened[0].read_obj(0)?;
        if !sb.is_valid() {
            error!("{} has no filesystem signature", paths[0].as_ref().display());
            return Err(Error::InvalidArgument);
        }
        let mode = sb.mode().ok_or(Error::Corrupted)?;
        if paths.len() < mode.min_disks() {
            error!(
                "RAID {mode} needs at least {} disk(s), got {}",
                mode.min_disks(),
                paths.len()
            );
            return Err(Error::InvalidArgument);
        }

        let mut slots: Vec<Option<Disk>> = (0..opened.len()).map(|_| None).collect();
        for (i, disk) in opened.into_iter().enumerate() {
            let other: SuperBlock = disk.read_obj(0)?;
            if !sb.agrees_with(&other) {
                error!("{} belongs to a different disk set", paths[i].as_ref().display());
                return Err(Error::InvalidArgument);
            }
            if disk.len() < sb.required_len() {
                error!("{} is shorter than its own layout", paths[i].as_ref().display());
                return Err(Error::Corrupted);
            }
            let id = other.disk_id as usize;
            match slots.get_mut(id) {
                Some(slot @ None) => *slot = Some(disk),
                _ => {
                    error!(
                        "disk id {} out of range or duplicated, expected a permutation of 0..{}",
                        other.disk_id,
                        paths.len()
                    );
                    return Err(Error::InvalidArgument);
                }
            }
        }
        let disks: Vec<Disk> = slots.into_iter().flatten().collect();

        let fs = Self {
            disks,
            sb,
            mode,
            inode_bitmap: Bitmap::new(sb.inode_bitmap, sb.inode_count),
            data_bitmap: Bitmap::new(sb.data_bitmap, sb.data_block_count),
        };
        for disk in 0..fs.disks.len() {
            let root = fs.read_inode_on(disk, ROOT_INODE)?.ok_or(Error::Corrupted)?;
            if !root.is_dir() {
                return Err(Error::Corrupted);
            }
        }

        info!(
            "mounted fs {:#x}: {} disk(s), RAID {mode}, {} inodes, {} data blocks",
            fs.sb.fs_id, fs.disks.len(), fs.sb.inode_count, fs.sb.data_block_count
        );
        Ok(fs)
    }

    #[inline]
    pub fn mode(&self) -> RaidMode {
        self.mode
    }

    #[inline]
    pub fn disk_count(&self) -> usize {
        self.disks.len()
    }

    #[inline]
    pub fn inode_count(&self) -> u64 {
        self.sb.inode_count
    }

    #[inline]
    pub fn data_block_count(&self) -> u64 {
        self.sb.data_block_count
    }

    pub fn free_inodes(&self) -> Result<u64> {
        // inode bitmaps never diverge across the set
        Ok(self.sb.inode_count - self.inode_bitmap.count_ones(&self.disks[0])?)
    }

    /// Free data blocks on the fullest member. Striping lets the per-disk
    /// bitmaps drift apart, and a replicated allocation needs room on all
    /// of them, so the pessimistic figure is the honest one.
    pub fn free_data_blocks(&self) -> Result<u64> {
        let mut max_used = 0;
        for disk in &self.disks {
            max_used = max_used.max(self.data_bitmap.count_ones(disk)?);
        }
        Ok(self.sb.data_block_count - max_used)
    }

    /// Writes every mapping back to its image file.
    pub fn sync(&self) -> Result<()> {
        for disk in &self.disks {
            disk.flush()?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // inode store

    pub(crate) fn read_inode_on(&self, disk: usize, num: u32) -> Result<Option<Inode>> {
        if u64::from(num) >= self.sb.inode_count {
            return Err(Error::Corrupted);
        }
        if !self.inode_bitmap.get(&self.disks[disk], u64::from(num))? {
            return Ok(None);
        }
        Ok(Some(self.disks[disk].read_obj(self.sb.inode_pos(num))?))
    }

    /// The inode behind a directory entry; a number whose bitmap bit is
    /// clear is a dangling reference.
    pub(crate) fn live_inode(&self, num: u32) -> Result<Inode> {
        self.read_inode_on(0, num)?.ok_or(Error::NotFound)
    }

    /// Read-modify-write of one inode, mirrored onto every disk.
    pub(crate) fn update_inode(&mut self, num: u32, f: impl FnOnce(&mut Inode)) -> Result<Inode> {
        let mut inode = self.live_inode(num)?;
        f(&mut inode);
        self.write_inode_all(&inode)?;
        Ok(inode)
    }

    pub(crate) fn write_inode_all(&mut self, inode: &Inode) -> Result<()> {
        let pos = self.sb.inode_pos(inode.num);
        for disk in &mut self.disks {
            disk.write_obj(pos, inode)?;
        }
        Ok(())
    }

    pub(crate) fn alloc_inode(&mut self) -> Result<u32> {
        let index = self
            .inode_bitmap
            .alloc_on_all(&mut self.disks)?
            .ok_or(Error::NoSpace)?;
        debug!("alloc inode {index}");
        Ok(index as u32)
    }

    /// Zeroes the slot on every disk and returns the number to the bitmap.
    pub(crate) fn free_inode(&mut self, num: u32) -> Result<()> {
        debug!("free inode {num}");
        let pos = self.sb.inode_pos(num);
        let bitmap = self.inode_bitmap;
        for disk in &mut self.disks {
            disk.fill_zero(pos, Inode::STRIDE)?;
            bitmap.clear(disk, u64::from(num))?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // data blocks

    fn alloc_data(&mut self, place: Placement) -> Result<u64> {
        let index = match place {
            Placement::One(disk) => self.data_bitmap.alloc(&mut self.disks[disk])?,
            Placement::All => self.data_bitmap.alloc_on_all(&mut self.disks)?,
        }
        .ok_or(Error::NoSpace)?;
        Ok(self.sb.data_ptr(index))
    }

    fn free_data(&mut self, ptr: u64, place: Placement) -> Result<()> {
        let index = self.sb.data_index(ptr).ok_or(Error::Corrupted)?;
        let bitmap = self.data_bitmap;
        match place {
            Placement::One(disk) => {
                self.disks[disk].fill_zero(ptr, BLOCK_SIZE)?;
                bitmap.clear(&mut self.disks[disk], index)?;
            }
            Placement::All => {
                for disk in &mut self.disks {
                    disk.fill_zero(ptr, BLOCK_SIZE)?;
                    bitmap.clear(disk, index)?;
                }
            }
        }
        Ok(())
    }

    /// The disk a plain read of this block is served from.
    pub(crate) fn data_read_disk(&self, dir: bool, block_index: usize) -> usize {
        self.mode
            .place_data(dir, block_index, self.disks.len())
            .read_disk()
    }

    pub(crate) fn disk(&self, index: usize) -> &Disk {
        &self.disks[index]
    }

    /// Writes one span of a data block to every disk its placement names.
    pub(crate) fn write_data(
        &mut self,
        addr: u64,
        place: Placement,
        bytes: &[u8],
    ) -> Result<()> {
        match place {
            Placement::One(disk) => {
                self.disks[disk].bytes_mut(addr, bytes.len())?.copy_from_slice(bytes);
            }
            Placement::All => {
                for disk in &mut self.disks {
                    disk.bytes_mut(addr, bytes.len())?.copy_from_slice(bytes);
                }
            }
        }
        Ok(())
    }

    pub(crate) fn placement(&self, dir: bool, block_index: usize) -> Placement {
        self.mode.place_data(dir, block_index, self.disks.len())
    }

    // ------------------------------------------------------------------
    // block resolver

    /// Maps a byte offset within an inode's data to an absolute disk
    /// address, without allocating. `None` marks a hole.
    pub(crate) fn peek_block(&self, inode: &Inode, offset: u64) -> Result<Option<u64>> {
        let block_index = (offset / BLOCK_SIZE as u64) as usize;
        if block_index >= MAX_FILE_BLOCKS {
            return Err(Error::InvalidArgument);
        }
        let rem = offset % BLOCK_SIZE as u64;

        let ptr = if block_index < DIRECT_COUNT {
            inode.direct[block_index]
        } else if inode.indirect == 0 {
            0
        } else {
            let slot = inode.indirect + ((block_index - DIRECT_COUNT) * 8) as u64;
            self.disks[0].read_obj(slot)?
        };
        Ok((ptr != 0).then_some(ptr + rem))
    }

    /// Like [`Self::peek_block`] but fills holes: missing data blocks are
    /// allocated per the RAID placement, a missing indirect block is
    /// replicated on every disk, and new pointers are written back to all
    /// copies of the metadata.
    pub(crate) fn resolve_block(&mut self, num: u32, offset: u64) -> Result<u64> {
        let inode = self.live_inode(num)?;
        let block_index = (offset / BLOCK_SIZE as u64) as usize;
        if block_index >= MAX_FILE_BLOCKS {
            return Err(Error::InvalidArgument);
        }
        let rem = offset % BLOCK_SIZE as u64;

        let ptr = if block_index < DIRECT_COUNT {
            let mut ptr = inode.direct[block_index];
            if ptr == 0 {
                let place = self.placement(inode.is_dir(), block_index);
                ptr = self.alloc_data(place)?;
                self.update_inode(num, |i| i.direct[block_index] = ptr)?;
            }
            ptr
        } else {
            let mut indirect = inode.indirect;
            if indirect == 0 {
                indirect = self.alloc_data(Placement::All)?;
                self.update_inode(num, |i| i.indirect = indirect)?;
            }
            let slot = indirect + ((block_index - DIRECT_COUNT) * 8) as u64;
            let mut ptr: u64 = self.disks[0].read_obj(slot)?;
            if ptr == 0 {
                let place = self.placement(inode.is_dir(), block_index);
                ptr = self.alloc_data(place)?;
                for disk in &mut self.disks {
                    disk.write_obj(slot, &ptr)?;
                }
            }
            ptr
        };
        Ok(ptr + rem)
    }

    /// Frees every data block of an inode, the indirect block included,
    /// and resets its pointers and size.
    pub(crate) fn release_blocks(&mut self, num: u32) -> Result<()> {
        let inode = self.live_inode(num)?;
        let dir = inode.is_dir();

        for block_index in 0..DIRECT_COUNT {
            let ptr = inode.direct[block_index];
            if ptr != 0 {
                let place = self.placement(dir, block_index);
                self.free_data(ptr, place)?;
            }
        }
        if inode.indirect != 0 {
            for i in 0..INDIRECT_COUNT {
                let ptr: u64 = self.disks[0].read_obj(inode.indirect + (i * 8) as u64)?;
                if ptr != 0 {
                    let place = self.placement(dir, DIRECT_COUNT + i);
                    self.free_data(ptr, place)?;
                }
            }
            self.free_data(inode.indirect, Placement::All)?;
        }

        self.update_inode(num, |i| {
            i.direct = [0; DIRECT_COUNT];
            i.indirect = 0;
            i.size = 0;
        })?;
        Ok(())
    }
}

impl Drop for RaidFileSystem {
    fn drop(&mut self) {
        if let Err(e) = self.sync() {
            error!("flush on drop failed: {e}");
        }
    }
}

pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
