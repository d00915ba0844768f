//! # Operation surface
//!
//! Path-addressed operations over a mounted [`RaidFileSystem`]: the eight
//! calls a host (FUSE or otherwise) needs, plus path resolution and the
//! directory entry machinery behind them.
//!
//! All paths are absolute. Methods taking `&mut self` mutate the images;
//! callers wanting serialization wrap the filesystem in a lock.

use enumflags2::bitflags;
use log::debug;
use zerocopy::{AsBytes, FromZeroes};

use crate::error::{Error, Result};
use crate::layout::{DirEntry, Inode, KIND_DIR, KIND_FILE, KIND_MASK, MAX_FILE_BLOCKS, NAME_MAX};
use crate::raid::{checksum, majority, RaidMode};
use crate::rfs::{unix_now, RaidFileSystem};
use crate::{BLOCK_SIZE, ROOT_INODE};

#[bitflags]
#[repr(u32)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StatKind {
    DIR = 0o040000,
    #[default]
    FILE = 0o100000,
}

impl StatKind {
    fn from_mode(mode: u32) -> Result<Self> {
        match mode & KIND_MASK {
            KIND_DIR => Ok(Self::DIR),
            KIND_FILE => Ok(Self::FILE),
            _ => Err(Error::Corrupted),
        }
    }
}

/// Attributes of one inode, as [`RaidFileSystem::getattr`] reports them.
#[derive(Debug, Clone, Copy)]
pub struct Stat {
    pub ino: u32,
    pub kind: StatKind,
    /// Permission bits only; the kind bits live in `kind`.
    pub perm: u32,
    pub links: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
}

impl Stat {
    fn of(inode: &Inode) -> Result<Self> {
        Ok(Self {
            ino: inode.num,
            kind: StatKind::from_mode(inode.mode)?,
            perm: inode.mode & 0o7777,
            links: inode.links,
            uid: inode.uid,
            gid: inode.gid,
            size: inode.size,
            atime: inode.atime,
            mtime: inode.mtime,
            ctime: inode.ctime,
        })
    }
}

/// One name produced by [`RaidFileSystem::readdir`].
#[derive(Debug, Clone)]
pub struct Dirent {
    pub ino: u32,
    pub kind: StatKind,
    pub name: String,
}

impl RaidFileSystem {
    pub fn getattr(&self, path: &str) -> Result<Stat> {
        let num = self.resolve(path)?;
        Stat::of(&self.live_inode(num)?)
    }

    /// Lists a directory: `.` and `..` first, then every live entry.
    pub fn readdir(&self, path: &str) -> Result<Vec<Dirent>> {
        debug!("readdir {path}");
        let num = self.resolve(path)?;
        let dir = self.live_inode(num)?;
        if !dir.is_dir() {
            return Err(Error::NotADirectory);
        }
        let parent = if is_root(path) {
            ROOT_INODE
        } else {
            let (parent_path, _) = split_parent(path)?;
            self.resolve(parent_path)?
        };

        let mut out = vec![
            Dirent { ino: num, kind: StatKind::DIR, name: ".".into() },
            Dirent { ino: parent, kind: StatKind::DIR, name: "..".into() },
        ];
        let mut offset = 0;
        while offset < dir.size {
            let entry = self.read_entry(&dir, offset)?;
            offset += DirEntry::SIZE as u64;
            if entry.is_free() || matches!(entry.name(), "." | "..") {
                continue;
            }
            let child = self.live_inode(entry.inode())?;
            out.push(Dirent {
                ino: entry.inode(),
                kind: StatKind::from_mode(child.mode)?,
                name: entry.name().to_owned(),
            });
        }
        Ok(out)
    }

    /// Reads up to `buf.len()` bytes starting at `offset`, clamped to the
    /// file's size. A hole inside the span ends the read early.
    pub fn read(&self, path: &str, offset: u64, buf: &mut [u8]) -> Result<usize> {
        debug!("read {path} offset={offset} len={}", buf.len());
        let num = self.resolve(path)?;
        let inode = self.live_inode(num)?;
        if inode.is_dir() {
            return Err(Error::IsADirectory);
        }
        if self.mode() == RaidMode::MirroredVerified {
            return self.read_verified(&inode, offset, buf);
        }
        self.read_plain(&inode, offset, buf, None)
    }

    /// Writes `data` at `offset`, allocating blocks as needed and growing
    /// the file. Writes past the maximum file span fail with
    /// [`Error::InvalidArgument`] before touching anything.
    pub fn write(&mut self, path: &str, offset: u64, data: &[u8]) -> Result<usize> {
        debug!("write {path} offset={offset} len={}", data.len());
        let num = self.resolve(path)?;
        let inode = self.live_inode(num)?;
        if inode.is_dir() {
            return Err(Error::IsADirectory);
        }
        if offset + data.len() as u64 > (MAX_FILE_BLOCKS * BLOCK_SIZE) as u64 {
            return Err(Error::InvalidArgument);
        }

        let mut pos = offset;
        let mut written = 0;
        while written < data.len() {
            let in_block = (pos % BLOCK_SIZE as u64) as usize;
            let chunk = (BLOCK_SIZE - in_block).min(data.len() - written);
            let addr = self.resolve_block(num, pos)?;
            let block_index = (pos / BLOCK_SIZE as u64) as usize;
            let place = self.placement(false, block_index);
            self.write_data(addr, place, &data[written..written + chunk])?;
            pos += chunk as u64;
            written += chunk;
        }

        let end = offset + data.len() as u64;
        let now = unix_now();
        self.update_inode(num, |i| {
            if end > i.size {
                i.size = end;
            }
            i.mtime = now;
            i.ctime = now;
        })?;
        Ok(written)
    }

    /// Creates an empty regular file. The name must not be taken; that
    /// check runs before any allocation.
    pub fn mknod(&mut self, path: &str, perm: u32, uid: u32, gid: u32) -> Result<()> {
        debug!("mknod {path} perm={perm:o}");
        let (parent_path, name) = split_parent(path)?;
        let parent = self.resolve(parent_path)?;
        let num = self.create_inode(parent, name, KIND_FILE | (perm & 0o7777), uid, gid, 1)?;
        if let Err(e) = self.insert_entry(parent, num, name) {
            // a failed create must not leak the fresh inode
            let _ = self.free_inode(num);
            return Err(e);
        }
        Ok(())
    }

    /// Creates a directory seeded with real `.` and `..` entries.
    pub fn mkdir(&mut self, path: &str, perm: u32, uid: u32, gid: u32) -> Result<()> {
        debug!("mkdir {path} perm={perm:o}");
        let (parent_path, name) = split_parent(path)?;
        let parent = self.resolve(parent_path)?;
        let num = self.create_inode(parent, name, KIND_DIR | (perm & 0o7777), uid, gid, 0)?;
        let seeded = self
            .insert_entry(num, num, ".")
            .and_then(|_| self.insert_entry(num, parent, ".."))
            .and_then(|_| self.insert_entry(parent, num, name));
        if let Err(e) = seeded {
            let _ = self.release_blocks(num);
            let _ = self.free_inode(num);
            return Err(e);
        }
        Ok(())
    }

    /// Removes a regular file. The inode and its blocks are freed once the
    /// link count hits zero.
    pub fn unlink(&mut self, path: &str) -> Result<()> {
        debug!("unlink {path}");
        let (parent_path, name) = split_parent(path)?;
        let parent = self.resolve(parent_path)?;
        let num = self
            .dir_lookup(&self.live_inode(parent)?, name)?
            .ok_or(Error::NotFound)?;
        if self.live_inode(num)?.is_dir() {
            return Err(Error::IsADirectory);
        }

        self.remove_entry(parent, num)?;
        let links = self.update_inode(num, |i| i.links = i.links.saturating_sub(1))?.links;
        if links == 0 {
            self.release_blocks(num)?;
            self.free_inode(num)?;
        }
        Ok(())
    }

    /// Removes a directory, together with whatever it still contains;
    /// emptiness is the caller's contract, not a precondition here.
    pub fn rmdir(&mut self, path: &str) -> Result<()> {
        debug!("rmdir {path}");
        let (parent_path, name) = split_parent(path)?;
        let parent = self.resolve(parent_path)?;
        let num = self
            .dir_lookup(&self.live_inode(parent)?, name)?
            .ok_or(Error::NotFound)?;
        if !self.live_inode(num)?.is_dir() {
            return Err(Error::NotADirectory);
        }

        self.release_blocks(num)?;
        self.remove_entry(parent, num)?;
        self.free_inode(num)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // path resolution

    /// Walks an absolute path from the root, one component at a time.
    pub fn resolve(&self, path: &str) -> Result<u32> {
        if !path.starts_with('/') {
            return Err(Error::InvalidArgument);
        }
        let mut current = ROOT_INODE;
        for component in path.split('/').filter(|c| !c.is_empty()) {
            let dir = self.live_inode(current)?;
            if !dir.is_dir() {
                return Err(Error::NotADirectory);
            }
            current = self.dir_lookup(&dir, component)?.ok_or(Error::NotFound)?;
        }
        Ok(current)
    }

    // ------------------------------------------------------------------
    // file I/O internals

    /// `disk` pins the source for mirrored verification; `None` lets the
    /// placement pick.
    fn read_plain(
        &self,
        inode: &Inode,
        offset: u64,
        buf: &mut [u8],
        disk: Option<usize>,
    ) -> Result<usize> {
        let end = (offset + buf.len() as u64).min(inode.size);
        if offset >= end {
            return Ok(0);
        }

        let mut pos = offset;
        let mut read = 0;
        while pos < end {
            let in_block = (pos % BLOCK_SIZE as u64) as usize;
            let chunk = (BLOCK_SIZE - in_block).min((end - pos) as usize);
            let Some(addr) = self.peek_block(inode, pos)? else {
                // hole: logical end of the data
                break;
            };
            let block_index = (pos / BLOCK_SIZE as u64) as usize;
            let from = disk.unwrap_or_else(|| self.data_read_disk(inode.is_dir(), block_index));
            buf[read..read + chunk].copy_from_slice(self.disk(from).bytes(addr, chunk)?);
            pos += chunk as u64;
            read += chunk;
        }
        Ok(read)
    }

    /// Mirrored-verified read: pull the span from every disk, checksum the
    /// copies, serve the majority.
    fn read_verified(&self, inode: &Inode, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let mut copies = Vec::with_capacity(self.disk_count());
        let mut sums = Vec::with_capacity(self.disk_count());
        for disk in 0..self.disk_count() {
            let mut copy = vec![0; buf.len()];
            let n = self.read_plain(inode, offset, &mut copy, Some(disk))?;
            copy.truncate(n);
            sums.push(checksum(&copy));
            copies.push(copy);
        }
        let winner = majority(&sums);
        debug!("verified read served from disk {winner}");
        let data = &copies[winner];
        buf[..data.len()].copy_from_slice(data);
        Ok(data.len())
    }

    // ------------------------------------------------------------------
    // directory internals

    fn dir_lookup(&self, dir: &Inode, name: &str) -> Result<Option<u32>> {
        let mut offset = 0;
        while offset < dir.size {
            let entry = self.read_entry(dir, offset)?;
            if !entry.is_free() && entry.name() == name {
                return Ok(Some(entry.inode()));
            }
            offset += DirEntry::SIZE as u64;
        }
        Ok(None)
    }

    fn read_entry(&self, dir: &Inode, offset: u64) -> Result<DirEntry> {
        // directory data is replicated, disk 0 always has it
        let addr = self.peek_block(dir, offset)?.ok_or(Error::Corrupted)?;
        self.disk(0).read_obj(addr)
    }

    /// Allocates the inode after checking the target name is free.
    fn create_inode(
        &mut self,
        parent: u32,
        name: &str,
        mode: u32,
        uid: u32,
        gid: u32,
        links: u32,
    ) -> Result<u32> {
        let dir = self.live_inode(parent)?;
        if !dir.is_dir() {
            return Err(Error::NotADirectory);
        }
        if self.dir_lookup(&dir, name)?.is_some() {
            return Err(Error::AlreadyExists);
        }
        let num = self.alloc_inode()?;
        let inode = Inode::init(num, mode, uid, gid, links, unix_now());
        self.write_inode_all(&inode)?;
        Ok(num)
    }

    /// Writes an entry into the first free slot, extending the directory
    /// by one slot when none is tombstoned. Bumps the directory's link
    /// count per live entry.
    fn insert_entry(&mut self, dir_num: u32, child: u32, name: &str) -> Result<()> {
        let dir = self.live_inode(dir_num)?;
        let mut slot = dir.size;
        let mut offset = 0;
        while offset < dir.size {
            if self.read_entry(&dir, offset)?.is_free() {
                slot = offset;
                break;
            }
            offset += DirEntry::SIZE as u64;
        }

        let addr = self.resolve_block(dir_num, slot)?;
        let entry = DirEntry::new(name, child);
        let place = self.placement(true, (slot / BLOCK_SIZE as u64) as usize);
        self.write_data(addr, place, entry.as_bytes())?;

        let grew = slot == dir.size;
        self.update_inode(dir_num, |i| {
            if grew {
                i.size += DirEntry::SIZE as u64;
            }
            i.links += 1;
        })?;
        Ok(())
    }

    /// Tombstones the entry naming `child` by zeroing its whole slot, and
    /// drops the directory's link count accordingly.
    fn remove_entry(&mut self, dir_num: u32, child: u32) -> Result<()> {
        let dir = self.live_inode(dir_num)?;
        let mut offset = 0;
        while offset < dir.size {
            let entry = self.read_entry(&dir, offset)?;
            if !entry.is_free() && entry.inode() == child && !matches!(entry.name(), "." | "..") {
                let addr = self.peek_block(&dir, offset)?.ok_or(Error::Corrupted)?;
                let tombstone = DirEntry::new_zeroed();
                let place = self.placement(true, (offset / BLOCK_SIZE as u64) as usize);
                self.write_data(addr, place, tombstone.as_bytes())?;
                self.update_inode(dir_num, |i| i.links = i.links.saturating_sub(1))?;
                return Ok(());
            }
            offset += DirEntry::SIZE as u64;
        }
        Err(Error::NotFound)
    }
}

#[inline]
fn is_root(path: &str) -> bool {
    path.split('/').all(str::is_empty)
}

/// Splits an absolute path into its parent path and final component,
/// validating the component against the entry name limits.
fn split_parent(path: &str) -> Result<(&str, &str)> {
    if !path.starts_with('/') {
        return Err(Error::InvalidArgument);
    }
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        // the root itself has no parent
        return Err(Error::InvalidArgument);
    }
    let (parent, name) = trimmed.rsplit_once('/').ok_or(Error::InvalidArgument)?;
    if name.is_empty() || name.len() > NAME_MAX || matches!(name, "." | "..") {
        return Err(Error::InvalidArgument);
    }
    Ok((if parent.is_empty() { "/" } else { parent }, name))
}
