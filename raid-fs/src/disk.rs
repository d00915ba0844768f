//! # Disk image layer
//!
//! A [`Disk`] is one image file mapped read-write in full. The mapping is
//! the sole store of truth: every structure is read from and written back
//! into it directly, and durability is the host's responsibility.
//!
//! All accessors take byte offsets and validate them against the mapping
//! bounds before touching memory; an on-disk pointer that escapes the
//! region surfaces as [`Error::Corrupted`] instead of a wild dereference.

use std::fs::OpenOptions;
use std::io;
use std::mem;
use std::ops::Range;
use std::path::Path;

use memmap2::MmapMut;
use zerocopy::{AsBytes, FromBytes};

use crate::error::{Error, Result};

pub struct Disk {
    map: MmapMut,
}

impl Disk {
    /// Maps an existing image file read-write.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        // Safety: the map is private to this process for the lifetime of
        // the mount; concurrent truncation of the image is not supported.
        let map = unsafe { MmapMut::map_mut(&file)? };
        Ok(Self { map })
    }

    #[inline]
    pub fn len(&self) -> u64 {
        self.map.len() as u64
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn bytes(&self, offset: u64, len: usize) -> Result<&[u8]> {
        let range = self.range(offset, len)?;
        Ok(&self.map[range])
    }

    pub fn bytes_mut(&mut self, offset: u64, len: usize) -> Result<&mut [u8]> {
        let range = self.range(offset, len)?;
        Ok(&mut self.map[range])
    }

    /// Copies a fixed-layout structure out of the mapping.
    pub fn read_obj<T: FromBytes>(&self, offset: u64) -> Result<T> {
        let bytes = self.bytes(offset, mem::size_of::<T>())?;
        T::read_from(bytes).ok_or(Error::Corrupted)
    }

    /// Writes a fixed-layout structure into the mapping.
    pub fn write_obj<T: AsBytes>(&mut self, offset: u64, value: &T) -> Result<()> {
        let bytes = self.bytes_mut(offset, mem::size_of::<T>())?;
        bytes.copy_from_slice(value.as_bytes());
        Ok(())
    }

    pub fn fill_zero(&mut self, offset: u64, len: usize) -> Result<()> {
        self.bytes_mut(offset, len)?.fill(0);
        Ok(())
    }

    /// Synchronously writes the mapping back to the image file.
    pub fn flush(&self) -> io::Result<()> {
        self.map.flush()
    }

    fn range(&self, offset: u64, len: usize) -> Result<Range<usize>> {
        let start = usize::try_from(offset).map_err(|_| Error::Corrupted)?;
        let end = start.checked_add(len).ok_or(Error::Corrupted)?;
        if end > self.map.len() {
            return Err(Error::Corrupted);
        }
        Ok(start..end)
    }
}
