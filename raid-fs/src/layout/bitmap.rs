use crate::disk::Disk;
use crate::error::Result;

const WORD_BYTES: usize = 4;
const WORD_BITS: u64 = 32;

/// Location of one allocation bitmap inside a disk's metadata region.
///
/// The bitmap itself lives on disk; this is a cheap handle that can be
/// pointed at any member of the set. `bits` is always a multiple of 32,
/// so scans work on whole little-endian words.
#[derive(Debug, Clone, Copy)]
pub struct Bitmap {
    offset: u64,
    bits: u64,
}

impl Bitmap {
    pub fn new(offset: u64, bits: u64) -> Self {
        Self { offset, bits }
    }

    #[inline]
    fn byte_len(&self) -> usize {
        (self.bits / 8) as usize
    }

    pub fn get(&self, disk: &Disk, index: u64) -> Result<bool> {
        let byte = disk.bytes(self.offset + index / 8, 1)?[0];
        Ok(byte & (1 << (index % 8)) != 0)
    }

    pub fn set(&self, disk: &mut Disk, index: u64) -> Result<()> {
        let byte = &mut disk.bytes_mut(self.offset + index / 8, 1)?[0];
        *byte |= 1 << (index % 8);
        Ok(())
    }

    pub fn clear(&self, disk: &mut Disk, index: u64) -> Result<()> {
        let byte = &mut disk.bytes_mut(self.offset + index / 8, 1)?[0];
        *byte &= !(1 << (index % 8));
        Ok(())
    }

    /// First-fit allocation on a single disk.
    pub fn alloc(&self, disk: &mut Disk) -> Result<Option<u64>> {
        let found = {
            let bytes = disk.bytes(self.offset, self.byte_len())?;
            Self::first_clear(bytes.chunks_exact(WORD_BYTES).map(word))
        };
        if let Some(index) = found {
            self.set(disk, index)?;
        }
        Ok(found)
    }

    /// First-fit over the union of every disk's bitmap: the returned index
    /// is clear on all of them, and gets set on all of them.
    pub fn alloc_on_all(&self, disks: &mut [Disk]) -> Result<Option<u64>> {
        let words = self.byte_len() / WORD_BYTES;
        let mut found = None;
        'scan: for wi in 0..words {
            let mut merged = 0u32;
            for disk in disks.iter() {
                merged |= word(disk.bytes(self.offset + (wi * WORD_BYTES) as u64, WORD_BYTES)?);
            }
            if merged != u32::MAX {
                found = Some(wi as u64 * WORD_BITS + u64::from(merged.trailing_ones()));
                break 'scan;
            }
        }
        if let Some(index) = found {
            for disk in disks.iter_mut() {
                self.set(disk, index)?;
            }
        }
        Ok(found)
    }

    pub fn count_ones(&self, disk: &Disk) -> Result<u64> {
        let bytes = disk.bytes(self.offset, self.byte_len())?;
        Ok(bytes.iter().map(|b| u64::from(b.count_ones())).sum())
    }

    fn first_clear(words: impl Iterator<Item = u32>) -> Option<u64> {
        for (wi, w) in words.enumerate() {
            if w != u32::MAX {
                return Some(wi as u64 * WORD_BITS + u64::from(w.trailing_ones()));
            }
        }
        None
    }
}

#[inline]
fn word(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}
