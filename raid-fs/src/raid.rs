//! # RAID engine
//!
//! Placement decides which disks host a given block. Metadata (inodes,
//! bitmaps, directory data, indirect blocks) is replicated on every disk
//! in all modes, so the same absolute pointer stays valid everywhere;
//! only file data is striped in [`RaidMode::Striped`].

use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum RaidMode {
    /// RAID 0: file data round-robins over the set by logical block index.
    Striped = 0,
    /// RAID 1: every block on every disk, reads served by disk 0.
    Mirrored = 1,
    /// RAID 1 with checksummed reads: each disk's copy is summed and the
    /// majority wins, so a single corrupt member is read around.
    MirroredVerified = 2,
}

impl RaidMode {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Striped),
            1 => Some(Self::Mirrored),
            2 => Some(Self::MirroredVerified),
            _ => None,
        }
    }

    #[inline]
    pub fn as_raw(self) -> u32 {
        self as u32
    }

    /// Mirroring is meaningless on a single disk.
    pub fn min_disks(self) -> usize {
        match self {
            Self::Striped => 1,
            Self::Mirrored | Self::MirroredVerified => 2,
        }
    }

    pub(crate) fn place_data(self, dir: bool, block_index: usize, disks: usize) -> Placement {
        match self {
            Self::Striped if !dir => Placement::One(block_index % disks),
            _ => Placement::All,
        }
    }
}

impl FromStr for RaidMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "0" => Ok(Self::Striped),
            "1" => Ok(Self::Mirrored),
            "1v" => Ok(Self::MirroredVerified),
            _ => Err(format!("unknown RAID mode `{s}`, expected 0, 1 or 1v")),
        }
    }
}

impl fmt::Display for RaidMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Striped => "0",
            Self::Mirrored => "1",
            Self::MirroredVerified => "1v",
        })
    }
}

/// Which disks of the set hold a data block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Placement {
    One(usize),
    All,
}

impl Placement {
    /// The disk a plain read is served from.
    #[inline]
    pub(crate) fn read_disk(self) -> usize {
        match self {
            Self::One(disk) => disk,
            Self::All => 0,
        }
    }
}

/// Additive byte checksum used to compare mirror copies. Not an integrity
/// check against crafted data, just a cheap disagreement detector.
pub(crate) fn checksum(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0u32, |sum, &b| sum.wrapping_add(u32::from(b)))
}

/// Index of the disk whose checksum belongs to the largest group of equal
/// checksums. Ties break to the lowest disk index.
pub(crate) fn majority(sums: &[u32]) -> usize {
    let mut winner = 0;
    let mut winner_count = 0;
    for (i, &sum) in sums.iter().enumerate() {
        let count = sums.iter().filter(|&&other| other == sum).count();
        if count > winner_count {
            winner = i;
            winner_count = count;
        }
    }
    winner
}
