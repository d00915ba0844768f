use std::path::PathBuf;

use clap::Parser;
use raid_fs::RaidMode;
use typed_bytesize::ByteSizeIec;

/// Formats a set of disk images as one RAID filesystem.
#[derive(Parser)]
pub struct Cli {
    /// RAID mode: 0 (striped), 1 (mirrored) or 1v (mirrored, verified reads)
    #[arg(long, short)]
    pub raid: RaidMode,

    /// Disk image, repeatable; listing order assigns disk ids
    #[arg(long, short, required = true)]
    pub disk: Vec<PathBuf>,

    /// Number of inodes (rounded up to a multiple of 32)
    #[arg(long, short)]
    pub inodes: u64,

    /// Number of data blocks (rounded up to a multiple of 32)
    #[arg(long, short)]
    pub blocks: u64,

    /// Create or resize each image to this size first, e.g. `32MiB`
    #[arg(long, short)]
    pub size: Option<ByteSizeIec>,
}
