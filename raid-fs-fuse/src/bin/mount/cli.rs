use std::path::PathBuf;

use clap::Parser;

/// Mounts a formatted disk set through FUSE.
#[derive(Parser)]
pub struct Cli {
    /// Disk image, repeatable, in any order
    #[arg(long, short, required = true)]
    pub disk: Vec<PathBuf>,

    /// Where to mount the filesystem
    pub mountpoint: PathBuf,

    /// Unmount automatically when the process exits
    #[arg(long)]
    pub auto_unmount: bool,
}
