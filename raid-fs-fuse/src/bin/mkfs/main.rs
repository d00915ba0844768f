mod cli;

use std::fs::OpenOptions;
use std::io;
use std::process;

use clap::Parser;
use raid_fs::RaidFileSystem;

use self::cli::Cli;

fn main() -> io::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    if let Some(size) = cli.size {
        for path in &cli.disk {
            let fd = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .open(path)?;
            fd.set_len(size.0)?;
        }
    }

    // files created by the mount inherit the formatter's identity
    let (uid, gid) = unsafe { (libc::getuid(), libc::getgid()) };
    match RaidFileSystem::format(&cli.disk, cli.raid, cli.inodes, cli.blocks, uid, gid) {
        Ok(fs_id) => {
            println!(
                "formatted {} disk(s): RAID {}, fs id {fs_id:#x}",
                cli.disk.len(),
                cli.raid
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("mkfs: {e}");
            process::exit(1);
        }
    }
}
