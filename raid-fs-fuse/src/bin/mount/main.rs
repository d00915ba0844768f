mod cli;
mod fs;

use std::io;
use std::process;

use clap::Parser;
use fuser::MountOption;
use raid_fs::RaidFileSystem;

use self::cli::Cli;
use self::fs::RaidFuse;

fn main() -> io::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let fs = match RaidFileSystem::mount(&cli.disk) {
        Ok(fs) => fs,
        Err(e) => {
            eprintln!("mount: {e}");
            process::exit(1);
        }
    };

    let mut options = vec![
        MountOption::FSName("raid-fs".to_owned()),
        MountOption::DefaultPermissions,
    ];
    if cli.auto_unmount {
        options.push(MountOption::AutoUnmount);
    }
    fuser::mount2(RaidFuse::new(fs), &cli.mountpoint, &options)
}
